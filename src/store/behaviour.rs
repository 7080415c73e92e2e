//! Behaviour override rules.
//!
//! Short imperative rules the user (or the model, via tools) appends to
//! the prompt preamble. Persisted as `{"global": [...]}`. Writes go
//! through a temp-file-plus-rename swap so external editors and this
//! process can never observe a partial file; reads are gated on the file
//! mtime so external edits are picked up without polling.

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Maximum number of persisted rules.
pub const MAX_RULES: usize = 20;

/// Maximum length of a single rule in characters.
pub const MAX_RULE_CHARS: usize = 200;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RulesFile {
    #[serde(default)]
    global: Vec<String>,
}

#[derive(Debug, Default)]
struct Cached {
    rules: Vec<String>,
    mtime: Option<SystemTime>,
}

/// Persistent, mtime-cached behaviour rule store.
pub struct BehaviourStore {
    path: PathBuf,
    cached: Mutex<Cached>,
}

impl BehaviourStore {
    /// Open a store backed by the given JSON file (created on first write).
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cached: Mutex::new(Cached::default()),
        }
    }

    /// Current rules, reloading from disk if the file changed.
    pub fn list(&self) -> Vec<String> {
        let mut cached = self.cached.lock().expect("behaviour lock");
        self.reload_if_changed(&mut cached);
        cached.rules.clone()
    }

    /// Add a rule. Returns `false` when the rule was invalid, a duplicate,
    /// or the store is full.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Storage`] if persisting fails.
    pub fn add(&self, rule: &str) -> Result<bool> {
        let Some(rule) = sanitize(rule) else {
            return Ok(false);
        };
        let mut cached = self.cached.lock().expect("behaviour lock");
        self.reload_if_changed(&mut cached);

        if cached.rules.iter().any(|r| r == &rule) {
            return Ok(false);
        }
        if cached.rules.len() >= MAX_RULES {
            warn!("behaviour store full ({MAX_RULES} rules); rejecting new rule");
            return Ok(false);
        }
        cached.rules.push(rule);
        self.persist(&mut cached)?;
        Ok(true)
    }

    /// Remove a rule. Removing an absent rule is a no-op returning `false`.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Storage`] if persisting fails.
    pub fn remove(&self, rule: &str) -> Result<bool> {
        let needle = rule.trim();
        let mut cached = self.cached.lock().expect("behaviour lock");
        self.reload_if_changed(&mut cached);

        let before = cached.rules.len();
        cached.rules.retain(|r| r != needle);
        if cached.rules.len() == before {
            return Ok(false);
        }
        self.persist(&mut cached)?;
        Ok(true)
    }

    fn reload_if_changed(&self, cached: &mut Cached) {
        let mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();
        if mtime == cached.mtime && cached.mtime.is_some() {
            return;
        }
        match std::fs::read_to_string(&self.path) {
            Ok(text) => match serde_json::from_str::<RulesFile>(&text) {
                Ok(file) => {
                    let mut rules = Vec::new();
                    for rule in file.global {
                        if let Some(rule) = sanitize(&rule) {
                            if !rules.contains(&rule) && rules.len() < MAX_RULES {
                                rules.push(rule);
                            }
                        }
                    }
                    debug!(count = rules.len(), "reloaded behaviour rules");
                    cached.rules = rules;
                    cached.mtime = mtime;
                }
                Err(e) => warn!("behaviour file unparseable, keeping cached rules: {e}"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                cached.rules.clear();
                cached.mtime = mtime;
            }
            Err(e) => warn!("behaviour file unreadable, keeping cached rules: {e}"),
        }
    }

    fn persist(&self, cached: &mut Cached) -> Result<()> {
        let file = RulesFile {
            global: cached.rules.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| AssistantError::Storage(format!("behaviour serialize failed: {e}")))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AssistantError::Storage(format!("behaviour dir create failed: {e}")))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| AssistantError::Storage(format!("behaviour write failed: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| AssistantError::Storage(format!("behaviour rename failed: {e}")))?;

        cached.mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();
        Ok(())
    }
}

/// Trim and bound a rule. Returns `None` for empty or oversized input.
fn sanitize(rule: &str) -> Option<String> {
    let rule = rule.trim();
    if rule.is_empty() || rule.chars().count() > MAX_RULE_CHARS {
        return None;
    }
    Some(rule.to_owned())
}
