//! Streaming model-output parsing.
//!
//! [`TokenSplitter`] separates a streamed model turn into prose (forwarded
//! to the session response queue) and inline tool-call JSON.
//! [`sentence::SentenceSplitter`] re-chunks prose into speakable sentences
//! for TTS.

pub mod sentence;

use serde_json::Value;
use tracing::trace;

/// A tool invocation extracted from the model stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Registered tool name.
    pub name: String,
    /// Parameter object; `{}` when the model supplied none.
    pub parameters: Value,
}

/// Splits a character stream into prose and balanced-brace tool JSON.
///
/// Fed incrementally with decoded token text. Prose characters pass
/// through in order; a balanced `{…}` object containing a string `name`
/// field is yielded as a [`ToolCall`] the moment its closing brace
/// arrives. Objects that fail to parse are dropped silently. Optional
/// fence detection suppresses extraction inside triple-backtick blocks.
pub struct TokenSplitter {
    fence_detection: bool,
    inside_code: bool,
    backticks: u8,
    collecting: bool,
    depth: u32,
    accumulator: String,
}

impl Default for TokenSplitter {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TokenSplitter {
    /// Create a splitter. `fence_detection` enables code-fence suppression.
    pub fn new(fence_detection: bool) -> Self {
        Self {
            fence_detection,
            inside_code: false,
            backticks: 0,
            collecting: false,
            depth: 0,
            accumulator: String::new(),
        }
    }

    /// Feed one decoded chunk.
    ///
    /// Returns the prose characters that became visible during this chunk
    /// and, if a complete tool call was recognized, the call itself. Tool
    /// detection is eager: characters after the closing brace of the first
    /// recognized call are abandoned, matching the one-tool-per-turn
    /// discipline.
    pub fn push(&mut self, chunk: &str) -> (String, Option<ToolCall>) {
        let mut prose = String::new();

        for ch in chunk.chars() {
            if self.fence_detection {
                if ch == '`' {
                    self.backticks += 1;
                    if self.backticks == 3 {
                        self.inside_code = !self.inside_code;
                        self.backticks = 0;
                    }
                } else {
                    self.backticks = 0;
                }
            }

            if ch == '{' && !self.inside_code {
                if !self.collecting {
                    self.collecting = true;
                    self.accumulator.clear();
                }
                self.depth += 1;
            }

            if self.collecting {
                self.accumulator.push(ch);
                if ch == '}' && !self.inside_code {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        let candidate = std::mem::take(&mut self.accumulator);
                        self.collecting = false;
                        if let Some(call) = parse_tool_call(&candidate) {
                            return (prose, Some(call));
                        }
                        trace!("dropped non-tool JSON object from stream");
                    }
                }
                continue;
            }

            if !self.inside_code {
                prose.push(ch);
            }
        }

        (prose, None)
    }
}

/// Attempt to parse a balanced-brace accumulator as a tool call.
///
/// Curly quotes are normalized to their ASCII equivalents first; small
/// local models emit them surprisingly often.
fn parse_tool_call(raw: &str) -> Option<ToolCall> {
    let normalized: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '\u{201c}' | '\u{201d}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect();

    let value: Value = serde_json::from_str(&normalized).ok()?;
    let name = value.get("name")?.as_str()?.to_owned();
    let parameters = value
        .get("parameters")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    Some(ToolCall { name, parameters })
}
