//! Live knowledge-base text.
//!
//! The knowledge file is re-read on every prompt assembly so operator
//! edits take effect immediately. A missing file contributes nothing; a
//! read failure injects a visible marker so the operator notices instead
//! of the prompt silently shrinking.

use std::path::Path;
use tracing::warn;

/// Read the knowledge file for prompt assembly.
pub fn read_knowledge(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            warn!(path = %path.display(), "knowledge file unreadable: {e}");
            format!("[knowledge file unreadable: {e}]")
        }
    }
}
