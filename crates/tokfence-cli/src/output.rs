//! Output rendering.

use serde::Serialize;

/// How command results reach stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable lines.
    Pretty,
    /// One JSON document.
    Json,
}

/// Print a result either as JSON or through a pretty-printer closure.
pub fn emit<T: Serialize>(mode: OutputMode, value: &T, pretty: impl FnOnce(&T)) {
    match mode {
        OutputMode::Json => match serde_json::to_string_pretty(value) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => eprintln!("failed to render JSON: {e}"),
        },
        OutputMode::Pretty => pretty(value),
    }
}
