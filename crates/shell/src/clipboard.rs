//! Host clipboard access through whichever copy program is installed.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::debug;

/// Copy programs in preference order.
pub const CLIPBOARD_PROGRAMS: &[(&str, &[&str])] = &[
    ("pbcopy", &[]),
    ("xclip", &["-selection", "clipboard"]),
    ("xsel", &["--clipboard", "--input"]),
    ("clip.exe", &[]),
];

#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    #[error("no clipboard program found (tried pbcopy, xclip, xsel, clip.exe)")]
    Unavailable,
    #[error("{program} failed: {message}")]
    Failed { program: String, message: String },
}

pub trait Clipboard: Send + Sync {
    fn copy(&self, text: &str) -> Result<(), ClipboardError>;
}

/// Pipes text to the first program of [`CLIPBOARD_PROGRAMS`] found on PATH.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl SystemClipboard {
    fn program() -> Option<(&'static str, &'static [&'static str])> {
        CLIPBOARD_PROGRAMS
            .iter()
            .copied()
            .find(|(program, _)| which::which(program).is_ok())
    }
}

impl Clipboard for SystemClipboard {
    fn copy(&self, text: &str) -> Result<(), ClipboardError> {
        let (program, args) = Self::program().ok_or(ClipboardError::Unavailable)?;
        debug!(program, bytes = text.len(), "copying to clipboard");
        let failed = |message: String| ClipboardError::Failed {
            program: program.to_string(),
            message,
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| failed(e.to_string()))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .map_err(|e| failed(e.to_string()))?;
        }
        let output = child.wait_with_output().map_err(|e| failed(e.to_string()))?;
        if !output.status.success() {
            return Err(failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}
