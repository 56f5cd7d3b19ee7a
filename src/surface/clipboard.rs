//! Clipboard delivery for copied tab URLs.
//!
//! Best-effort: a missing or failing clipboard program is reported to the
//! caller, which logs it and carries on.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    #[error("clipboard command is empty")]
    NoCommand,
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("write to {program}: {source}")]
    Write {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    Status {
        program: String,
        status: std::process::ExitStatus,
    },
}

/// External program that takes clipboard content on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clipboard {
    program: String,
    args: Vec<String>,
}

impl Default for Clipboard {
    fn default() -> Self {
        Self {
            program: "xclip".to_string(),
            args: vec!["-selection".to_string(), "clipboard".to_string()],
        }
    }
}

impl Clipboard {
    /// From a `[program, args..]` list. Empty means the default.
    pub fn from_command(command: Option<&[String]>) -> Self {
        match command {
            Some([program, args @ ..]) => Self {
                program: program.clone(),
                args: args.to_vec(),
            },
            _ => Self::default(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Pipe `content` to the program and wait for it to exit.
    pub async fn copy(&self, content: &str) -> Result<(), ClipboardError> {
        if self.program.is_empty() {
            return Err(ClipboardError::NoCommand);
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ClipboardError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(content.as_bytes())
                .await
                .map_err(|source| ClipboardError::Write {
                    program: self.program.clone(),
                    source,
                })?;
            // Closing the pipe lets the program finish.
        }

        let status = child.wait().await.map_err(|source| ClipboardError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(ClipboardError::Status {
                program: self.program.clone(),
                status,
            })
        }
    }
}
