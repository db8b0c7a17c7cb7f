//! JSON-lines webhook reader
//!
//! One webhook body per line. Blank lines and lines starting with `#` are
//! skipped. Bodies are returned raw so that malformed events are rejected
//! by the caller like any other bad webhook.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use crate::types::EngineError;

/// A webhook body and the line it came from
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub line: u64,
    pub body: String,
}

pub struct EventReader<R> {
    lines: Lines<BufReader<R>>,
    line: u64,
}

impl EventReader<tokio::fs::File> {
    /// Open an events file
    pub async fn open(path: &Path) -> Result<Self, EngineError> {
        let file = tokio::fs::File::open(path).await.map_err(|e| EngineError::Io {
            message: format!("failed to open events file {}: {}", path.display(), e),
        })?;
        Ok(Self::new(file))
    }
}

impl<R: AsyncRead + Unpin> EventReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            line: 0,
        }
    }

    /// Next webhook body, `None` at end of input
    pub async fn next_event(&mut self) -> Result<Option<RawEvent>, EngineError> {
        while let Some(line) = self.lines.next_line().await? {
            self.line += 1;
            let body = line.trim();
            if body.is_empty() || body.starts_with('#') {
                continue;
            }
            return Ok(Some(RawEvent {
                line: self.line,
                body: body.to_string(),
            }));
        }
        Ok(None)
    }
}
