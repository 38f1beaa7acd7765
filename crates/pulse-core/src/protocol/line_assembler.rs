//! Reassembles whole lines from arbitrarily split serial chunks.
//!
//! A serial read returns whatever bytes happen to be in the driver buffer, so
//! one sensor line can arrive split across two reads (`"BP"` then
//! `"M: 72\r\n"`).  Parsing each chunk in isolation would drop that reading.
//! The assembler buffers the unterminated tail until its newline arrives.

use tracing::warn;

/// Longest unterminated tail kept between chunks.
pub const MAX_PENDING_LINE: usize = 1024;

/// Buffers partial input and yields complete lines.
///
/// Lines are returned without their `\n` terminator; a `\r` immediately
/// before the `\n` is stripped as well.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: String,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every line it completed, in order.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let mut lines = Vec::new();

        for segment in chunk.split_inclusive('\n') {
            self.pending.push_str(segment);
            if self.pending.ends_with('\n') {
                let mut line = std::mem::take(&mut self.pending);
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
                lines.push(line);
            }
        }

        if self.pending.len() > MAX_PENDING_LINE {
            warn!(
                "discarding {} buffered bytes without a line terminator",
                self.pending.len()
            );
            self.pending.clear();
        }

        lines
    }

    /// Returns the buffered, not yet terminated text.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Drops any buffered partial line.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
