//! Reassembly of line-delimited SSE frames from a chunked HTTP body.

use anyhow::Result;

/// Buffers partial lines across network chunks. Splitting happens on raw
/// bytes so a multi-byte character spanning two chunks never hits a partial
/// UTF-8 decode; a complete line always ends on a character boundary.
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed one network chunk, invoking `line_handler` for each complete
    /// line. Lines that are not valid UTF-8 are dropped, matching the wire
    /// protocol's tolerance for junk frames.
    pub fn process_chunk<F>(&mut self, chunk: &[u8], mut line_handler: F) -> Result<()>
    where
        F: FnMut(&str) -> Result<()>,
    {
        for &byte in chunk {
            if byte == b'\n' {
                if !self.buffer.is_empty() {
                    if let Ok(line) = std::str::from_utf8(&self.buffer) {
                        line_handler(line)?;
                    }
                    self.buffer.clear();
                }
            } else {
                self.buffer.push(byte);
            }
        }
        Ok(())
    }
}

/// Strip the SSE data marker from a line. Returns the payload, or `None`
/// for non-data lines (keep-alive comments), empty payloads, and the
/// `[DONE]` stream terminator.
pub fn sse_payload(line: &str) -> Option<&str> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    Some(payload)
}
