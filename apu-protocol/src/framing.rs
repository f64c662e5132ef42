//! Newline-delimited record framing
//!
//! Each connection owns one [`LineBuffer`]. Bytes are appended as they arrive;
//! every complete record is handed out exactly once, in arrival order, and the
//! trailing partial record is retained for the next read.

use tracing::debug;

/// Append-only receive buffer that reassembles newline-terminated records
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    max_record: usize,
    /// Set after an oversize partial record was discarded; bytes are skipped
    /// until the next delimiter closes it.
    discarding: bool,
}

impl LineBuffer {
    pub fn new(max_record: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_record,
            discarding: false,
        }
    }

    /// Append a chunk and return every complete, non-empty record it closes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut records = Vec::new();
        let Some(last_newline) = self.buf.iter().rposition(|b| *b == b'\n') else {
            self.enforce_limit();
            return records;
        };

        let remainder = self.buf.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buf, remainder);

        for raw in complete.split(|b| *b == b'\n') {
            if self.discarding {
                // The first segment finishes the oversize record
                self.discarding = false;
                continue;
            }
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if raw.len() > self.max_record {
                debug!("Dropping oversize record ({} bytes)", raw.len());
                continue;
            }
            match std::str::from_utf8(raw) {
                Ok(s) => records.push(s.to_string()),
                Err(e) => debug!("Dropping non-UTF8 record: {}", e),
            }
        }

        self.enforce_limit();
        records
    }

    /// Bytes of the partial record currently held back
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn enforce_limit(&mut self) {
        if self.buf.len() > self.max_record {
            debug!("Discarding partial record over {} bytes", self.max_record);
            self.buf.clear();
            self.discarding = true;
        }
    }
}

/// Serialize a value as one newline-terminated record
pub fn encode_record<T: serde::Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}
