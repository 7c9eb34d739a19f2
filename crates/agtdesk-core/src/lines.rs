//! Reassembly of newline-delimited records from arbitrarily split chunks.

/// Upper bound on a buffered partial line.
pub const MAX_PARTIAL_LINE: usize = 1024 * 1024;

/// Buffers the trailing partial line of a chunked text stream.
#[derive(Debug, Clone, Default)]
pub struct LineAssembler {
    partial: String,
    /// Number of partial lines thrown away for exceeding the bound.
    discarded: u64,
    /// Set after a discard: input is dropped up to the next newline.
    skipping: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes, without terminators.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        if self.skipping {
            match rest.find('\n') {
                Some(pos) => {
                    self.skipping = false;
                    rest = &rest[pos + 1..];
                }
                None => return lines,
            }
        }
        while let Some(pos) = rest.find('\n') {
            let mut line = std::mem::take(&mut self.partial);
            line.push_str(&rest[..pos]);
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
            rest = &rest[pos + 1..];
        }

        if self.partial.len() + rest.len() > MAX_PARTIAL_LINE {
            self.partial.clear();
            self.discarded += 1;
            self.skipping = true;
        } else {
            self.partial.push_str(rest);
        }
        lines
    }

    /// Take whatever is buffered as a final line (used when the stream ends).
    pub fn flush(&mut self) -> Option<String> {
        self.skipping = false;
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }

    pub fn pending_len(&self) -> usize {
        self.partial.len()
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}
