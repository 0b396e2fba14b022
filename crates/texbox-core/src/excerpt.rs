//! Bounded, redacted compiler log excerpts

use tokio::io::{AsyncRead, AsyncReadExt};

/// Keeps only the last `cap` bytes written to it
#[derive(Debug)]
pub struct TailBuffer {
    buf: Vec<u8>,
    cap: usize,
}

impl TailBuffer {
    #[must_use]
    pub const fn new(cap: usize) -> Self {
        Self { buf: Vec::new(), cap }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.len() >= self.cap {
            self.buf.clear();
            self.buf.extend_from_slice(&chunk[chunk.len() - self.cap..]);
            return;
        }

        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.cap {
            let excess = self.buf.len() - self.cap;
            self.buf.drain(..excess);
        }
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Drain `reader` to EOF, keeping only the last `cap` bytes
///
/// # Errors
/// Propagates read errors from the underlying stream.
pub async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> std::io::Result<Vec<u8>> {
    let mut tail = TailBuffer::new(cap);
    let mut chunk = [0u8; 8 * 1024];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        tail.push(&chunk[..n]);
    }

    Ok(tail.into_bytes())
}

/// Renders raw compiler output into something safe to hand to callers
#[derive(Debug, Clone)]
pub struct LogExcerpt {
    max_lines: usize,
    max_bytes: usize,
    redactions: Vec<(String, &'static str)>,
}

impl LogExcerpt {
    #[must_use]
    pub const fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            max_lines,
            max_bytes,
            redactions: Vec::new(),
        }
    }

    /// Replace every occurrence of `secret` with `placeholder`
    #[must_use]
    pub fn redact(mut self, secret: impl Into<String>, placeholder: &'static str) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.redactions.push((secret, placeholder));
        }
        self
    }

    #[must_use]
    pub fn render(&self, raw: &[u8]) -> String {
        let mut text = String::from_utf8_lossy(raw).into_owned();

        // longest first, so a path is never half-replaced by one of its prefixes
        let mut redactions: Vec<_> = self.redactions.iter().collect();
        redactions.sort_by_key(|(secret, _)| std::cmp::Reverse(secret.len()));
        for (secret, placeholder) in redactions {
            text = text.replace(secret.as_str(), placeholder);
        }

        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(self.max_lines);
        let joined = lines[start..].join("\n");
        let trimmed = joined.trim();

        if trimmed.len() <= self.max_bytes {
            return trimmed.to_string();
        }

        let mut cut = trimmed.len() - self.max_bytes;
        while !trimmed.is_char_boundary(cut) {
            cut += 1;
        }
        format!("...{}", &trimmed[cut..])
    }
}
