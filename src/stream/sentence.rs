//! Sentence re-chunking for streamed TTS.
//!
//! The response queue carries arbitrarily-sized prose chunks; the TTS
//! stage wants whole sentences. Boundaries: `!` or `?` followed by
//! whitespace, `.` followed by whitespace when not immediately followed
//! by a digit (so "3.14" stays intact), and newlines.

/// Accumulates prose chunks and yields complete sentences.
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    /// Create an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain any sentences it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut sentences = Vec::new();
        while let Some((end, skip)) = find_boundary(&self.buffer) {
            let sentence = self.buffer[..end].trim().to_owned();
            self.buffer.drain(..end + skip);
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
        }
        sentences
    }

    /// Drain whatever remains as a final sentence (end of turn).
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_owned())
        }
    }
}

/// Find the first sentence boundary.
///
/// Returns `(end, skip)` where `end` is the byte length of the sentence
/// (including terminal punctuation) and `skip` the bytes to discard after
/// it (the newline or boundary whitespace). `None` while the buffer may
/// still be extended into the pending sentence — terminal punctuation at
/// end-of-buffer does not split, since the next chunk could continue it.
fn find_boundary(text: &str) -> Option<(usize, usize)> {
    let mut chars = text.char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        if ch == '\n' {
            return Some((i, ch.len_utf8()));
        }
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        let Some(&(_, next)) = chars.peek() else {
            return None;
        };
        if !next.is_whitespace() {
            continue;
        }
        if ch == '.' && next.is_ascii_digit() {
            continue;
        }
        return Some((i + ch.len_utf8(), next.len_utf8()));
    }
    None
}
