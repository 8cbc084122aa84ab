//! Boundary-preferring text chunker.
//!
//! Splits raw text into bounded-size chunks for embedding and retrieval.
//! Splitting prefers paragraph boundaries (`\n\n`), then sentence ends,
//! then whitespace, and only hard-cuts when no boundary exists inside the
//! tolerance window at the end of a chunk.
//!
//! Chunks are exact subslices of the input: concatenating them reproduces
//! the original text byte for byte, which lets the ingestion pipeline
//! rebuild a prior version's full text from its stored chunks.

/// Lazy iterator over chunks of a text.
///
/// Finite and restartable: it borrows the input, so calling
/// [`chunk_text`] again (or cloning the iterator before use) restarts the
/// sequence. Empty input yields no chunks.
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    remaining: &'a str,
    max_chars: usize,
}

/// Fraction of `max_chars` forming the tolerance window in which a natural
/// boundary is preferred over a hard cut.
const TOLERANCE_DIVISOR: usize = 2;

/// Split `text` into chunks of at most `max_chars` bytes.
///
/// # Panics
///
/// Panics if `max_chars` is zero.
pub fn chunk_text(text: &str, max_chars: usize) -> ChunkIter<'_> {
    assert!(max_chars > 0, "max_chars must be > 0");
    ChunkIter {
        remaining: text,
        max_chars,
    }
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.remaining.is_empty() {
            return None;
        }

        if self.remaining.len() <= self.max_chars {
            let rest = self.remaining;
            self.remaining = "";
            return Some(rest);
        }

        let cut = split_point(self.remaining, self.max_chars);
        let (chunk, rest) = self.remaining.split_at(cut);
        self.remaining = rest;
        Some(chunk)
    }
}

/// Find the byte offset at which to end the next chunk.
///
/// The offset is always a char boundary, always `> 0`, and at most
/// `max_chars` (except the degenerate case of a single multi-byte char
/// wider than the budget, where the full char is taken).
fn split_point(text: &str, max_chars: usize) -> usize {
    let hard_end = floor_char_boundary(text, max_chars);
    if hard_end == 0 {
        // Budget smaller than the first char; take the char whole.
        return text.chars().next().map(char::len_utf8).unwrap_or(0);
    }

    // Snap to a boundary: the raw offset may land inside a multi-byte char.
    let window_start =
        floor_char_boundary(text, hard_end.saturating_sub(max_chars / TOLERANCE_DIVISOR));
    let window = &text[window_start..hard_end];

    // Paragraph break: split after the blank line so the break stays with
    // the preceding chunk.
    if let Some(pos) = window.rfind("\n\n") {
        return window_start + pos + 2;
    }

    // Sentence end followed by whitespace.
    if let Some(pos) = rfind_sentence_end(window) {
        return window_start + pos;
    }

    if let Some(pos) = window.rfind('\n') {
        return window_start + pos + 1;
    }

    if let Some(pos) = window.rfind(' ') {
        return window_start + pos + 1;
    }

    hard_end
}

/// Byte offset just past the last `. ` / `! ` / `? ` in `window`, if any.
fn rfind_sentence_end(window: &str) -> Option<usize> {
    let bytes = window.as_bytes();
    for i in (1..bytes.len()).rev() {
        if bytes[i].is_ascii_whitespace() && matches!(bytes[i - 1], b'.' | b'!' | b'?') {
            return Some(i + 1);
        }
    }
    None
}

/// Largest char boundary `<= idx`.
fn floor_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concat(text: &str, max: usize) -> String {
        chunk_text(text, max).collect::<Vec<_>>().concat()
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert_eq!(chunk_text("", 100).count(), 0);
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks: Vec<_> = chunk_text("Hello, world!", 100).collect();
        assert_eq!(chunks, vec!["Hello, world!"]);
    }

    #[test]
    fn test_concatenation_is_lossless() {
        let text = "First paragraph.\n\nSecond paragraph with more words.\n\nThird one. And a sentence. Plus trailing text without boundaries aaaaaaaaaaaaaaaaaaaaaaaa";
        for max in [10, 16, 32, 57, 100, 4096] {
            assert_eq!(concat(text, max), text, "lossy at max_chars={}", max);
        }
    }

    #[test]
    fn test_no_chunk_exceeds_max() {
        let text = "word ".repeat(200) + "\n\n" + &"x".repeat(500);
        for max in [16, 40, 128] {
            for chunk in chunk_text(&text, max) {
                assert!(chunk.len() <= max, "chunk of {} > {}", chunk.len(), max);
            }
        }
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let text = "Alpha alpha alpha.\n\nBeta beta beta.";
        let chunks: Vec<_> = chunk_text(text, 24).collect();
        assert_eq!(chunks[0], "Alpha alpha alpha.\n\n");
        assert_eq!(chunks[1], "Beta beta beta.");
    }

    #[test]
    fn test_prefers_sentence_boundary_over_space() {
        let text = "One two. Three four five six seven";
        let chunks: Vec<_> = chunk_text(text, 12).collect();
        assert_eq!(chunks[0], "One two. ");
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let text = "a".repeat(25);
        let chunks: Vec<_> = chunk_text(&text, 10).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn test_utf8_boundaries_respected() {
        let text = "héllo wörld ünïcode ".repeat(10);
        for max in [7, 11, 23] {
            let chunks: Vec<_> = chunk_text(&text, max).collect();
            assert_eq!(chunks.concat(), text);
            for c in &chunks {
                assert!(!c.is_empty());
            }
        }
    }

    #[test]
    fn test_window_start_inside_multibyte_char() {
        // With 3-byte chars and max_chars = 16 the raw tolerance-window
        // offset lands mid-character and must be snapped, not sliced.
        let text = "€".repeat(10);
        let chunks: Vec<_> = chunk_text(&text, 16).collect();
        assert_eq!(chunks.concat(), text);
        for chunk in &chunks {
            assert!(chunk.len() <= 16);
            assert!(!chunk.is_empty());
        }

        for max in [4, 5, 7, 16, 17] {
            assert_eq!(concat(&"你好世界".repeat(8), max), "你好世界".repeat(8));
        }
    }

    #[test]
    fn test_restartable() {
        let text = "Para one.\n\nPara two.\n\nPara three.";
        let a: Vec<_> = chunk_text(text, 12).collect();
        let b: Vec<_> = chunk_text(text, 12).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_iterator_is_lazy() {
        // Taking the first chunk must not require walking the rest.
        let text = "x ".repeat(1_000_000);
        let first = chunk_text(&text, 64).next().unwrap();
        assert!(first.len() <= 64);
    }
}
