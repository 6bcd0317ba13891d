//! Paragraph-boundary text chunker for ingestion.
//!
//! Long source files are split into chunks of at most `max_chars` characters
//! before embedding, so each stored document covers one coherent passage.
//! Splitting prefers paragraph boundaries (`\n\n`); a single paragraph longer
//! than the limit is hard-split at the last whitespace before the limit.
//!
//! Lengths are measured in `char`s rather than bytes so Cyrillic and Latin
//! text get the same budget.
//!
//! # Example
//!
//! ```rust
//! use consult_core::chunk::split_into_chunks;
//!
//! let chunks = split_into_chunks("Hello world.\n\nSecond paragraph.", 2000);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].index, 0);
//! ```

/// One chunk of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Position within the source file, contiguous from 0.
    pub index: usize,
    pub text: String,
}

/// Split text into paragraph-aligned chunks of at most `max_chars` characters.
///
/// Whitespace-only input yields no chunks; callers skip such files.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<TextChunk> {
    let max_chars = max_chars.max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let para_chars = trimmed.chars().count();

        let would_be = if buf.is_empty() {
            para_chars
        } else {
            buf_chars + 2 + para_chars
        };
        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
            buf_chars = 0;
        }

        if para_chars > max_chars {
            pieces.extend(hard_split(trimmed, max_chars));
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
            buf_chars += 2;
        }
        buf.push_str(trimmed);
        buf_chars += para_chars;
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| TextChunk { index, text })
        .collect()
}

/// Split an oversized paragraph at whitespace, falling back to a raw cut.
fn hard_split(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = paragraph;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_chars {
            out.push(remaining.to_string());
            break;
        }
        let limit = byte_offset_of_char(remaining, max_chars);
        // Include the char at the limit: a space there is a clean cut.
        let head = &remaining[..byte_offset_of_char(remaining, max_chars + 1)];
        let cut = head
            .rfind(char::is_whitespace)
            .filter(|&pos| pos > 0)
            .unwrap_or(limit);
        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = remaining[cut..].trim_start();
    }

    out
}

fn byte_offset_of_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_into_chunks("Hello, world!", 2000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_blank_text_has_no_chunks() {
        assert!(split_into_chunks("", 2000).is_empty());
        assert!(split_into_chunks("  \n\n  ", 2000).is_empty());
    }

    #[test]
    fn test_paragraphs_packed_until_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = split_into_chunks(text, 36);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "First paragraph.\n\nSecond paragraph.");
        assert_eq!(chunks[1].text, "Third paragraph.");
    }

    #[test]
    fn test_long_paragraph_split_on_whitespace() {
        let text = "alpha beta gamma delta epsilon";
        let chunks = split_into_chunks(text, 11);
        for c in &chunks {
            assert!(c.text.chars().count() <= 11, "chunk too long: {:?}", c.text);
            assert!(!c.text.starts_with(' '));
        }
        let rejoined: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rejoined.join(" "), text);
    }

    #[test]
    fn test_cyrillic_counted_in_chars() {
        let text = "Минимальная сумма инвестиций";
        let chunks = split_into_chunks(text, 28);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_indices_contiguous_and_deterministic() {
        let text = (0..40)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let a = split_into_chunks(&text, 50);
        let b = split_into_chunks(&text, 50);
        assert_eq!(a, b);
        for (i, c) in a.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }
}
