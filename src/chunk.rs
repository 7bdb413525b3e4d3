//! Deterministic sliding-window text chunker.
//!
//! Splits extracted document text into fixed-size windows measured in
//! **characters**, with a configurable overlap between consecutive windows.
//! Window `i` starts at `i * (chunk_size - overlap)`; the final window is
//! truncated to the remaining text, never padded. Boundaries depend only on
//! `(chunk_size, overlap, text)`, so re-chunking identical text yields an
//! identical `(chunk_index, start_offset, text)` sequence, and every chunk
//! gets the same deterministic id it had last time.

use crate::error::{Error, Result};
use crate::models::{chunk_id, Chunk};

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkParams {
    /// The overlap must be strictly smaller than the window, otherwise the
    /// window start would never advance.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk_size must be > 0".to_string()));
        }
        if overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Distance between consecutive window starts.
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Lazy, finite window iterator over one document's text. Restartable:
/// building a new iterator over the same inputs replays the same windows.
pub struct ChunkWindows {
    document_id: String,
    content_version: String,
    chars: Vec<char>,
    params: ChunkParams,
    next_index: usize,
}

impl Iterator for ChunkWindows {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let start = self.next_index * self.params.stride();
        if start >= self.chars.len() {
            return None;
        }
        let end = (start + self.params.chunk_size()).min(self.chars.len());
        let text: String = self.chars[start..end].iter().collect();

        let index = self.next_index;
        self.next_index += 1;

        Some(Chunk {
            chunk_id: chunk_id(&self.document_id, &self.content_version, index),
            document_id: self.document_id.clone(),
            content_version: self.content_version.clone(),
            chunk_index: index,
            start_offset: start,
            text,
        })
    }
}

/// Window iterator over `text` for one `(document_id, content_version)`.
pub fn windows(
    document_id: &str,
    content_version: &str,
    text: &str,
    params: ChunkParams,
) -> ChunkWindows {
    ChunkWindows {
        document_id: document_id.to_string(),
        content_version: content_version.to_string(),
        chars: text.chars().collect(),
        params,
        next_index: 0,
    }
}

/// Chunk a whole document. Empty text yields no chunks.
pub fn chunk_text(
    document_id: &str,
    content_version: &str,
    text: &str,
    params: ChunkParams,
) -> Vec<Chunk> {
    windows(document_id, content_version, text, params).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(size: usize, overlap: usize) -> ChunkParams {
        ChunkParams::new(size, overlap).unwrap()
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        assert!(ChunkParams::new(100, 100).is_err());
        assert!(ChunkParams::new(100, 150).is_err());
        assert!(ChunkParams::new(0, 0).is_err());
        assert!(ChunkParams::new(100, 99).is_ok());
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let chunks = chunk_text("doc", "v1", "", params(1000, 200));
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("doc", "v1", "hello", params(1000, 200));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].text, "hello");
    }

    #[test]
    fn test_window_offsets_2500_chars() {
        // 2500 chars at size 1000 / overlap 200 → starts 0, 800, 1600, 2400
        // and a 100-char final chunk.
        let text: String = std::iter::repeat('x').take(2500).collect();
        let chunks = chunk_text("doc", "v1", &text, params(1000, 200));

        assert_eq!(chunks.len(), 4);
        let starts: Vec<usize> = chunks.iter().map(|c| c.start_offset).collect();
        assert_eq!(starts, vec![0, 800, 1600, 2400]);
        assert_eq!(chunks[0].text.chars().count(), 1000);
        assert_eq!(chunks[3].text.chars().count(), 100);
    }

    #[test]
    fn test_chunk_count_matches_stride() {
        for len in [1usize, 799, 800, 801, 1000, 1600, 4000] {
            let text: String = std::iter::repeat('a').take(len).collect();
            let chunks = chunk_text("doc", "v1", &text, params(1000, 200));
            let expected = len.div_ceil(800);
            assert_eq!(chunks.len(), expected, "len={}", len);
        }
    }

    #[test]
    fn test_consecutive_windows_share_overlap() {
        let text: String = ('a'..='z').cycle().take(2000).collect();
        let chunks = chunk_text("doc", "v1", &text, params(500, 100));
        for pair in chunks.windows(2) {
            let head: String = pair[0].text.chars().skip(400).collect();
            let tail: String = pair[1].text.chars().take(100).collect();
            assert_eq!(head, tail);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Electricity usage for March was 412 kWh. Total due: $87.12.";
        let a = chunk_text("bills/acme.pdf", "etag-1", text, params(20, 5));
        let b = chunk_text("bills/acme.pdf", "etag-1", text, params(20, 5));
        assert_eq!(a, b);
        for (i, c) in a.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn test_multibyte_text_counted_in_chars() {
        // 10 two-byte characters; offsets and sizes are character counts,
        // not byte counts.
        let text: String = std::iter::repeat('é').take(10).collect();
        let chunks = chunk_text("doc", "v1", &text, params(4, 1));
        assert_eq!(chunks[0].text.chars().count(), 4);
        let starts: Vec<usize> = chunks.iter().map(|c| c.start_offset).collect();
        assert_eq!(starts, vec![0, 3, 6, 9]);
    }

    #[test]
    fn test_iterator_is_restartable() {
        let text: String = std::iter::repeat('z').take(1200).collect();
        let first: Vec<_> = windows("doc", "v1", &text, params(500, 100)).collect();
        let second: Vec<_> = windows("doc", "v1", &text, params(500, 100)).collect();
        assert_eq!(first, second);
    }
}
