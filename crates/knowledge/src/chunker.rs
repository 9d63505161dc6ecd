//! Text chunking with configurable size and overlap.

use crate::types::Document;

/// Split raw file text into documents whose metadata names `source`.
///
/// Chunks are character-based, cut on UTF-8 boundaries, and carry their
/// byte range as `start`/`end` metadata.
pub fn documents_from_text(
    source: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Vec<Document> {
    if text.trim().is_empty() || chunk_size == 0 {
        return vec![];
    }

    let mut docs = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + chunk_size).min(text.len());
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // chunk_size smaller than one character
            end = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }

        let chunk = text[start..end].trim();

        // Trailing fragments under 10% of chunk_size are dropped, but a
        // text shorter than one chunk is always kept.
        let is_fragment = !docs.is_empty() && chunk.len() < chunk_size / 10;
        if !chunk.is_empty() && !is_fragment {
            docs.push(
                Document::new(chunk, source)
                    .with_metadata("start", serde_json::json!(start))
                    .with_metadata("end", serde_json::json!(end)),
            );
        }

        if end == text.len() {
            break;
        }

        // Step back from where this chunk actually ended, which may be short
        // of chunk_size on a multibyte boundary. An overlap as long as the
        // chunk would stall, so it falls back to no overlap.
        let mut next_start = if end - start > overlap {
            end - overlap
        } else {
            end
        };
        while next_start < text.len() && !text.is_char_boundary(next_start) {
            next_start += 1;
        }
        start = next_start;
    }

    tracing::debug!(
        "Split '{}' into {} documents (size: {}, overlap: {})",
        source,
        docs.len(),
        chunk_size,
        overlap
    );

    docs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_carry_source() {
        let text = "a".repeat(1000);
        let docs = documents_from_text("notes.txt", &text, 200, 50);

        assert!(docs.len() > 1);
        assert!(docs.iter().all(|d| d.source() == Some("notes.txt")));
        assert_eq!(docs[0].metadata["start"], 0);
        assert_eq!(docs[1].metadata["start"], 150);
    }

    #[test]
    fn test_no_overlap() {
        let text = "a".repeat(300);
        let docs = documents_from_text("x", &text, 100, 0);
        assert_eq!(docs.len(), 3);
    }

    #[test]
    fn test_short_text_kept_whole() {
        let docs = documents_from_text("a.txt", "hello world", 500, 50);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].page_content, "hello world");
    }

    #[test]
    fn test_empty_text() {
        assert!(documents_from_text("x", "", 100, 10).is_empty());
        assert!(documents_from_text("x", "   \n", 100, 10).is_empty());
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "知识库向量检索".repeat(20);
        let docs = documents_from_text("zh.txt", &text, 16, 4);
        assert!(!docs.is_empty());
        assert!(docs.iter().all(|d| !d.page_content.is_empty()));
    }

    #[test]
    fn test_multibyte_chunks_cover_whole_text() {
        let text = "aé".repeat(10);

        let docs = documents_from_text("mixed.txt", &text, 4, 0);
        let joined: String = docs.iter().map(|d| d.page_content.as_str()).collect();
        assert_eq!(joined, text);

        let docs = documents_from_text("mixed.txt", &text, 6, 2);
        for pair in docs.windows(2) {
            let prev_end = pair[0].metadata["end"].as_u64().unwrap();
            let next_start = pair[1].metadata["start"].as_u64().unwrap();
            assert!(next_start <= prev_end);
            assert!(next_start > pair[0].metadata["start"].as_u64().unwrap());
        }
        assert_eq!(
            docs.last().unwrap().metadata["end"].as_u64().unwrap(),
            text.len() as u64
        );
    }
}
