use std::path::PathBuf;

use proptest::prelude::*;

use kbase_core::chunker::Chunker;
use kbase_core::types::Document;
use kbase_core::Error;

fn doc(text: &str) -> Document {
    Document {
        path: PathBuf::from("/docs/sql/joins.md"),
        rel_path: "sql/joins.md".to_string(),
        raw_text: text.to_string(),
        category: "sql".to_string(),
        extension: "md".to_string(),
    }
}

/// Rebuilds the document from chunk text, dropping each chunk's overlap with
/// the previous one.
fn reconstruct(chunker: &Chunker, text: &str) -> String {
    let chunks = chunker.chunk(&doc(text));
    let mut out = String::new();
    let mut covered = 0;
    for chunk in &chunks {
        let skip = covered - chunk.metadata.start;
        out.extend(chunk.text.chars().skip(skip));
        covered = chunk.metadata.end;
    }
    out
}

#[test]
fn rejects_invalid_parameters() {
    assert!(matches!(Chunker::new(0, 0), Err(Error::Configuration(_))));
    assert!(matches!(Chunker::new(100, 100), Err(Error::Configuration(_))));
    assert!(matches!(Chunker::new(100, 150), Err(Error::Configuration(_))));
    assert!(Chunker::new(100, 99).is_ok());
}

#[test]
fn empty_document_has_no_chunks() {
    let chunker = Chunker::new(100, 20).unwrap();
    assert!(chunker.chunk(&doc("")).is_empty());
}

#[test]
fn short_document_is_one_chunk() {
    let chunker = Chunker::new(100, 20).unwrap();
    let chunks = chunker.chunk(&doc("Short text\n"));
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "Short text\n");
    assert_eq!(chunks[0].metadata.total_chunks, 1);
    assert_eq!(chunks[0].metadata.category, "sql");
    assert_eq!(chunks[0].metadata.filename, "joins.md");
    assert!(chunks[0].embedding.is_empty());
}

#[test]
fn cuts_at_paragraph_break() {
    let para_a = "a".repeat(60);
    let para_b = "b".repeat(60);
    let text = format!("{para_a}\n\n{para_b}");
    let chunker = Chunker::new(100, 10).unwrap();
    let chunks = chunker.chunk(&doc(&text));
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, format!("{para_a}\n\n"));
    assert!(chunks[1].text.ends_with(&para_b));
}

#[test]
fn multibyte_text_is_split_on_char_boundaries() {
    let text = "é".repeat(250);
    let chunker = Chunker::new(100, 20).unwrap();
    let chunks = chunker.chunk(&doc(&text));
    assert!(chunks.iter().all(|c| c.text.chars().count() <= 100));
    assert_eq!(reconstruct(&chunker, &text), text);
}

#[test]
fn chunk_ids_are_deterministic_across_runs() {
    let text = "word ".repeat(100);
    let chunker = Chunker::new(64, 8).unwrap();
    let first: Vec<String> = chunker.chunk(&doc(&text)).into_iter().map(|c| c.id).collect();
    let second: Vec<String> = chunker.chunk(&doc(&text)).into_iter().map(|c| c.id).collect();
    assert_eq!(first, second);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn chunks_cover_the_document_in_order(
        text in "[a-z .!?\n]{0,600}",
        size in 8usize..120,
        overlap_pct in 0usize..90,
    ) {
        let overlap = size * overlap_pct / 100;
        let chunker = Chunker::new(size, overlap).unwrap();
        let chunks = chunker.chunk(&doc(&text));

        prop_assert_eq!(reconstruct(&chunker, &text), text.clone());
        for (i, chunk) in chunks.iter().enumerate() {
            let len = chunk.text.chars().count();
            prop_assert!(len >= 1 && len <= size);
            prop_assert_eq!(chunk.metadata.chunk_index, i);
            prop_assert_eq!(chunk.metadata.total_chunks, chunks.len());
            prop_assert_eq!(chunk.metadata.end - chunk.metadata.start, len);
        }
        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0].metadata, &pair[1].metadata);
            prop_assert!(next.start > prev.start);
            prop_assert!(next.start <= prev.end);
            prop_assert!(prev.end - next.start <= overlap);
        }
    }
}
