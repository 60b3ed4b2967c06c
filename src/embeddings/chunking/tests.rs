use super::*;
use crate::documents::DocumentFormat;
use std::path::PathBuf;

fn config(chunk_size: usize, overlap: usize) -> ChunkingConfig {
    ChunkingConfig {
        chunk_size,
        overlap,
        boundary: ChunkBoundary::Character,
    }
}

fn sample_text() -> String {
    "Retrieval augmented generation pairs a search index with a language model. ".repeat(40)
}

#[test]
fn empty_text_yields_no_chunks() {
    let chunks = chunk_text("empty.txt", "", &ChunkingConfig::default());
    assert!(chunks.is_empty());
}

#[test]
fn short_text_is_single_chunk() {
    let text = "A short note.";
    let chunks = chunk_text("note.txt", text, &ChunkingConfig::default());

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, text);
    assert_eq!(chunks[0].start, 0);
    assert_eq!(chunks[0].end, text.chars().count());
}

#[test]
fn text_of_exactly_chunk_size_is_single_chunk() {
    let text = "x".repeat(50);
    let chunks = chunk_text("exact.txt", &text, &config(50, 10));
    assert_eq!(chunks.len(), 1);
}

#[test]
fn default_window_advances_by_800() {
    let text = "a".repeat(2500);
    let chunks = chunk_text("long.txt", &text, &ChunkingConfig::default());

    let starts: Vec<usize> = chunks.iter().map(|c| c.start).collect();
    assert_eq!(starts, vec![0, 800, 1600]);
    assert_eq!(chunks[2].end, 2500);
    assert_eq!(chunks[2].char_len(), 900);
}

#[test]
fn chunking_is_deterministic() {
    let text = sample_text();
    let first = chunk_text("doc", &text, &config(120, 30));
    let second = chunk_text("doc", &text, &config(120, 30));
    assert_eq!(first, second);
}

#[test]
fn chunks_respect_size_bound() {
    let text = sample_text();
    let chunks = chunk_text("doc", &text, &config(120, 30));

    assert!(chunks.len() > 1);
    let (last, rest) = chunks.split_last().expect("chunks exist");
    for chunk in rest {
        assert_eq!(chunk.char_len(), 120, "only the last chunk may be short");
    }
    assert!(last.char_len() <= 120);
}

#[test]
fn consecutive_chunks_share_overlap() {
    let text = sample_text();
    let overlap = 30;
    let chunks = chunk_text("doc", &text, &config(120, overlap));

    for pair in chunks.windows(2) {
        let tail: String = pair[0]
            .text
            .chars()
            .skip(pair[0].char_len() - overlap)
            .collect();
        let head: String = pair[1].text.chars().take(overlap).collect();
        assert_eq!(tail, head);
        assert_eq!(pair[0].end - pair[1].start, overlap);
    }
}

#[test]
fn reassembly_reconstructs_original() {
    let text = sample_text();
    for cfg in [config(120, 30), config(97, 0), config(10, 9)] {
        let chunks = chunk_text("doc", &text, &cfg);
        assert_eq!(reassemble(&chunks), text);
    }
}

#[test]
fn multibyte_text_is_split_on_characters() {
    let text = "héllo wörld ✓ ".repeat(20);
    let chunks = chunk_text("utf8.txt", &text, &config(16, 4));

    for chunk in &chunks {
        assert!(chunk.text.chars().count() <= 16);
    }
    assert_eq!(reassemble(&chunks), text);
}

#[test]
fn sky_and_grass_scenario() {
    let text = "The sky is blue. Grass is green.";
    let chunks = chunk_text("colors.txt", text, &config(20, 5));

    assert!(chunks.len() >= 2);
    for chunk in &chunks {
        assert!(chunk.char_len() <= 20);
    }
    assert!(chunks[0].text.contains("sky is blue"));
}

#[test]
fn word_boundary_cuts_after_whitespace() {
    let text = "alpha bravo charlie delta echo foxtrot golf hotel india juliet";
    let cfg = ChunkingConfig {
        chunk_size: 20,
        overlap: 4,
        boundary: ChunkBoundary::Word,
    };
    let chunks = chunk_text("words.txt", text, &cfg);

    assert!(chunks.len() > 1);
    let (_, rest) = chunks.split_last().expect("chunks exist");
    for chunk in rest {
        assert!(chunk.text.ends_with(' '), "chunk {:?}", chunk.text);
        assert!(chunk.char_len() <= 20);
    }
    for pair in chunks.windows(2) {
        assert_eq!(pair[0].end - pair[1].start, 4);
    }
    assert_eq!(reassemble(&chunks), text);
}

#[test]
fn word_boundary_falls_back_to_hard_cut() {
    let text = "x".repeat(45);
    let cfg = ChunkingConfig {
        chunk_size: 20,
        overlap: 5,
        boundary: ChunkBoundary::Word,
    };
    let word_chunks = chunk_text("solid.txt", &text, &cfg);
    let char_chunks = chunk_text("solid.txt", &text, &config(20, 5));
    assert_eq!(word_chunks, char_chunks);
}

#[test]
fn chunk_document_uses_document_id() {
    let document = Document {
        id: "notes/a.txt".to_string(),
        path: PathBuf::from("/tmp/notes/a.txt"),
        format: DocumentFormat::Text,
        text: "one two three".to_string(),
    };
    let chunks = chunk_document(&document, &ChunkingConfig::default());

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].source, "notes/a.txt");
    assert_eq!(chunks[0].chunk_index, 0);
}

#[test]
fn step_never_zero() {
    assert_eq!(config(10, 9).step(), 1);
    assert_eq!(ChunkingConfig::default().step(), 800);
}

#[test]
fn chunker_matches_free_functions() {
    let cfg = config(120, 30);
    let chunker = Chunker::new(cfg.clone());
    let text = sample_text();
    assert_eq!(chunker.split_text("doc", &text), chunk_text("doc", &text, &cfg));
    assert_eq!(chunker.config(), &cfg);
}
