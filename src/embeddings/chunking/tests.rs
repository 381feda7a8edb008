use super::estimate_token_count as estimate_token_count_impl;
use super::*;

const GUIDE: &str = "\
Intro paragraph before headings.

# Targets

Time in range above 70 percent.

## Pregnancy

Tighter targets apply.
";

fn words(n: usize) -> String {
    vec!["glucose"; n].join(" ")
}

fn assert_offsets_exact(source: &str, chunks: &[ContentChunk]) {
    for chunk in chunks {
        assert_eq!(
            source.get(chunk.start_offset..chunk.end_offset),
            Some(chunk.content.as_str()),
            "chunk {} offsets do not match its content",
            chunk.chunk_index
        );
    }
}

#[test]
fn estimate_token_count() {
    assert_eq!(estimate_token_count_impl("hello world"), 2);
    assert_eq!(estimate_token_count_impl("This is a test."), 5);
    assert_eq!(estimate_token_count_impl(""), 0);
}

#[test]
fn heading_paths_follow_markdown_structure() {
    let chunks = chunk_document(GUIDE, "Guide", &ChunkingConfig::default());

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].heading_path, "Guide");
    assert_eq!(chunks[0].content, "Intro paragraph before headings.");
    assert_eq!(chunks[1].heading_path, "Guide > Targets");
    assert_eq!(chunks[1].content, "Time in range above 70 percent.");
    assert_eq!(chunks[2].heading_path, "Guide > Targets > Pregnancy");
    assert_eq!(chunks[2].content, "Tighter targets apply.");
    assert_offsets_exact(GUIDE, &chunks);
}

#[test]
fn sibling_headings_replace_each_other() {
    let source = "# A\n\none\n\n## B\n\ntwo\n\n# C\n\nthree\n";
    let chunks = chunk_document(source, "Doc", &ChunkingConfig::default());
    let paths: Vec<&str> = chunks.iter().map(|c| c.heading_path.as_str()).collect();
    assert_eq!(paths, vec!["Doc > A", "Doc > A > B", "Doc > C"]);
}

#[test]
fn chunk_indices_are_sequential() {
    let chunks = chunk_document(GUIDE, "Guide", &ChunkingConfig::default());
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i);
    }
}

#[test]
fn chunk_large_content() {
    let source = "Advanced usage involves understanding complex concepts. ".repeat(100);
    let config = ChunkingConfig {
        target_chunk_size: 50,
        max_chunk_size: 100,
        overlap_size: 0,
        ..ChunkingConfig::default()
    };

    let chunks = chunk_document(&source, "Advanced", &config);

    assert!(chunks.len() > 1);
    assert_offsets_exact(&source, &chunks);
    for chunk in &chunks {
        assert!(chunk.token_count <= config.max_chunk_size);
        assert!(chunk.content.ends_with('.'));
    }
}

#[test]
fn word_splitting_without_sentence_boundaries() {
    let source = words(300);
    let config = ChunkingConfig {
        target_chunk_size: 50,
        max_chunk_size: 100,
        min_chunk_size: 10,
        overlap_size: 0,
        sentence_boundary_splitting: false,
    };

    let chunks = chunk_document(&source, "Words", &config);

    assert!(chunks.len() > 1);
    assert_offsets_exact(&source, &chunks);
    for chunk in &chunks {
        assert!(chunk.token_count <= config.max_chunk_size);
    }
}

#[test]
fn small_trailing_chunk_is_merged() {
    let source = format!("{}\n\n{}\n\nShort end.", words(30), words(37));
    let config = ChunkingConfig {
        target_chunk_size: 50,
        max_chunk_size: 100,
        min_chunk_size: 20,
        overlap_size: 0,
        sentence_boundary_splitting: true,
    };

    let chunks = chunk_document(&source, "Merge", &config);

    assert_eq!(chunks.len(), 2);
    assert!(chunks[1].content.starts_with("glucose"));
    assert!(chunks[1].content.ends_with("Short end."));
    assert_eq!(chunks[1].end_offset, source.len());
    assert_offsets_exact(&source, &chunks);
}

#[test]
fn overlap_extends_into_previous_chunk() {
    let source = "Advanced usage involves understanding complex concepts. ".repeat(40);
    let config = ChunkingConfig {
        target_chunk_size: 50,
        max_chunk_size: 100,
        min_chunk_size: 10,
        overlap_size: 20,
        sentence_boundary_splitting: true,
    };

    let chunks = chunk_document(&source, "Overlap", &config);

    assert!(chunks.len() > 2);
    assert_offsets_exact(&source, &chunks);
    for pair in chunks.windows(2) {
        assert!(pair[1].start_offset < pair[0].end_offset);
        assert!(pair[1].start_offset > pair[0].start_offset);
    }
}

#[test]
fn overlap_does_not_cross_sections() {
    let config = ChunkingConfig {
        overlap_size: 40,
        ..ChunkingConfig::default()
    };
    let chunks = chunk_document(GUIDE, "Guide", &config);
    for pair in chunks.windows(2) {
        assert!(pair[1].start_offset >= pair[0].end_offset);
    }
}

#[test]
fn multibyte_text_keeps_char_boundaries() {
    let source = "Glukose über 180 mg/dL – Hyperglykämie! ".repeat(60);
    let config = ChunkingConfig {
        target_chunk_size: 50,
        max_chunk_size: 100,
        min_chunk_size: 10,
        overlap_size: 10,
        sentence_boundary_splitting: true,
    };
    let chunks = chunk_document(&source, "Umlaut", &config);
    assert!(!chunks.is_empty());
    assert_offsets_exact(&source, &chunks);
}

#[test]
fn chunking_is_deterministic() {
    let source = format!("{GUIDE}\n\n{}", "More detail follows here. ".repeat(80));
    let first = chunk_document(&source, "Guide", &ChunkingConfig::default());
    let second = chunk_document(&source, "Guide", &ChunkingConfig::default());
    assert_eq!(first, second);
}

#[test]
fn empty_content() {
    assert!(chunk_document("", "Empty", &ChunkingConfig::default()).is_empty());
    assert!(chunk_document("  \n\n \n", "Blank", &ChunkingConfig::default()).is_empty());
    assert!(chunk_document("# Only a heading\n", "Heading", &ChunkingConfig::default()).is_empty());
}

#[test]
fn title_heading_is_not_repeated() {
    let source = "# Consensus targets\n\nOverview.\n\n## Hypoglycemia\n\nStay under 4%.\n";
    let chunks = chunk_document(source, "Consensus targets", &ChunkingConfig::default());
    let paths: Vec<&str> = chunks.iter().map(|c| c.heading_path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["Consensus targets", "Consensus targets > Hypoglycemia"]
    );
}
