
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ChatError, Result};

/// Kind of passage produced by the heading chunker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    #[default]
    General,
    Qa,
}

/// A bounded span of corpus text treated as one retrievable unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub section: Option<String>,
    pub subsection: Option<String>,
    pub chunk_type: ChunkType,
}

/// Chunk attributes as persisted in the corpus metadata file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAttributes {
    pub section: Option<String>,
    pub subsection: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    /// Metadata files without a type hold only general passages
    #[serde(rename = "type", default)]
    pub chunk_type: ChunkType,
}

impl Chunk {
    #[inline]
    pub fn attributes(&self) -> ChunkAttributes {
        ChunkAttributes {
            section: self.section.clone(),
            subsection: self.subsection.clone(),
            topic: None,
            chunk_type: self.chunk_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    /// Section/subsection headings with question detection
    #[default]
    Headings,
    /// Fixed-size line windows with overlap, for pre-structured corpora
    Sized,
}

/// Configuration for corpus chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub strategy: ChunkingStrategy,
    /// Target chunk size in characters (sized strategy)
    pub size: usize,
    /// Characters carried over from the previous chunk (sized strategy)
    pub overlap: usize,
    pub section_marker: String,
    pub subsection_marker: String,
    /// Regex matched against trimmed lines to detect question openers
    pub question_pattern: String,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::Headings,
            size: 1000,
            overlap: 200,
            section_marker: "## ".to_string(),
            subsection_marker: "### ".to_string(),
            question_pattern: r"^Q\.".to_string(),
        }
    }
}

/// Heading-aware chunker
#[derive(Debug, Clone)]
pub struct Chunker {
    section_marker: String,
    subsection_marker: String,
    question: Regex,
}

#[derive(Debug, Clone, Copy)]
enum Heading {
    Section,
    Subsection,
}

/// Lines collected for the chunk currently being built
#[derive(Debug)]
struct Pending {
    lines: Vec<String>,
    chunk_type: ChunkType,
}

impl Pending {
    const fn new() -> Self {
        Self {
            lines: Vec::new(),
            chunk_type: ChunkType::General,
        }
    }

    fn is_collecting_answer(&self) -> bool {
        self.chunk_type == ChunkType::Qa && !self.lines.is_empty()
    }
}

impl Chunker {
    #[inline]
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        let question = Regex::new(&config.question_pattern).map_err(|e| {
            ChatError::Config(format!(
                "Invalid question pattern '{}': {}",
                config.question_pattern, e
            ))
        })?;

        Ok(Self {
            section_marker: config.section_marker.clone(),
            subsection_marker: config.subsection_marker.clone(),
            question,
        })
    }

    /// Split raw corpus text into section-scoped general and QA chunks
    #[inline]
    pub fn chunk(&self, raw_text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut section: Option<String> = None;
        let mut subsection: Option<String> = None;
        let mut pending = Pending::new();

        for raw_line in raw_text.lines() {
            let line = raw_line.trim();

            if let Some((heading, title)) = self.heading(line) {
                flush(&mut chunks, &mut pending, &section, &subsection);
                match heading {
                    Heading::Section => {
                        section = Some(title.to_string());
                        subsection = None;
                    }
                    Heading::Subsection => subsection = Some(title.to_string()),
                }
                continue;
            }

            // Unclassified content is dropped
            if section.is_none() || subsection.is_none() {
                continue;
            }

            if self.is_question(line) {
                flush(&mut chunks, &mut pending, &section, &subsection);
                pending.chunk_type = ChunkType::Qa;
                pending.lines.push(line.to_string());
            } else if pending.is_collecting_answer() {
                pending.lines.push(line.to_string());
            } else if !line.is_empty() {
                pending.chunk_type = ChunkType::General;
                pending.lines.push(line.to_string());
            }
        }

        flush(&mut chunks, &mut pending, &section, &subsection);

        debug!(
            "Chunked corpus into {} chunks ({} qa)",
            chunks.len(),
            chunks
                .iter()
                .filter(|c| c.chunk_type == ChunkType::Qa)
                .count()
        );

        chunks
    }

    fn heading<'a>(&self, line: &'a str) -> Option<(Heading, &'a str)> {
        // The longer marker wins so that nested markers like "#" and "##" work
        let mut markers = [
            (Heading::Section, self.section_marker.as_str()),
            (Heading::Subsection, self.subsection_marker.as_str()),
        ];
        markers.sort_by_key(|(_, marker)| std::cmp::Reverse(marker.len()));

        markers.into_iter().find_map(|(heading, marker)| {
            line.strip_prefix(marker)
                .map(|title| (heading, title.trim()))
        })
    }

    fn is_question(&self, line: &str) -> bool {
        self.question.is_match(line).unwrap_or(false)
    }
}

fn flush(
    chunks: &mut Vec<Chunk>,
    pending: &mut Pending,
    section: &Option<String>,
    subsection: &Option<String>,
) {
    if pending.lines.is_empty() {
        return;
    }

    let text = pending.lines.join("\n").trim().to_string();
    if !text.is_empty() {
        chunks.push(Chunk {
            text,
            section: section.clone(),
            subsection: subsection.clone(),
            chunk_type: pending.chunk_type,
        });
    }

    pending.lines.clear();
    pending.chunk_type = ChunkType::General;
}

/// Split text into windows of whole lines of at least `size` characters,
/// each starting with the trailing lines of the previous window that add
/// up to at least `overlap` characters.
///
/// The carried lines never include the first line of the previous window,
/// so the overlap falls short when reaching it would take that whole window.
#[inline]
pub fn split_into_chunks(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();

    let mut chunks = Vec::new();
    let mut window: Vec<usize> = Vec::new();
    let mut emitted_upto = 0;

    for i in 0..lines.len() {
        window.push(i);

        if joined_len(&lines, &window) < size {
            continue;
        }

        chunks.push(join_lines(&lines, &window));
        emitted_upto = i + 1;
        window = overlap_tail(&lines, &window, overlap);
    }

    if window.iter().any(|&i| i >= emitted_upto) {
        chunks.push(join_lines(&lines, &window));
    }

    debug!(
        "Split {} lines into {} sized chunks (size {}, overlap {})",
        lines.len(),
        chunks.len(),
        size,
        overlap
    );

    chunks
}

/// Trailing lines of `window` whose joined length first reaches `overlap`,
/// never the whole window
fn overlap_tail(lines: &[&str], window: &[usize], overlap: usize) -> Vec<usize> {
    if overlap == 0 || window.len() < 2 {
        return Vec::new();
    }

    let mut start = window.len() - 1;
    while start > 1 && joined_len(lines, &window[start..]) < overlap {
        start -= 1;
    }

    window[start..].to_vec()
}

fn joined_len(lines: &[&str], window: &[usize]) -> usize {
    let chars: usize = window.iter().map(|&i| lines[i].chars().count()).sum();
    chars + window.len().saturating_sub(1)
}

fn join_lines(lines: &[&str], window: &[usize]) -> String {
    window
        .iter()
        .map(|&i| lines[i])
        .collect::<Vec<_>>()
        .join("\n")
}

/// Chunk corpus text using the configured strategy
#[inline]
pub fn chunk_corpus(raw_text: &str, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    match config.strategy {
        ChunkingStrategy::Headings => Ok(Chunker::new(config)?.chunk(raw_text)),
        ChunkingStrategy::Sized => Ok(split_into_chunks(raw_text, config.size, config.overlap)
            .into_iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                text,
                section: Some(format!("Chunk {}", i + 1)),
                subsection: None,
                chunk_type: ChunkType::General,
            })
            .collect()),
    }
}

/// Estimate token count using a simple heuristic
/// This is a rough approximation - actual tokenization would be more accurate
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    // Add extra tokens for punctuation and special characters
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
