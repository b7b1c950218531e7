//! Token-window chunker with configurable window and overlap (§4.3 phase C).
//!
//! Token counts are estimated, not tokenized exactly: four characters per
//! token is a close enough approximation for sizing purposes and avoids
//! pulling in a tokenizer dependency the embedding provider already owns.

const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
  pub window_tokens: usize,
  pub overlap_tokens: usize,
}

impl ChunkerConfig {
  pub fn memory_default() -> Self {
    Self {
      window_tokens: 400,
      overlap_tokens: 80,
    }
  }

  pub fn kb_default() -> Self {
    Self {
      window_tokens: 600,
      overlap_tokens: 100,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
  /// 1-based, inclusive.
  pub start_line: u32,
  /// 1-based, inclusive.
  pub end_line: u32,
  pub text: String,
}

fn token_estimate(line: &str) -> usize {
  (line.len() / CHARS_PER_TOKEN).max(1)
}

/// Cut `content` into overlapping windows of roughly `window_tokens` each,
/// carrying `overlap_tokens` worth of trailing lines into the next window.
pub fn chunk_text(content: &str, config: &ChunkerConfig) -> Vec<TextChunk> {
  let lines: Vec<&str> = content.lines().collect();
  if lines.is_empty() {
    return Vec::new();
  }

  let mut chunks = Vec::new();
  let mut start = 0usize; // 0-based index into `lines`

  while start < lines.len() {
    let mut end = start;
    let mut tokens = 0usize;
    while end < lines.len() && tokens < config.window_tokens {
      tokens += token_estimate(lines[end]);
      end += 1;
    }
    // end is exclusive; the window is lines[start..end]
    chunks.push(TextChunk {
      start_line: (start + 1) as u32,
      end_line: end as u32,
      text: lines[start..end].join("\n"),
    });

    if end >= lines.len() {
      break;
    }

    // Walk backward from `end` to find how many trailing lines make up the
    // configured overlap, then resume there so the next window repeats them.
    let mut overlap_tokens = 0usize;
    let mut next_start = end;
    while next_start > start && overlap_tokens < config.overlap_tokens {
      next_start -= 1;
      overlap_tokens += token_estimate(lines[next_start]);
    }
    // Guarantee forward progress even if a single line exceeds the overlap
    // budget on its own.
    start = next_start.max(start + 1);
  }

  chunks
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_file_is_a_single_chunk() {
    let chunks = chunk_text("# A\n\nAlpha", &ChunkerConfig::memory_default());
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].start_line, 1);
    assert_eq!(chunks[0].end_line, 3);
  }

  #[test]
  fn empty_content_yields_no_chunks() {
    assert!(chunk_text("", &ChunkerConfig::memory_default()).is_empty());
  }

  #[test]
  fn large_file_splits_into_overlapping_windows() {
    let line = "x".repeat(40); // ~10 tokens/line
    let content = std::iter::repeat_n(line.as_str(), 200).collect::<Vec<_>>().join("\n");
    let config = ChunkerConfig {
      window_tokens: 100,
      overlap_tokens: 20,
    };
    let chunks = chunk_text(&content, &config);
    assert!(chunks.len() > 1);
    // consecutive windows overlap: the second window starts before the first ends
    assert!(chunks[1].start_line <= chunks[0].end_line);
    // coverage reaches the end of the file
    assert_eq!(chunks.last().unwrap().end_line, 200);
  }

  #[test]
  fn always_makes_forward_progress() {
    let config = ChunkerConfig {
      window_tokens: 1,
      overlap_tokens: 1000,
    };
    let content = "a\nb\nc\nd";
    let chunks = chunk_text(content, &config);
    assert_eq!(chunks.last().unwrap().end_line, 4);
  }
}
