//! Result Merger (C6, §4.6): per-source score normalization, client-side RRF
//! fusion for the JS-merged hybrid tier, and content-level deduplication.

use std::collections::HashMap;

use clawmem_core::clamp_unit;

/// Which pipeline tier (or collection) produced a raw score, and therefore
/// which normalization applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreClass {
  Vector,
  Text,
  Hybrid,
  Structured,
  Kb,
}

/// Map a raw score into `[0, 1]` per classification (§4.6).
pub fn normalize(raw: f32, class: ScoreClass) -> f32 {
  match class {
    ScoreClass::Text => raw / (raw + 5.0),
    ScoreClass::Vector | ScoreClass::Hybrid | ScoreClass::Structured | ScoreClass::Kb => clamp_unit(raw),
  }
}

/// One hit surfaced from a pipeline, before or after normalization.
#[derive(Debug, Clone)]
pub struct RawResult {
  pub id: String,
  pub path: Option<String>,
  pub snippet: String,
  pub score: f32,
  pub class: ScoreClass,
}

impl RawResult {
  pub fn normalized(mut self) -> Self {
    self.score = normalize(self.score, self.class);
    self
  }
}

const RRF_K: f32 = 60.0;
/// Normalizing divisor: the maximum possible two-list RRF sum is
/// `2 / (k + 1)` (both lists rank the result first), §4.6.
const RRF_NORMALIZER: f32 = 2.0 / 61.0;

/// Client-side Reciprocal Rank Fusion for the JS-merged hybrid tier (§4.6,
/// glossary "RRF"). `vector_ranked` and `text_ranked` are each already
/// ordered best-first. Ties break by descending rrf-sum then by the order a
/// result was first seen (vector list before text list, in-list order).
pub fn rrf_fuse(vector_ranked: &[RawResult], text_ranked: &[RawResult]) -> Vec<RawResult> {
  struct Entry {
    result: RawResult,
    rrf_sum: f32,
    first_seen: usize,
  }

  let mut by_id: HashMap<String, Entry> = HashMap::new();
  let mut next_order = 0usize;

  let mut accumulate = |list: &[RawResult]| {
    for (rank, r) in list.iter().enumerate() {
      let contribution = 1.0 / (RRF_K + (rank + 1) as f32);
      match by_id.get_mut(&r.id) {
        Some(entry) => entry.rrf_sum += contribution,
        None => {
          by_id.insert(
            r.id.clone(),
            Entry {
              result: r.clone(),
              rrf_sum: contribution,
              first_seen: next_order,
            },
          );
          next_order += 1;
        }
      }
    }
  };
  accumulate(vector_ranked);
  accumulate(text_ranked);

  let mut entries: Vec<Entry> = by_id.into_values().collect();
  entries.sort_by(|a, b| {
    b.rrf_sum
      .partial_cmp(&a.rrf_sum)
      .unwrap_or(std::cmp::Ordering::Equal)
      .then(a.first_seen.cmp(&b.first_seen))
  });

  entries
    .into_iter()
    .map(|e| RawResult {
      score: e.rrf_sum / RRF_NORMALIZER,
      class: ScoreClass::Hybrid,
      ..e.result
    })
    .collect()
}

/// Collapse entries whose `snippet` strings are equal, keeping the one with
/// the highest score (§4.6 "deduplication", §8 "dedup law"). A plain string
/// compare, never a hash — different paths with equal rendered snippets
/// dedupe together.
pub fn dedup_by_snippet(results: Vec<RawResult>) -> Vec<RawResult> {
  let mut best: HashMap<String, RawResult> = HashMap::new();
  for r in results {
    match best.get(&r.snippet) {
      Some(existing) if existing.score >= r.score => {}
      _ => {
        best.insert(r.snippet.clone(), r);
      }
    }
  }
  let mut out: Vec<RawResult> = best.into_values().collect();
  out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
  out
}

/// Tokenize a raw query into `[A-Za-z0-9_]+` groups (§4.6). Used both to
/// build the `$search` compound-must term array and the quoted `$text`
/// query string.
pub fn tokenize_query(query: &str) -> Vec<String> {
  let mut tokens = Vec::new();
  let mut current = String::new();
  for ch in query.chars() {
    if ch.is_ascii_alphanumeric() || ch == '_' {
      current.push(ch);
    } else if !current.is_empty() {
      tokens.push(std::mem::take(&mut current));
    }
  }
  if !current.is_empty() {
    tokens.push(current);
  }
  tokens
}

/// Quote each token and join with a space: a documented deviation from a
/// naive AND-join, since `$text`'s default behavior already ORs
/// space-separated terms (§4.6).
pub fn quoted_or_query(tokens: &[String]) -> String {
  tokens.iter().map(|t| format!("\"{t}\"")).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn result(id: &str, snippet: &str, score: f32, class: ScoreClass) -> RawResult {
    RawResult {
      id: id.to_string(),
      path: None,
      snippet: snippet.to_string(),
      score,
      class,
    }
  }

  #[test]
  fn text_normalization_maps_five_to_half() {
    assert_eq!(normalize(5.0, ScoreClass::Text), 0.5);
  }

  #[test]
  fn vector_normalization_clamps() {
    assert_eq!(normalize(1.5, ScoreClass::Vector), 1.0);
    assert_eq!(normalize(-0.2, ScoreClass::Vector), 0.0);
  }

  #[test]
  fn dedup_keeps_max_scoring_entry_per_snippet() {
    let results = vec![
      result("memory:1", "alpha content", 0.3, ScoreClass::Vector),
      result("kb:1", "alpha content", 0.9, ScoreClass::Kb),
      result("memory:2", "beta", 0.8, ScoreClass::Vector),
      result("sessions:1", "beta", 0.6, ScoreClass::Vector),
    ];
    let deduped = dedup_by_snippet(results);
    assert_eq!(deduped.len(), 2);
    assert_eq!(deduped[0].snippet, "alpha content");
    assert_eq!(deduped[0].score, 0.9);
    assert_eq!(deduped[1].snippet, "beta");
    assert_eq!(deduped[1].score, 0.8);
  }

  #[test]
  fn rrf_fuse_sums_contributions_for_results_in_both_lists() {
    let vector = vec![result("a", "alpha", 0.0, ScoreClass::Vector), result("b", "beta", 0.0, ScoreClass::Vector)];
    let text = vec![result("b", "beta", 0.0, ScoreClass::Text), result("a", "alpha", 0.0, ScoreClass::Text)];
    let fused = rrf_fuse(&vector, &text);
    // both appear in both lists; "a" ranks 1st in vector and 2nd in text, "b" vice versa - tied sum
    assert_eq!(fused.len(), 2);
    for r in &fused {
      assert!(r.score > 0.0 && r.score <= 1.0);
    }
  }

  #[test]
  fn tokenize_splits_on_non_word_characters() {
    assert_eq!(tokenize_query("hello, world!"), vec!["hello", "world"]);
    assert_eq!(tokenize_query("snake_case 123"), vec!["snake_case", "123"]);
  }

  #[test]
  fn quoted_or_query_wraps_each_token() {
    assert_eq!(quoted_or_query(&["a".to_string(), "b".to_string()]), "\"a\" \"b\"");
  }
}
