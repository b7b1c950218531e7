//! Tagged aggregation-stage types (§9 design note: "avoid a single
//! `map[string]any` for the whole pipeline"). Each stage knows how to
//! render itself to a BSON document; the dispatcher composes them into a
//! pipeline per tier.

use bson::{Document, doc};

/// How the query is carried into a `$vectorSearch` stage: a precomputed
/// vector in managed mode, or raw text in automated mode where the server
/// computes the embedding itself (§4.5 "automated vs managed").
#[derive(Debug, Clone)]
pub enum VectorQuery {
  Managed(Vec<f32>),
  Automated(String),
}

#[derive(Debug, Clone)]
pub struct VectorSearchStage {
  pub index: String,
  pub path: String,
  pub query: VectorQuery,
  pub num_candidates: u64,
  pub limit: u64,
  pub filter: Option<Document>,
}

impl VectorSearchStage {
  pub fn to_document(&self) -> Document {
    let mut inner = doc! {
      "index": &self.index,
      "path": &self.path,
      "limit": self.limit as i64,
    };
    match &self.query {
      VectorQuery::Managed(vector) => {
        inner.insert("queryVector", vector.clone());
        inner.insert("numCandidates", self.num_candidates as i64);
      }
      VectorQuery::Automated(text) => {
        inner.insert("query", doc! { "text": text });
      }
    }
    if let Some(filter) = &self.filter {
      inner.insert("filter", filter.clone());
    }
    doc! { "$vectorSearch": inner }
  }

  /// Score meta key emitted alongside each hit.
  pub fn score_meta(&self) -> &'static str {
    "vectorSearchScore"
  }
}

/// Tokenized `$search` stage: a compound-must query whose single `text`
/// clause carries an array of OR-joined terms (§4.6 "full-text query
/// construction").
#[derive(Debug, Clone)]
pub struct SearchStage {
  pub index: String,
  pub text_path: String,
  pub terms: Vec<String>,
  pub filter: Option<Document>,
}

impl SearchStage {
  pub fn to_document(&self) -> Document {
    let mut compound = doc! {
      "must": [
        { "text": { "query": self.terms.clone(), "path": &self.text_path } }
      ]
    };
    if let Some(filter) = &self.filter {
      compound.insert("filter", vec![filter.clone()]);
    }
    doc! { "$search": { "index": &self.index, "compound": compound } }
  }

  pub fn score_meta(&self) -> &'static str {
    "searchScore"
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionKind {
  Rank,
  Score,
}

impl FusionKind {
  fn stage_name(self) -> &'static str {
    match self {
      FusionKind::Rank => "$rankFusion",
      FusionKind::Score => "$scoreFusion",
    }
  }
}

/// Server-side rank/score fusion (§4.5 tier 1): two labeled sub-pipelines
/// merged by the server in one round trip.
#[derive(Debug, Clone)]
pub struct FusionStage {
  pub kind: FusionKind,
  pub vector_pipeline: Vec<Document>,
  pub text_pipeline: Vec<Document>,
}

impl FusionStage {
  pub fn to_document(&self) -> Document {
    let inner = doc! {
      "input": {
        "pipelines": {
          "vector": self.vector_pipeline.clone(),
          "text": self.text_pipeline.clone(),
        }
      }
    };
    let mut out = Document::new();
    out.insert(self.kind.stage_name(), inner);
    out
  }
}

/// Last-resort substring match over the plain `text`-type index (§4.5 tier 5).
#[derive(Debug, Clone)]
pub struct TextIndexStage {
  pub query: String,
  pub filter: Option<Document>,
}

impl TextIndexStage {
  pub fn to_match_document(&self) -> Document {
    let mut m = doc! { "$text": { "$search": &self.query } };
    if let Some(filter) = &self.filter {
      for (k, v) in filter {
        m.insert(k.clone(), v.clone());
      }
    }
    m
  }
}

/// Inclusion-style projection: only listed fields survive, so the embedding
/// vector is never returned to the caller regardless of what else is in the
/// document (§4.5 "every pipeline must emit an inclusion-style projection").
pub fn result_projection() -> Document {
  doc! { "_id": 1, "path": 1, "text": 1, "docId": 1, "score": 1 }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn vector_stage_carries_query_vector_in_managed_mode() {
    let stage = VectorSearchStage {
      index: "idx".into(),
      path: "embedding".into(),
      query: VectorQuery::Managed(vec![0.1, 0.2]),
      num_candidates: 100,
      limit: 10,
      filter: None,
    };
    let doc = stage.to_document();
    let inner = doc.get_document("$vectorSearch").unwrap();
    assert!(inner.contains_key("queryVector"));
    assert!(inner.contains_key("numCandidates"));
  }

  #[test]
  fn vector_stage_carries_text_query_in_automated_mode() {
    let stage = VectorSearchStage {
      index: "idx".into(),
      path: "text".into(),
      query: VectorQuery::Automated("hello world".into()),
      num_candidates: 100,
      limit: 10,
      filter: None,
    };
    let doc = stage.to_document();
    let inner = doc.get_document("$vectorSearch").unwrap();
    assert!(!inner.contains_key("queryVector"));
    assert_eq!(inner.get_document("query").unwrap().get_str("text").unwrap(), "hello world");
  }

  #[test]
  fn projection_never_mentions_embedding() {
    let projection = result_projection();
    assert!(!projection.contains_key("embedding"));
  }
}
