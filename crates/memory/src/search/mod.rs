//! Search Dispatcher (C5, §4.5): selects the strongest pipeline the
//! detected capabilities allow, cascading to weaker fallbacks whenever a
//! tier raises a runtime error rather than failing the query outright.

pub mod merge;
pub mod stages;

use bson::Document;
use clawmem_core::config::{EmbeddingMode as StoreEmbeddingMode, FusionMethod};
use clawmem_db::{Capabilities, MongoDb, schema, search_indexes};
use futures::TryStreamExt;
use tracing::warn;

use crate::error::Result;
use merge::{RawResult, ScoreClass};
use stages::{FusionKind, FusionStage, SearchStage, TextIndexStage, VectorQuery, VectorSearchStage, result_projection};

/// One collection's searchable shape. `fixed_class` overrides the
/// tier-derived classification for collections whose normalization never
/// varies by tier (§4.6: kb_chunks is always `kb`, structured_mem is always
/// `structured`; only the chunks collection varies between vector/text/hybrid).
#[derive(Debug, Clone, Copy)]
pub struct SearchTarget {
  pub suffix: &'static str,
  pub text_field: &'static str,
  pub embedding_field: &'static str,
  pub fixed_class: Option<ScoreClass>,
}

pub const CHUNKS_TARGET: SearchTarget = SearchTarget {
  suffix: schema::CHUNKS,
  text_field: "text",
  embedding_field: "embedding",
  fixed_class: None,
};

pub const KB_CHUNKS_TARGET: SearchTarget = SearchTarget {
  suffix: schema::KB_CHUNKS,
  text_field: "text",
  embedding_field: "embedding",
  fixed_class: Some(ScoreClass::Kb),
};

pub const STRUCTURED_TARGET: SearchTarget = SearchTarget {
  suffix: schema::STRUCTURED_MEM,
  text_field: "value",
  embedding_field: "embedding",
  fixed_class: Some(ScoreClass::Structured),
};

#[derive(Debug, Clone)]
pub struct QueryRequest {
  pub text: String,
  pub vector: Option<Vec<f32>>,
  pub max_results: u64,
  /// Pre-pushed filter clauses (source, path, tags, category, agentId, or a
  /// resolved KB `docId $in [...]` set), merged verbatim into every stage
  /// that accepts one.
  pub filter: Option<Document>,
}

pub struct Dispatcher<'a> {
  db: &'a MongoDb,
  capabilities: Capabilities,
}

impl<'a> Dispatcher<'a> {
  pub fn new(db: &'a MongoDb, capabilities: Capabilities) -> Self {
    Self { db, capabilities }
  }

  fn full_name(&self, suffix: &str) -> String {
    format!("{}{}", self.db.prefix, suffix)
  }

  /// Resolve the bounded KB `docId` prefilter set (§4.5). Returns `None`
  /// when no prefilter was requested, `Some(vec![])` when the prefilter
  /// resolved to nothing (callers must short-circuit the whole search on
  /// an empty set rather than running an unrestricted query).
  pub async fn resolve_kb_doc_ids(&self, metadata_filter: Document) -> Result<Vec<String>> {
    const DOC_ID_CAP: i64 = 10_000;
    let mut cursor = self
      .db
      .kb_documents()
      .find(metadata_filter)
      .projection(bson::doc! { "_id": 1 })
      .limit(DOC_ID_CAP)
      .await?;
    let mut ids = Vec::new();
    while let Some(doc) = cursor.try_next().await? {
      ids.push(doc.id);
    }
    Ok(ids)
  }

  /// Run the cascading pipeline for one collection (§4.5 tiers 1-5),
  /// swallowing even a last-resort failure into an empty result. Used for
  /// the KB and structured-memory collections (§4.7 "KB and structured
  /// swallow errors as `[]`").
  pub async fn search(&self, target: SearchTarget, req: &QueryRequest) -> Vec<RawResult> {
    match self.dispatch(target, req).await {
      Ok(results) => results,
      Err(e) => {
        warn!(collection = target.suffix, error = %e, "last-resort substring search failed, returning no results for this collection");
        Vec::new()
      }
    }
  }

  /// Same cascade, but a last-resort failure propagates instead of being
  /// swallowed (§4.7 "legacy chunks have no catch — a failure propagates").
  pub async fn search_strict(&self, target: SearchTarget, req: &QueryRequest) -> Result<Vec<RawResult>> {
    self.dispatch(target, req).await
  }

  async fn dispatch(&self, target: SearchTarget, req: &QueryRequest) -> Result<Vec<RawResult>> {
    let num_candidates = self.db.config.mongodb.resolve_num_candidates(req.max_results);
    let embedding_mode = self.db.config.mongodb.resolve_embedding_mode();
    let fusion_method = self.db.config.mongodb.fusion_method;
    let has_vector_query = req.vector.is_some() || embedding_mode == StoreEmbeddingMode::Automated;

    if has_vector_query && self.capabilities.vector_search && self.capabilities.text_search {
      let fusion_allowed = match fusion_method {
        FusionMethod::ScoreFusion => self.capabilities.score_fusion,
        FusionMethod::RankFusion => self.capabilities.rank_fusion,
        FusionMethod::JsMerge => false,
      };
      if fusion_allowed {
        match self.try_fusion(target, req, fusion_method, embedding_mode, num_candidates).await {
          Ok(results) => return Ok(self.finalize(results, target, ScoreClass::Hybrid)),
          Err(e) => warn!(collection = target.suffix, error = %e, "fusion pipeline failed, cascading to next tier"),
        }
      }

      match self.try_js_hybrid(target, req, embedding_mode, num_candidates).await {
        Ok(results) => return Ok(self.finalize(results, target, ScoreClass::Hybrid)),
        Err(e) => warn!(collection = target.suffix, error = %e, "js-merged hybrid failed, cascading to next tier"),
      }
    }

    if has_vector_query && self.capabilities.vector_search {
      match self.try_vector_only(target, req, embedding_mode, num_candidates).await {
        Ok(results) => return Ok(self.finalize(results, target, ScoreClass::Vector)),
        Err(e) => warn!(collection = target.suffix, error = %e, "vector-only search failed, cascading to next tier"),
      }
    }

    if self.capabilities.text_search {
      match self.try_text_search(target, req).await {
        Ok(results) => return Ok(self.finalize(results, target, ScoreClass::Text)),
        Err(e) => warn!(collection = target.suffix, error = %e, "tokenized text search failed, cascading to last resort"),
      }
    }

    self.try_substring(target, req).await.map(|results| self.finalize(results, target, ScoreClass::Text))
  }

  fn finalize(&self, mut results: Vec<RawResult>, target: SearchTarget, tier_default: ScoreClass) -> Vec<RawResult> {
    let class = target.fixed_class.unwrap_or(tier_default);
    for r in &mut results {
      r.class = class;
      r.score = merge::normalize(r.score, class);
    }
    results
  }

  fn vector_stage(&self, target: SearchTarget, req: &QueryRequest, mode: StoreEmbeddingMode, num_candidates: u64) -> VectorSearchStage {
    let index = search_indexes::vector_index_name(&self.full_name(target.suffix));
    let (path, query) = match mode {
      StoreEmbeddingMode::Managed => (target.embedding_field.to_string(), VectorQuery::Managed(req.vector.clone().unwrap_or_default())),
      StoreEmbeddingMode::Automated => (target.text_field.to_string(), VectorQuery::Automated(req.text.clone())),
    };
    VectorSearchStage {
      index,
      path,
      query,
      num_candidates,
      limit: req.max_results,
      filter: req.filter.clone(),
    }
  }

  fn search_stage(&self, target: SearchTarget, req: &QueryRequest) -> SearchStage {
    let index = search_indexes::text_index_name(&self.full_name(target.suffix));
    let terms = merge::tokenize_query(&req.text);
    SearchStage {
      index,
      text_path: target.text_field.to_string(),
      terms,
      filter: req.filter.clone(),
    }
  }

  async fn try_fusion(
    &self,
    target: SearchTarget,
    req: &QueryRequest,
    method: FusionMethod,
    mode: StoreEmbeddingMode,
    num_candidates: u64,
  ) -> Result<Vec<RawResult>> {
    let kind = match method {
      FusionMethod::RankFusion => FusionKind::Rank,
      _ => FusionKind::Score,
    };
    let vector_pipeline = vec![self.vector_stage(target, req, mode, num_candidates).to_document()];
    let text_pipeline = vec![self.search_stage(target, req).to_document()];
    let fusion = FusionStage {
      kind,
      vector_pipeline,
      text_pipeline,
    };
    let pipeline = vec![
      fusion.to_document(),
      bson::doc! { "$addFields": { "score": { "$meta": "score" } } },
      bson::doc! { "$limit": req.max_results as i64 },
      bson::doc! { "$project": result_projection() },
    ];
    self.run_pipeline(target, pipeline).await
  }

  async fn try_js_hybrid(&self, target: SearchTarget, req: &QueryRequest, mode: StoreEmbeddingMode, num_candidates: u64) -> Result<Vec<RawResult>> {
    let vector_pipeline = vec![
      self.vector_stage(target, req, mode, num_candidates).to_document(),
      bson::doc! { "$addFields": { "score": { "$meta": "vectorSearchScore" } } },
      bson::doc! { "$project": result_projection() },
    ];
    let text_pipeline = vec![
      self.search_stage(target, req).to_document(),
      bson::doc! { "$addFields": { "score": { "$meta": "searchScore" } } },
      bson::doc! { "$limit": req.max_results as i64 },
      bson::doc! { "$project": result_projection() },
    ];

    let (vector_results, text_results) = tokio::try_join!(self.run_pipeline(target, vector_pipeline), self.run_pipeline(target, text_pipeline))?;
    Ok(merge::rrf_fuse(&vector_results, &text_results))
  }

  async fn try_vector_only(&self, target: SearchTarget, req: &QueryRequest, mode: StoreEmbeddingMode, num_candidates: u64) -> Result<Vec<RawResult>> {
    let pipeline = vec![
      self.vector_stage(target, req, mode, num_candidates).to_document(),
      bson::doc! { "$addFields": { "score": { "$meta": "vectorSearchScore" } } },
      bson::doc! { "$limit": req.max_results as i64 },
      bson::doc! { "$project": result_projection() },
    ];
    self.run_pipeline(target, pipeline).await
  }

  async fn try_text_search(&self, target: SearchTarget, req: &QueryRequest) -> Result<Vec<RawResult>> {
    let pipeline = vec![
      self.search_stage(target, req).to_document(),
      bson::doc! { "$addFields": { "score": { "$meta": "searchScore" } } },
      bson::doc! { "$limit": req.max_results as i64 },
      bson::doc! { "$project": result_projection() },
    ];
    self.run_pipeline(target, pipeline).await
  }

  async fn try_substring(&self, target: SearchTarget, req: &QueryRequest) -> Result<Vec<RawResult>> {
    let tokens = merge::tokenize_query(&req.text);
    let stage = TextIndexStage {
      query: merge::quoted_or_query(&tokens),
      filter: req.filter.clone(),
    };
    let pipeline = vec![
      bson::doc! { "$match": stage.to_match_document() },
      bson::doc! { "$addFields": { "score": { "$meta": "textScore" } } },
      bson::doc! { "$sort": { "score": { "$meta": "textScore" } } },
      bson::doc! { "$limit": req.max_results as i64 },
      bson::doc! { "$project": result_projection() },
    ];
    self.run_pipeline(target, pipeline).await
  }

  async fn run_pipeline(&self, target: SearchTarget, pipeline: Vec<Document>) -> Result<Vec<RawResult>> {
    let collection = self.db.raw(target.suffix);
    let mut cursor = collection.aggregate(pipeline).await?;
    let mut out = Vec::new();
    while let Some(doc) = cursor.try_next().await? {
      if let Some(result) = parse_result(&doc, target.text_field) {
        out.push(result);
      }
    }
    Ok(out)
  }
}

fn parse_result(doc: &Document, text_field: &str) -> Option<RawResult> {
  let id = doc.get_str("_id").ok()?.to_string();
  let path = doc.get_str("path").ok().map(str::to_string);
  let snippet = doc.get_str(text_field).or_else(|_| doc.get_str("text")).ok()?.to_string();
  let score = doc.get_f64("score").unwrap_or(0.0) as f32;
  Some(RawResult {
    id,
    path,
    snippet,
    score,
    class: ScoreClass::Vector, // overwritten by Dispatcher::finalize
  })
}
