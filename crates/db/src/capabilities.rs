//! Server capability probing (§4.1).
//!
//! `vectorSearch`/`textSearch` are inferred from whether we can list search
//! indexes at all on a user collection. `scoreFusion`/`rankFusion` are
//! probed by running the fusion stage against a trivially empty
//! sub-pipeline: only an "unrecognized stage" error proves the capability
//! absent — any other runtime error still means "recognized, therefore
//! supported".

use bson::doc;
use futures::TryStreamExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::connection::MongoDb;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
  pub vector_search: bool,
  pub text_search: bool,
  pub score_fusion: bool,
  pub rank_fusion: bool,
}

impl MongoDb {
  pub async fn detect_capabilities(&self) -> Capabilities {
    let mut caps = Capabilities::default();

    // A positive on any one collection sets the flag true; only a clean
    // sweep of failures sets it false (open question, recommended reading).
    let probe_collections = [crate::schema::CHUNKS, crate::schema::KNOWLEDGE_BASE, crate::schema::STRUCTURED_MEM];
    let mut saw_success = false;
    for suffix in probe_collections {
      let collection = self.raw(suffix);
      match collection.list_search_indexes().await {
        Ok(mut cursor) => {
          saw_success = true;
          // Drain to completion so the probe doesn't leak a cursor.
          while cursor.try_next().await.unwrap_or(None).is_some() {}
        }
        Err(e) => {
          debug!(collection = %suffix, error = %e, "listSearchIndexes probe failed");
        }
      }
    }
    if saw_success {
      caps.vector_search = true;
      caps.text_search = true;
    }

    caps.score_fusion = self.probe_fusion_stage("$scoreFusion").await;
    caps.rank_fusion = self.probe_fusion_stage("$rankFusion").await;

    caps
  }

  async fn probe_fusion_stage(&self, stage_name: &str) -> bool {
    let collection = self.raw(crate::schema::CHUNKS);
    let pipeline = vec![doc! {
      stage_name: {
        "input": {
          "pipelines": {
            "a": [ { "$limit": 0i64 } ],
          },
        },
      }
    }];
    match collection.aggregate(pipeline).await {
      Ok(_) => true,
      Err(e) => {
        let db_err = crate::error::DbError::Mongo(e);
        let recognized = !db_err.is_unrecognized_stage();
        if !recognized {
          debug!(stage = stage_name, "Fusion stage unrecognized by server");
        }
        recognized
      }
    }
  }
}
