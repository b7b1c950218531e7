//! Atlas Search / Vector Search index declarations (§4.1).
//!
//! Two indexes per searchable collection: a tokenized text-search index and
//! a vector-search index. In `managed` mode the vector index targets a
//! pre-computed `embedding` field; in `automated` mode the same index is
//! declared over the source text field with a provider model name.

use bson::doc;
use clawmem_core::config::{EmbeddingMode, Quantization};
use mongodb::{SearchIndexModel, SearchIndexType};
use tracing::{info, warn};

use crate::{connection::MongoDb, error::Result, schema};

/// Conventional names for the two search indexes on a collection.
pub fn text_index_name(collection: &str) -> String {
  format!("{collection}_text_idx")
}

pub fn vector_index_name(collection: &str) -> String {
  format!("{collection}_vector_idx")
}

struct SearchableCollection {
  suffix: &'static str,
  text_field: &'static str,
  embedding_field: &'static str,
  filter_paths: &'static [&'static str],
}

const CHUNKS_SEARCHABLE: SearchableCollection = SearchableCollection {
  suffix: schema::CHUNKS,
  text_field: "text",
  embedding_field: "embedding",
  filter_paths: &["source", "path", "tags"],
};

const KB_CHUNKS_SEARCHABLE: SearchableCollection = SearchableCollection {
  suffix: schema::KB_CHUNKS,
  text_field: "text",
  embedding_field: "embedding",
  filter_paths: &["docId", "path"],
};

const STRUCTURED_SEARCHABLE: SearchableCollection = SearchableCollection {
  suffix: schema::STRUCTURED_MEM,
  text_field: "value",
  embedding_field: "embedding",
  filter_paths: &["agentId", "type", "tags"],
};

impl MongoDb {
  /// Create search indexes for every searchable collection, skipping the
  /// KB/structured pair when the deployment's index budget is too tight
  /// (§4.1 index-budget policy — only the core chunks pair survives).
  pub async fn ensure_search_indexes(&self) -> Result<()> {
    let all = [CHUNKS_SEARCHABLE, KB_CHUNKS_SEARCHABLE, STRUCTURED_SEARCHABLE];
    let planned = all.len() * 2;
    let allowed = self.assert_index_budget(planned);

    let mut created = 0usize;
    for target in all {
      if created + 2 > allowed {
        warn!(
          collection = target.suffix,
          "Skipping search indexes for this collection: index budget exhausted"
        );
        continue;
      }
      self.ensure_pair_for(&target).await?;
      created += 2;
    }
    Ok(())
  }

  async fn ensure_pair_for(&self, target: &SearchableCollection) -> Result<()> {
    let full = format!("{}{}", self.prefix, target.suffix);
    let collection = self.raw(target.suffix);

    let text_model = SearchIndexModel::builder()
      .name(Some(text_index_name(&full)))
      .index_type(Some(SearchIndexType::Search))
      .definition(doc! {
        "mappings": {
          "dynamic": false,
          "fields": {
            target.text_field: { "type": "string" },
          }
        }
      })
      .build();

    let embedding_mode = self.config.mongodb.resolve_embedding_mode();
    let vector_definition = match embedding_mode {
      EmbeddingMode::Managed => {
        let mut field_def = doc! {
          "type": "vector",
          "path": target.embedding_field,
          "numDimensions": self.config.mongodb.num_dimensions as i32,
          "similarity": "cosine",
        };
        match self.config.mongodb.quantization {
          Quantization::Scalar => {
            field_def.insert("quantization", "scalar");
          }
          Quantization::Binary => {
            field_def.insert("quantization", "binary");
          }
          Quantization::None => {}
        }
        let mut fields = vec![field_def];
        for path in target.filter_paths {
          fields.push(doc! { "type": "filter", "path": *path });
        }
        doc! { "fields": fields }
      }
      EmbeddingMode::Automated => {
        doc! {
          "fields": [{
            "type": "text",
            "path": target.text_field,
            "model": "voyage-3-large",
          }]
        }
      }
    };

    let vector_model = SearchIndexModel::builder()
      .name(Some(vector_index_name(&full)))
      .index_type(Some(SearchIndexType::VectorSearch))
      .definition(vector_definition)
      .build();

    for model in [text_model, vector_model] {
      match collection.create_search_index(model).await {
        Ok(name) => info!(collection = %full, index = %name, "Search index created"),
        Err(e) => warn!(collection = %full, error = %e, "Failed creating search index (may already exist)"),
      }
    }

    Ok(())
  }
}
