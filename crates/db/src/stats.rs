//! Store-wide statistics exposed through the Memory Manager's `stats`
//! operation (§4.7, §6 external interfaces).

use bson::doc;
use futures::TryStreamExt;
use serde::Serialize;

use crate::{connection::MongoDb, error::Result, schema};

#[derive(Debug, Clone, Serialize, Default)]
pub struct StoreStats {
  pub file_count: u64,
  pub chunk_count: u64,
  pub embedded_chunk_count: u64,
  pub failed_chunk_count: u64,
  pub kb_document_count: u64,
  pub kb_chunk_count: u64,
  pub structured_entry_count: u64,
  pub embedding_cache_count: u64,
}

impl MongoDb {
  pub async fn store_stats(&self) -> Result<StoreStats> {
    Ok(StoreStats {
      file_count: self.count_files().await?,
      chunk_count: self.count_chunks().await?,
      embedded_chunk_count: self.chunks().count_documents(doc! { "embeddingStatus": "success" }).await?,
      failed_chunk_count: self.chunks().count_documents(doc! { "embeddingStatus": "failed" }).await?,
      kb_document_count: self.kb_documents().count_documents(doc! {}).await?,
      kb_chunk_count: self.kb_chunks().count_documents(doc! {}).await?,
      structured_entry_count: self.structured().count_documents(doc! {}).await?,
      embedding_cache_count: self.embedding_cache().count_documents(doc! {}).await?,
    })
  }

  /// Per-index usage rollup via `$indexStats`, used for the index-budget
  /// maintenance report. Degrades to an empty list on any error instead of
  /// failing the whole stats call: `$indexStats` isn't available on every
  /// deployment profile.
  pub async fn index_usage(&self, collection_suffix: &str) -> Vec<bson::Document> {
    let full = format!("{}{}", self.prefix, collection_suffix);
    let collection = self.database.collection::<bson::Document>(&full);
    match collection.aggregate(vec![doc! { "$indexStats": {} }]).await {
      Ok(mut cursor) => {
        let mut out = Vec::new();
        while let Ok(Some(doc)) = cursor.try_next().await {
          out.push(doc);
        }
        out
      }
      Err(_) => Vec::new(),
    }
  }

  /// Names of every search index currently live on `collection_suffix`.
  pub async fn search_index_names(&self, collection_suffix: &str) -> Result<Vec<String>> {
    let collection = self.raw(collection_suffix);
    let mut cursor = collection.list_search_indexes().await?;
    let mut names = Vec::new();
    while let Some(doc) = cursor.try_next().await? {
      if let Some(name) = doc.get_str("name").ok() {
        names.push(name.to_string());
      }
    }
    Ok(names)
  }

  /// All searchable-collection suffixes (used when reporting index usage
  /// across the whole store).
  pub fn searchable_collections(&self) -> &'static [&'static str] {
    schema::SEARCHABLE_COLLECTIONS
  }
}
