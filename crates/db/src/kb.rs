//! Knowledge-base document and chunk CRUD, plus the orphan check used by
//! maintenance (§4.1 `checkKBOrphans`, §3 knowledge_base/kb_chunks).

use bson::doc;
use clawmem_core::{KbChunk, KbDocument};
use futures::TryStreamExt;
use std::collections::HashSet;

use crate::{connection::MongoDb, error::Result};

impl MongoDb {
  pub async fn get_kb_document(&self, id: &str) -> Result<Option<KbDocument>> {
    Ok(self.kb_documents().find_one(doc! { "_id": id }).await?)
  }

  pub async fn find_kb_document_by_hash(&self, hash: &str) -> Result<Option<KbDocument>> {
    Ok(self.kb_documents().find_one(doc! { "hash": hash }).await?)
  }

  pub async fn upsert_kb_document(&self, document: &KbDocument) -> Result<()> {
    let doc = bson::to_document(document)?;
    self
      .kb_documents()
      .replace_one(doc! { "_id": &document.id }, doc)
      .with_options(mongodb::options::ReplaceOptions::builder().upsert(true).build())
      .await?;
    Ok(())
  }

  pub async fn delete_kb_document(&self, id: &str) -> Result<()> {
    self.kb_documents().delete_one(doc! { "_id": id }).await?;
    self.kb_chunks().delete_many(doc! { "docId": id }).await?;
    Ok(())
  }

  pub async fn list_kb_document_ids(&self) -> Result<Vec<String>> {
    let ids = self.kb_documents().distinct("_id", doc! {}).await?;
    Ok(ids.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
  }

  pub async fn upsert_kb_chunks(&self, chunks: &[KbChunk]) -> Result<()> {
    for chunk in chunks {
      let doc = bson::to_document(chunk)?;
      self
        .kb_chunks()
        .replace_one(doc! { "_id": &chunk.id }, doc)
        .with_options(mongodb::options::ReplaceOptions::builder().upsert(true).build())
        .await?;
    }
    Ok(())
  }

  pub async fn delete_kb_chunks_for_doc(&self, doc_id: &str) -> Result<u64> {
    let result = self.kb_chunks().delete_many(doc! { "docId": doc_id }).await?;
    Ok(result.deleted_count)
  }

  /// docIds referenced by at least one stored chunk, used to pre-filter a
  /// search's `docId` scope before the expensive fusion pipeline runs
  /// (§4.5 "KB docId prefilter").
  pub async fn distinct_kb_chunk_doc_ids(&self) -> Result<HashSet<String>> {
    let ids = self.kb_chunks().distinct("docId", doc! {}).await?;
    Ok(ids.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
  }

  /// Documents with zero chunks (ingest died mid-way) and chunks whose
  /// parent document no longer exists — both are data-integrity defects a
  /// maintenance pass should surface (§8 integrity invariants).
  pub async fn check_kb_orphans(&self) -> Result<KbOrphanReport> {
    let doc_ids = HashSet::<String>::from_iter(self.list_kb_document_ids().await?);
    let chunk_doc_ids = self.distinct_kb_chunk_doc_ids().await?;

    let documents_without_chunks: Vec<String> = doc_ids.difference(&chunk_doc_ids).cloned().collect();

    let mut orphaned_chunk_ids = Vec::new();
    let dangling: Vec<&String> = chunk_doc_ids.difference(&doc_ids).collect();
    if !dangling.is_empty() {
      let filter = doc! { "docId": { "$in": dangling.iter().map(|s| s.as_str()).collect::<Vec<_>>() } };
      let mut cursor = self.kb_chunks().find(filter).await?;
      while let Some(chunk) = cursor.try_next().await? {
        orphaned_chunk_ids.push(chunk.id);
      }
    }

    Ok(KbOrphanReport {
      documents_without_chunks,
      orphaned_chunk_ids,
    })
  }
}

#[derive(Debug, Default, Clone)]
pub struct KbOrphanReport {
  pub documents_without_chunks: Vec<String>,
  pub orphaned_chunk_ids: Vec<String>,
}

impl KbOrphanReport {
  pub fn is_clean(&self) -> bool {
    self.documents_without_chunks.is_empty() && self.orphaned_chunk_ids.is_empty()
  }
}
