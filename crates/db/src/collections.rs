//! Typed CRUD helpers over the chunk and file-metadata collections (§3, §4.3).

use bson::doc;
use chrono::Utc;
use clawmem_core::{Chunk, EmbeddingStatus, FileMeta};
use futures::TryStreamExt;
use mongodb::ClientSession;
use mongodb::options::FindOptions;

use crate::{connection::MongoDb, error::Result};

impl MongoDb {
  pub async fn get_file_meta(&self, path: &str) -> Result<Option<FileMeta>> {
    Ok(self.files().find_one(doc! { "_id": path }).await?)
  }

  pub async fn upsert_file_meta(&self, meta: &FileMeta) -> Result<()> {
    let doc = bson::to_document(meta)?;
    self
      .files()
      .replace_one(doc! { "_id": &meta.path }, doc)
      .with_options(mongodb::options::ReplaceOptions::builder().upsert(true).build())
      .await?;
    Ok(())
  }

  pub async fn upsert_file_meta_session(&self, session: &mut ClientSession, meta: &FileMeta) -> Result<()> {
    let doc = bson::to_document(meta)?;
    self
      .files()
      .replace_one(doc! { "_id": &meta.path }, doc)
      .with_options(mongodb::options::ReplaceOptions::builder().upsert(true).build())
      .session(&mut *session)
      .await?;
    Ok(())
  }

  /// All paths currently tracked in file metadata.
  pub async fn stored_chunk_paths(&self) -> Result<Vec<String>> {
    let ids = self.files().distinct("_id", doc! {}).await?;
    Ok(ids.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
  }

  pub async fn delete_chunks_for_path(&self, path: &str) -> Result<u64> {
    let result = self.chunks().delete_many(doc! { "path": path }).await?;
    Ok(result.deleted_count)
  }

  pub async fn delete_chunks_for_path_session(&self, session: &mut ClientSession, path: &str) -> Result<u64> {
    let result = self
      .chunks()
      .delete_many(doc! { "path": path })
      .session(&mut *session)
      .await?;
    Ok(result.deleted_count)
  }

  pub async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
    for chunk in chunks {
      let doc = bson::to_document(chunk)?;
      self
        .chunks()
        .replace_one(doc! { "_id": &chunk.id }, doc)
        .with_options(mongodb::options::ReplaceOptions::builder().upsert(true).build())
        .await?;
    }
    Ok(())
  }

  pub async fn upsert_chunks_session(&self, session: &mut ClientSession, chunks: &[Chunk]) -> Result<()> {
    for chunk in chunks {
      let doc = bson::to_document(chunk)?;
      self
        .chunks()
        .replace_one(doc! { "_id": &chunk.id }, doc)
        .with_options(mongodb::options::ReplaceOptions::builder().upsert(true).build())
        .session(&mut *session)
        .await?;
    }
    Ok(())
  }

  /// Delete the chunks and file-metadata entries for paths no longer valid
  /// on disk (§4.3 phase G stale-cleanup).
  pub async fn delete_stale(&self, stale_paths: &[String]) -> Result<u64> {
    if stale_paths.is_empty() {
      return Ok(0);
    }
    let filter = doc! { "path": { "$in": stale_paths } };
    let result = self.chunks().delete_many(filter).await?;
    self.files().delete_many(doc! { "_id": { "$in": stale_paths } }).await?;
    Ok(result.deleted_count)
  }

  pub async fn count_files(&self) -> Result<u64> {
    Ok(self.files().count_documents(doc! {}).await?)
  }

  pub async fn count_chunks(&self) -> Result<u64> {
    Ok(self.chunks().count_documents(doc! {}).await?)
  }

  /// Page through chunks stuck in `failed` status for the deferred
  /// re-attempt pass (§4.2): oldest-updated first, capped at `limit`.
  pub async fn page_failed_chunks(&self, limit: i64) -> Result<Vec<Chunk>> {
    let find_options = FindOptions::builder().sort(doc! { "updatedAt": 1 }).limit(limit).build();
    let mut cursor = self
      .chunks()
      .find(doc! { "embeddingStatus": "failed" })
      .with_options(find_options)
      .await?;
    let mut out = Vec::new();
    while let Some(chunk) = cursor.try_next().await? {
      out.push(chunk);
    }
    Ok(out)
  }

  pub async fn mark_chunk_embedding(&self, id: &str, status: EmbeddingStatus, embedding: Option<Vec<f32>>, model: Option<&str>) -> Result<()> {
    let status_str = match status {
      EmbeddingStatus::Success => "success",
      EmbeddingStatus::Failed => "failed",
      EmbeddingStatus::Pending => "pending",
    };
    let mut set = doc! { "embeddingStatus": status_str, "updatedAt": Utc::now() };
    if let Some(vec) = embedding {
      set.insert("embedding", vec);
    }
    if let Some(m) = model {
      set.insert("model", m);
    }
    self.chunks().update_one(doc! { "_id": id }, doc! { "$set": set }).await?;
    Ok(())
  }
}
