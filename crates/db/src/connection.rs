use std::time::Duration;

use bson::doc;
use clawmem_core::{Chunk, Config, EmbeddingCacheEntry, FileMeta, KbChunk, KbDocument, MetaEntry, StructuredEntry};
use mongodb::{
  Client, Collection, Database,
  options::{ClientOptions, Compressor},
};
use tracing::{debug, info, warn};

use crate::{error::Result, schema};

/// Owns the pooled MongoDB client and the collection handles for one agent's
/// memory store (§3 "Lifecycle and ownership"). The Memory Manager is the
/// sole owner for the lifetime of a process; schema and search helpers
/// borrow a handle and never close it.
pub struct MongoDb {
  pub client: Client,
  pub database: Database,
  pub prefix: String,
  pub config: Config,
}

impl MongoDb {
  /// Connect with a bounded server-selection/connect timeout and verify the
  /// connection with a `ping`. On failure the caller (C7) closes the client
  /// and surfaces no manager at all.
  pub async fn connect(config: Config, agent_id: &str) -> Result<Self> {
    let uri = config
      .mongodb
      .resolve_uri()
      .ok_or_else(|| crate::error::DbError::Config("no mongodb.uri configured and OPENCLAW_MONGODB_URI unset".into()))?;

    let mut options = ClientOptions::parse(&uri).await?;
    options.connect_timeout = Some(Duration::from_millis(config.mongodb.connect_timeout_ms));
    options.server_selection_timeout = Some(Duration::from_millis(config.mongodb.connect_timeout_ms));
    options.max_pool_size = Some(config.mongodb.max_pool_size);
    options.min_pool_size = Some(config.mongodb.min_pool_size);
    options.compressors = Some(vec![Compressor::Zstd { level: None }]);

    info!(
      uri = %clawmem_core::config::redact_connection_string(&uri),
      database = %config.mongodb.database,
      "Connecting to MongoDB"
    );

    let client = Client::with_options(options)?;
    let database = client.database(&config.mongodb.database);

    // Verify connectivity before declaring success.
    database.run_command(doc! { "ping": 1 }).await.map_err(|e| {
      warn!(error = %e, "MongoDB ping failed");
      e
    })?;

    let prefix = config.mongodb.resolve_collection_prefix(agent_id);
    debug!(prefix = %prefix, "MongoDB connection established");

    Ok(Self {
      client,
      database,
      prefix,
      config,
    })
  }

  fn name(&self, suffix: &str) -> String {
    format!("{}{}", self.prefix, suffix)
  }

  pub fn chunks(&self) -> Collection<Chunk> {
    self.database.collection(&self.name(schema::CHUNKS))
  }

  pub fn files(&self) -> Collection<FileMeta> {
    self.database.collection(&self.name(schema::FILES))
  }

  pub fn kb_documents(&self) -> Collection<KbDocument> {
    self.database.collection(&self.name(schema::KNOWLEDGE_BASE))
  }

  pub fn kb_chunks(&self) -> Collection<KbChunk> {
    self.database.collection(&self.name(schema::KB_CHUNKS))
  }

  pub fn structured(&self) -> Collection<StructuredEntry> {
    self.database.collection(&self.name(schema::STRUCTURED_MEM))
  }

  pub fn embedding_cache(&self) -> Collection<EmbeddingCacheEntry> {
    self.database.collection(&self.name(schema::EMBEDDING_CACHE))
  }

  pub fn meta(&self) -> Collection<MetaEntry> {
    self.database.collection(&self.name(schema::META))
  }

  /// Raw, untyped handle — used by the search dispatcher to run aggregation
  /// pipelines whose shape varies by capability (§4.5, design note on
  /// "dynamic document shapes").
  pub fn raw(&self, suffix: &str) -> Collection<bson::Document> {
    self.database.collection(&self.name(suffix))
  }

  /// Idempotent: create every collection that doesn't already exist.
  pub async fn ensure_collections(&self) -> Result<()> {
    let existing: Vec<String> = self.database.list_collection_names().await?;
    for suffix in [
      schema::CHUNKS,
      schema::FILES,
      schema::EMBEDDING_CACHE,
      schema::META,
      schema::KNOWLEDGE_BASE,
      schema::KB_CHUNKS,
      schema::STRUCTURED_MEM,
    ] {
      let full = self.name(suffix);
      if !existing.contains(&full) {
        debug!(collection = %full, "Creating collection");
        match self.database.create_collection(&full).await {
          Ok(()) => {}
          Err(e) if e.to_string().contains("already exists") => {}
          Err(e) => return Err(e.into()),
        }
      }
    }
    Ok(())
  }

  /// Install (or update) the warn-only `$jsonSchema` validator for every
  /// collection that carries one.
  pub async fn ensure_schema_validation(&self) -> Result<()> {
    for suffix in schema::VALIDATED_COLLECTIONS {
      let Some(validator) = schema::validator_for(suffix) else {
        continue;
      };
      let full = self.name(suffix);
      let cmd = doc! {
        "collMod": &full,
        "validator": validator,
        "validationAction": "warn",
        "validationLevel": "moderate",
      };
      self.database.run_command(cmd).await?;
      debug!(collection = %full, "Schema validator installed (warn mode)");
    }
    Ok(())
  }

  /// Create the plain B-tree and fallback `text` indexes for every
  /// collection (§4.1). TTL indexes are handled separately via
  /// [`Self::ensure_ttl_index`] because changing a TTL value requires
  /// dropping and re-creating the index under the same key.
  pub async fn ensure_standard_indexes(&self) -> Result<()> {
    for suffix in [
      schema::CHUNKS,
      schema::FILES,
      schema::KNOWLEDGE_BASE,
      schema::KB_CHUNKS,
      schema::STRUCTURED_MEM,
      schema::EMBEDDING_CACHE,
    ] {
      let models = schema::standard_indexes_for(suffix);
      if models.is_empty() {
        continue;
      }
      let full = self.name(suffix);
      let collection = self.database.collection::<bson::Document>(&full);
      match collection.create_indexes(models).await {
        Ok(_) => {}
        Err(e) => {
          warn!(collection = %full, error = %e, "Failed creating one or more standard indexes");
        }
      }
    }
    Ok(())
  }

  /// Ensure a TTL index on `field` with the given retention. `ttl_days == 0`
  /// drops the TTL index and re-creates a plain (non-expiring) index on the
  /// same field instead of leaving the key unindexed (§4.1 TTL handling).
  pub async fn ensure_ttl_index(&self, collection_suffix: &str, field: &str, index_name: &str, ttl_days: u32) -> Result<()> {
    let full = self.name(collection_suffix);
    let collection = self.database.collection::<bson::Document>(&full);

    // Drop any existing index under this name first: the server disallows
    // two indexes on the same key with different options.
    match collection.drop_index(index_name).await {
      Ok(()) => {}
      Err(e) if e.to_string().contains("index not found") => {}
      Err(e) => warn!(collection = %full, error = %e, "Failed dropping prior TTL index"),
    }

    if ttl_days == 0 {
      debug!(collection = %full, field = %field, "TTL disabled, re-creating as a plain index");
      collection.create_index(schema::plain_index(field)).await?;
      return Ok(());
    }

    let ttl_seconds = ttl_days as i64 * 86_400;
    let model = schema::ttl_index(field, ttl_seconds);
    collection.create_index(model).await?;
    Ok(())
  }

  /// Budget-aware count of search indexes this deployment profile permits.
  pub fn assert_index_budget(&self, planned: usize) -> usize {
    match self.config.mongodb.deployment_profile.index_budget() {
      Some(budget) if planned > budget => {
        warn!(planned, budget, "Planned search index count exceeds deployment budget, truncating");
        budget
      }
      _ => planned,
    }
  }
}
