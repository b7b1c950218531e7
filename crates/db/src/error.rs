#[derive(Debug, thiserror::Error)]
pub enum DbError {
  #[error("MongoDB error: {0}")]
  Mongo(#[from] mongodb::error::Error),
  #[error("BSON serialization error: {0}")]
  BsonSer(#[from] bson::ser::Error),
  #[error("BSON deserialization error: {0}")]
  BsonDe(#[from] bson::de::Error),
  #[error("not found: {0}")]
  NotFound(String),
  #[error("capability not available: {0}")]
  CapabilityUnavailable(&'static str),
  #[error("invalid configuration: {0}")]
  Config(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// MongoDB server error codes this core reasons about explicitly.
pub mod codes {
  /// Returned when an aggregation pipeline references a stage the server
  /// doesn't recognize (used to probe for `$rankFusion`/`$scoreFusion`).
  pub const UNRECOGNIZED_PIPELINE_STAGE: i32 = 40324;
  pub const ILLEGAL_OPERATION: i32 = 20;
  pub const NO_SUCH_TRANSACTION: i32 = 251;
}

impl DbError {
  /// True when the failure is a server telling us a pipeline stage doesn't
  /// exist (as opposed to the stage existing but erroring for another
  /// reason, which still counts as "recognized, therefore supported" §4.1).
  pub fn is_unrecognized_stage(&self) -> bool {
    match self {
      DbError::Mongo(e) => e
        .kind
        .as_ref()
        .code()
        .map(|c| c == codes::UNRECOGNIZED_PIPELINE_STAGE)
        .unwrap_or(false)
        || e.to_string().contains("Unrecognized pipeline stage"),
      _ => false,
    }
  }

  pub fn is_standalone_no_transactions(&self) -> bool {
    match self {
      DbError::Mongo(e) => {
        let code = e.kind.as_ref().code();
        code == Some(codes::ILLEGAL_OPERATION) || code == Some(codes::NO_SUCH_TRANSACTION)
      }
      _ => false,
    }
  }

  pub fn is_not_replica_set(&self) -> bool {
    match self {
      DbError::Mongo(e) => e.to_string().contains("not supported") && e.to_string().contains("replica"),
      _ => false,
    }
  }
}

trait MongoErrorKindExt {
  fn code(&self) -> Option<i32>;
}

impl MongoErrorKindExt for mongodb::error::ErrorKind {
  fn code(&self) -> Option<i32> {
    match self {
      mongodb::error::ErrorKind::Command(cmd_err) => Some(cmd_err.code),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn non_mongo_errors_are_never_unrecognized_stage() {
    let e = DbError::Config("bad uri".into());
    assert!(!e.is_unrecognized_stage());
    assert!(!e.is_standalone_no_transactions());
    assert!(!e.is_not_replica_set());
  }

  #[test]
  fn not_found_renders_the_identifier() {
    let e = DbError::NotFound("chunk:foo".into());
    assert_eq!(e.to_string(), "not found: chunk:foo");
  }
}
