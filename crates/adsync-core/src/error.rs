//! Error types for `adsync-core`.

use std::fmt;

use adsync_batch::BatchError;
use thiserror::Error;
use uuid::Uuid;

/// Which master-record registry a human-readable key was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registry {
  /// Linkage types ("IT-systems").
  ItSystem,
  /// Field types ("address type" classes).
  Class,
}

impl fmt::Display for Registry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::ItSystem => f.write_str("itsystem"),
      Self::Class => f.write_str("class"),
    }
  }
}

/// A failure talking to the directory or the master-record system.
#[derive(Debug, Error)]
pub enum BackendError {
  #[error("transport error: {0}")]
  Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("backend responded with status {status}: {body}")]
  Status { status: u16, body: String },

  #[error("graphql errors: {}", .0.join("; "))]
  Graphql(Vec<String>),

  #[error("directory error: {0}")]
  Directory(String),

  #[error("malformed response: {0}")]
  Malformed(String),
}

/// A configuration value failed validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error(
    "mapping for {ad_field:?}: exactly one of 'mo_address_type_user_key' or \
     'mo_address_type_uuid' must be set"
  )]
  AmbiguousAddressType { ad_field: String },

  #[error("'ad_mappings' must contain at least one mapping")]
  NoMappings,

  #[error("'ad_mappings' contains the same mapping twice")]
  DuplicateMapping,

  #[error("'mo_address_type_user_key' must be unique across entire list: {0:?}")]
  DuplicateUserKey(String),

  #[error("'mo_address_type_uuid' must be unique across entire list: {0}")]
  DuplicateUuid(Uuid),

  #[error("'ad_controllers' must contain at least one controller")]
  NoControllers,

  #[error("'ad_controllers' contains the same controller twice")]
  DuplicateController,

  #[error("'concurrency' must be at least 1")]
  ZeroConcurrency,

  #[error("missing required setting {0:?}")]
  Missing(&'static str),
}

/// Everything a reconciliation can fail with.
#[derive(Debug, Error)]
pub enum Error {
  #[error("unable to find {registry} by user-key {user_key:?}")]
  Resolution { registry: Registry, user_key: String },

  #[error("unable to find user by uuid {0}")]
  PersonNotFound(Uuid),

  #[error("unable to find directory entry {0}")]
  DirectoryEntryNotFound(Uuid),

  #[error("invariant violation: {0}")]
  InvariantViolation(String),

  #[error("configuration error: {0}")]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Batch(#[from] BatchError<BackendError>),

  #[error(transparent)]
  Backend(#[from] BackendError),
}

impl Error {
  /// `true` for the "target does not exist" family.
  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::PersonNotFound(_) | Self::DirectoryEntryNotFound(_))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
