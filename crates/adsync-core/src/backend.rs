//! Contracts for the external systems.
//!
//! The reconciliation crates depend on these traits, not on any concrete LDAP
//! or HTTP client. `adsync-server` ships the production implementations; tests
//! use in-memory fakes.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BackendError, model::WriteObject};

// ─── Directory ───────────────────────────────────────────────────────────────

/// The attributes of one directory entry, as a JSON object.
pub type AttributeBag = serde_json::Map<String, Value>;

/// How far below the search base a directory search reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
  Base,
  OneLevel,
  Subtree,
}

/// One directory search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
  pub base:       String,
  pub filter:     String,
  pub scope:      SearchScope,
  pub attributes: Vec<String>,
}

/// One entry of a directory search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
  pub dn:         String,
  pub attributes: AttributeBag,
}

/// A directory search response:
/// `{"entries": [{"attributes": {...}, "dn": "..."}]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryResponse {
  #[serde(default)]
  pub entries: Vec<DirectoryEntry>,
}

impl DirectoryResponse {
  /// Parse the JSON rendering of a search response.
  pub fn from_json(json: &str) -> Result<Self, BackendError> {
    serde_json::from_str(json).map_err(|e| BackendError::Malformed(e.to_string()))
  }
}

/// A pre-authenticated directory connection.
pub trait DirectorySearch: Send + Sync {
  fn search(
    &self,
    request: SearchRequest,
  ) -> impl Future<Output = Result<DirectoryResponse, BackendError>> + Send + '_;
}

// ─── Master record ───────────────────────────────────────────────────────────

/// A GraphQL session against the master-record system.
pub trait GraphqlExecutor: Send + Sync {
  /// Run `query` and return its `data` object.
  fn execute<'a>(
    &'a self,
    query: &'a str,
    variables: Value,
  ) -> impl Future<Output = Result<Value, BackendError>> + Send + 'a;
}

/// The master-record bulk writer.
pub trait Uploader: Send + Sync {
  /// Write every object; returns one response (or `None`) per input, in
  /// order. Any failure fails the whole call.
  fn upload(
    &self,
    objects: Vec<WriteObject>,
  ) -> impl Future<Output = Result<Vec<Option<Value>>, BackendError>> + Send + '_;
}
