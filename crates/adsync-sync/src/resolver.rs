//! Demultiplexing directory search responses.
//!
//! One batched search returns the entries for many keys at once. These
//! functions re-index the entries by the key the loaders were asked for, so
//! the loaders can answer in input order no matter how the directory ordered
//! its response.

use std::collections::HashMap;

use adsync_core::{
  BackendError,
  backend::{AttributeBag, DirectoryEntry, DirectoryResponse},
};
use serde_json::Value;
use uuid::Uuid;

/// The directory's native per-object identifier.
pub const OBJECT_GUID: &str = "objectGUID";

/// Parse a directory GUID, with or without surrounding braces.
pub fn parse_guid(raw: &str) -> Result<Uuid, uuid::Error> {
  Uuid::parse_str(raw.trim_matches(|c| c == '{' || c == '}'))
}

fn string_attribute<'a>(
  entry: &'a DirectoryEntry,
  name: &str,
) -> Result<&'a str, BackendError> {
  entry
    .attributes
    .get(name)
    .and_then(Value::as_str)
    .ok_or_else(|| {
      BackendError::Malformed(format!(
        "entry {:?} has no string attribute {name:?}",
        entry.dn
      ))
    })
}

fn entry_guid(entry: &DirectoryEntry) -> Result<Uuid, BackendError> {
  let raw = string_attribute(entry, OBJECT_GUID)?;
  parse_guid(raw).map_err(|e| {
    BackendError::Malformed(format!(
      "entry {:?} has invalid {OBJECT_GUID} {raw:?}: {e}",
      entry.dn
    ))
  })
}

/// GUID → attribute bag. Later entries win on duplicate GUIDs.
pub fn guid_attribute_map(
  response: DirectoryResponse,
) -> Result<HashMap<Uuid, AttributeBag>, BackendError> {
  response
    .entries
    .into_iter()
    .map(|entry| Ok((entry_guid(&entry)?, entry.attributes)))
    .collect()
}

/// Correlating attribute value (CPR number) → GUID. Later entries win.
pub fn cpr_guid_map(
  response: &DirectoryResponse,
  cpr_attribute: &str,
) -> Result<HashMap<String, Uuid>, BackendError> {
  response
    .entries
    .iter()
    .map(|entry| {
      let cpr = string_attribute(entry, cpr_attribute)?;
      Ok((cpr.to_owned(), entry_guid(entry)?))
    })
    .collect()
}
