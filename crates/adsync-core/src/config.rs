//! Settings and their validation.
//!
//! Cross-field rules are checked once, when the value is constructed: a
//! [`FieldMapping`] or [`FieldMappings`] that exists is valid. Deserialisation
//! routes through the same constructors via `serde(try_from)`.

use std::collections::HashSet;

use serde::Deserialize;
use uuid::Uuid;

use crate::ConfigError;

// ─── Field mappings ──────────────────────────────────────────────────────────

/// The destination field type of a mapping, by identifier or by key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AddressTypeRef {
  /// Resolved lazily against the class registry.
  UserKey(String),
  Uuid(Uuid),
}

/// One mirrored field: directory attribute `ad_field` is kept as a contact
/// detail of the given address type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "RawFieldMapping")]
pub struct FieldMapping {
  ad_field:     String,
  address_type: AddressTypeRef,
}

#[derive(Deserialize)]
struct RawFieldMapping {
  ad_field:                 String,
  #[serde(default)]
  mo_address_type_user_key: Option<String>,
  #[serde(default)]
  mo_address_type_uuid:     Option<Uuid>,
}

impl TryFrom<RawFieldMapping> for FieldMapping {
  type Error = ConfigError;

  fn try_from(raw: RawFieldMapping) -> Result<Self, Self::Error> {
    Self::new(raw.ad_field, raw.mo_address_type_user_key, raw.mo_address_type_uuid)
  }
}

impl FieldMapping {
  /// Exactly one of `user_key` and `uuid` must be given.
  pub fn new(
    ad_field: impl Into<String>,
    user_key: Option<String>,
    uuid: Option<Uuid>,
  ) -> Result<Self, ConfigError> {
    let ad_field = ad_field.into();
    let address_type = match (user_key, uuid) {
      (Some(key), None) => AddressTypeRef::UserKey(key),
      (None, Some(uuid)) => AddressTypeRef::Uuid(uuid),
      _ => return Err(ConfigError::AmbiguousAddressType { ad_field }),
    };
    Ok(Self { ad_field, address_type })
  }

  pub fn by_user_key(ad_field: impl Into<String>, user_key: impl Into<String>) -> Self {
    Self {
      ad_field:     ad_field.into(),
      address_type: AddressTypeRef::UserKey(user_key.into()),
    }
  }

  pub fn by_uuid(ad_field: impl Into<String>, uuid: Uuid) -> Self {
    Self {
      ad_field:     ad_field.into(),
      address_type: AddressTypeRef::Uuid(uuid),
    }
  }

  pub fn ad_field(&self) -> &str { &self.ad_field }

  pub fn address_type(&self) -> &AddressTypeRef { &self.address_type }
}

/// A non-empty mapping list whose address-type keys and identifiers are each
/// pairwise distinct.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<FieldMapping>")]
pub struct FieldMappings(Vec<FieldMapping>);

impl FieldMappings {
  pub fn new(mappings: Vec<FieldMapping>) -> Result<Self, ConfigError> {
    if mappings.is_empty() {
      return Err(ConfigError::NoMappings);
    }
    if mappings.iter().collect::<HashSet<_>>().len() != mappings.len() {
      return Err(ConfigError::DuplicateMapping);
    }

    let mut user_keys = HashSet::new();
    let mut uuids = HashSet::new();
    for mapping in &mappings {
      match &mapping.address_type {
        AddressTypeRef::UserKey(key) => {
          if !user_keys.insert(key) {
            return Err(ConfigError::DuplicateUserKey(key.clone()));
          }
        }
        AddressTypeRef::Uuid(uuid) => {
          if !uuids.insert(uuid) {
            return Err(ConfigError::DuplicateUuid(*uuid));
          }
        }
      }
    }
    Ok(Self(mappings))
  }

  pub fn iter(&self) -> std::slice::Iter<'_, FieldMapping> { self.0.iter() }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  /// The directory attributes the mappings read, first occurrence first.
  pub fn ad_fields(&self) -> Vec<String> {
    let mut seen = HashSet::new();
    self
      .0
      .iter()
      .filter(|m| seen.insert(m.ad_field.as_str()))
      .map(|m| m.ad_field.clone())
      .collect()
  }
}

impl TryFrom<Vec<FieldMapping>> for FieldMappings {
  type Error = ConfigError;

  fn try_from(mappings: Vec<FieldMapping>) -> Result<Self, Self::Error> {
    Self::new(mappings)
  }
}

impl<'a> IntoIterator for &'a FieldMappings {
  type IntoIter = std::slice::Iter<'a, FieldMapping>;
  type Item = &'a FieldMapping;

  fn into_iter(self) -> Self::IntoIter { self.0.iter() }
}

// ─── Backends ────────────────────────────────────────────────────────────────

/// One domain controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ControllerConfig {
  pub host:     String,
  /// Defaults to 636 with SSL and 389 without.
  #[serde(default)]
  pub port:     Option<u16>,
  #[serde(default)]
  pub use_ssl:  bool,
  /// Skip certificate verification.
  #[serde(default)]
  pub insecure: bool,
  /// Connection timeout in seconds.
  #[serde(default = "default_ad_timeout")]
  pub timeout:  u64,
}

impl ControllerConfig {
  pub fn port(&self) -> u16 {
    self.port.unwrap_or(if self.use_ssl { 636 } else { 389 })
  }

  pub fn url(&self) -> String {
    let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
    format!("{scheme}://{}:{}", self.host, self.port())
  }
}

/// Where the master-record GraphQL API lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GraphqlSettings {
  pub url:     String,
  /// Sent as a bearer token when set.
  #[serde(default)]
  pub token:   Option<String>,
  /// Request timeout in seconds.
  #[serde(default = "default_graphql_timeout")]
  pub timeout: u64,
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// Everything the reconciliations need, passed explicitly to every component.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  pub graphql:                  GraphqlSettings,
  pub ad_controllers:           Vec<ControllerConfig>,
  /// Domain used when binding to the controllers.
  pub ad_domain:                String,
  #[serde(default = "default_ad_user")]
  pub ad_user:                  String,
  pub ad_password:              String,
  /// Directory attribute holding the CPR number.
  pub ad_cpr_attribute:         String,
  pub ad_search_base:           String,
  /// Skips the key lookup when set.
  #[serde(default)]
  pub adguid_itsystem_uuid:     Option<Uuid>,
  #[serde(default = "default_itsystem_user_key")]
  pub adguid_itsystem_user_key: String,
  pub ad_mappings:              FieldMappings,
  /// How many people are reconciled at once in a population run.
  #[serde(default = "default_concurrency")]
  pub concurrency:              usize,
  #[serde(default)]
  pub max_batch_size:           Option<usize>,
  /// Extra coalescing window for the loaders, in milliseconds.
  #[serde(default)]
  pub batch_delay_ms:           Option<u64>,
}

impl Settings {
  /// Cross-field checks that serde cannot express.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.graphql.url.trim().is_empty() {
      return Err(ConfigError::Missing("graphql.url"));
    }
    if self.ad_search_base.trim().is_empty() {
      return Err(ConfigError::Missing("ad_search_base"));
    }
    if self.ad_controllers.is_empty() {
      return Err(ConfigError::NoControllers);
    }
    if self.ad_controllers.iter().collect::<HashSet<_>>().len()
      != self.ad_controllers.len()
    {
      return Err(ConfigError::DuplicateController);
    }
    if self.concurrency == 0 {
      return Err(ConfigError::ZeroConcurrency);
    }
    Ok(())
  }
}

fn default_ad_timeout() -> u64 { 5 }

fn default_graphql_timeout() -> u64 { 30 }

fn default_ad_user() -> String { "os2mo".to_string() }

fn default_itsystem_user_key() -> String { "ADGUID".to_string() }

fn default_concurrency() -> usize { 5 }

// ─── Tests ────────────────────────────────────────────────────────────────────
