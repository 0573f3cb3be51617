//! Master-record types: what the reconciliations read and what they write.
//!
//! Read types mirror the GraphQL response shapes; write types are the fully
//! constructed objects handed to the bulk uploader.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Temporal ────────────────────────────────────────────────────────────────

/// The validity interval of a master-record detail.
///
/// Dates are kept as the master system renders them; an edit copies the
/// original `to` through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
  pub from: String,
  /// `None` means open-ended.
  pub to:   Option<String>,
}

impl Validity {
  /// Valid from `from` with no end date.
  pub fn open_from(from: NaiveDate) -> Self {
    Self {
      from: from.to_string(),
      to:   None,
    }
  }
}

// ─── Read model ──────────────────────────────────────────────────────────────

/// A linkage record ("IT-user"): the person is known in an external system
/// under `user_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItUser {
  pub itsystem_uuid: Uuid,
  pub user_key:      String,
}

/// A contact detail ("address") attached to a person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
  pub uuid:              Uuid,
  pub address_type_uuid: Uuid,
  pub value:             String,
  pub validity:          Validity,
}

/// A master-record person ("employee") with the parts the reconciliations
/// look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
  pub uuid:      Uuid,
  /// National identifier used to find the person in the directory.
  #[serde(default)]
  pub cpr_no:    Option<String>,
  #[serde(default)]
  pub itusers:   Vec<ItUser>,
  #[serde(default)]
  pub addresses: Vec<Address>,
}

impl Person {
  /// All linkage records of the given linkage type.
  pub fn itusers_in(
    &self,
    itsystem_uuid: Uuid,
  ) -> impl Iterator<Item = &ItUser> + '_ {
    self
      .itusers
      .iter()
      .filter(move |ituser| ituser.itsystem_uuid == itsystem_uuid)
  }
}

// ─── Write model ─────────────────────────────────────────────────────────────

/// A contact detail to create (`uuid` is `None`) or to replace (`uuid` is the
/// existing detail's identifier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressWrite {
  pub uuid:              Option<Uuid>,
  pub address_type_uuid: Uuid,
  pub value:             String,
  pub person_uuid:       Uuid,
  pub validity:          Validity,
}

impl AddressWrite {
  pub fn is_edit(&self) -> bool { self.uuid.is_some() }
}

/// A linkage record to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItUserWrite {
  pub user_key:      String,
  pub itsystem_uuid: Uuid,
  pub person_uuid:   Uuid,
  pub validity:      Validity,
}

/// One object of a bulk upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WriteObject {
  Address(AddressWrite),
  ItUser(ItUserWrite),
}

impl WriteObject {
  pub fn as_address(&self) -> Option<&AddressWrite> {
    match self {
      Self::Address(address) => Some(address),
      Self::ItUser(_) => None,
    }
  }
}
