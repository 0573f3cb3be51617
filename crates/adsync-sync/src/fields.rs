//! Mirroring directory attributes into person addresses.
//!
//! Each configured mapping names one directory attribute and one address
//! type. For a linked person, the attribute's current value must equal the
//! value of their address of that type. Missing addresses are created,
//! differing ones are replaced in place. Addresses whose type no mapping
//! covers are never touched.

use std::collections::{HashMap, HashSet};

use adsync_core::{
  Error, Result,
  backend::AttributeBag,
  model::{Address, AddressWrite, Person, Validity, WriteObject},
};
use chrono::NaiveDate;
use serde_json::Value;
use uuid::Uuid;

use crate::{
  SyncContext,
  registry::{
    ResolvedMapping, ensure_address_type_uuids, get_itsystem_uuid, load_person,
  },
  resolver::parse_guid,
  today,
};

// ─── Diff ────────────────────────────────────────────────────────────────────

/// What it takes to bring a person's managed addresses in line with the
/// directory.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AddressDiff {
  pub inserts:   Vec<AddressWrite>,
  pub edits:     Vec<AddressWrite>,
  /// Managed address types with no desired value. Computed, never written.
  pub deletions: Vec<Uuid>,
}

impl AddressDiff {
  /// `true` when nothing needs writing.
  pub fn is_empty(&self) -> bool { self.inserts.is_empty() && self.edits.is_empty() }

  /// Inserts first, then edits.
  pub fn into_writes(self) -> Vec<WriteObject> {
    self
      .inserts
      .into_iter()
      .chain(self.edits)
      .map(WriteObject::Address)
      .collect()
  }
}

/// Existing addresses of managed types, by address type.
///
/// Fails if the person has more than one address of a managed type.
pub fn current_address_map<'a>(
  addresses: &'a [Address],
  managed: &HashSet<Uuid>,
) -> Result<HashMap<Uuid, &'a Address>> {
  let mut current = HashMap::new();
  for address in addresses {
    if !managed.contains(&address.address_type_uuid) {
      continue;
    }
    if current.insert(address.address_type_uuid, address).is_some() {
      return Err(Error::InvariantViolation(format!(
        "non-unique managed addresses of type {}",
        address.address_type_uuid
      )));
    }
  }
  Ok(current)
}

/// Desired value per address type, in mapping order.
///
/// Every mapped attribute must be present in the bag as a single string.
pub fn desired_address_map(
  mappings: &[ResolvedMapping],
  attributes: &AttributeBag,
) -> Result<Vec<(Uuid, String)>> {
  mappings
    .iter()
    .map(|mapping| {
      let value = match attributes.get(&mapping.ad_field) {
        Some(Value::String(value)) => value.clone(),
        Some(other) => {
          return Err(Error::InvariantViolation(format!(
            "directory attribute {:?} is not a single string: {other}",
            mapping.ad_field
          )));
        }
        None => {
          return Err(Error::InvariantViolation(format!(
            "directory attribute {:?} is missing",
            mapping.ad_field
          )));
        }
      };
      Ok((mapping.address_type_uuid, value))
    })
    .collect()
}

/// Classify every address type as insert, edit, unchanged or deletion.
///
/// Inserts are valid from `today` with no end date. Edits keep the existing
/// address's identifier and end date and start `today`.
pub fn diff_addresses(
  person_uuid: Uuid,
  current: &HashMap<Uuid, &Address>,
  desired: &[(Uuid, String)],
  today: NaiveDate,
) -> AddressDiff {
  let current_keys: HashSet<Uuid> = current.keys().copied().collect();
  let desired_keys: HashSet<Uuid> = desired.iter().map(|(key, _)| *key).collect();

  let insert_keys = &desired_keys - &current_keys;
  let edit_keys: HashSet<Uuid> = desired
    .iter()
    .filter(|(key, value)| {
      current
        .get(key)
        .is_some_and(|existing| existing.value != *value)
    })
    .map(|(key, _)| *key)
    .collect();
  let mut deletions: Vec<Uuid> =
    (&current_keys - &desired_keys).into_iter().collect();
  deletions.sort();

  let mut diff = AddressDiff { deletions, ..AddressDiff::default() };
  for (address_type_uuid, value) in desired {
    if insert_keys.contains(address_type_uuid) {
      diff.inserts.push(AddressWrite {
        uuid: None,
        address_type_uuid: *address_type_uuid,
        value: value.clone(),
        person_uuid,
        validity: Validity::open_from(today),
      });
    } else if edit_keys.contains(address_type_uuid) {
      let existing = current[address_type_uuid];
      diff.edits.push(AddressWrite {
        uuid: Some(existing.uuid),
        address_type_uuid: *address_type_uuid,
        value: value.clone(),
        person_uuid,
        validity: Validity {
          from: today.to_string(),
          to:   existing.validity.to.clone(),
        },
      });
    }
  }
  diff
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

/// The directory GUID a person is linked to, if any.
fn linked_guid(user: &Person, itsystem_uuid: Uuid) -> Result<Option<Uuid>> {
  let mut linked = user.itusers_in(itsystem_uuid);
  let Some(ituser) = linked.next() else {
    return Ok(None);
  };
  if linked.next().is_some() {
    return Err(Error::InvariantViolation(format!(
      "person {} has more than one ituser in itsystem {itsystem_uuid}",
      user.uuid
    )));
  }
  parse_guid(&ituser.user_key).map(Some).map_err(|e| {
    Error::InvariantViolation(format!(
      "ituser key {:?} is not a GUID: {e}",
      ituser.user_key
    ))
  })
}

/// Ensure the person's mapped addresses match their directory attributes.
///
/// Returns `true` if any address was written.
#[tracing::instrument(skip_all, fields(%user_uuid))]
pub async fn reconcile_fields(user_uuid: Uuid, ctx: &SyncContext) -> Result<bool> {
  let loaders = &ctx.loaders;
  let itsystem_uuid =
    get_itsystem_uuid(&ctx.settings, &loaders.itsystems_loader).await?;
  let user = load_person(user_uuid, loaders).await?;

  let Some(adguid) = linked_guid(&user, itsystem_uuid)? else {
    tracing::info!("Unable to find ADGUID itsystem on user");
    return Ok(false);
  };
  tracing::info!(%adguid, "Synchronizing user");

  let mappings =
    ensure_address_type_uuids(&ctx.settings.ad_mappings, &loaders.classes_loader)
      .await?;
  let managed: HashSet<Uuid> =
    mappings.iter().map(|mapping| mapping.address_type_uuid).collect();
  let current = current_address_map(&user.addresses, &managed)?;

  let attributes = loaders
    .adattribute_loader
    .load(adguid)
    .await?
    .ok_or_else(|| {
      tracing::warn!(%adguid, "Unable to find user in directory");
      Error::DirectoryEntryNotFound(adguid)
    })?;
  let desired = desired_address_map(&mappings, &attributes)?;

  let diff = diff_addresses(user.uuid, &current, &desired, today());
  tracing::debug!(
    inserts = diff.inserts.len(),
    edits = diff.edits.len(),
    deletions = ?diff.deletions,
    "Computed address diff"
  );
  if diff.is_empty() {
    return Ok(false);
  }

  let responses = loaders.uploader.load_many(diff.into_writes()).await?;
  tracing::debug!(?responses, "Upload response");
  Ok(true)
}
