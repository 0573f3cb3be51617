//! Lookups shared by both reconciliations: the person, the linkage type and
//! the address types.

use std::collections::HashSet;

use adsync_batch::BatchLoader;
use adsync_core::{
  BackendError, Error, Registry, Result,
  config::{AddressTypeRef, FieldMappings, Settings},
  model::Person,
};
use futures::future::try_join_all;
use uuid::Uuid;

use crate::dataloaders::Dataloaders;

/// Load the person or fail with [`Error::PersonNotFound`].
pub async fn load_person(user_uuid: Uuid, loaders: &Dataloaders) -> Result<Person> {
  loaders
    .users_loader
    .load(user_uuid)
    .await?
    .ok_or(Error::PersonNotFound(user_uuid))
}

/// The linkage type holding directory GUIDs. A configured UUID is used as-is;
/// otherwise the configured user key is looked up.
pub async fn get_itsystem_uuid(
  settings: &Settings,
  itsystems_loader: &BatchLoader<String, Uuid, BackendError>,
) -> Result<Uuid> {
  if let Some(uuid) = settings.adguid_itsystem_uuid {
    return Ok(uuid);
  }
  let user_key = &settings.adguid_itsystem_user_key;
  itsystems_loader
    .load(user_key.clone())
    .await?
    .ok_or_else(|| {
      tracing::warn!(%user_key, "Unable to find itsystem by user-key");
      Error::Resolution {
        registry: Registry::ItSystem,
        user_key: user_key.clone(),
      }
    })
}

/// A field mapping with its address type resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMapping {
  pub ad_field:          String,
  pub address_type_uuid: Uuid,
}

/// Resolve every mapping's address type, in mapping order.
///
/// Fails if any user key is unknown, or if two mappings end up pointing at
/// the same address type.
pub async fn ensure_address_type_uuids(
  mappings: &FieldMappings,
  classes_loader: &BatchLoader<String, Uuid, BackendError>,
) -> Result<Vec<ResolvedMapping>> {
  let lookups = mappings.iter().map(|mapping| async move {
    let address_type_uuid = match mapping.address_type() {
      AddressTypeRef::Uuid(uuid) => *uuid,
      AddressTypeRef::UserKey(user_key) => classes_loader
        .load(user_key.clone())
        .await?
        .ok_or_else(|| {
          tracing::warn!(%user_key, "Unable to find class by user-key");
          Error::Resolution {
            registry: Registry::Class,
            user_key: user_key.clone(),
          }
        })?,
    };
    Ok::<_, Error>(ResolvedMapping {
      ad_field: mapping.ad_field().to_owned(),
      address_type_uuid,
    })
  });
  let resolved = try_join_all(lookups).await?;

  let mut seen = HashSet::new();
  if let Some(duplicate) = resolved
    .iter()
    .find(|mapping| !seen.insert(mapping.address_type_uuid))
  {
    return Err(Error::InvariantViolation(format!(
      "address type {} is the target of more than one mapping",
      duplicate.address_type_uuid
    )));
  }
  Ok(resolved)
}
