//! Linking a person to their directory account.
//!
//! A person is linked when they carry an IT-user of the configured linkage
//! type whose user key is their directory GUID. Linking is create-only: an
//! existing link is never inspected or replaced.

use adsync_core::{
  Result,
  model::{ItUserWrite, Validity, WriteObject},
};
use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
  SyncContext,
  registry::{get_itsystem_uuid, load_person},
  today,
};

/// The linkage record to create for a person found in the directory.
pub fn build_ituser(
  person_uuid: Uuid,
  itsystem_uuid: Uuid,
  adguid: Uuid,
  from: NaiveDate,
) -> ItUserWrite {
  ItUserWrite {
    user_key: adguid.to_string(),
    itsystem_uuid,
    person_uuid,
    validity: Validity::open_from(from),
  }
}

/// Ensure the person is linked to their directory account.
///
/// Returns `true` if a linkage record was written.
#[tracing::instrument(skip_all, fields(%user_uuid))]
pub async fn reconcile_linkage(user_uuid: Uuid, ctx: &SyncContext) -> Result<bool> {
  let loaders = &ctx.loaders;
  let itsystem_uuid =
    get_itsystem_uuid(&ctx.settings, &loaders.itsystems_loader).await?;
  let user = load_person(user_uuid, loaders).await?;

  if user.itusers_in(itsystem_uuid).next().is_some() {
    tracing::info!("ITUser already exists");
    return Ok(false);
  }

  let Some(cpr_no) = user.cpr_no.clone() else {
    tracing::info!("User has no CPR number");
    return Ok(false);
  };
  let Some(adguid) = loaders.adguid_loader.load(cpr_no).await? else {
    tracing::info!("Unable to find ad user by cpr number");
    return Ok(false);
  };

  tracing::info!(%adguid, "Creating ITUser for user");
  let ituser = build_ituser(user.uuid, itsystem_uuid, adguid, today());
  let response = loaders.uploader.load(WriteObject::ItUser(ituser)).await?;
  tracing::debug!(?response, "Creating ITUser response");
  Ok(true)
}
