//! Reconciliation of directory identities and mirrored fields into the
//! master-record system.
//!
//! Two per-person operations are exposed:
//!
//! - [`reconcile_linkage`] ensures the person has a linkage record ("IT-user")
//!   pointing at their directory GUID.
//! - [`reconcile_fields`] ensures every configured directory attribute is
//!   mirrored as an up-to-date contact detail ("address").
//!
//! Both go through the [`Dataloaders`] in a [`SyncContext`], so reconciling
//! many people concurrently turns into a handful of batched backend calls.

pub mod dataloaders;
pub mod fields;
pub mod linkage;
pub mod registry;
pub mod resolver;
pub mod run;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use adsync_core::{Result, config::Settings};
use chrono::NaiveDate;

pub use dataloaders::{Dataloaders, configure_dataloaders};
pub use fields::reconcile_fields;
pub use linkage::reconcile_linkage;
pub use run::{reconcile_all, reconcile_person};

/// Everything a reconciliation needs. Passed explicitly; there is no global
/// state.
#[derive(Clone)]
pub struct SyncContext {
  pub settings: Arc<Settings>,
  pub loaders:  Dataloaders,
}

impl SyncContext {
  /// Fails with [`adsync_core::Error::Config`] if `settings` do not validate.
  pub fn new(settings: Arc<Settings>, loaders: Dataloaders) -> Result<Self> {
    settings.validate()?;
    Ok(Self { settings, loaders })
  }
}

/// Start date for everything written today.
pub(crate) fn today() -> NaiveDate { chrono::Local::now().date_naive() }
