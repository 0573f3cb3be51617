//! Driving reconciliations for one person or a whole population.

use std::future::Future;

use adsync_core::Result;
use futures::{StreamExt, TryStreamExt, stream};
use uuid::Uuid;

use crate::{SyncContext, fields::reconcile_fields, linkage::reconcile_linkage};

/// Link the person, then mirror their fields. Returns `true` if either step
/// wrote anything.
///
/// Linkage runs first so a person linked in this pass has their fields
/// mirrored in the same pass.
pub async fn reconcile_person(user_uuid: Uuid, ctx: &SyncContext) -> Result<bool> {
  let linked = reconcile_linkage(user_uuid, ctx).await?;
  let mirrored = reconcile_fields(user_uuid, ctx).await?;
  Ok(linked || mirrored)
}

/// Run `reconcile` for every person with at most `concurrency` in flight, and
/// count how many changed something.
///
/// The first failure aborts the run.
pub async fn reconcile_all<I, F, Fut>(
  uuids: I,
  concurrency: usize,
  reconcile: F,
) -> Result<usize>
where
  I: IntoIterator<Item = Uuid>,
  F: FnMut(Uuid) -> Fut,
  Fut: Future<Output = Result<bool>>,
{
  stream::iter(uuids)
    .map(reconcile)
    .buffer_unordered(concurrency.max(1))
    .try_fold(0, |changes, changed| async move {
      Ok(changes + usize::from(changed))
    })
    .await
}
