//! Error type for `adsync-batch`.

use std::sync::Arc;

use thiserror::Error;

/// A failure delivered to every caller waiting on the same batch.
///
/// The underlying error is shared behind an [`Arc`] because one backend
/// failure fans out to all waiters of the flush.
#[derive(Debug, Error)]
pub enum BatchError<E> {
  #[error("batch load failed: {0}")]
  Load(#[source] Arc<E>),

  #[error("batch function returned {actual} results for {expected} keys")]
  LengthMismatch { expected: usize, actual: usize },

  /// The dispatch task went away before answering (runtime shutdown or a
  /// panicking batch function).
  #[error("batch dispatcher dropped before responding")]
  Dropped,
}

impl<E> Clone for BatchError<E> {
  fn clone(&self) -> Self {
    match self {
      Self::Load(e) => Self::Load(Arc::clone(e)),
      Self::LengthMismatch { expected, actual } => Self::LengthMismatch {
        expected: *expected,
        actual:   *actual,
      },
      Self::Dropped => Self::Dropped,
    }
  }
}
