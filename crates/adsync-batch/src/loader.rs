//! [`BatchLoader`]: the coalescing queue itself.

use std::{
  future::Future,
  mem,
  sync::{Arc, Mutex, PoisonError},
  time::Duration,
};

use futures::future::{BoxFuture, FutureExt as _, try_join_all};
use tokio::sync::oneshot;

use crate::BatchError;

type LoadFn<K, V, E> =
  dyn Fn(Vec<K>) -> BoxFuture<'static, Result<Vec<Option<V>>, E>> + Send + Sync;

type Reply<V, E> = oneshot::Sender<Result<Option<V>, BatchError<E>>>;

// ─── Options ─────────────────────────────────────────────────────────────────

/// Tuning knobs for a [`BatchLoader`].
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
  /// Split a flush into consecutive calls of at most this many keys.
  pub max_batch_size: Option<usize>,
  /// Extra time to wait after the scheduling turn before flushing. Trades
  /// latency for larger batches.
  pub delay:          Option<Duration>,
}

// ─── Loader ──────────────────────────────────────────────────────────────────

/// Coalesces keys requested within one scheduling turn into one call of the
/// batch function.
///
/// The batch function receives the keys in request order, duplicates
/// included, and must return exactly one `Option<V>` per key in the same
/// order. `None` means "absent" and is handed to the caller as-is.
///
/// Cloning is cheap; clones share the same pending queue.
pub struct BatchLoader<K, V, E> {
  inner: Arc<Inner<K, V, E>>,
}

impl<K, V, E> Clone for BatchLoader<K, V, E> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

struct Inner<K, V, E> {
  load_fn: Box<LoadFn<K, V, E>>,
  options: BatchOptions,
  queue:   Mutex<Queue<K, V, E>>,
}

struct Queue<K, V, E> {
  keys:      Vec<K>,
  replies:   Vec<Reply<V, E>>,
  /// A leader is already responsible for the keys currently queued.
  scheduled: bool,
}

impl<K, V, E> BatchLoader<K, V, E>
where
  K: Send + 'static,
  V: Send + 'static,
  E: Send + Sync + 'static,
{
  pub fn new<F, Fut>(load_fn: F) -> Self
  where
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Option<V>>, E>> + Send + 'static,
  {
    Self::with_options(BatchOptions::default(), load_fn)
  }

  pub fn with_options<F, Fut>(options: BatchOptions, load_fn: F) -> Self
  where
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Option<V>>, E>> + Send + 'static,
  {
    Self {
      inner: Arc::new(Inner {
        load_fn: Box::new(move |keys| load_fn(keys).boxed()),
        options,
        queue: Mutex::new(Queue {
          keys:      Vec::new(),
          replies:   Vec::new(),
          scheduled: false,
        }),
      }),
    }
  }

  /// Queue `key` for the next flush.
  ///
  /// The key is enqueued when this method is called, not when the returned
  /// future is first polled, so every `load` issued before the caller yields
  /// lands in the same batch.
  ///
  /// The first caller of a turn leads the flush: its future yields once, takes
  /// the queue and runs the batch function in place. Taking the queue from the
  /// caller's own task keeps sibling futures of that task in the batch on any
  /// runtime flavor.
  pub fn load(
    &self,
    key: K,
  ) -> impl Future<Output = Result<Option<V>, BatchError<E>>> + Send + use<K, V, E>
  {
    let (tx, rx) = oneshot::channel();
    let lead = {
      let mut queue =
        self.inner.queue.lock().unwrap_or_else(PoisonError::into_inner);
      queue.keys.push(key);
      queue.replies.push(tx);
      !mem::replace(&mut queue.scheduled, true)
    };
    let flush = lead.then(|| Flush {
      inner: Some(Arc::clone(&self.inner)),
    });
    async move {
      if let Some(flush) = flush {
        flush.run().await;
      }
      rx.await.unwrap_or(Err(BatchError::Dropped))
    }
  }

  /// Load every key in one batch; the output is aligned with the input.
  pub async fn load_many<I>(
    &self,
    keys: I,
  ) -> Result<Vec<Option<V>>, BatchError<E>>
  where
    I: IntoIterator<Item = K>,
  {
    let pending: Vec<_> = keys.into_iter().map(|key| self.load(key)).collect();
    try_join_all(pending).await
  }
}

// ─── Flush ───────────────────────────────────────────────────────────────────

/// The leader's duty to flush the queue.
///
/// Dropped before the queue is taken, it hands the flush to a spawned task so
/// the remaining waiters still get an answer.
struct Flush<K, V, E>
where
  K: Send + 'static,
  V: Send + 'static,
  E: Send + Sync + 'static,
{
  inner: Option<Arc<Inner<K, V, E>>>,
}

impl<K, V, E> Flush<K, V, E>
where
  K: Send + 'static,
  V: Send + 'static,
  E: Send + Sync + 'static,
{
  async fn run(mut self) {
    let Some(inner) = self.inner.clone() else {
      return;
    };
    inner.settle().await;
    let batch = inner.take();
    self.inner = None;
    inner.flush(batch).await;
  }
}

impl<K, V, E> Drop for Flush<K, V, E>
where
  K: Send + 'static,
  V: Send + 'static,
  E: Send + Sync + 'static,
{
  fn drop(&mut self) {
    let Some(inner) = self.inner.take() else {
      return;
    };
    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        handle.spawn(inner.dispatch());
      }
      // Nothing can run the batch; drop the replies so waiters see `Dropped`.
      Err(_) => drop(inner.take()),
    }
  }
}

type Batch<K, V, E> = (Vec<K>, Vec<Reply<V, E>>);

impl<K, V, E> Inner<K, V, E>
where
  K: Send + 'static,
  V: Send + 'static,
  E: Send + Sync + 'static,
{
  async fn dispatch(self: Arc<Self>) {
    self.settle().await;
    let batch = self.take();
    self.flush(batch).await;
  }

  /// Let every future that is ready in this turn enqueue its keys first.
  async fn settle(&self) {
    tokio::task::yield_now().await;
    if let Some(delay) = self.options.delay {
      tokio::time::sleep(delay).await;
    }
  }

  fn take(&self) -> Batch<K, V, E> {
    let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
    queue.scheduled = false;
    (mem::take(&mut queue.keys), mem::take(&mut queue.replies))
  }

  async fn flush(&self, (keys, replies): Batch<K, V, E>) {
    let chunk_size = self.options.max_batch_size.unwrap_or(keys.len()).max(1);
    let mut keys = keys.into_iter();
    let mut replies = replies.into_iter();
    loop {
      let chunk: Vec<K> = keys.by_ref().take(chunk_size).collect();
      if chunk.is_empty() {
        break;
      }
      let waiting: Vec<Reply<V, E>> = replies.by_ref().take(chunk.len()).collect();

      tracing::debug!(keys = chunk.len(), "dispatching batch");
      match self.run(chunk).await {
        Ok(values) => {
          for (reply, value) in waiting.into_iter().zip(values) {
            // The caller may have stopped waiting; that is not our problem.
            let _ = reply.send(Ok(value));
          }
        }
        Err(error) => {
          tracing::debug!(waiters = waiting.len(), "batch failed");
          for reply in waiting {
            let _ = reply.send(Err(error.clone()));
          }
        }
      }
    }
  }

  async fn run(&self, keys: Vec<K>) -> Result<Vec<Option<V>>, BatchError<E>> {
    let expected = keys.len();
    let values = (self.load_fn)(keys)
      .await
      .map_err(|e| BatchError::Load(Arc::new(e)))?;
    if values.len() != expected {
      return Err(BatchError::LengthMismatch {
        expected,
        actual: values.len(),
      });
    }
    Ok(values)
  }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use futures::{StreamExt as _, TryStreamExt as _, stream};

  use super::*;

  #[derive(Debug, thiserror::Error)]
  #[error("backend down")]
  struct Down;

  type Seen = Arc<Mutex<Vec<Vec<u32>>>>;

  /// Even keys resolve to `key * 10`; odd keys are absent.
  fn even_loader(
    options: BatchOptions,
  ) -> (BatchLoader<u32, u32, Down>, Arc<AtomicUsize>, Seen) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let (c, s) = (calls.clone(), seen.clone());
    let loader = BatchLoader::with_options(options, move |keys: Vec<u32>| {
      c.fetch_add(1, Ordering::SeqCst);
      s.lock().unwrap().push(keys.clone());
      async move {
        Ok(keys.into_iter().map(|k| (k % 2 == 0).then_some(k * 10)).collect())
      }
    });
    (loader, calls, seen)
  }

  #[tokio::test]
  async fn load_many_coalesces_into_one_call() {
    let (loader, calls, _) = even_loader(BatchOptions::default());
    let out = loader.load_many(vec![1, 2, 3, 4]).await.unwrap();
    assert_eq!(out, vec![None, Some(20), None, Some(40)]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn concurrent_loads_share_a_batch() {
    let (loader, calls, seen) = even_loader(BatchOptions::default());
    let (a, b) = tokio::join!(loader.load(2), loader.load(4));
    assert_eq!(a.unwrap(), Some(20));
    assert_eq!(b.unwrap(), Some(40));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock().unwrap(), vec![vec![2, 4]]);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn buffered_loads_share_a_batch_on_worker_threads() {
    for _ in 0..50 {
      let (loader, calls, _) = even_loader(BatchOptions::default());
      let mut out: Vec<Option<u32>> = stream::iter([2, 4, 6, 8, 10])
        .map(|key| loader.load(key))
        .buffer_unordered(5)
        .try_collect()
        .await
        .unwrap();
      out.sort();
      assert_eq!(out, vec![Some(20), Some(40), Some(60), Some(80), Some(100)]);
      assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
  }

  #[tokio::test]
  async fn dropped_leader_hands_off_the_flush() {
    let (loader, calls, seen) = even_loader(BatchOptions::default());
    let leader = loader.load(2);
    let follower = loader.load(4);
    drop(leader);
    assert_eq!(follower.await.unwrap(), Some(40));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock().unwrap(), vec![vec![2, 4]]);
  }

  #[tokio::test]
  async fn duplicate_keys_resolve_positionally() {
    let (loader, _, seen) = even_loader(BatchOptions::default());
    let out = loader.load_many(vec![2, 2, 3, 2]).await.unwrap();
    assert_eq!(out, vec![Some(20), Some(20), None, Some(20)]);
    assert_eq!(*seen.lock().unwrap(), vec![vec![2, 2, 3, 2]]);
  }

  #[tokio::test]
  async fn separate_turns_are_not_cached() {
    let (loader, calls, _) = even_loader(BatchOptions::default());
    assert_eq!(loader.load(2).await.unwrap(), Some(20));
    assert_eq!(loader.load(2).await.unwrap(), Some(20));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn clones_share_the_queue() {
    let (loader, calls, _) = even_loader(BatchOptions::default());
    let other = loader.clone();
    let (a, b) = tokio::join!(loader.load(6), other.load(8));
    assert_eq!((a.unwrap(), b.unwrap()), (Some(60), Some(80)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn failure_reaches_every_waiter() {
    let loader: BatchLoader<u32, u32, Down> =
      BatchLoader::new(|_keys: Vec<u32>| async { Err(Down) });
    let (a, b) = tokio::join!(loader.load(1), loader.load(2));
    assert!(matches!(a, Err(BatchError::Load(_))));
    assert!(matches!(b, Err(BatchError::Load(_))));
  }

  #[tokio::test]
  async fn wrong_result_count_is_an_error() {
    let loader: BatchLoader<u32, u32, Down> =
      BatchLoader::new(|_keys: Vec<u32>| async { Ok(vec![Some(1)]) });
    let err = loader.load_many(vec![1, 2]).await.unwrap_err();
    assert!(
      matches!(err, BatchError::LengthMismatch { expected: 2, actual: 1 }),
      "got {err:?}"
    );
  }

  #[tokio::test]
  async fn max_batch_size_splits_a_flush() {
    let (loader, calls, seen) = even_loader(BatchOptions {
      max_batch_size: Some(2),
      delay:          None,
    });
    let out = loader.load_many(vec![1, 2, 3, 4, 6]).await.unwrap();
    assert_eq!(out, vec![None, Some(20), None, Some(40), Some(60)]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
      *seen.lock().unwrap(),
      vec![vec![1, 2], vec![3, 4], vec![6]]
    );
  }

  #[tokio::test]
  async fn delay_gathers_loads_from_spawned_tasks() {
    let (loader, calls, _) = even_loader(BatchOptions {
      max_batch_size: None,
      delay:          Some(Duration::from_millis(50)),
    });
    let handles: Vec<_> = [2, 4, 6]
      .into_iter()
      .map(|key| {
        let loader = loader.clone();
        tokio::spawn(async move { loader.load(key).await })
      })
      .collect();
    for (handle, expected) in handles.into_iter().zip([20, 40, 60]) {
      assert_eq!(handle.await.unwrap().unwrap(), Some(expected));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
