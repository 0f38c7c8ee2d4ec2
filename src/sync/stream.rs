use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::error::{ReadError, SyncError};
use crate::cache::CacheError;

/// How a read arrived at its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
  UseCacheOnly,
  RefreshThenUseRemote,
  RefreshFailedFallbackToCache,
  NoDataAvailable,
}

impl fmt::Display for SyncDecision {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      SyncDecision::UseCacheOnly => "cache",
      SyncDecision::RefreshThenUseRemote => "remote",
      SyncDecision::RefreshFailedFallbackToCache => "cache (refresh failed)",
      SyncDecision::NoDataAvailable => "no data",
    };
    f.write_str(s)
  }
}

/// One item of a read stream: `Loading` first, then exactly one terminal value.
#[derive(Debug)]
pub enum Resource<T> {
  Loading,
  Success { data: T, decision: SyncDecision },
  Error(ReadError),
}

impl<T> Resource<T> {
  pub fn success(data: T, decision: SyncDecision) -> Self {
    Resource::Success { data, decision }
  }

  pub fn error(err: impl Into<ReadError>) -> Self {
    Resource::Error(err.into())
  }

  pub fn is_terminal(&self) -> bool {
    !matches!(self, Resource::Loading)
  }
}

/// Receiving end of a read. Dropping it does not cancel the work behind it;
/// the result is simply discarded.
pub struct ReadStream<T> {
  receiver: mpsc::Receiver<Resource<T>>,
}

impl<T: Send + 'static> ReadStream<T> {
  /// Run `work` on its own task. `Loading` is queued before the task starts.
  pub fn spawn<F>(work: F) -> Self
  where
    F: Future<Output = Resource<T>> + Send + 'static,
  {
    // Loading + terminal: the sender never waits
    let (tx, rx) = mpsc::channel(2);
    let _ = tx.try_send(Resource::Loading);
    tokio::spawn(async move {
      // A panic in `work` still has to end the stream with a terminal
      let terminal = match tokio::spawn(work).await {
        Ok(terminal) => terminal,
        Err(e) => Resource::error(CacheError::from(e)),
      };
      let _ = tx.send(terminal).await;
    });
    Self { receiver: rx }
  }

  /// Skip the loading marker and wait for the terminal value.
  pub async fn into_result(mut self) -> Result<(T, SyncDecision), ReadError> {
    while let Some(item) = self.next().await {
      match item {
        Resource::Loading => continue,
        Resource::Success { data, decision } => return Ok((data, decision)),
        Resource::Error(err) => return Err(err),
      }
    }
    Err(SyncError::Cache(CacheError::Task("read ended without a result".to_string())).into())
  }
}

impl<T> Stream for ReadStream<T> {
  type Item = Resource<T>;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.receiver.poll_recv(cx)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_loading_then_single_terminal() {
    let stream = ReadStream::spawn(async { Resource::success(7, SyncDecision::UseCacheOnly) });
    let items: Vec<Resource<i32>> = stream.collect().await;

    assert_eq!(items.len(), 2);
    assert!(matches!(items[0], Resource::Loading));
    assert!(matches!(
      items[1],
      Resource::Success {
        data: 7,
        decision: SyncDecision::UseCacheOnly
      }
    ));
  }

  #[tokio::test]
  async fn test_into_result_surfaces_error() {
    let stream: ReadStream<()> =
      ReadStream::spawn(async { Resource::error(SyncError::Offline(CacheError::Empty)) });
    let err = stream.into_result().await.unwrap_err();
    assert!(matches!(err.cause, SyncError::Offline(CacheError::Empty)));
  }

  #[tokio::test]
  async fn test_dropping_stream_does_not_cancel_work() {
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let stream = ReadStream::spawn(async move {
      tokio::task::yield_now().await;
      let _ = done_tx.send(());
      Resource::success((), SyncDecision::UseCacheOnly)
    });
    drop(stream);
    assert!(done_rx.await.is_ok());
  }

  #[tokio::test]
  async fn test_panicking_work_ends_with_error() {
    let stream: ReadStream<()> = ReadStream::spawn(async {
      if true {
        panic!("boom");
      }
      Resource::success((), SyncDecision::UseCacheOnly)
    });
    let items: Vec<Resource<()>> = stream.collect().await;

    assert_eq!(items.len(), 2);
    assert!(matches!(items[0], Resource::Loading));
    match &items[1] {
      Resource::Error(err) => {
        assert!(matches!(err.cause, SyncError::Cache(CacheError::Task(_))));
        assert_eq!(err.message, "Local data could not be read");
      }
      _ => panic!("expected an error terminal"),
    }
  }
}
