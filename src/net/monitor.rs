//! Connectivity monitor: a shared, de-duplicated view of "has internet".

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Opaque identifier of one network the backend reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkId(pub u64);

/// A network satisfying the internet + validated check came or went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
  Available(NetworkId),
  Lost(NetworkId),
  /// The backend has reported on every network it knows about, so the
  /// available set is now authoritative.
  Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
  pub has_internet: bool,
}

/// Anything that can answer "is the device online right now".
pub trait Connectivity: Send + Sync {
  fn is_currently_connected(&self) -> bool;
}

/// The platform's network-observation facility.
pub trait NetworkBackend: Send + Sync + 'static {
  /// One-shot check. May block briefly.
  fn is_reachable(&self) -> bool;

  /// Start reporting events into `events` until the registration is dropped.
  fn register(&self, events: mpsc::UnboundedSender<NetworkEvent>) -> Registration;
}

/// Releases a backend registration when dropped.
pub struct Registration {
  release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Registration {
  pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
    Self {
      release: Some(Box::new(release)),
    }
  }

  /// Registration whose release aborts a background task.
  pub fn abort_on_drop(task: JoinHandle<()>) -> Self {
    Self::new(move || task.abort())
  }
}

impl Drop for Registration {
  fn drop(&mut self) {
    if let Some(release) = self.release.take() {
      release();
    }
  }
}

/// Set of currently available networks. `apply` reports the derived flag
/// only when it differs from the previous one; losing a network that was
/// never available is not a transition.
#[derive(Debug, Default)]
pub struct NetworkSet {
  available: HashSet<NetworkId>,
}

impl NetworkSet {
  pub fn has_internet(&self) -> bool {
    !self.available.is_empty()
  }

  pub fn apply(&mut self, event: NetworkEvent) -> Option<bool> {
    let before = self.has_internet();
    match event {
      NetworkEvent::Available(id) => {
        self.available.insert(id);
      }
      NetworkEvent::Lost(id) => {
        self.available.remove(&id);
      }
      NetworkEvent::Settled => return None,
    }
    let after = self.has_internet();
    (before != after).then_some(after)
  }
}

type StateSender = watch::Sender<Option<ConnectivityState>>;

/// One live backend registration shared by every subscriber.
struct Subscription {
  _registration: Registration,
  pump: JoinHandle<()>,
  state: Arc<StateSender>,
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.pump.abort();
    debug!("Connectivity observation released");
  }
}

/// Observes network reachability through a [`NetworkBackend`].
///
/// The backend is registered once, when the first stream is created, and
/// released when the last stream is dropped.
pub struct ConnectivityMonitor {
  backend: Arc<dyn NetworkBackend>,
  state: Arc<StateSender>,
  shared: Mutex<Weak<Subscription>>,
}

impl ConnectivityMonitor {
  pub fn new(backend: Arc<dyn NetworkBackend>) -> Self {
    let (state, _) = watch::channel(None);
    Self {
      backend,
      state: Arc::new(state),
      shared: Mutex::new(Weak::new()),
    }
  }

  /// Stream of connectivity states, starting with the current one and then
  /// emitting only on actual changes. Must be called inside a tokio runtime.
  pub fn subscribe(&self) -> ConnectivityStream {
    let subscription = self.acquire();
    let receiver = subscription.state.subscribe();

    let inner = futures::stream::unfold(
      (receiver, None::<bool>, true),
      |(mut receiver, mut last, mut first)| async move {
        loop {
          if !first && receiver.changed().await.is_err() {
            return None;
          }
          first = false;
          let current = *receiver.borrow_and_update();
          if let Some(state) = current {
            if last != Some(state.has_internet) {
              last = Some(state.has_internet);
              return Some((state, (receiver, last, first)));
            }
          }
        }
      },
    )
    .boxed();

    ConnectivityStream {
      inner,
      _subscription: subscription,
    }
  }

  /// Number of live streams sharing the backend registration.
  pub fn observer_count(&self) -> usize {
    self
      .shared
      .lock()
      .map(|weak| weak.strong_count())
      .unwrap_or(0)
  }

  fn acquire(&self) -> Arc<Subscription> {
    let mut shared = match self.shared.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(existing) = shared.upgrade() {
      return existing;
    }

    // A value left by a previous observation is stale; wait for a fresh seed
    self.state.send_replace(None);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let registration = self.backend.register(events_tx);
    let pump = tokio::spawn(pump(
      Arc::clone(&self.backend),
      Arc::clone(&self.state),
      events_rx,
    ));
    debug!("Connectivity observation registered");

    let subscription = Arc::new(Subscription {
      _registration: registration,
      pump,
      state: Arc::clone(&self.state),
    });
    *shared = Arc::downgrade(&subscription);
    subscription
  }
}

impl Connectivity for ConnectivityMonitor {
  fn is_currently_connected(&self) -> bool {
    if self.observer_count() > 0 {
      if let Some(state) = *self.state.borrow() {
        return state.has_internet;
      }
    }
    self.backend.is_reachable()
  }
}

/// Seed from a one-shot check, then fold backend events into the shared state.
async fn pump(
  backend: Arc<dyn NetworkBackend>,
  state: Arc<StateSender>,
  mut events: mpsc::UnboundedReceiver<NetworkEvent>,
) {
  let seed = match tokio::task::spawn_blocking(move || backend.is_reachable()).await {
    Ok(reachable) => reachable,
    Err(e) => {
      warn!(error = %e, "Initial reachability check failed");
      false
    }
  };
  publish(&state, seed);

  // Until a round settles, only real transitions move the seeded value
  let mut networks = NetworkSet::default();
  while let Some(event) = events.recv().await {
    match event {
      NetworkEvent::Settled => publish(&state, networks.has_internet()),
      event => {
        if let Some(has_internet) = networks.apply(event) {
          publish(&state, has_internet);
        }
      }
    }
  }
}

fn publish(state: &StateSender, has_internet: bool) {
  state.send_if_modified(|slot| {
    let next = Some(ConnectivityState { has_internet });
    if *slot == next {
      return false;
    }
    debug!(has_internet, "Connectivity changed");
    *slot = next;
    true
  });
}

/// Subscriber handle. Dropping it releases its share of the backend registration.
pub struct ConnectivityStream {
  inner: BoxStream<'static, ConnectivityState>,
  _subscription: Arc<Subscription>,
}

impl Stream for ConnectivityStream {
  type Item = ConnectivityState;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.inner.poll_next_unpin(cx)
  }
}
