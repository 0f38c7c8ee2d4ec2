//! Read composition over the remote catalog, the entity store and connectivity.
//!
//! `get_all` goes remote only when connected and the cache is due (or the
//! caller forces it) and falls back to the cache otherwise. An empty cache
//! while offline is the only failure that cannot be recovered.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use tracing::{debug, info, warn};

use super::error::{ReadError, SyncError};
use super::stream::{ReadStream, Resource, SyncDecision};
use crate::cache::{CacheError, EntityStore, FreshnessPolicy};
use crate::catalog::{Category, Falla, FetchError, GeoPoint, RemoteCatalog};
use crate::config::{Config, MissingPolicy};
use crate::geo;
use crate::net::Connectivity;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncOptions {
  pub freshness: FreshnessPolicy,
  /// Page requested by `get_all`; cursoring beyond it is up to the caller
  pub page: u32,
  pub page_size: u32,
  pub on_missing: MissingPolicy,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      freshness: FreshnessPolicy::default(),
      page: 0,
      page_size: 100,
      on_missing: MissingPolicy::Keep,
    }
  }
}

impl SyncOptions {
  pub fn from_config(config: &Config) -> Self {
    Self {
      freshness: FreshnessPolicy::new(config.cache.validity_window()),
      page: 0,
      page_size: config.api.page_size,
      on_missing: config.cache.on_missing,
    }
  }
}

/// Composition root for catalog reads. Clone is cheap, every part is shared.
#[derive(Clone)]
pub struct SyncOrchestrator {
  store: Arc<dyn EntityStore>,
  remote: Arc<dyn RemoteCatalog>,
  connectivity: Arc<dyn Connectivity>,
  options: SyncOptions,
}

impl SyncOrchestrator {
  pub fn new(
    store: Arc<dyn EntityStore>,
    remote: Arc<dyn RemoteCatalog>,
    connectivity: Arc<dyn Connectivity>,
    options: SyncOptions,
  ) -> Self {
    Self {
      store,
      remote,
      connectivity,
      options,
    }
  }

  pub fn options(&self) -> &SyncOptions {
    &self.options
  }

  // ==========================================================================
  // Streaming reads
  // ==========================================================================

  /// The whole catalog page, as `Loading` followed by one terminal value.
  pub fn get_all(&self, force_refresh: bool) -> ReadStream<Vec<Falla>> {
    let this = self.clone();
    ReadStream::spawn(async move { this.resolve_all(force_refresh).await })
  }

  /// One falla. Always asks the remote first; the cache is only a fallback.
  pub fn get_by_id(&self, id: i64) -> ReadStream<Option<Falla>> {
    let this = self.clone();
    ReadStream::spawn(async move { this.resolve_by_id(id).await })
  }

  /// [`Self::get_all`] without the loading marker.
  pub async fn load_all(&self, force_refresh: bool) -> Result<(Vec<Falla>, SyncDecision), ReadError> {
    self.get_all(force_refresh).into_result().await
  }

  /// [`Self::get_by_id`] without the loading marker.
  pub async fn load_by_id(&self, id: i64) -> Result<(Option<Falla>, SyncDecision), ReadError> {
    self.get_by_id(id).into_result().await
  }

  async fn resolve_all(&self, force_refresh: bool) -> Resource<Vec<Falla>> {
    let connected = self.is_connected().await;
    let mut remote_error: Option<FetchError> = None;

    if connected && self.refresh_due(force_refresh).await {
      match self
        .remote
        .fetch_all(self.options.page, self.options.page_size)
        .await
      {
        Ok(fallas) => {
          self.write_through(&fallas).await;
          debug!(
            count = fallas.len(),
            decision = %SyncDecision::RefreshThenUseRemote,
            "Catalog read"
          );
          return Resource::success(fallas, SyncDecision::RefreshThenUseRemote);
        }
        Err(e) => {
          warn!(error = %e, "Catalog refresh failed, falling back to cache");
          remote_error = Some(e);
        }
      }
    }

    let cached = match self.with_store(|store| store.get_all()).await {
      Ok(cached) => cached,
      Err(e) => {
        warn!(error = %e, "Could not read cached catalog");
        return match remote_error {
          Some(fetch) => Resource::error(fetch),
          None => Resource::error(e),
        };
      }
    };

    if !cached.is_empty() {
      let decision = if remote_error.is_some() {
        SyncDecision::RefreshFailedFallbackToCache
      } else {
        SyncDecision::UseCacheOnly
      };
      debug!(count = cached.len(), %decision, "Catalog read");
      return Resource::success(cached, decision);
    }

    if !connected {
      debug!(decision = %SyncDecision::NoDataAvailable, "Offline with an empty cache");
      return Resource::error(SyncError::Offline(CacheError::Empty));
    }
    if let Some(fetch) = remote_error {
      debug!(decision = %SyncDecision::NoDataAvailable, "Refresh failed with an empty cache");
      return Resource::error(fetch);
    }

    // Connected, not due, yet empty: rows vanished between the two reads
    Resource::success(cached, SyncDecision::UseCacheOnly)
  }

  async fn resolve_by_id(&self, id: i64) -> Resource<Option<Falla>> {
    match self.remote.fetch_by_id(id).await {
      Ok(Some(falla)) => {
        self.write_through(std::slice::from_ref(&falla)).await;
        debug!(id, decision = %SyncDecision::RefreshThenUseRemote, "Falla read");
        Resource::success(Some(falla), SyncDecision::RefreshThenUseRemote)
      }
      Ok(None) => {
        if self.options.on_missing == MissingPolicy::Evict {
          match self.with_store(move |store| store.delete(id)).await {
            Ok(true) => debug!(id, "Evicted falla missing remotely"),
            Ok(false) => {}
            Err(e) => warn!(id, error = %e, "Could not evict falla missing remotely"),
          }
        }
        debug!(id, "Falla not found remotely");
        Resource::success(None, SyncDecision::RefreshThenUseRemote)
      }
      Err(fetch) => {
        warn!(id, error = %fetch, "Falla fetch failed, falling back to cache");
        match self.with_store(move |store| store.get_by_id(id)).await {
          Ok(Some(cached)) => {
            Resource::success(Some(cached), SyncDecision::RefreshFailedFallbackToCache)
          }
          Ok(None) => {
            debug!(id, decision = %SyncDecision::NoDataAvailable, "Falla not cached");
            Resource::error(fetch)
          }
          Err(e) => {
            warn!(id, error = %e, "Could not read cached falla");
            Resource::error(fetch)
          }
        }
      }
    }
  }

  // ==========================================================================
  // Local-only queries: never contact the remote
  // ==========================================================================

  pub async fn search(&self, query: &str) -> Result<Vec<Falla>, SyncError> {
    let query = query.to_string();
    Ok(self.with_store(move |store| store.search(&query)).await?)
  }

  pub async fn filter_by_category(&self, category: Category) -> Result<Vec<Falla>, SyncError> {
    Ok(
      self
        .with_store(move |store| store.filter_by_category(category))
        .await?,
    )
  }

  pub async fn filter_by_section(&self, section: &str) -> Result<Vec<Falla>, SyncError> {
    let section = section.to_string();
    Ok(
      self
        .with_store(move |store| store.filter_by_section(&section))
        .await?,
    )
  }

  /// Cached fallas within `radius_km` of the origin, nearest first.
  pub async fn nearby(
    &self,
    latitude: f64,
    longitude: f64,
    radius_km: f64,
  ) -> Result<Vec<Falla>, SyncError> {
    let all = self.with_store(|store| store.get_all()).await?;
    Ok(geo::within_radius(
      all,
      GeoPoint::new(latitude, longitude),
      radius_km,
    ))
  }

  /// The cached catalog now, then again after every change to the table
  /// (write-through, eviction, prune). Reads only the cache.
  pub fn observe_cached(&self) -> BoxStream<'static, Result<Vec<Falla>, SyncError>> {
    let changes = self.store.changes();
    futures::stream::unfold(
      (self.clone(), changes, true),
      |(this, mut changes, first)| async move {
        if !first && changes.changed().await.is_err() {
          return None;
        }
        let read = this
          .with_store(|store| store.get_all())
          .await
          .map_err(SyncError::from);
        Some((read, (this, changes, false)))
      },
    )
    .boxed()
  }

  pub async fn cached_count(&self) -> Result<usize, SyncError> {
    Ok(self.with_store(|store| store.count()).await?)
  }

  /// Maintenance: drop rows last synced before `threshold`. Never called by reads.
  pub async fn prune_older_than(&self, threshold: DateTime<Utc>) -> Result<usize, SyncError> {
    let removed = self
      .with_store(move |store| store.delete_older_than(threshold))
      .await?;
    info!(removed, %threshold, "Pruned cached fallas");
    Ok(removed)
  }

  // ==========================================================================
  // Helpers
  // ==========================================================================

  async fn is_connected(&self) -> bool {
    let connectivity = Arc::clone(&self.connectivity);
    match tokio::task::spawn_blocking(move || connectivity.is_currently_connected()).await {
      Ok(connected) => connected,
      Err(e) => {
        warn!(error = %e, "Connectivity check failed, assuming offline");
        false
      }
    }
  }

  async fn refresh_due(&self, force_refresh: bool) -> bool {
    if force_refresh {
      return true;
    }
    match self.with_store(|store| store.max_last_sync_time()).await {
      Ok(last) => self.options.freshness.should_refresh(last),
      Err(e) => {
        warn!(error = %e, "Could not read last sync time");
        true
      }
    }
  }

  /// A failed write-through is logged; the remote data is still returned.
  async fn write_through(&self, fallas: &[Falla]) {
    if fallas.is_empty() {
      return;
    }
    let batch = fallas.to_vec();
    let count = batch.len();
    if let Err(e) = self.with_store(move |store| store.upsert_all(&batch)).await {
      warn!(count, error = %e, "Write-through to cache failed");
    }
  }

  async fn with_store<T, F>(&self, f: F) -> Result<T, CacheError>
  where
    T: Send + 'static,
    F: FnOnce(&dyn EntityStore) -> Result<T, CacheError> + Send + 'static,
  {
    let store = Arc::clone(&self.store);
    tokio::task::spawn_blocking(move || f(store.as_ref())).await?
  }
}
