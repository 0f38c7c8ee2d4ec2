//! Freshness policy: decides whether a cached collection is due for a refresh.

use chrono::{DateTime, Duration, Utc};

/// Validity window of the primary catalog.
pub const CATALOG_VALIDITY_HOURS: i64 = 6;

/// Kind-agnostic refresh rule for any collection with a last-sync marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
  validity_window: Duration,
}

impl Default for FreshnessPolicy {
  fn default() -> Self {
    Self::new(Duration::hours(CATALOG_VALIDITY_HOURS))
  }
}

impl FreshnessPolicy {
  pub fn new(validity_window: Duration) -> Self {
    Self { validity_window }
  }

  pub fn validity_window(&self) -> Duration {
    self.validity_window
  }

  pub fn should_refresh(&self, last_sync_time: Option<DateTime<Utc>>) -> bool {
    should_refresh_at(last_sync_time, self.validity_window, Utc::now())
  }
}

/// `true` when never synced or when at least `validity_window` has elapsed.
pub fn should_refresh(last_sync_time: Option<DateTime<Utc>>, validity_window: Duration) -> bool {
  should_refresh_at(last_sync_time, validity_window, Utc::now())
}

/// Same as [`should_refresh`] with an explicit clock.
///
/// A last sync in the future (clock skew) counts as fresh.
pub fn should_refresh_at(
  last_sync_time: Option<DateTime<Utc>>,
  validity_window: Duration,
  now: DateTime<Utc>,
) -> bool {
  match last_sync_time {
    None => true,
    Some(last) => now - last >= validity_window,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap()
  }

  #[test]
  fn test_never_synced_refreshes() {
    assert!(should_refresh_at(None, Duration::hours(6), now()));
  }

  #[test]
  fn test_boundary() {
    let window = Duration::hours(6);
    let just_expired = now() - window - Duration::seconds(1);
    let still_fresh = now() - Duration::hours(5) - Duration::minutes(59);

    assert!(should_refresh_at(Some(just_expired), window, now()));
    assert!(!should_refresh_at(Some(still_fresh), window, now()));
    // exactly at the window edge counts as due
    assert!(should_refresh_at(Some(now() - window), window, now()));
  }

  #[test]
  fn test_future_sync_is_fresh() {
    let ahead = now() + Duration::minutes(10);
    assert!(!should_refresh_at(Some(ahead), Duration::hours(6), now()));
  }

  #[test]
  fn test_policy_uses_wall_clock() {
    let policy = FreshnessPolicy::default();
    assert_eq!(policy.validity_window(), Duration::hours(6));
    assert!(policy.should_refresh(None));
    assert!(!policy.should_refresh(Some(Utc::now())));
    assert!(policy.should_refresh(Some(Utc::now() - Duration::hours(7))));
    assert!(should_refresh(Some(Utc::now() - Duration::hours(7)), Duration::hours(6)));
  }
}
