//! Great-circle distance and radius filtering over cached fallas.

use crate::catalog::{Falla, GeoPoint};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres.
pub fn haversine_km(from: GeoPoint, to: GeoPoint) -> f64 {
  let lat1 = from.latitude.to_radians();
  let lat2 = to.latitude.to_radians();
  let d_lat = (to.latitude - from.latitude).to_radians();
  let d_lon = (to.longitude - from.longitude).to_radians();

  let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
  let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
  EARTH_RADIUS_KM * c
}

/// Distance from `origin`, or `None` when the falla has no usable location.
pub fn distance_to(origin: GeoPoint, falla: &Falla) -> Option<f64> {
  falla.location.map(|location| haversine_km(origin, location))
}

/// Keep the fallas within `radius_km` of `origin` (inclusive), nearest first.
/// Fallas without a location are dropped, never treated as distance zero.
pub fn within_radius(fallas: Vec<Falla>, origin: GeoPoint, radius_km: f64) -> Vec<Falla> {
  let mut hits: Vec<(f64, Falla)> = fallas
    .into_iter()
    .filter_map(|falla| {
      let distance = distance_to(origin, &falla)?;
      (distance <= radius_km).then_some((distance, falla))
    })
    .collect();
  hits.sort_by(|a, b| a.0.total_cmp(&b.0));
  hits.into_iter().map(|(_, falla)| falla).collect()
}
