//! Serde-deserializable types matching the catalog service responses.
//!
//! These types are separate from domain types so every wire quirk (field
//! aliases, zero coordinates, loose dates) is normalized here and nowhere else.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use super::error::FetchError;
use super::types::{Falla, GeoPoint, RemoteCategory};

// ============================================================================
// Envelope
// ============================================================================

/// Envelope wrapped around every response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
  pub exito: bool,
  #[serde(default)]
  pub mensaje: Option<String>,
  #[serde(default = "Option::default")]
  pub datos: Option<T>,
  #[serde(default)]
  pub timestamp: Option<String>,
}

impl<T> ApiResponse<T> {
  /// Payload of an operation that requires data.
  pub fn into_required(self, status: reqwest::StatusCode) -> Result<T, FetchError> {
    match self.into_optional(status)? {
      Some(datos) => Ok(datos),
      None => Err(FetchError::Malformed("response carried no datos".to_string())),
    }
  }

  /// Payload of an operation where "no data" is a valid answer.
  pub fn into_optional(self, status: reqwest::StatusCode) -> Result<Option<T>, FetchError> {
    if !self.exito {
      return Err(FetchError::ServerRejected {
        status,
        message: self.mensaje,
      });
    }
    Ok(self.datos)
  }
}

/// Paginated payload of the list endpoint. Only `contenido` is consumed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
  #[serde(default = "Vec::new")]
  pub contenido: Vec<T>,
  #[serde(default)]
  pub pagina_actual: u32,
  #[serde(default)]
  pub elementos_por_pagina: u32,
  #[serde(default)]
  pub total_elementos: i64,
  #[serde(default)]
  pub total_paginas: u32,
  #[serde(default)]
  pub es_ultima_pagina: bool,
}

// ============================================================================
// Falla
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiFalla {
  #[serde(alias = "id")]
  pub id_falla: i64,
  pub nombre: String,
  #[serde(default)]
  pub seccion: String,
  pub categoria: Option<String>,
  pub presidente: Option<String>,
  pub fallera: Option<String>,
  pub artista: Option<String>,
  pub anyo_fundacion: Option<i32>,
  pub lema: Option<String>,
  pub descripcion: Option<String>,
  pub distintivo: Option<String>,
  pub experim: Option<bool>,
  #[serde(alias = "latitude", alias = "lat")]
  pub latitud: Option<f64>,
  #[serde(alias = "longitude", alias = "lng", alias = "lon")]
  pub longitud: Option<f64>,
  pub web_oficial: Option<String>,
  pub telefono_contacto: Option<String>,
  pub email_contacto: Option<String>,
  pub url_boceto: Option<String>,
  #[serde(default, deserialize_with = "counter")]
  pub total_eventos: u32,
  #[serde(default, deserialize_with = "counter")]
  pub total_ninots: u32,
  #[serde(default, deserialize_with = "counter")]
  pub total_miembros: u32,
  #[serde(alias = "createdAt")]
  pub fecha_creacion: Option<String>,
  #[serde(alias = "updatedAt")]
  pub fecha_actualizacion: Option<String>,
}

/// Counters arrive as null, negative or missing on older records; clamp to 0.
fn counter<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Option<i64> = Option::deserialize(deserializer)?;
  Ok(v.map(|n| n.clamp(0, u32::MAX as i64) as u32).unwrap_or(0))
}

impl ApiFalla {
  /// Normalize into the domain record, stamped with the time it was synced.
  pub fn into_falla(self, synced_at: DateTime<Utc>) -> Falla {
    Falla {
      id: self.id_falla,
      name: self.nombre,
      section: self.seccion,
      category: RemoteCategory::parse_lossy(self.categoria.as_deref()).to_local(),
      president: non_blank(self.presidente),
      fallera: non_blank(self.fallera),
      artist: non_blank(self.artista),
      founded_year: self.anyo_fundacion.filter(|y| *y > 0),
      motto: non_blank(self.lema),
      description: non_blank(self.descripcion),
      badge: non_blank(self.distintivo),
      experimental: self.experim.unwrap_or(false),
      location: GeoPoint::from_parts(self.latitud, self.longitud),
      website: non_blank(self.web_oficial),
      phone: non_blank(self.telefono_contacto),
      email: non_blank(self.email_contacto),
      sketch_url: non_blank(self.url_boceto),
      total_events: self.total_eventos,
      total_ninots: self.total_ninots,
      total_members: self.total_miembros,
      created_at: self.fecha_creacion.as_deref().and_then(parse_datetime),
      updated_at: self.fecha_actualizacion.as_deref().and_then(parse_datetime),
      last_sync_time: synced_at,
    }
  }
}

// ============================================================================
// Helpers
// ============================================================================

fn non_blank(value: Option<String>) -> Option<String> {
  value.filter(|s| !s.trim().is_empty())
}

/// Parse the date formats the service has been seen to emit.
///
/// - RFC 3339 with offset (`2024-03-15T10:00:00Z`, `...+01:00`)
/// - ISO local date-time without offset, read as UTC (`2024-03-15T10:00:00.123`)
/// - Plain date, read as midnight UTC (`2024-03-15`)
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
  let s = s.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
    return Some(dt.and_utc());
  }
  if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
    return Some(dt.and_utc());
  }
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|dt| dt.and_utc())
}
