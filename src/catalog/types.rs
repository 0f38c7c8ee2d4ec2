//! Domain types shared by the remote client, the entity store and the orchestrator.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// A cached falla: the unit the entity store keys by `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Falla {
  pub id: i64,
  pub name: String,
  pub section: String,
  pub category: Category,
  pub president: Option<String>,
  pub fallera: Option<String>,
  pub artist: Option<String>,
  pub founded_year: Option<i32>,
  pub motto: Option<String>,
  pub description: Option<String>,
  pub badge: Option<String>,
  pub experimental: bool,
  /// Both coordinates or neither; normalized at the client boundary
  pub location: Option<GeoPoint>,
  pub website: Option<String>,
  pub phone: Option<String>,
  pub email: Option<String>,
  pub sketch_url: Option<String>,
  pub total_events: u32,
  pub total_ninots: u32,
  pub total_members: u32,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
  /// Set to "now" by every refresh that writes this record
  pub last_sync_time: DateTime<Utc>,
}

impl Falla {
  /// Minimal record, mostly useful for tests and fixtures.
  pub fn new(id: i64, name: impl Into<String>, section: impl Into<String>) -> Self {
    Self {
      id,
      name: name.into(),
      section: section.into(),
      category: Category::default(),
      president: None,
      fallera: None,
      artist: None,
      founded_year: None,
      motto: None,
      description: None,
      badge: None,
      experimental: false,
      location: None,
      website: None,
      phone: None,
      email: None,
      sketch_url: None,
      total_events: 0,
      total_ninots: 0,
      total_members: 0,
      created_at: None,
      updated_at: None,
      last_sync_time: Utc::now(),
    }
  }
}

/// A WGS84 coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
  pub latitude: f64,
  pub longitude: f64,
}

impl GeoPoint {
  pub fn new(latitude: f64, longitude: f64) -> Self {
    Self {
      latitude,
      longitude,
    }
  }

  /// Build a point only when both halves are present and the pair is not (0, 0).
  ///
  /// The server fills unknown locations with zeros, which would otherwise
  /// look like a real point in the Gulf of Guinea.
  pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
    match (latitude, longitude) {
      (Some(lat), Some(lon)) if !(lat == 0.0 && lon == 0.0) => Some(Self::new(lat, lon)),
      _ => None,
    }
  }
}

// ============================================================================
// Categories
// ============================================================================

/// Local category enumeration, the one stored in the cache and used for filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Category {
  Especial,
  Primera,
  Segunda,
  Tercera,
  Infantil,
  #[default]
  SinCategoria,
}

/// Remote category enumeration as the catalog service spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteCategory {
  Especial,
  PrimeraA,
  PrimeraB,
  SegundaA,
  SegundaB,
  TerceraA,
  TerceraB,
  Cuarta,
  Quinta,
  InfantilEspecial,
  InfantilPrimera,
  SinCategoria,
}

/// Remote -> local mapping. Every remote value appears exactly once.
///
/// The first row for a given local category is its canonical remote
/// representative, used for the reverse direction.
pub const CATEGORY_MAP: &[(RemoteCategory, Category)] = &[
  (RemoteCategory::Especial, Category::Especial),
  (RemoteCategory::PrimeraA, Category::Primera),
  (RemoteCategory::PrimeraB, Category::Primera),
  (RemoteCategory::SegundaA, Category::Segunda),
  (RemoteCategory::SegundaB, Category::Segunda),
  (RemoteCategory::TerceraA, Category::Tercera),
  (RemoteCategory::TerceraB, Category::Tercera),
  (RemoteCategory::Cuarta, Category::Tercera),
  (RemoteCategory::Quinta, Category::Tercera),
  (RemoteCategory::InfantilPrimera, Category::Infantil),
  (RemoteCategory::InfantilEspecial, Category::Infantil),
  (RemoteCategory::SinCategoria, Category::SinCategoria),
];

impl RemoteCategory {
  pub const ALL: [RemoteCategory; 12] = [
    RemoteCategory::Especial,
    RemoteCategory::PrimeraA,
    RemoteCategory::PrimeraB,
    RemoteCategory::SegundaA,
    RemoteCategory::SegundaB,
    RemoteCategory::TerceraA,
    RemoteCategory::TerceraB,
    RemoteCategory::Cuarta,
    RemoteCategory::Quinta,
    RemoteCategory::InfantilEspecial,
    RemoteCategory::InfantilPrimera,
    RemoteCategory::SinCategoria,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Especial => "ESPECIAL",
      Self::PrimeraA => "PRIMERA_A",
      Self::PrimeraB => "PRIMERA_B",
      Self::SegundaA => "SEGUNDA_A",
      Self::SegundaB => "SEGUNDA_B",
      Self::TerceraA => "TERCERA_A",
      Self::TerceraB => "TERCERA_B",
      Self::Cuarta => "CUARTA",
      Self::Quinta => "QUINTA",
      Self::InfantilEspecial => "INFANTIL_ESPECIAL",
      Self::InfantilPrimera => "INFANTIL_PRIMERA",
      Self::SinCategoria => "SIN_CATEGORIA",
    }
  }

  /// Parse a wire value. Unknown or missing values fall into `SinCategoria`.
  pub fn parse_lossy(value: Option<&str>) -> Self {
    let Some(value) = value else {
      return Self::SinCategoria;
    };
    let normalized = value.trim().to_uppercase().replace([' ', '-'], "_");

    if let Some(remote) = Self::ALL.iter().find(|c| c.as_str() == normalized) {
      return *remote;
    }

    // Local names on the wire resolve to their canonical remote tier
    match Category::from_str(&normalized) {
      Ok(local) => local.to_remote(),
      Err(_) => Self::SinCategoria,
    }
  }

  pub fn to_local(self) -> Category {
    CATEGORY_MAP
      .iter()
      .find(|(remote, _)| *remote == self)
      .map(|(_, local)| *local)
      .unwrap_or_default()
  }
}

impl Category {
  pub const ALL: [Category; 6] = [
    Category::Especial,
    Category::Primera,
    Category::Segunda,
    Category::Tercera,
    Category::Infantil,
    Category::SinCategoria,
  ];

  /// Stable name used for storage and the command line.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Especial => "ESPECIAL",
      Self::Primera => "PRIMERA",
      Self::Segunda => "SEGUNDA",
      Self::Tercera => "TERCERA",
      Self::Infantil => "INFANTIL",
      Self::SinCategoria => "SIN_CATEGORIA",
    }
  }

  /// Canonical remote representative for this local category.
  pub fn to_remote(self) -> RemoteCategory {
    CATEGORY_MAP
      .iter()
      .find(|(_, local)| *local == self)
      .map(|(remote, _)| *remote)
      .unwrap_or(RemoteCategory::SinCategoria)
  }
}

impl From<RemoteCategory> for Category {
  fn from(remote: RemoteCategory) -> Self {
    remote.to_local()
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl fmt::Display for UnknownCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "unknown category '{}'", self.0)
  }
}

impl std::error::Error for UnknownCategory {}

impl FromStr for Category {
  type Err = UnknownCategory;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let normalized = s.trim().to_uppercase().replace([' ', '-'], "_");
    Self::ALL
      .iter()
      .find(|c| c.as_str() == normalized)
      .copied()
      .ok_or(UnknownCategory(s.to_string()))
  }
}
