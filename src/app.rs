use std::io::Write;
use std::sync::Arc;

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::StreamExt;
use tracing::info;

use crate::cache::SqliteStore;
use crate::catalog::{CatalogClient, Falla, GeoPoint};
use crate::commands::Command;
use crate::config::Config;
use crate::db::Database;
use crate::geo;
use crate::net::{ConnectivityMonitor, TcpProbe};
use crate::sync::{Resource, SyncDecision, SyncOptions, SyncOrchestrator};

/// Wires the layers together and runs one command.
pub struct App {
  sync: SyncOrchestrator,
  monitor: Arc<ConnectivityMonitor>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let db_path = config.database_path()?;
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Opened cache database");

    let client = CatalogClient::new(&config.api)?;
    client.set_token(Config::get_api_token());

    let monitor = Arc::new(ConnectivityMonitor::new(Arc::new(TcpProbe::from_config(
      &config.connectivity,
    ))));

    let sync = SyncOrchestrator::new(
      Arc::new(SqliteStore::new(db)),
      Arc::new(client),
      monitor.clone(),
      SyncOptions::from_config(&config),
    );

    Ok(Self { sync, monitor })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    let mut out = std::io::stdout();

    match command {
      Command::List { refresh } => {
        let mut stream = self.sync.get_all(refresh);
        while let Some(item) = stream.next().await {
          match item {
            Resource::Loading => eprintln!("Loading..."),
            Resource::Success { data, decision } => {
              print_fallas(&mut out, &data)?;
              print_source(decision, data.len());
            }
            Resource::Error(e) => return Err(eyre!("{}", e.message)),
          }
        }
      }
      Command::Show { id } => {
        let (falla, decision) = self
          .sync
          .load_by_id(id)
          .await
          .map_err(|e| eyre!("{}", e.message))?;
        match falla {
          Some(falla) => {
            print_detail(&mut out, &falla)?;
            print_source(decision, 1);
          }
          None => return Err(eyre!("Falla {} not found", id)),
        }
      }
      Command::Search { query } => {
        let fallas = self.sync.search(&query).await.map_err(user_error)?;
        print_fallas(&mut out, &fallas)?;
      }
      Command::Category { category } => {
        let fallas = self.sync.filter_by_category(category).await.map_err(user_error)?;
        print_fallas(&mut out, &fallas)?;
      }
      Command::Section { section } => {
        let fallas = self.sync.filter_by_section(&section).await.map_err(user_error)?;
        print_fallas(&mut out, &fallas)?;
      }
      Command::Nearby {
        latitude,
        longitude,
        radius_km,
      } => {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
          return Err(eyre!("Coordinates out of range: {}, {}", latitude, longitude));
        }
        let fallas = self
          .sync
          .nearby(latitude, longitude, radius_km)
          .await
          .map_err(user_error)?;
        let origin = GeoPoint::new(latitude, longitude);
        for falla in &fallas {
          let km = geo::distance_to(origin, falla).unwrap_or_default();
          writeln!(out, "{:>7.2} km  {}", km, summary_line(falla))?;
        }
        eprintln!("{} within {} km", fallas.len(), radius_km);
      }
      Command::Prune { older_than_hours } => {
        let threshold = Utc::now() - Duration::hours(i64::from(older_than_hours));
        let removed = self
          .sync
          .prune_older_than(threshold)
          .await
          .map_err(user_error)?;
        let left = self.sync.cached_count().await.map_err(user_error)?;
        writeln!(out, "Removed {} cached fallas, {} left", removed, left)?;
      }
      Command::Watch => self.watch().await?,
    }

    Ok(())
  }

  async fn watch(&self) -> Result<()> {
    let mut states = self.monitor.subscribe();
    loop {
      tokio::select! {
        state = states.next() => match state {
          Some(state) => {
            let label = if state.has_internet { "online" } else { "offline" };
            println!("{} {}", Utc::now().format("%H:%M:%S"), label);
          }
          None => break,
        },
        _ = tokio::signal::ctrl_c() => break,
      }
    }
    Ok(())
  }
}

fn user_error(err: crate::sync::SyncError) -> color_eyre::Report {
  eyre!("{}", err.user_message())
}

fn print_source(decision: SyncDecision, count: usize) {
  eprintln!("{} record(s) from {}", count, decision);
}

fn summary_line(falla: &Falla) -> String {
  format!(
    "{:>5}  {:<40}  {:<6}  {}",
    falla.id, falla.name, falla.section, falla.category
  )
}

fn print_fallas(out: &mut impl Write, fallas: &[Falla]) -> Result<()> {
  for falla in fallas {
    writeln!(out, "{}", summary_line(falla))?;
  }
  Ok(())
}

fn print_detail(out: &mut impl Write, falla: &Falla) -> Result<()> {
  writeln!(out, "{} (#{})", falla.name, falla.id)?;
  writeln!(out, "  Section:    {}", falla.section)?;
  writeln!(out, "  Category:   {}", falla.category)?;

  let optional = [
    ("President", &falla.president),
    ("Fallera", &falla.fallera),
    ("Artist", &falla.artist),
    ("Motto", &falla.motto),
    ("Badge", &falla.badge),
    ("Website", &falla.website),
    ("Phone", &falla.phone),
    ("Email", &falla.email),
    ("Sketch", &falla.sketch_url),
  ];
  for (label, value) in optional {
    if let Some(value) = value {
      writeln!(out, "  {:<11} {}", format!("{}:", label), value)?;
    }
  }

  if let Some(year) = falla.founded_year {
    writeln!(out, "  Founded:    {}", year)?;
  }
  if let Some(location) = falla.location {
    writeln!(
      out,
      "  Location:   {:.5}, {:.5}",
      location.latitude, location.longitude
    )?;
  }
  if falla.experimental {
    writeln!(out, "  Experimental")?;
  }
  writeln!(
    out,
    "  Events: {}  Ninots: {}  Members: {}",
    falla.total_events, falla.total_ninots, falla.total_members
  )?;
  if let Some(description) = &falla.description {
    writeln!(out)?;
    writeln!(out, "{}", description)?;
  }
  writeln!(
    out,
    "\nLast synced {}",
    falla.last_sync_time.format("%Y-%m-%d %H:%M UTC")
  )?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::Category;

  #[test]
  fn test_summary_line_has_id_and_category() {
    let mut falla = Falla::new(12, "Pilar", "2A");
    falla.category = Category::Segunda;
    let line = summary_line(&falla);
    assert!(line.trim_start().starts_with("12"));
    assert!(line.ends_with("SEGUNDA"));
  }

  #[test]
  fn test_detail_skips_absent_fields() {
    let mut falla = Falla::new(1, "Na Jordana", "E");
    falla.artist = Some("Some Artist".to_string());
    falla.location = Some(GeoPoint::new(39.48, -0.38));

    let mut buf = Vec::new();
    print_detail(&mut buf, &falla).unwrap();
    let text = String::from_utf8(buf).unwrap();

    assert!(text.starts_with("Na Jordana (#1)"));
    assert!(text.contains("Artist:     Some Artist"));
    assert!(text.contains("39.48000, -0.38000"));
    assert!(!text.contains("President"));
  }

  #[tokio::test]
  async fn test_app_runs_local_commands_against_file_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.cache.path = Some(dir.path().join("cache.db"));

    let app = App::new(config).unwrap();
    app
      .run(Command::Search {
        query: "x".to_string(),
      })
      .await
      .unwrap();
    app
      .run(Command::Prune {
        older_than_hours: 1,
      })
      .await
      .unwrap();
    assert!(app
      .run(Command::Nearby {
        latitude: 120.0,
        longitude: 0.0,
        radius_km: 1.0,
      })
      .await
      .is_err());
  }
}
