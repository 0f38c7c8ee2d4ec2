//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::catalog::Category;

#[derive(Parser, Debug)]
#[command(name = "fallcache")]
#[command(about = "Offline-first cache for the falla catalog")]
#[command(version)]
pub struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fallcache/config.yaml)
  #[arg(short, long, global = true)]
  pub config: Option<PathBuf>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
  /// List the catalog, refreshing from the server when the cache is stale
  List {
    /// Refresh even if the cache is still fresh
    #[arg(short, long)]
    refresh: bool,
  },

  /// Show one falla; asks the server first and falls back to the cache
  Show { id: i64 },

  /// Search cached fallas by name or description
  Search { query: String },

  /// Cached fallas in a category (especial, primera, segunda, tercera, infantil, sin_categoria)
  Category {
    #[arg(value_parser = parse_category)]
    category: Category,
  },

  /// Cached fallas in a section
  Section { section: String },

  /// Cached fallas within a radius of a point
  Nearby {
    #[arg(allow_negative_numbers = true)]
    latitude: f64,
    #[arg(allow_negative_numbers = true)]
    longitude: f64,
    #[arg(long, default_value_t = 5.0)]
    radius_km: f64,
  },

  /// Delete cached rows not synced within the given number of hours
  Prune {
    #[arg(long)]
    older_than_hours: u32,
  },

  /// Print connectivity transitions until interrupted
  Watch,
}

fn parse_category(s: &str) -> Result<Category, String> {
  s.parse::<Category>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(args: &[&str]) -> Args {
    Args::try_parse_from(std::iter::once("fallcache").chain(args.iter().copied())).unwrap()
  }

  #[test]
  fn test_list_flags() {
    assert_eq!(parse(&["list"]).command, Command::List { refresh: false });
    assert_eq!(
      parse(&["list", "--refresh"]).command,
      Command::List { refresh: true }
    );
  }

  #[test]
  fn test_global_config_after_subcommand() {
    let args = parse(&["show", "12", "--config", "/tmp/c.yaml"]);
    assert_eq!(args.command, Command::Show { id: 12 });
    assert_eq!(args.config, Some(PathBuf::from("/tmp/c.yaml")));
  }

  #[test]
  fn test_category_is_parsed() {
    assert_eq!(
      parse(&["category", "primera"]).command,
      Command::Category {
        category: Category::Primera
      }
    );
    assert!(Args::try_parse_from(["fallcache", "category", "nope"]).is_err());
  }

  #[test]
  fn test_nearby_accepts_negative_longitude() {
    assert_eq!(
      parse(&["nearby", "39.4699", "-0.3763", "--radius-km", "2"]).command,
      Command::Nearby {
        latitude: 39.4699,
        longitude: -0.3763,
        radius_km: 2.0,
      }
    );
    match parse(&["nearby", "39.4", "-0.3"]).command {
      Command::Nearby { radius_km, .. } => assert_eq!(radius_km, 5.0),
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn test_prune_requires_threshold() {
    assert!(Args::try_parse_from(["fallcache", "prune"]).is_err());
    assert_eq!(
      parse(&["prune", "--older-than-hours", "48"]).command,
      Command::Prune {
        older_than_hours: 48
      }
    );
  }
}
