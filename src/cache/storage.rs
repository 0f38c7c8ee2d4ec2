//! Entity store trait and SQLite implementation.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tokio::sync::watch;

use super::error::CacheError;
use crate::catalog::types::{Category, Falla, GeoPoint};
use crate::db::Database;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Persistent keyed table of cached fallas.
///
/// Every list query is ordered by name. Writes are insert-or-replace by id,
/// so concurrent independent writers cannot corrupt each other.
pub trait EntityStore: Send + Sync {
  fn get_by_id(&self, id: i64) -> Result<Option<Falla>>;

  fn get_all(&self) -> Result<Vec<Falla>>;

  /// Case-insensitive substring match on name or description.
  fn search(&self, query: &str) -> Result<Vec<Falla>>;

  fn filter_by_category(&self, category: Category) -> Result<Vec<Falla>>;

  fn filter_by_section(&self, section: &str) -> Result<Vec<Falla>>;

  fn get_page(&self, limit: u32, offset: u32) -> Result<Vec<Falla>>;

  fn count(&self) -> Result<usize>;

  /// Newest `last_sync_time` across the table, `None` when empty.
  fn max_last_sync_time(&self) -> Result<Option<DateTime<Utc>>>;

  fn upsert(&self, falla: &Falla) -> Result<()>;

  /// Upsert a batch atomically.
  fn upsert_all(&self, fallas: &[Falla]) -> Result<()>;

  /// Delete rows synced strictly before `threshold`; returns how many went.
  fn delete_older_than(&self, threshold: DateTime<Utc>) -> Result<usize>;

  fn delete(&self, id: i64) -> Result<bool>;

  fn clear(&self) -> Result<usize>;

  /// Version counter bumped after every write that changed the table.
  fn changes(&self) -> watch::Receiver<u64>;
}

/// SQLite-backed entity store.
pub struct SqliteStore {
  db: Arc<Database>,
  changes: watch::Sender<u64>,
}

const COLUMNS: &str = "id, name, section, category, president, fallera, artist, founded_year, \
  motto, description, badge, experimental, latitude, longitude, website, phone, email, \
  sketch_url, total_events, total_ninots, total_members, created_at, updated_at, last_sync_time";

/// Upsert that never moves `last_sync_time` backwards for an id.
const UPSERT_SQL: &str = "INSERT INTO fallas (
    id, name, section, category, president, fallera, artist, founded_year,
    motto, description, badge, experimental, latitude, longitude, website, phone, email,
    sketch_url, total_events, total_ninots, total_members, created_at, updated_at, last_sync_time
  ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
            ?18, ?19, ?20, ?21, ?22, ?23, ?24)
  ON CONFLICT(id) DO UPDATE SET
    name = excluded.name,
    section = excluded.section,
    category = excluded.category,
    president = excluded.president,
    fallera = excluded.fallera,
    artist = excluded.artist,
    founded_year = excluded.founded_year,
    motto = excluded.motto,
    description = excluded.description,
    badge = excluded.badge,
    experimental = excluded.experimental,
    latitude = excluded.latitude,
    longitude = excluded.longitude,
    website = excluded.website,
    phone = excluded.phone,
    email = excluded.email,
    sketch_url = excluded.sketch_url,
    total_events = excluded.total_events,
    total_ninots = excluded.total_ninots,
    total_members = excluded.total_members,
    created_at = excluded.created_at,
    updated_at = excluded.updated_at,
    last_sync_time = MAX(fallas.last_sync_time, excluded.last_sync_time)";

impl SqliteStore {
  pub fn new(db: Arc<Database>) -> Self {
    let (changes, _) = watch::channel(0);
    Self { db, changes }
  }

  fn touch(&self) {
    self.changes.send_modify(|version| *version += 1);
  }

  fn query_list<P: rusqlite::Params>(&self, where_clause: &str, params: P) -> Result<Vec<Falla>> {
    let conn = self.db.conn()?;
    let sql = format!(
      "SELECT {} FROM fallas {} ORDER BY name COLLATE NOCASE ASC, id ASC",
      COLUMNS, where_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, read_row)?;
    let fallas = rows
      .map(|r| r.map_err(CacheError::from).and_then(|raw| raw))
      .collect();
    fallas
  }

  fn upsert_with(conn: &Connection, falla: &Falla) -> Result<()> {
    conn.execute(
      UPSERT_SQL,
      params![
        falla.id,
        falla.name,
        falla.section,
        falla.category.as_str(),
        falla.president,
        falla.fallera,
        falla.artist,
        falla.founded_year,
        falla.motto,
        falla.description,
        falla.badge,
        falla.experimental,
        falla.location.map(|p| p.latitude),
        falla.location.map(|p| p.longitude),
        falla.website,
        falla.phone,
        falla.email,
        falla.sketch_url,
        falla.total_events,
        falla.total_ninots,
        falla.total_members,
        falla.created_at.map(format_datetime),
        falla.updated_at.map(format_datetime),
        falla.last_sync_time.timestamp_millis(),
      ],
    )?;
    Ok(())
  }
}

impl EntityStore for SqliteStore {
  fn get_by_id(&self, id: i64) -> Result<Option<Falla>> {
    let conn = self.db.conn()?;
    let sql = format!("SELECT {} FROM fallas WHERE id = ?1", COLUMNS);
    conn
      .query_row(&sql, params![id], read_row)
      .optional()?
      .transpose()
  }

  fn get_all(&self) -> Result<Vec<Falla>> {
    self.query_list("", [])
  }

  fn search(&self, query: &str) -> Result<Vec<Falla>> {
    let pattern = format!("%{}%", escape_like(query.trim()));
    self.query_list(
      "WHERE name LIKE ?1 ESCAPE '\\' OR description LIKE ?1 ESCAPE '\\'",
      params![pattern],
    )
  }

  fn filter_by_category(&self, category: Category) -> Result<Vec<Falla>> {
    self.query_list("WHERE category = ?1", params![category.as_str()])
  }

  fn filter_by_section(&self, section: &str) -> Result<Vec<Falla>> {
    self.query_list("WHERE section = ?1 COLLATE NOCASE", params![section.trim()])
  }

  fn get_page(&self, limit: u32, offset: u32) -> Result<Vec<Falla>> {
    let conn = self.db.conn()?;
    let sql = format!(
      "SELECT {} FROM fallas ORDER BY name COLLATE NOCASE ASC, id ASC LIMIT ?1 OFFSET ?2",
      COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter([limit, offset]), read_row)?;
    let fallas = rows
      .map(|r| r.map_err(CacheError::from).and_then(|raw| raw))
      .collect();
    fallas
  }

  fn count(&self) -> Result<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM fallas", [], |row| row.get(0))?;
    Ok(count as usize)
  }

  fn max_last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
    let conn = self.db.conn()?;
    let millis: Option<i64> =
      conn.query_row("SELECT MAX(last_sync_time) FROM fallas", [], |row| row.get(0))?;
    Ok(millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
  }

  fn upsert(&self, falla: &Falla) -> Result<()> {
    let conn = self.db.conn()?;
    Self::upsert_with(&conn, falla)?;
    drop(conn);
    self.touch();
    Ok(())
  }

  fn upsert_all(&self, fallas: &[Falla]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn.transaction()?;
    for falla in fallas {
      Self::upsert_with(&tx, falla)?;
    }
    tx.commit()?;
    drop(conn);
    if !fallas.is_empty() {
      self.touch();
    }
    Ok(())
  }

  fn delete_older_than(&self, threshold: DateTime<Utc>) -> Result<usize> {
    let conn = self.db.conn()?;
    let deleted = conn.execute(
      "DELETE FROM fallas WHERE last_sync_time < ?1",
      params![threshold.timestamp_millis()],
    )?;
    drop(conn);
    if deleted > 0 {
      self.touch();
    }
    Ok(deleted)
  }

  fn delete(&self, id: i64) -> Result<bool> {
    let conn = self.db.conn()?;
    let deleted = conn.execute("DELETE FROM fallas WHERE id = ?1", params![id])?;
    drop(conn);
    if deleted > 0 {
      self.touch();
    }
    Ok(deleted > 0)
  }

  fn clear(&self) -> Result<usize> {
    let conn = self.db.conn()?;
    let deleted = conn.execute("DELETE FROM fallas", [])?;
    drop(conn);
    if deleted > 0 {
      self.touch();
    }
    Ok(deleted)
  }

  fn changes(&self) -> watch::Receiver<u64> {
    self.changes.subscribe()
  }
}

// ============================================================================
// Row mapping
// ============================================================================

/// Map a row; SQL errors surface through the outer result, bad values through the inner one.
fn read_row(row: &Row<'_>) -> rusqlite::Result<Result<Falla>> {
  let id: i64 = row.get(0)?;
  let category: String = row.get(3)?;
  let latitude: Option<f64> = row.get(12)?;
  let longitude: Option<f64> = row.get(13)?;
  let created_at: Option<String> = row.get(21)?;
  let updated_at: Option<String> = row.get(22)?;
  let last_sync_ms: i64 = row.get(23)?;

  let Some(last_sync_time) = Utc.timestamp_millis_opt(last_sync_ms).single() else {
    return Ok(Err(CacheError::Corrupt {
      id,
      reason: format!("last_sync_time {} out of range", last_sync_ms),
    }));
  };

  Ok(Ok(Falla {
    id,
    name: row.get(1)?,
    section: row.get(2)?,
    // Rows written by older builds may carry names this build doesn't know
    category: category.parse().unwrap_or_default(),
    president: row.get(4)?,
    fallera: row.get(5)?,
    artist: row.get(6)?,
    founded_year: row.get(7)?,
    motto: row.get(8)?,
    description: row.get(9)?,
    badge: row.get(10)?,
    experimental: row.get(11)?,
    location: GeoPoint::from_parts(latitude, longitude),
    website: row.get(14)?,
    phone: row.get(15)?,
    email: row.get(16)?,
    sketch_url: row.get(17)?,
    total_events: row.get(18)?,
    total_ninots: row.get(19)?,
    total_members: row.get(20)?,
    created_at: created_at.as_deref().and_then(parse_datetime),
    updated_at: updated_at.as_deref().and_then(parse_datetime),
    last_sync_time,
  }))
}

fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .ok()
    .map(|dt| dt.with_timezone(&Utc))
}

/// Make `%`, `_` and `\` match literally under `ESCAPE '\'`.
fn escape_like(query: &str) -> String {
  let mut escaped = String::with_capacity(query.len());
  for c in query.chars() {
    if matches!(c, '%' | '_' | '\\') {
      escaped.push('\\');
    }
    escaped.push(c);
  }
  escaped
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn store() -> SqliteStore {
    SqliteStore::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  fn falla(id: i64, name: &str, category: Category) -> Falla {
    let mut f = Falla::new(id, name, "1A");
    f.category = category;
    f.last_sync_time = Utc.timestamp_millis_opt(1_700_000_000_000 + id).unwrap();
    f
  }

  #[test]
  fn test_empty_store() {
    let store = store();
    assert!(store.get_all().unwrap().is_empty());
    assert_eq!(store.count().unwrap(), 0);
    assert_eq!(store.max_last_sync_time().unwrap(), None);
    assert_eq!(store.get_by_id(1).unwrap(), None);
    assert!(store.search("anything").unwrap().is_empty());
  }

  #[test]
  fn test_upsert_round_trips_every_field() {
    let store = store();
    let mut f = falla(42, "Convento Jerusalén", Category::Especial);
    f.president = Some("Ana".to_string());
    f.founded_year = Some(1886);
    f.experimental = true;
    f.location = Some(GeoPoint::new(39.4699, -0.3763));
    f.total_members = 250;
    f.created_at = Some(Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap());
    f.updated_at = Some(Utc.timestamp_millis_opt(1_600_000_000_123).unwrap());

    store.upsert(&f).unwrap();
    assert_eq!(store.get_by_id(42).unwrap(), Some(f));
  }

  #[test]
  fn test_upsert_replaces_by_id() {
    let store = store();
    store.upsert(&falla(1, "Old name", Category::Primera)).unwrap();
    let mut newer = falla(1, "New name", Category::Segunda);
    newer.last_sync_time = newer.last_sync_time + Duration::minutes(5);
    store.upsert(&newer).unwrap();

    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.get_by_id(1).unwrap(), Some(newer));
  }

  #[test]
  fn test_write_never_backdates_last_sync() {
    let store = store();
    let recent = falla(1, "A", Category::Primera);
    store.upsert(&recent).unwrap();

    let mut stale = recent.clone();
    stale.name = "A renamed".to_string();
    stale.last_sync_time = recent.last_sync_time - Duration::hours(3);
    store.upsert(&stale).unwrap();

    let stored = store.get_by_id(1).unwrap().unwrap();
    assert_eq!(stored.name, "A renamed");
    assert_eq!(stored.last_sync_time, recent.last_sync_time);
  }

  #[test]
  fn test_list_queries_are_ordered_by_name() {
    let store = store();
    store
      .upsert_all(&[
        falla(3, "ruzafa", Category::Primera),
        falla(1, "Almirante Cadarso", Category::Especial),
        falla(2, "Malvarrosa", Category::Primera),
      ])
      .unwrap();

    let names: Vec<String> = store.get_all().unwrap().into_iter().map(|f| f.name).collect();
    assert_eq!(names, vec!["Almirante Cadarso", "Malvarrosa", "ruzafa"]);

    let page: Vec<i64> = store.get_page(2, 1).unwrap().into_iter().map(|f| f.id).collect();
    assert_eq!(page, vec![2, 3]);
  }

  #[test]
  fn test_search_matches_name_or_description() {
    let store = store();
    let mut with_desc = falla(1, "Plaza del Pilar", Category::Primera);
    with_desc.description = Some("Monumento junto al mercado".to_string());
    store
      .upsert_all(&[with_desc, falla(2, "Mercado Central", Category::Segunda), falla(3, "Cuba", Category::Tercera)])
      .unwrap();

    let ids: Vec<i64> = store.search("MERCADO").unwrap().into_iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![2, 1]);
    assert!(store.search("zzz").unwrap().is_empty());
  }

  #[test]
  fn test_search_treats_wildcards_literally() {
    let store = store();
    store
      .upsert_all(&[falla(1, "100% Falla", Category::Primera), falla(2, "Falla 1000", Category::Primera)])
      .unwrap();

    let ids: Vec<i64> = store.search("0%").unwrap().into_iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![1]);
    assert!(store.search("_").unwrap().is_empty());
  }

  #[test]
  fn test_filter_by_category_and_section() {
    let store = store();
    let mut other_section = falla(3, "C", Category::Primera);
    other_section.section = "2B".to_string();
    store
      .upsert_all(&[falla(1, "A", Category::Primera), falla(2, "B", Category::Infantil), other_section])
      .unwrap();

    let primera: Vec<i64> = store
      .filter_by_category(Category::Primera)
      .unwrap()
      .into_iter()
      .map(|f| f.id)
      .collect();
    assert_eq!(primera, vec![1, 3]);
    assert!(store.filter_by_category(Category::Especial).unwrap().is_empty());

    let section: Vec<i64> = store
      .filter_by_section("2b")
      .unwrap()
      .into_iter()
      .map(|f| f.id)
      .collect();
    assert_eq!(section, vec![3]);
  }

  #[test]
  fn test_max_last_sync_and_delete_older_than() {
    let store = store();
    let base = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    let mut old = falla(1, "Old", Category::Primera);
    old.last_sync_time = base;
    let mut fresh = falla(2, "Fresh", Category::Primera);
    fresh.last_sync_time = base + Duration::days(2);
    store.upsert_all(&[old, fresh.clone()]).unwrap();

    assert_eq!(store.max_last_sync_time().unwrap(), Some(fresh.last_sync_time));

    // strictly older only
    assert_eq!(store.delete_older_than(base).unwrap(), 0);
    assert_eq!(store.delete_older_than(base + Duration::days(1)).unwrap(), 1);
    assert_eq!(store.get_all().unwrap(), vec![fresh]);
  }

  #[test]
  fn test_delete_and_clear() {
    let store = store();
    store
      .upsert_all(&[falla(1, "A", Category::Primera), falla(2, "B", Category::Primera)])
      .unwrap();
    assert!(store.delete(1).unwrap());
    assert!(!store.delete(1).unwrap());
    assert_eq!(store.clear().unwrap(), 1);
    assert_eq!(store.count().unwrap(), 0);
  }

  #[test]
  fn test_unknown_stored_category_reads_as_default() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let store = SqliteStore::new(Arc::clone(&db));
    store.upsert(&falla(1, "A", Category::Primera)).unwrap();
    db.conn()
      .unwrap()
      .execute("UPDATE fallas SET category = 'OCTAVA' WHERE id = 1", [])
      .unwrap();

    assert_eq!(
      store.get_by_id(1).unwrap().unwrap().category,
      Category::SinCategoria
    );
  }

  #[test]
  fn test_writes_bump_change_version() {
    let store = store();
    let changes = store.changes();
    assert_eq!(*changes.borrow(), 0);

    store.upsert_all(&[falla(1, "A", Category::Primera)]).unwrap();
    assert_eq!(*changes.borrow(), 1);

    // nothing removed, nothing to announce
    store.upsert_all(&[]).unwrap();
    assert!(!store.delete(99).unwrap());
    assert_eq!(store.clear().unwrap(), 1);
    assert_eq!(store.clear().unwrap(), 0);
    assert_eq!(*changes.borrow(), 2);

    store.upsert(&falla(2, "B", Category::Primera)).unwrap();
    assert!(store.delete(2).unwrap());
    assert_eq!(*changes.borrow(), 4);
  }

  #[test]
  fn test_escape_like() {
    assert_eq!(escape_like("a%b_c\\d"), "a\\%b\\_c\\\\d");
  }
}
