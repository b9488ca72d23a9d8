//! libSQL backend — async `JobStore` implementation.
//!
//! Supports local file and in-memory databases. Timestamps are stored as
//! fixed-width RFC 3339 strings (microseconds, `Z` suffix) so the backlog
//! query can compare them as text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::itinerary::{Itinerary, Place, Status, Stop};
use crate::store::migrations;
use crate::store::traits::{JobStore, PlaceDirectory};

const ITINERARY_COLUMNS: &str = "id, title, session_id, status, created_at, updated_at";

/// libSQL itinerary store.
///
/// Everything runs on one connection. A save holds its transaction across
/// several statements, so `access` keeps readers out until it commits;
/// otherwise they would see a half-written stop list.
pub struct LibSqlJobStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    access: RwLock<()>,
}

impl LibSqlJobStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            access: RwLock::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Insert or replace a place row.
    pub async fn upsert_place(&self, place: &Place) -> Result<(), DatabaseError> {
        let _guard = self.access.write().await;
        upsert_place(self.conn(), place).await
    }

    async fn load_stops(&self, id: Uuid) -> Result<Vec<Stop>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT s.order_index, s.is_current_stop,
                        p.id, p.country, p.region, p.province, p.city
                 FROM itinerary_stops s
                 JOIN places p ON p.id = s.place_id
                 WHERE s.itinerary_id = ?1
                 ORDER BY s.order_index ASC",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_stops: {e}")))?;

        let mut stops = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_stops: {e}")))?
        {
            let stop = row_to_stop(&row)
                .map_err(|e| DatabaseError::Query(format!("load_stops row parse: {e}")))?;
            stops.push(stop);
        }
        Ok(stops)
    }

    async fn query_itineraries(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        context: &str,
    ) -> Result<Vec<Itinerary>, DatabaseError> {
        let _guard = self.access.read().await;
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{context}: {e}")))?;

        let mut found = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{context}: {e}")))?
        {
            let itinerary = row_to_itinerary(&row)
                .map_err(|e| DatabaseError::Query(format!("{context} row parse: {e}")))?;
            found.push(itinerary);
        }

        for itinerary in &mut found {
            itinerary.stops = self.load_stops(itinerary.id).await?;
        }
        Ok(found)
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn row_to_itinerary(row: &libsql::Row) -> Result<Itinerary, libsql::Error> {
    let id_str: String = row.get(0)?;
    let title: String = row.get(1)?;
    let session_id: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    let updated_str: Option<String> = row.get::<String>(5).ok();

    Ok(Itinerary {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        title,
        session_id,
        status: status_str.parse().unwrap_or(Status::Queued),
        stops: Vec::new(),
        created_at: parse_datetime(&created_str),
        updated_at: updated_str.as_deref().map(parse_datetime),
    })
}

fn row_to_stop(row: &libsql::Row) -> Result<Stop, libsql::Error> {
    let order_index: i64 = row.get(0)?;
    let is_current: i64 = row.get(1)?;
    let place = Place {
        id: row.get(2)?,
        country: row.get(3)?,
        region: row.get::<String>(4).ok(),
        province: row.get::<String>(5).ok(),
        city: row.get(6)?,
    };
    Ok(Stop {
        order_index: order_index.max(0) as u32,
        is_current_stop: is_current != 0,
        place,
    })
}

async fn upsert_place(conn: &Connection, place: &Place) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO places (id, country, region, province, city)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            country = excluded.country,
            region = excluded.region,
            province = excluded.province,
            city = excluded.city",
        params![
            place.id,
            place.country.clone(),
            place.region.clone(),
            place.province.clone(),
            place.city.clone()
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("upsert_place: {e}")))?;
    Ok(())
}

async fn existing_created_at(
    conn: &Connection,
    id: &str,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT created_at FROM itineraries WHERE id = ?1",
            params![id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("save lookup: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => {
            let created: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("save lookup row parse: {e}")))?;
            Ok(Some(parse_datetime(&created)))
        }
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("save lookup: {e}"))),
    }
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl JobStore for LibSqlJobStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Itinerary>, DatabaseError> {
        self.find_with_stops_and_places(id).await
    }

    async fn find_with_stops_and_places(
        &self,
        id: Uuid,
    ) -> Result<Option<Itinerary>, DatabaseError> {
        let _guard = self.access.read().await;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ITINERARY_COLUMNS} FROM itineraries WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_itinerary: {e}")))?;

        let mut itinerary = match rows.next().await {
            Ok(Some(row)) => row_to_itinerary(&row)
                .map_err(|e| DatabaseError::Query(format!("find_itinerary row parse: {e}")))?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("find_itinerary: {e}"))),
        };
        itinerary.stops = self.load_stops(id).await?;
        Ok(Some(itinerary))
    }

    async fn save(&self, itinerary: &Itinerary) -> Result<Itinerary, DatabaseError> {
        let _guard = self.access.write().await;
        let id = itinerary.id.to_string();
        let mut saved = itinerary.clone();
        saved.stops.sort_by_key(|s| s.order_index);

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("save begin: {e}")))?;

        match existing_created_at(&tx, &id).await? {
            Some(created_at) => {
                let now = Utc::now();
                saved.created_at = created_at;
                saved.updated_at = Some(now);
                tx.execute(
                    "UPDATE itineraries
                     SET title = ?1, session_id = ?2, status = ?3, updated_at = ?4
                     WHERE id = ?5",
                    params![
                        saved.title.clone(),
                        saved.session_id.clone(),
                        saved.status.as_str(),
                        format_datetime(now),
                        id.clone()
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("save update: {e}")))?;
            }
            None => {
                tx.execute(
                    "INSERT INTO itineraries (id, title, session_id, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id.clone(),
                        saved.title.clone(),
                        saved.session_id.clone(),
                        saved.status.as_str(),
                        format_datetime(saved.created_at),
                        saved.updated_at.map(format_datetime)
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("save insert: {e}")))?;
            }
        }

        tx.execute(
            "DELETE FROM itinerary_stops WHERE itinerary_id = ?1",
            params![id.clone()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("save clear stops: {e}")))?;

        for stop in &saved.stops {
            upsert_place(&tx, &stop.place).await?;
            tx.execute(
                "INSERT INTO itinerary_stops (itinerary_id, place_id, order_index, is_current_stop)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.clone(),
                    stop.place.id,
                    i64::from(stop.order_index),
                    i64::from(stop.is_current_stop)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save stop: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("save commit: {e}")))?;

        debug!(itinerary_id = %saved.id, status = %saved.status, "Itinerary saved");
        Ok(saved)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: Status,
        to: Status,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.access.write().await;
        let changed = self
            .conn()
            .execute(
                "UPDATE itineraries SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = ?4",
                params![
                    to.as_str(),
                    format_datetime(Utc::now()),
                    id.to_string(),
                    from.as_str()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_status: {e}")))?;

        debug!(itinerary_id = %id, %from, %to, swapped = changed > 0, "Status update");
        Ok(changed > 0)
    }

    async fn count_pending_stops(
        &self,
        id: Uuid,
        reference: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let _guard = self.access.read().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT
                    (SELECT COUNT(*) FROM itinerary_stops WHERE itinerary_id = ?1)
                    + (SELECT COUNT(*)
                       FROM itinerary_stops s
                       JOIN itineraries i ON i.id = s.itinerary_id
                       WHERE i.id != ?1
                         AND COALESCE(i.updated_at, i.created_at) < ?2)
                 FROM itineraries
                 WHERE id = ?1",
                params![id.to_string(), format_datetime(reference)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_pending_stops: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).map_err(|e| {
                    DatabaseError::Query(format!("count_pending_stops row parse: {e}"))
                })?;
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_pending_stops: {e}"))),
        }
    }

    async fn list_by_session(
        &self,
        session_id: &str,
        status: Option<Status>,
    ) -> Result<Vec<Itinerary>, DatabaseError> {
        match status {
            Some(status) => {
                self.query_itineraries(
                    &format!(
                        "SELECT {ITINERARY_COLUMNS} FROM itineraries
                         WHERE session_id = ?1 AND status = ?2
                         ORDER BY created_at DESC"
                    ),
                    params![session_id, status.as_str()],
                    "list_by_session",
                )
                .await
            }
            None => {
                self.query_itineraries(
                    &format!(
                        "SELECT {ITINERARY_COLUMNS} FROM itineraries
                         WHERE session_id = ?1
                         ORDER BY created_at DESC"
                    ),
                    params![session_id],
                    "list_by_session",
                )
                .await
            }
        }
    }

    async fn list_unfinished(&self) -> Result<Vec<Itinerary>, DatabaseError> {
        self.query_itineraries(
            &format!(
                "SELECT {ITINERARY_COLUMNS} FROM itineraries
                 WHERE status IN ('QUEUED', 'PROCESSING')
                 ORDER BY COALESCE(updated_at, created_at) ASC"
            ),
            (),
            "list_unfinished",
        )
        .await
    }
}

#[async_trait]
impl PlaceDirectory for LibSqlJobStore {
    async fn find_place(&self, id: i64) -> Result<Option<Place>, DatabaseError> {
        let _guard = self.access.read().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT id, country, region, province, city FROM places WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_place: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let place = Place {
                    id: row
                        .get(0)
                        .map_err(|e| DatabaseError::Query(format!("find_place row parse: {e}")))?,
                    country: row
                        .get(1)
                        .map_err(|e| DatabaseError::Query(format!("find_place row parse: {e}")))?,
                    region: row.get::<String>(2).ok(),
                    province: row.get::<String>(3).ok(),
                    city: row
                        .get(4)
                        .map_err(|e| DatabaseError::Query(format!("find_place row parse: {e}")))?,
                };
                Ok(Some(place))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_place: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    async fn test_db() -> LibSqlJobStore {
        LibSqlJobStore::new_memory().await.unwrap()
    }

    fn trip(session: &str, cities: &[&str]) -> Itinerary {
        let stops = cities
            .iter()
            .enumerate()
            .map(|(i, city)| Stop::new(i as u32, Place::new(i as i64 + 1, "Italy", *city)))
            .collect();
        Itinerary::new(session, "Trip").with_stops(stops)
    }

    #[tokio::test]
    async fn save_and_find_round_trips_stops() {
        let db = test_db().await;
        let mut it = trip("s", &["Rome", "Florence"]);
        it.stops[1].is_current_stop = true;
        it.stops[1].place.region = Some("Tuscany".into());

        let saved = db.save(&it).await.unwrap();
        assert!(saved.updated_at.is_none());

        let fetched = db.find_with_stops_and_places(it.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Trip");
        assert_eq!(fetched.status, Status::Queued);
        assert_eq!(fetched.stops.len(), 2);
        assert_eq!(fetched.stops[0].place.city, "Rome");
        assert!(fetched.stops[1].is_current_stop);
        assert_eq!(fetched.stops[1].place.region.as_deref(), Some("Tuscany"));
        assert!(fetched.stops[0].place.region.is_none());
        assert!(fetched.updated_at.is_none());
    }

    #[tokio::test]
    async fn find_missing_returns_none() {
        let db = test_db().await;
        assert!(db.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resave_updates_status_and_replaces_stops() {
        let db = test_db().await;
        let it = trip("s", &["Rome", "Florence", "Venice"]);
        let mut saved = db.save(&it).await.unwrap();

        saved.transition_to(Status::Processing).unwrap();
        saved.set_stops(vec![Stop::new(0, Place::new(9, "Italy", "Milan"))]);
        let resaved = db.save(&saved).await.unwrap();
        assert!(resaved.updated_at.is_some());

        let fetched = db.find_by_id(it.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, Status::Processing);
        assert_eq!(fetched.stops.len(), 1);
        assert_eq!(fetched.stops[0].place.city, "Milan");
        assert!(fetched.updated_at.is_some());
    }

    #[tokio::test]
    async fn update_status_keeps_title_and_stops() {
        let db = test_db().await;
        let it = db.save(&trip("s", &["Rome", "Florence"])).await.unwrap();

        assert!(
            db.update_status(it.id, Status::Queued, Status::Processing)
                .await
                .unwrap()
        );
        assert!(
            !db.update_status(it.id, Status::Queued, Status::Completed)
                .await
                .unwrap()
        );

        let fetched = db.find_by_id(it.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, Status::Processing);
        assert_eq!(fetched.title, "Trip");
        assert_eq!(fetched.stops.len(), 2);
        assert!(fetched.updated_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn readers_never_see_a_half_saved_stop_list() {
        let db = Arc::new(test_db().await);
        let cities: Vec<String> = (0..300).map(|i| format!("Town {i}")).collect();
        let names: Vec<&str> = cities.iter().map(String::as_str).collect();
        let it = db.save(&trip("s", &names)).await.unwrap();

        let writer = {
            let db = Arc::clone(&db);
            let it = it.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    db.save(&it).await.unwrap();
                }
            })
        };

        loop {
            let fetched = db.find_with_stops_and_places(it.id).await.unwrap().unwrap();
            assert_eq!(fetched.stops.len(), 300);
            if writer.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn count_pending_stops_uses_reference_time() {
        let db = test_db().await;
        let now = Utc::now();

        let mut older = trip("a", &["Rome", "Florence"]);
        older.created_at = now - Duration::minutes(5);
        let mut newer = trip("b", &["Rome", "Florence", "Venice", "Milan"]);
        newer.created_at = now + Duration::minutes(5);
        let mut own = trip("c", &["Rome", "Florence", "Venice"]);
        own.created_at = now;

        for it in [&older, &newer, &own] {
            db.save(it).await.unwrap();
        }

        assert_eq!(db.count_pending_stops(own.id, now).await.unwrap(), 5);
        assert_eq!(
            db.count_pending_stops(Uuid::new_v4(), now).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn list_by_session_filters_and_orders() {
        let db = test_db().await;
        let mut first = trip("s1", &["Rome"]);
        first.created_at = Utc::now() - Duration::minutes(1);
        let mut second = trip("s1", &["Venice"]);
        second.status = Status::Failed;
        let other = trip("s2", &["Milan"]);
        for it in [&first, &second, &other] {
            db.save(it).await.unwrap();
        }

        let all = db.list_by_session("s1", None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[0].stops[0].place.city, "Venice");

        let failed = db.list_by_session("s1", Some(Status::Failed)).await.unwrap();
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn list_unfinished_excludes_terminal() {
        let db = test_db().await;
        let queued = trip("s", &["Rome"]);
        let mut done = trip("s", &["Rome"]);
        done.status = Status::Completed;
        db.save(&queued).await.unwrap();
        db.save(&done).await.unwrap();

        let unfinished = db.list_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, queued.id);
    }

    #[tokio::test]
    async fn places_are_found_after_upsert() {
        let db = test_db().await;
        let mut place = Place::new(42, "Portugal", "Porto");
        place.province = Some("Porto".into());
        db.upsert_place(&place).await.unwrap();

        let found = db.find_place(42).await.unwrap().unwrap();
        assert_eq!(found, place);
        assert!(db.find_place(43).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("itinerary.db");
        let it = trip("s", &["Rome"]);
        {
            let db = LibSqlJobStore::new_local(&path).await.unwrap();
            db.save(&it).await.unwrap();
        }
        let db = LibSqlJobStore::new_local(&path).await.unwrap();
        let fetched = db.find_by_id(it.id).await.unwrap().unwrap();
        assert_eq!(fetched.stops.len(), 1);
    }
}
