// SQLite adapter for the storage ports.
//
// The connection sits behind a mutex (shared between request handlers in the
// server) and every multi-step operation runs inside a single IMMEDIATE
// transaction, so the withdraw balance check, the baseline toggle and pool
// persistence are each all-or-nothing.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row, TransactionBehavior};

use crate::banking::{BankEntry, EntryKind};
use crate::compliance::ComplianceSnapshot;
use crate::db::setup_database;
use crate::error::{CoreError, CoreResult};
use crate::pooling::{Pool, PoolMember};
use crate::routes::{RouteFilter, RouteRecord};
use crate::store::{ComplianceStore, RouteStore};

/// SQLite implementation of both storage ports.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and set up the schema.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {:?}", db_path))?;
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Fresh in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }
}

// ----------------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------------

fn parse_created_at(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn route_from_row(row: &Row) -> rusqlite::Result<RouteRecord> {
    Ok(RouteRecord {
        route_id: row.get(0)?,
        vessel_type: row.get(1)?,
        fuel_type: row.get(2)?,
        year: row.get(3)?,
        ghg_intensity: row.get(4)?,
        fuel_consumption_t: row.get(5)?,
        distance_km: row.get(6)?,
        total_emissions_t: row.get(7)?,
        is_baseline: row.get::<_, i64>(8)? != 0,
    })
}

const ROUTE_COLUMNS: &str = "route_id, vessel_type, fuel_type, year, ghg_intensity, \
                             fuel_consumption_t, distance_km, total_emissions_t, is_baseline";

fn snapshot_from_row(row: &Row) -> rusqlite::Result<ComplianceSnapshot> {
    let raw: String = row.get(4)?;
    Ok(ComplianceSnapshot {
        id: row.get(0)?,
        ship_id: row.get(1)?,
        year: row.get(2)?,
        cb_grams: row.get(3)?,
        created_at: parse_created_at(4, &raw)?,
    })
}

fn entry_from_row(row: &Row) -> rusqlite::Result<BankEntry> {
    let kind_raw: String = row.get(4)?;
    let kind = EntryKind::from_str(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown bank entry kind: {kind_raw}").into(),
        )
    })?;
    let raw: String = row.get(5)?;
    Ok(BankEntry {
        id: row.get(0)?,
        ship_id: row.get(1)?,
        year: row.get(2)?,
        amount_grams: row.get(3)?,
        kind,
        created_at: parse_created_at(5, &raw)?,
    })
}

// ----------------------------------------------------------------------------
// RouteStore
// ----------------------------------------------------------------------------

impl RouteStore for SqliteStore {
    fn all_routes(&self, filter: &RouteFilter) -> CoreResult<Vec<RouteRecord>> {
        let conn = self.conn.lock().unwrap();

        // Filters are optional; NULL parameters disable their clause
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROUTE_COLUMNS} FROM routes
             WHERE (?1 IS NULL OR vessel_type = ?1)
               AND (?2 IS NULL OR fuel_type = ?2)
               AND (?3 IS NULL OR year = ?3)
             ORDER BY route_id ASC"
        ))?;

        let rows = stmt.query_map(
            params![filter.vessel_type, filter.fuel_type, filter.year],
            route_from_row,
        )?;

        let mut routes = Vec::new();
        for row in rows {
            routes.push(row?);
        }
        Ok(routes)
    }

    fn route_by_id(&self, route_id: &str) -> CoreResult<Option<RouteRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROUTE_COLUMNS} FROM routes WHERE route_id = ?1"
        ))?;

        let mut rows = stmt.query_map(params![route_id], route_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn baseline_route(&self) -> CoreResult<Option<RouteRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROUTE_COLUMNS} FROM routes WHERE is_baseline = 1"
        ))?;

        let mut rows = stmt.query_map([], route_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn set_baseline(&self, route_id: &str) -> CoreResult<RouteRecord> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute("UPDATE routes SET is_baseline = 0 WHERE is_baseline = 1", [])?;
        let updated = tx.execute(
            "UPDATE routes SET is_baseline = 1 WHERE route_id = ?1",
            params![route_id],
        )?;
        if updated == 0 {
            // Dropping the transaction rolls the clear back
            return Err(CoreError::not_found("route", route_id));
        }

        let route = tx.query_row(
            &format!("SELECT {ROUTE_COLUMNS} FROM routes WHERE route_id = ?1"),
            params![route_id],
            route_from_row,
        )?;

        tx.commit()?;
        Ok(route)
    }

    fn upsert_route(&self, route: &RouteRecord) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO routes (
                route_id, vessel_type, fuel_type, year, ghg_intensity,
                fuel_consumption_t, distance_km, total_emissions_t, is_baseline
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(route_id) DO UPDATE SET
                vessel_type = excluded.vessel_type,
                fuel_type = excluded.fuel_type,
                year = excluded.year,
                ghg_intensity = excluded.ghg_intensity,
                fuel_consumption_t = excluded.fuel_consumption_t,
                distance_km = excluded.distance_km,
                total_emissions_t = excluded.total_emissions_t,
                is_baseline = excluded.is_baseline",
            params![
                route.route_id,
                route.vessel_type,
                route.fuel_type,
                route.year,
                route.ghg_intensity,
                route.fuel_consumption_t,
                route.distance_km,
                route.total_emissions_t,
                route.is_baseline as i64,
            ],
        )?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// ComplianceStore
// ----------------------------------------------------------------------------

impl ComplianceStore for SqliteStore {
    fn save_snapshot(&self, snapshot: &ComplianceSnapshot) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO compliance_snapshots (snapshot_uuid, ship_id, year, cb_grams, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                snapshot.id,
                snapshot.ship_id,
                snapshot.year,
                snapshot.cb_grams,
                snapshot.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn latest_snapshot(&self, ship_id: &str, year: i32) -> CoreResult<Option<ComplianceSnapshot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT snapshot_uuid, ship_id, year, cb_grams, created_at
             FROM compliance_snapshots
             WHERE ship_id = ?1 AND year = ?2
             ORDER BY id DESC LIMIT 1",
        )?;

        let mut rows = stmt.query_map(params![ship_id, year], snapshot_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn latest_snapshots_for_year(&self, year: i32) -> CoreResult<Vec<ComplianceSnapshot>> {
        let conn = self.conn.lock().unwrap();

        // Highest rowid per ship is the most recent insertion; this stays
        // deterministic even when two snapshots share a timestamp.
        let mut stmt = conn.prepare(
            "SELECT s.snapshot_uuid, s.ship_id, s.year, s.cb_grams, s.created_at
             FROM compliance_snapshots s
             JOIN (
                 SELECT ship_id, MAX(id) AS max_id
                 FROM compliance_snapshots
                 WHERE year = ?1
                 GROUP BY ship_id
             ) latest ON s.id = latest.max_id
             ORDER BY s.ship_id ASC",
        )?;

        let rows = stmt.query_map(params![year], snapshot_from_row)?;
        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row?);
        }
        Ok(snapshots)
    }

    fn append_bank_entry(&self, entry: &BankEntry) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        insert_entry(&conn, entry)?;
        Ok(())
    }

    fn append_withdrawal(&self, entry: &BankEntry) -> CoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let available: i64 = tx.query_row(
            "SELECT COALESCE(SUM(amount_grams), 0) FROM bank_entries
             WHERE ship_id = ?1 AND year = ?2",
            params![entry.ship_id, entry.year],
            |row| row.get(0),
        )?;

        let requested = -entry.amount_grams;
        if requested > available {
            return Err(CoreError::InsufficientBalance {
                ship_id: entry.ship_id.clone(),
                year: entry.year,
                requested_grams: requested,
                available_grams: available,
            });
        }

        insert_entry(&tx, entry)?;
        tx.commit()?;
        Ok(())
    }

    fn bank_balance(&self, ship_id: &str, year: i32) -> CoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let sum: i64 = conn.query_row(
            "SELECT COALESCE(SUM(amount_grams), 0) FROM bank_entries
             WHERE ship_id = ?1 AND year = ?2",
            params![ship_id, year],
            |row| row.get(0),
        )?;
        Ok(sum)
    }

    fn bank_entries(&self, ship_id: &str, year: i32) -> CoreResult<Vec<BankEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT entry_uuid, ship_id, year, amount_grams, kind, created_at
             FROM bank_entries
             WHERE ship_id = ?1 AND year = ?2
             ORDER BY created_at ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![ship_id, year], entry_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn insert_pool(&self, pool: &Pool, members: &[PoolMember]) -> CoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO pools (pool_uuid, year, created_at) VALUES (?1, ?2, ?3)",
            params![pool.id, pool.year, pool.created_at.to_rfc3339()],
        )?;

        for member in members {
            tx.execute(
                "INSERT INTO pool_members (pool_uuid, ship_id, cb_before_grams, cb_after_grams)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    member.pool_id,
                    member.ship_id,
                    member.cb_before,
                    member.cb_after
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn pools_for_year(&self, year: i32) -> CoreResult<Vec<Pool>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT pool_uuid, year, created_at FROM pools WHERE year = ?1 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![year], |row| {
            let raw: String = row.get(2)?;
            Ok(Pool {
                id: row.get(0)?,
                year: row.get(1)?,
                created_at: parse_created_at(2, &raw)?,
            })
        })?;

        let mut pools = Vec::new();
        for row in rows {
            pools.push(row?);
        }
        Ok(pools)
    }

    fn pool_members(&self, pool_id: &str) -> CoreResult<Vec<PoolMember>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT pool_uuid, ship_id, cb_before_grams, cb_after_grams
             FROM pool_members WHERE pool_uuid = ?1 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![pool_id], |row| {
            Ok(PoolMember {
                pool_id: row.get(0)?,
                ship_id: row.get(1)?,
                cb_before: row.get(2)?,
                cb_after: row.get(3)?,
            })
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }
}

fn insert_entry(conn: &Connection, entry: &BankEntry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO bank_entries (entry_uuid, ship_id, year, amount_grams, kind, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.id,
            entry.ship_id,
            entry.year,
            entry.amount_grams,
            entry.kind.as_str(),
            entry.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::banking;
    use crate::compliance;
    use crate::pooling::{self, PoolMemberInput};
    use crate::routes;

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let seed = crate::store::memory::MemoryStore::with_seed_routes()
            .all_routes(&RouteFilter::default())
            .unwrap();
        routes::seed_routes(&store, &seed).unwrap();
        store
    }

    #[test]
    fn test_route_round_trip() {
        let store = seeded_store();

        let all = store.all_routes(&RouteFilter::default()).unwrap();
        assert_eq!(all.len(), 5);

        let r003 = store.route_by_id("R003").unwrap().unwrap();
        assert_eq!(r003.vessel_type, "Tanker");
        assert_eq!(r003.ghg_intensity, 93.5);
        assert!(!r003.is_baseline);

        assert!(store.route_by_id("R999").unwrap().is_none());
    }

    #[test]
    fn test_route_filters() {
        let store = seeded_store();

        let lng = store
            .all_routes(&RouteFilter {
                fuel_type: Some("LNG".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(lng.len(), 2);

        let y2025 = store
            .all_routes(&RouteFilter {
                year: Some(2025),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(y2025.len(), 2);
    }

    #[test]
    fn test_baseline_stays_unique_across_toggles() {
        let store = seeded_store();

        for route_id in ["R001", "R004", "R002", "R004"] {
            store.set_baseline(route_id).unwrap();

            let conn = store.conn.lock().unwrap();
            let flagged: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM routes WHERE is_baseline = 1",
                    [],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(flagged, 1);
        }

        assert_eq!(store.baseline_route().unwrap().unwrap().route_id, "R002");
    }

    #[test]
    fn test_baseline_not_found_rolls_back() {
        let store = seeded_store();
        store.set_baseline("R005").unwrap();

        let err = store.set_baseline("R999").unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));

        // The failed toggle must not have cleared the old flag
        assert_eq!(store.baseline_route().unwrap().unwrap().route_id, "R005");
    }

    #[test]
    fn test_snapshot_round_trip_and_latest() {
        let store = SqliteStore::open_in_memory().unwrap();

        store
            .save_snapshot(&ComplianceSnapshot::new("S1", 2024, -340_956_000))
            .unwrap();
        store
            .save_snapshot(&ComplianceSnapshot::new("S1", 2024, 120))
            .unwrap();
        store
            .save_snapshot(&ComplianceSnapshot::new("S2", 2024, 55))
            .unwrap();
        store
            .save_snapshot(&ComplianceSnapshot::new("S1", 2025, 77))
            .unwrap();

        let latest = store.latest_snapshot("S1", 2024).unwrap().unwrap();
        assert_eq!(latest.cb_grams, 120);

        let year_report = store.latest_snapshots_for_year(2024).unwrap();
        assert_eq!(year_report.len(), 2);
        assert_eq!(year_report[0].ship_id, "S1");
        assert_eq!(year_report[0].cb_grams, 120);
        assert_eq!(year_report[1].ship_id, "S2");
    }

    #[test]
    fn test_ledger_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();

        banking::deposit(&store, "S1", 2024, 1_000_000).unwrap();
        banking::deposit(&store, "S1", 2024, 500_000).unwrap();
        banking::withdraw(&store, "S1", 2024, 200_000).unwrap();

        assert_eq!(store.bank_balance("S1", 2024).unwrap(), 1_300_000);

        let entries = store.bank_entries("S1", 2024).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].amount_grams, 1_000_000);
        assert_eq!(entries[0].kind, EntryKind::Deposit);
        assert_eq!(entries[2].amount_grams, -200_000);
        assert_eq!(entries[2].kind, EntryKind::Withdrawal);
    }

    #[test]
    fn test_overdraw_leaves_ledger_untouched() {
        let store = SqliteStore::open_in_memory().unwrap();
        banking::deposit(&store, "S1", 2024, 1_000_000).unwrap();

        let err = banking::withdraw(&store, "S1", 2024, 1_500_000).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientBalance { .. }));

        assert_eq!(store.bank_balance("S1", 2024).unwrap(), 1_000_000);
        assert_eq!(store.bank_entries("S1", 2024).unwrap().len(), 1);
    }

    #[test]
    fn test_pool_persistence_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();

        let result = pooling::create_pool(
            &store,
            2024,
            &[
                PoolMemberInput { ship_id: "A".into(), cb_before: 100 },
                PoolMemberInput { ship_id: "B".into(), cb_before: -60 },
                PoolMemberInput { ship_id: "C".into(), cb_before: -30 },
            ],
        )
        .unwrap();

        let pools = store.pools_for_year(2024).unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].id, result.pool_id);

        let members = store.pool_members(&result.pool_id).unwrap();
        assert_eq!(members.len(), 3);
        assert_eq!(members[0].ship_id, "A");
        assert_eq!(members[0].cb_after, 10);
        assert_eq!(members[1].cb_after, 0);
        assert_eq!(members[2].cb_after, 0);
    }

    #[test]
    fn test_infeasible_pool_writes_no_rows() {
        let store = SqliteStore::open_in_memory().unwrap();

        let err = pooling::create_pool(
            &store,
            2024,
            &[
                PoolMemberInput { ship_id: "A".into(), cb_before: 20 },
                PoolMemberInput { ship_id: "B".into(), cb_before: -60 },
            ],
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InfeasiblePool { .. }));

        assert!(store.pools_for_year(2024).unwrap().is_empty());
        let conn = store.conn.lock().unwrap();
        let members: i64 = conn
            .query_row("SELECT COUNT(*) FROM pool_members", [], |row| row.get(0))
            .unwrap();
        assert_eq!(members, 0);
    }

    #[test]
    fn test_concurrent_withdrawals_cannot_overdraw() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        banking::deposit(store.as_ref(), "S1", 2024, 1_000).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || banking::withdraw(store.as_ref(), "S1", 2024, 300).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();

        assert_eq!(successes, 3);
        assert_eq!(store.bank_balance("S1", 2024).unwrap(), 100);
    }

    #[test]
    fn test_snapshot_flow_against_sqlite() {
        let store = seeded_store();

        let snap = compliance::compute_and_snapshot(&store, &store, "R001", 2024).unwrap();
        assert_eq!(snap.cb_grams, -340_956_000);

        banking::deposit(&store, "R001", 2024, 340_956_000).unwrap();
        let report = compliance::adjusted_cb_for_year(&store, 2024).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].cb_before, -340_956_000);
        assert_eq!(report[0].cb_after, 0);
    }
}
