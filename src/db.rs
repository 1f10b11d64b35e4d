// SQLite schema setup.

use anyhow::Result;
use rusqlite::Connection;

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Routes Table (seeded catalogue; is_baseline toggled atomically)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS routes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            route_id TEXT UNIQUE NOT NULL,
            vessel_type TEXT NOT NULL,
            fuel_type TEXT NOT NULL,
            year INTEGER NOT NULL,
            ghg_intensity REAL NOT NULL,
            fuel_consumption_t REAL NOT NULL,
            distance_km REAL NOT NULL,
            total_emissions_t REAL NOT NULL,
            is_baseline INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    // ==========================================================================
    // Compliance Snapshots (append-only; latest per key is authoritative)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS compliance_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            snapshot_uuid TEXT UNIQUE NOT NULL,
            ship_id TEXT NOT NULL,
            year INTEGER NOT NULL,
            cb_grams INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Bank Entries (append-only signed ledger; never edited or deleted)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS bank_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_uuid TEXT UNIQUE NOT NULL,
            ship_id TEXT NOT NULL,
            year INTEGER NOT NULL,
            amount_grams INTEGER NOT NULL,
            kind TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Pools + Members (written once at allocation time, immutable)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pools (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pool_uuid TEXT UNIQUE NOT NULL,
            year INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pool_members (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pool_uuid TEXT NOT NULL,
            ship_id TEXT NOT NULL,
            cb_before_grams INTEGER NOT NULL,
            cb_after_grams INTEGER NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_key ON compliance_snapshots(ship_id, year)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bank_entries_key ON bank_entries(ship_id, year)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pools_year ON pools(year)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pool_members_pool ON pool_members(pool_uuid)",
        [],
    )?;

    Ok(())
}
