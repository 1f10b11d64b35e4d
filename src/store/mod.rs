// Storage ports for the compliance core.
//
// Each component talks to persistence through these traits rather than a
// shared global client, so the SQLite adapter and the in-memory fake are
// interchangeable and every adapter carries the same transactional contract.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::banking::BankEntry;
use crate::compliance::ComplianceSnapshot;
use crate::error::CoreResult;
use crate::pooling::{Pool, PoolMember};
use crate::routes::{RouteFilter, RouteRecord};

/// Port for the route catalogue and the baseline flag.
pub trait RouteStore {
    /// All routes matching the filter, ordered by route id.
    fn all_routes(&self, filter: &RouteFilter) -> CoreResult<Vec<RouteRecord>>;

    fn route_by_id(&self, route_id: &str) -> CoreResult<Option<RouteRecord>>;

    /// The single route currently flagged as baseline, if any.
    fn baseline_route(&self) -> CoreResult<Option<RouteRecord>>;

    /// Flag one route as baseline, clearing the flag on every other route.
    ///
    /// Clear-all and set-one execute as a single all-or-nothing unit: a
    /// committed state never holds zero or more than one baseline. Fails with
    /// `NotFound` (and changes nothing) when the route does not exist.
    fn set_baseline(&self, route_id: &str) -> CoreResult<RouteRecord>;

    /// Insert a route, or replace the existing row with the same route id.
    fn upsert_route(&self, route: &RouteRecord) -> CoreResult<()>;
}

/// Port for compliance snapshots, the banking ledger and pools.
pub trait ComplianceStore {
    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    fn save_snapshot(&self, snapshot: &ComplianceSnapshot) -> CoreResult<()>;

    /// Most recent snapshot for a (ship, year), if any.
    fn latest_snapshot(&self, ship_id: &str, year: i32) -> CoreResult<Option<ComplianceSnapshot>>;

    /// Most recent snapshot per ship for a year, ordered by ship id.
    fn latest_snapshots_for_year(&self, year: i32) -> CoreResult<Vec<ComplianceSnapshot>>;

    // ------------------------------------------------------------------
    // Banking ledger (append-only)
    // ------------------------------------------------------------------

    /// Append a ledger entry unconditionally. Used for deposits; amount
    /// validation happens in the core before this is called.
    fn append_bank_entry(&self, entry: &BankEntry) -> CoreResult<()>;

    /// Append a withdrawal entry (negative amount), checking the available
    /// balance and appending as one atomic unit per (ship, year) key.
    ///
    /// Fails with `InsufficientBalance` when the withdrawal magnitude exceeds
    /// the balance at the moment of the call; nothing is appended then. Two
    /// concurrent withdrawals must never both succeed if their combined
    /// amount exceeds the available balance.
    fn append_withdrawal(&self, entry: &BankEntry) -> CoreResult<()>;

    /// Sum of all entries for a (ship, year); 0 when none exist.
    fn bank_balance(&self, ship_id: &str, year: i32) -> CoreResult<i64>;

    /// All entries for a (ship, year), ascending by creation time.
    fn bank_entries(&self, ship_id: &str, year: i32) -> CoreResult<Vec<BankEntry>>;

    // ------------------------------------------------------------------
    // Pools
    // ------------------------------------------------------------------

    /// Persist a pool and all of its member rows as one atomic unit.
    /// A partially-written pool must never be observable.
    fn insert_pool(&self, pool: &Pool, members: &[PoolMember]) -> CoreResult<()>;

    fn pools_for_year(&self, year: i32) -> CoreResult<Vec<Pool>>;

    /// Member rows for a pool, in their persisted order.
    fn pool_members(&self, pool_id: &str) -> CoreResult<Vec<PoolMember>>;
}
