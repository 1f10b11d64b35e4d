// FuelEU Compliance Core - Library
// Exposes all modules for use in the CLI, API server, and tests

pub mod banking;
pub mod compliance;
pub mod db;
pub mod error;
pub mod pooling;
pub mod routes;
pub mod store;

// Re-export commonly used types
pub use banking::{
    adjusted_cb, available_balance, deposit, list_entries, withdraw, BankEntry, EntryKind,
};
pub use compliance::{
    adjusted_cb_for_year, compute_and_snapshot, compute_cb, cb_to_grams, ComplianceSnapshot,
    ShipAdjustedCb, MJ_PER_TONNE, TARGET_INTENSITY,
};
pub use error::{CoreError, CoreResult};
pub use pooling::{
    allocate, create_pool, MemberAllocation, Pool, PoolMember, PoolMemberInput, PoolResult,
};
pub use routes::{
    compare_to_baseline, load_routes_csv, seed_routes, set_baseline, ComparisonReport,
    RouteComparison, RouteFilter, RouteRecord,
};
pub use store::{ComplianceStore, MemoryStore, RouteStore, SqliteStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
