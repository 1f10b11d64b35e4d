// Compliance balance calculator.
//
// Converts a route's GHG intensity and fuel consumption into a compliance
// balance (CB) in gCO2e. Positive = the ship emits below the regulatory
// target (surplus), negative = above it (deficit).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::store::{ComplianceStore, RouteStore};

// ============================================================================
// REGULATORY CONSTANTS
// ============================================================================

/// FuelEU Maritime 2025 GHG intensity target, in gCO2e/MJ.
/// Fixed by regulation, not user-tunable.
pub const TARGET_INTENSITY: f64 = 89.3368;

/// Lower heating value used to convert fuel mass to energy, in MJ per tonne.
pub const MJ_PER_TONNE: f64 = 41_000.0;

// ============================================================================
// BALANCE CALCULATOR
// ============================================================================

/// Compute the compliance balance for one route-year, in gCO2e.
///
/// `cb = (TARGET_INTENSITY - ghg_intensity) * fuel_tonnes * MJ_PER_TONNE`
///
/// Pure and total over all finite inputs: strictly decreasing in
/// `ghg_intensity`, linear in `fuel_tonnes`.
pub fn compute_cb(ghg_intensity: f64, fuel_tonnes: f64) -> f64 {
    let energy_mj = fuel_tonnes * MJ_PER_TONNE;
    (TARGET_INTENSITY - ghg_intensity) * energy_mj
}

/// Convert a computed CB to integer grams for storage.
///
/// Ledger sums and pool transfers run on integer gCO2e so repeated additions
/// over values in the hundreds of millions never drift. Rounds
/// half-away-from-zero at the storage boundary.
pub fn cb_to_grams(cb: f64) -> i64 {
    cb.round() as i64
}

// ============================================================================
// COMPLIANCE SNAPSHOT
// ============================================================================

/// Immutable record of a computed CB for a (ship, year) at a point in time.
///
/// Multiple snapshots may exist per key; the most recent is authoritative.
/// Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceSnapshot {
    /// Stable identity (UUID).
    pub id: String,

    pub ship_id: String,
    pub year: i32,

    /// CB before banking, in integer gCO2e.
    pub cb_grams: i64,

    pub created_at: DateTime<Utc>,
}

impl ComplianceSnapshot {
    pub fn new(ship_id: &str, year: i32, cb_grams: i64) -> Self {
        ComplianceSnapshot {
            id: uuid::Uuid::new_v4().to_string(),
            ship_id: ship_id.to_string(),
            year,
            cb_grams,
            created_at: Utc::now(),
        }
    }
}

/// One row of the per-year adjusted CB report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipAdjustedCb {
    pub ship_id: String,
    /// Latest snapshot CB, before banking.
    pub cb_before: i64,
    /// Snapshot CB plus the banked balance for the same (ship, year).
    pub cb_after: i64,
}

// ============================================================================
// ORCHESTRATION
// ============================================================================

/// Compute the CB for a route and persist it as a snapshot.
///
/// The ship id doubles as the route id, matching the seeded route catalogue.
/// Fails with `NotFound` when no such route exists; nothing is written then.
pub fn compute_and_snapshot<R, C>(
    routes: &R,
    compliance: &C,
    ship_id: &str,
    year: i32,
) -> CoreResult<ComplianceSnapshot>
where
    R: RouteStore + ?Sized,
    C: ComplianceStore + ?Sized,
{
    let route = routes
        .route_by_id(ship_id)?
        .ok_or_else(|| crate::error::CoreError::not_found("route", ship_id))?;

    let cb = compute_cb(route.ghg_intensity, route.fuel_consumption_t);
    let snapshot = ComplianceSnapshot::new(ship_id, year, cb_to_grams(cb));
    compliance.save_snapshot(&snapshot)?;

    Ok(snapshot)
}

/// Adjusted CB per ship for a year: latest snapshot plus banked balance.
///
/// Ships without a snapshot for the year do not appear. The `cb_after` value
/// is what feeds the pool allocator.
pub fn adjusted_cb_for_year<C>(compliance: &C, year: i32) -> CoreResult<Vec<ShipAdjustedCb>>
where
    C: ComplianceStore + ?Sized,
{
    let snapshots = compliance.latest_snapshots_for_year(year)?;

    let mut report = Vec::with_capacity(snapshots.len());
    for snap in snapshots {
        let banked = compliance.bank_balance(&snap.ship_id, year)?;
        report.push(ShipAdjustedCb {
            ship_id: snap.ship_id,
            cb_before: snap.cb_grams,
            cb_after: snap.cb_grams + banked,
        });
    }

    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
