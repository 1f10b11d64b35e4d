// Pool allocator.
//
// Redistributes compliance balance inside a voluntary pool of ships so that
// every deficit member is cleared, provided the pool's aggregate balance is
// non-negative. The greedy order (largest surplus first, deepest deficit
// first, input order on ties) is a fixed policy: it determines which member
// keeps leftover surplus and must stay reproducible across implementations.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::store::ComplianceStore;

// ============================================================================
// POOL DATA MODEL
// ============================================================================

/// A single allocation event. Created once per allocator invocation,
/// immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    /// Stable identity (UUID).
    pub id: String,
    pub year: i32,
    pub created_at: DateTime<Utc>,
}

impl Pool {
    pub fn new(year: i32) -> Self {
        Pool {
            id: uuid::Uuid::new_v4().to_string(),
            year,
            created_at: Utc::now(),
        }
    }
}

/// One ship entering the pool, with its adjusted CB in gCO2e.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolMemberInput {
    pub ship_id: String,
    pub cb_before: i64,
}

/// One persisted member row. Written once at pool creation, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolMember {
    pub pool_id: String,
    pub ship_id: String,
    pub cb_before: i64,
    pub cb_after: i64,
}

/// Allocation for one member, before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAllocation {
    pub ship_id: String,
    pub cb_before: i64,
    pub cb_after: i64,
}

/// Result of a successful pool creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolResult {
    pub pool_id: String,
    pub year: i32,
    pub members: Vec<MemberAllocation>,
}

// ============================================================================
// GREEDY ALLOCATION
// ============================================================================

/// Redistribute surplus CB to cover deficits.
///
/// Deterministic greedy pass:
/// 1. Members with `cb_before == 0` pass through unchanged.
/// 2. Surplus members are visited in descending `cb_before` order, deficit
///    members in ascending order (deepest deficit first); ties keep input
///    order (stable sort).
/// 3. Each surplus member transfers `min(remaining, outstanding)` to each
///    deficit member in turn. Outstanding deficit state carries across the
///    outer loop.
///
/// Because the feasibility precondition guarantees total surplus covers total
/// deficit, every deficit member ends at exactly 0; leftover capacity stays
/// with the earliest-processed (largest) surplus members.
///
/// Fails with `InvalidArgument` on an empty member list and `InfeasiblePool`
/// when the aggregate CB is negative. Output preserves input order.
pub fn allocate(members: &[PoolMemberInput]) -> CoreResult<Vec<MemberAllocation>> {
    if members.is_empty() {
        return Err(CoreError::InvalidArgument(
            "a pool needs at least one member".to_string(),
        ));
    }

    let total: i64 = members.iter().map(|m| m.cb_before).sum();
    if total < 0 {
        return Err(CoreError::InfeasiblePool { total_grams: total });
    }

    let mut cb_after: Vec<i64> = members.iter().map(|m| m.cb_before).collect();

    let mut surplus: Vec<usize> = (0..members.len())
        .filter(|&i| members[i].cb_before > 0)
        .collect();
    surplus.sort_by_key(|&i| Reverse(members[i].cb_before));

    let mut deficit: Vec<usize> = (0..members.len())
        .filter(|&i| members[i].cb_before < 0)
        .collect();
    deficit.sort_by_key(|&i| members[i].cb_before);

    for &s in &surplus {
        let mut remaining = cb_after[s];
        for &d in &deficit {
            if remaining <= 0 {
                break;
            }
            let outstanding = -cb_after[d];
            if outstanding <= 0 {
                continue;
            }
            let transfer = remaining.min(outstanding);
            cb_after[s] -= transfer;
            cb_after[d] += transfer;
            remaining -= transfer;
        }
    }

    Ok(members
        .iter()
        .zip(cb_after)
        .map(|(m, after)| MemberAllocation {
            ship_id: m.ship_id.clone(),
            cb_before: m.cb_before,
            cb_after: after,
        })
        .collect())
}

// ============================================================================
// POOL CREATION
// ============================================================================

/// Run the allocator and persist the pool with one member row per input ship
/// (zero-CB members included) as a single atomic unit. On any failure nothing
/// is persisted.
pub fn create_pool<S>(store: &S, year: i32, members: &[PoolMemberInput]) -> CoreResult<PoolResult>
where
    S: ComplianceStore + ?Sized,
{
    let allocations = allocate(members)?;

    let pool = Pool::new(year);
    let rows: Vec<PoolMember> = allocations
        .iter()
        .map(|a| PoolMember {
            pool_id: pool.id.clone(),
            ship_id: a.ship_id.clone(),
            cb_before: a.cb_before,
            cb_after: a.cb_after,
        })
        .collect();

    store.insert_pool(&pool, &rows)?;

    Ok(PoolResult {
        pool_id: pool.id,
        year,
        members: allocations,
    })
}

// ============================================================================
// TESTS
// ============================================================================
