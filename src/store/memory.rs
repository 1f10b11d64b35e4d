// In-memory store.
//
// Implements the same contracts as the SQLite adapter, including the
// atomicity rules: every operation runs under one mutex acquisition, so the
// withdraw balance check, the baseline toggle and pool insertion are each a
// single serialized unit.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::banking::BankEntry;
use crate::compliance::ComplianceSnapshot;
use crate::error::{CoreError, CoreResult};
use crate::pooling::{Pool, PoolMember};
use crate::routes::{RouteFilter, RouteRecord};
use crate::store::{ComplianceStore, RouteStore};

#[derive(Default)]
struct Inner {
    routes: Vec<RouteRecord>,
    snapshots: Vec<ComplianceSnapshot>,
    entries: Vec<BankEntry>,
    pools: Vec<Pool>,
    members: Vec<PoolMember>,
}

/// In-memory implementation of both storage ports.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with the five demo routes (no baseline flagged).
    pub fn with_seed_routes() -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock().unwrap();
            inner.routes = seed_routes();
        }
        store
    }
}

fn seed_routes() -> Vec<RouteRecord> {
    let row = |route_id: &str,
               vessel_type: &str,
               fuel_type: &str,
               year: i32,
               ghg_intensity: f64,
               fuel_consumption_t: f64,
               distance_km: f64,
               total_emissions_t: f64| RouteRecord {
        route_id: route_id.to_string(),
        vessel_type: vessel_type.to_string(),
        fuel_type: fuel_type.to_string(),
        year,
        ghg_intensity,
        fuel_consumption_t,
        distance_km,
        total_emissions_t,
        is_baseline: false,
    };

    vec![
        row("R001", "Container", "HFO", 2024, 91.0, 5000.0, 12000.0, 4500.0),
        row("R002", "BulkCarrier", "LNG", 2024, 88.0, 4800.0, 11500.0, 4200.0),
        row("R003", "Tanker", "MGO", 2024, 93.5, 5100.0, 12500.0, 4700.0),
        row("R004", "RoRo", "HFO", 2025, 89.2, 4900.0, 11800.0, 4300.0),
        row("R005", "Container", "LNG", 2025, 90.5, 4950.0, 11900.0, 4400.0),
    ]
}

impl RouteStore for MemoryStore {
    fn all_routes(&self, filter: &RouteFilter) -> CoreResult<Vec<RouteRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut routes: Vec<RouteRecord> = inner
            .routes
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        routes.sort_by(|a, b| a.route_id.cmp(&b.route_id));
        Ok(routes)
    }

    fn route_by_id(&self, route_id: &str) -> CoreResult<Option<RouteRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .routes
            .iter()
            .find(|r| r.route_id == route_id)
            .cloned())
    }

    fn baseline_route(&self) -> CoreResult<Option<RouteRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.routes.iter().find(|r| r.is_baseline).cloned())
    }

    fn set_baseline(&self, route_id: &str) -> CoreResult<RouteRecord> {
        let mut inner = self.inner.lock().unwrap();

        // Validate before mutating anything
        let target = inner
            .routes
            .iter()
            .position(|r| r.route_id == route_id)
            .ok_or_else(|| CoreError::not_found("route", route_id))?;

        for route in inner.routes.iter_mut() {
            route.is_baseline = false;
        }
        inner.routes[target].is_baseline = true;

        Ok(inner.routes[target].clone())
    }

    fn upsert_route(&self, route: &RouteRecord) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner
            .routes
            .iter_mut()
            .find(|r| r.route_id == route.route_id)
        {
            Some(existing) => *existing = route.clone(),
            None => inner.routes.push(route.clone()),
        }
        Ok(())
    }
}

impl ComplianceStore for MemoryStore {
    fn save_snapshot(&self, snapshot: &ComplianceSnapshot) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.snapshots.push(snapshot.clone());
        Ok(())
    }

    fn latest_snapshot(&self, ship_id: &str, year: i32) -> CoreResult<Option<ComplianceSnapshot>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .snapshots
            .iter()
            .filter(|s| s.ship_id == ship_id && s.year == year)
            .last()
            .cloned())
    }

    fn latest_snapshots_for_year(&self, year: i32) -> CoreResult<Vec<ComplianceSnapshot>> {
        let inner = self.inner.lock().unwrap();

        // Later insertions overwrite earlier ones per ship; BTreeMap keeps
        // the result ordered by ship id.
        let mut latest: BTreeMap<String, ComplianceSnapshot> = BTreeMap::new();
        for snap in inner.snapshots.iter().filter(|s| s.year == year) {
            latest.insert(snap.ship_id.clone(), snap.clone());
        }

        Ok(latest.into_values().collect())
    }

    fn append_bank_entry(&self, entry: &BankEntry) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.push(entry.clone());
        Ok(())
    }

    fn append_withdrawal(&self, entry: &BankEntry) -> CoreResult<()> {
        // Single lock acquisition covers the balance check and the append.
        let mut inner = self.inner.lock().unwrap();

        let available: i64 = inner
            .entries
            .iter()
            .filter(|e| e.ship_id == entry.ship_id && e.year == entry.year)
            .map(|e| e.amount_grams)
            .sum();

        let requested = -entry.amount_grams;
        if requested > available {
            return Err(CoreError::InsufficientBalance {
                ship_id: entry.ship_id.clone(),
                year: entry.year,
                requested_grams: requested,
                available_grams: available,
            });
        }

        inner.entries.push(entry.clone());
        Ok(())
    }

    fn bank_balance(&self, ship_id: &str, year: i32) -> CoreResult<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.ship_id == ship_id && e.year == year)
            .map(|e| e.amount_grams)
            .sum())
    }

    fn bank_entries(&self, ship_id: &str, year: i32) -> CoreResult<Vec<BankEntry>> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<BankEntry> = inner
            .entries
            .iter()
            .filter(|e| e.ship_id == ship_id && e.year == year)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    fn insert_pool(&self, pool: &Pool, members: &[PoolMember]) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.pools.push(pool.clone());
        inner.members.extend(members.iter().cloned());
        Ok(())
    }

    fn pools_for_year(&self, year: i32) -> CoreResult<Vec<Pool>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .pools
            .iter()
            .filter(|p| p.year == year)
            .cloned()
            .collect())
    }

    fn pool_members(&self, pool_id: &str) -> CoreResult<Vec<PoolMember>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .members
            .iter()
            .filter(|m| m.pool_id == pool_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_seed_routes_shape() {
        let store = MemoryStore::with_seed_routes();
        let routes = store.all_routes(&RouteFilter::default()).unwrap();

        assert_eq!(routes.len(), 5);
        assert!(routes.iter().all(|r| !r.is_baseline));
        assert_eq!(routes[0].route_id, "R001");
    }

    #[test]
    fn test_concurrent_withdrawals_cannot_overdraw() {
        use crate::banking;

        let store = Arc::new(MemoryStore::new());
        banking::deposit(store.as_ref(), "S1", 2024, 1_000).unwrap();

        // 8 threads each try to withdraw 300; at most 3 can succeed.
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
}
