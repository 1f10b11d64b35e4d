// Banking ledger.
//
// Append-only record of signed compliance-balance amounts per (ship, year).
// The ledger state is the running sum of entries for a key; entries are never
// edited or deleted. Banked surplus is keyed strictly to its (ship, year): it
// never expires and is never implicitly visible from any other year. Moving
// surplus across years would be an explicit operation, not a query-time
// effect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::store::ComplianceStore;

// ============================================================================
// BANK ENTRY
// ============================================================================

/// What a ledger line represents.
///
/// Deposits and applications share one signed-amount table; the kind tag keeps
/// the two events distinguishable in the audit trail even though the running
/// sum only looks at the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Surplus saved for later use. Amount is positive.
    Deposit,
    /// Previously banked surplus applied to a deficit. Amount is negative.
    Withdrawal,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Deposit => "deposit",
            EntryKind::Withdrawal => "withdrawal",
        }
    }

    pub fn from_str(s: &str) -> Option<EntryKind> {
        match s {
            "deposit" => Some(EntryKind::Deposit),
            "withdrawal" => Some(EntryKind::Withdrawal),
            _ => None,
        }
    }
}

/// Immutable signed ledger line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankEntry {
    /// Stable identity (UUID).
    pub id: String,

    pub ship_id: String,
    pub year: i32,

    /// Signed amount in integer gCO2e. Positive = deposit, negative =
    /// withdrawal. The sign always agrees with `kind`.
    pub amount_grams: i64,

    pub kind: EntryKind,

    /// Creation time; significant for audit ordering, not for the sum.
    pub created_at: DateTime<Utc>,
}

impl BankEntry {
    fn new(ship_id: &str, year: i32, amount_grams: i64, kind: EntryKind) -> Self {
        BankEntry {
            id: uuid::Uuid::new_v4().to_string(),
            ship_id: ship_id.to_string(),
            year,
            amount_grams,
            kind,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// LEDGER OPERATIONS
// ============================================================================

/// Deposit a compliance surplus into the bank for a (ship, year).
///
/// `amount_grams` must be positive; nothing is written otherwise.
pub fn deposit<S>(store: &S, ship_id: &str, year: i32, amount_grams: i64) -> CoreResult<BankEntry>
where
    S: ComplianceStore + ?Sized,
{
    if amount_grams <= 0 {
        return Err(CoreError::InvalidArgument(format!(
            "deposit amount must be positive, got {} gCO2e",
            amount_grams
        )));
    }

    let entry = BankEntry::new(ship_id, year, amount_grams, EntryKind::Deposit);
    store.append_bank_entry(&entry)?;
    Ok(entry)
}

/// Apply previously banked surplus: appends an entry of `-amount_grams`.
///
/// `amount_grams` must be positive and must not exceed the available balance
/// at the moment of the call. The balance check and the append run as one
/// atomic unit inside the store adapter, so a concurrent withdrawal on the
/// same key can never observe a stale balance.
pub fn withdraw<S>(store: &S, ship_id: &str, year: i32, amount_grams: i64) -> CoreResult<BankEntry>
where
    S: ComplianceStore + ?Sized,
{
    if amount_grams <= 0 {
        return Err(CoreError::InvalidArgument(format!(
            "withdrawal amount must be positive, got {} gCO2e",
            amount_grams
        )));
    }

    let entry = BankEntry::new(ship_id, year, -amount_grams, EntryKind::Withdrawal);
    store.append_withdrawal(&entry)?;
    Ok(entry)
}

/// Sum of all entries for a (ship, year); 0 when the key has no entries.
pub fn available_balance<S>(store: &S, ship_id: &str, year: i32) -> CoreResult<i64>
where
    S: ComplianceStore + ?Sized,
{
    store.bank_balance(ship_id, year)
}

/// CB after banking: `cb_before + available balance`. This is the value fed
/// into pooling.
pub fn adjusted_cb<S>(store: &S, ship_id: &str, year: i32, cb_before_grams: i64) -> CoreResult<i64>
where
    S: ComplianceStore + ?Sized,
{
    Ok(cb_before_grams + store.bank_balance(ship_id, year)?)
}

/// All entries for a (ship, year), ascending by creation time. Each call
/// returns a fresh snapshot of the ledger at call time.
pub fn list_entries<S>(store: &S, ship_id: &str, year: i32) -> CoreResult<Vec<BankEntry>>
where
    S: ComplianceStore + ?Sized,
{
    store.bank_entries(ship_id, year)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn test_balance_starts_at_zero() {
        let store = MemoryStore::new();
        assert_eq!(available_balance(&store, "S1", 2024).unwrap(), 0);
    }

    #[test]
    fn test_balance_equals_sum_of_entries() {
        let store = MemoryStore::new();

        deposit(&store, "S1", 2024, 1_000_000).unwrap();
        assert_eq!(available_balance(&store, "S1", 2024).unwrap(), 1_000_000);

        deposit(&store, "S1", 2024, 250_000).unwrap();
        assert_eq!(available_balance(&store, "S1", 2024).unwrap(), 1_250_000);

        withdraw(&store, "S1", 2024, 400_000).unwrap();
        assert_eq!(available_balance(&store, "S1", 2024).unwrap(), 850_000);

        let entries = list_entries(&store, "S1", 2024).unwrap();
        let sum: i64 = entries.iter().map(|e| e.amount_grams).sum();
        assert_eq!(sum, 850_000);
    }

    #[test]
    fn test_deposit_rejects_non_positive_amounts() {
        let store = MemoryStore::new();

        for bad in [0, -1, -1_000_000] {
            let err = deposit(&store, "S1", 2024, bad).unwrap_err();
            assert!(matches!(err, CoreError::InvalidArgument(_)));
        }

        // Fail fast: nothing was written
        assert!(list_entries(&store, "S1", 2024).unwrap().is_empty());
    }

    #[test]
    fn test_withdraw_rejects_non_positive_amounts() {
        let store = MemoryStore::new();
        deposit(&store, "S1", 2024, 500).unwrap();

        for bad in [0, -500] {
            let err = withdraw(&store, "S1", 2024, bad).unwrap_err();
            assert!(matches!(err, CoreError::InvalidArgument(_)));
        }

        assert_eq!(available_balance(&store, "S1", 2024).unwrap(), 500);
    }

    #[test]
    fn test_withdraw_exceeding_balance_fails() {
        let store = MemoryStore::new();
        deposit(&store, "S1", 2024, 1_000_000).unwrap();

        let err = withdraw(&store, "S1", 2024, 1_500_000).unwrap_err();
        match err {
            CoreError::InsufficientBalance {
                requested_grams,
                available_grams,
                ..
            } => {
                assert_eq!(requested_grams, 1_500_000);
                assert_eq!(available_grams, 1_000_000);
            }
            other => panic!("expected InsufficientBalance, got {other:?}"),
        }

        // Balance unchanged, no withdrawal entry appended
        assert_eq!(available_balance(&store, "S1", 2024).unwrap(), 1_000_000);
        assert_eq!(list_entries(&store, "S1", 2024).unwrap().len(), 1);
    }

    #[test]
    fn test_withdraw_whole_balance_succeeds() {
        let store = MemoryStore::new();
        deposit(&store, "S1", 2024, 750).unwrap();

        let entry = withdraw(&store, "S1", 2024, 750).unwrap();
        assert_eq!(entry.amount_grams, -750);
        assert_eq!(entry.kind, EntryKind::Withdrawal);
        assert_eq!(available_balance(&store, "S1", 2024).unwrap(), 0);
    }

    #[test]
    fn test_entries_are_keyed_per_ship() {
        let store = MemoryStore::new();
        deposit(&store, "S1", 2024, 100).unwrap();
        deposit(&store, "S2", 2024, 900).unwrap();

        assert_eq!(available_balance(&store, "S1", 2024).unwrap(), 100);
        assert_eq!(available_balance(&store, "S2", 2024).unwrap(), 900);
    }

    #[test]
    fn test_banked_surplus_does_not_cross_years() {
        let store = MemoryStore::new();
        deposit(&store, "S1", 2024, 800).unwrap();

        // 2024 surplus is invisible from 2025, and cannot be withdrawn there
        assert_eq!(available_balance(&store, "S1", 2025).unwrap(), 0);
        let err = withdraw(&store, "S1", 2025, 800).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientBalance { .. }));

        assert_eq!(available_balance(&store, "S1", 2024).unwrap(), 800);
    }

    #[test]
    fn test_entries_ordered_by_creation_and_tagged() {
        let store = MemoryStore::new();
        deposit(&store, "S1", 2024, 300).unwrap();
        deposit(&store, "S1", 2024, 200).unwrap();
        withdraw(&store, "S1", 2024, 100).unwrap();

        let entries = list_entries(&store, "S1", 2024).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        assert_eq!(entries[0].kind, EntryKind::Deposit);
        assert_eq!(entries[1].kind, EntryKind::Deposit);
        assert_eq!(entries[2].kind, EntryKind::Withdrawal);
        assert_eq!(entries[2].amount_grams, -100);
    }

    #[test]
    fn test_adjusted_cb_adds_banked_balance() {
        let store = MemoryStore::new();

        // No entries: adjusted equals the input
        assert_eq!(adjusted_cb(&store, "S1", 2024, -500_000).unwrap(), -500_000);

        deposit(&store, "S1", 2024, 300_000).unwrap();
        assert_eq!(adjusted_cb(&store, "S1", 2024, -500_000).unwrap(), -200_000);
    }

    #[test]
    fn test_entry_kind_round_trip() {
        for kind in [EntryKind::Deposit, EntryKind::Withdrawal] {
            assert_eq!(EntryKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(EntryKind::from_str("transfer"), None);
    }
}
