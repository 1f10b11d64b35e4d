// Typed error model for the compliance core.
//
// Every failure path carries enough context (ship id, year, requested vs.
// available amounts) to render a precise user-facing message. Validation
// errors are raised before any mutation is attempted.

use thiserror::Error;

/// Core error kinds shared by the calculator, ledger and pool allocator.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed, missing or non-positive input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Withdrawal exceeds the banked balance available at the time of the call.
    #[error(
        "insufficient banked balance for ship {ship_id} year {year}: \
         requested {requested_grams} gCO2e, available {available_grams} gCO2e"
    )]
    InsufficientBalance {
        ship_id: String,
        year: i32,
        requested_grams: i64,
        available_grams: i64,
    },

    /// The pool's aggregate compliance balance is negative before allocation.
    #[error("infeasible pool: aggregate compliance balance is {total_grams} gCO2e (must be >= 0)")]
    InfeasiblePool { total_grams: i64 },

    /// A referenced ship, route or year has no record.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Underlying persistence unavailable or a transaction aborted.
    /// Surfaced unchanged; retry policy belongs to the caller.
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl CoreError {
    /// Shorthand for `NotFound` with an owned id.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
