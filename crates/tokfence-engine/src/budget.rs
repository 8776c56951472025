//! Budget enforcement.
//!
//! The engine is the only writer of budget rows while the daemon runs.
//! `check_and_charge` is the pre-dispatch gate: it rolls over stale
//! periods, rejects if any matching row would exceed its limit, and hands
//! back a [`ChargeHandle`]. After the upstream call completes with a
//! measured cost, `commit` records the real amount; a discarded handle
//! records nothing.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::warn;

use tokfence_core::money::usd_to_cents;
use tokfence_store::{BudgetRow, GLOBAL_SCOPE, LogStore, Period};

use crate::error::{EngineError, EngineResult};

/// An admitted-but-uncommitted charge.
///
/// Holds the rows matched at check time together with the planned amount
/// used for the admission decision; `commit` clamps against it.
#[derive(Debug)]
pub struct ChargeHandle {
    provider: String,
    planned_cents: i64,
    matched: Vec<(String, Period)>,
}

impl ChargeHandle {
    /// The provider this charge was admitted for.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }
}

/// Serialized budget reader/writer over the store.
pub struct BudgetEngine {
    store: Arc<LogStore>,
    // Serializes check/commit pairs across concurrent requests; the
    // invariant sum(committed) <= limit + one request's slack holds only
    // if nothing interleaves between the re-read and the write.
    lock: Mutex<()>,
}

impl BudgetEngine {
    /// Create an engine over the shared store.
    #[must_use]
    pub fn new(store: Arc<LogStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // A poisoned guard only means a prior panic mid-mutation; budget
        // rows are individually consistent, so continue.
        self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Create or overwrite a budget.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidArgument`] for a non-positive amount,
    /// or a store error.
    pub fn set_budget(&self, scope: &str, amount_usd: f64, period: Period) -> EngineResult<()> {
        if !amount_usd.is_finite() || amount_usd <= 0.0 {
            return Err(EngineError::InvalidArgument(format!(
                "budget amount must be positive, got {amount_usd}"
            )));
        }
        let _guard = self.guard();
        let now = Utc::now();
        self.store
            .upsert_budget(scope, period, usd_to_cents(amount_usd), period.truncate(now))?;
        Ok(())
    }

    /// Remove all budget rows for a scope.
    ///
    /// # Errors
    ///
    /// Returns a store error on failure.
    pub fn clear_budget(&self, scope: &str) -> EngineResult<()> {
        let _guard = self.guard();
        self.store.clear_budget(scope)?;
        Ok(())
    }

    /// Every budget row, with stale periods rolled over first.
    ///
    /// # Errors
    ///
    /// Returns a store error on failure.
    pub fn status(&self) -> EngineResult<Vec<BudgetRow>> {
        let _guard = self.guard();
        self.rolled_over_rows(Utc::now())
    }

    /// The pre-dispatch gate.
    ///
    /// Rolls over stale periods, then rejects if any row whose scope is
    /// `provider` or `global` would exceed its limit with `planned_cents`
    /// added. On success returns a handle for [`Self::commit`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BudgetExceeded`] naming the tightest
    /// violated row, or a store error.
    pub fn check_and_charge(
        &self,
        provider: &str,
        planned_cents: i64,
    ) -> EngineResult<ChargeHandle> {
        let _guard = self.guard();
        let rows = self.rolled_over_rows(Utc::now())?;

        let mut matched = Vec::new();
        for row in rows {
            if row.scope != provider && row.scope != GLOBAL_SCOPE {
                continue;
            }
            // Reject when the planned amount would cross the cap, and
            // also when the cap is already fully spent (streaming
            // requests plan at zero but must still be refused then).
            let exhausted = row.current_spend_cents >= row.limit_cents;
            if exhausted || row.current_spend_cents.saturating_add(planned_cents) > row.limit_cents
            {
                return Err(EngineError::BudgetExceeded {
                    scope: row.scope,
                    period: row.period,
                    limit_cents: row.limit_cents,
                    current_spend_cents: row.current_spend_cents,
                });
            }
            matched.push((row.scope, row.period));
        }

        Ok(ChargeHandle {
            provider: provider.to_owned(),
            planned_cents,
            matched,
        })
    }

    /// Record the measured cost of an admitted request.
    ///
    /// Adds `real_cents` to every matched row, clamped so one commit never
    /// pushes a row past `limit + planned` (the documented one-request
    /// overshoot bound).
    ///
    /// # Errors
    ///
    /// Returns a store error on failure.
    pub fn commit(&self, handle: ChargeHandle, real_cents: i64) -> EngineResult<()> {
        if real_cents <= 0 {
            return Ok(());
        }
        let _guard = self.guard();
        let rows = self.rolled_over_rows(Utc::now())?;
        for (scope, period) in &handle.matched {
            let Some(row) = rows
                .iter()
                .find(|r| &r.scope == scope && r.period == *period)
            else {
                // Budget cleared between check and commit; nothing to record.
                continue;
            };
            let ceiling = row
                .limit_cents
                .saturating_add(handle.planned_cents)
                .saturating_sub(row.current_spend_cents)
                .max(0);
            let delta = real_cents.min(ceiling);
            if delta < real_cents {
                warn!(
                    scope = %scope,
                    period = %period,
                    real_cents,
                    recorded = delta,
                    "clamped budget commit at limit plus planned slack"
                );
            }
            if delta > 0 {
                self.store.add_budget_spend(scope, *period, delta)?;
            }
        }
        Ok(())
    }

    /// Read rows, resetting any whose period has ended.
    fn rolled_over_rows(&self, now: DateTime<Utc>) -> EngineResult<Vec<BudgetRow>> {
        let mut rows = self.store.list_budgets()?;
        for row in &mut rows {
            if row.is_stale(now) {
                let new_start = row.period.truncate(now);
                self.store
                    .reset_budget_period(&row.scope, row.period, new_start)?;
                row.current_spend_cents = 0;
                row.period_start = new_start;
            }
        }
        Ok(rows)
    }
}

impl std::fmt::Debug for BudgetEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetEngine").finish_non_exhaustive()
    }
}
