//! # Privacy budget accounting
//!
//! Each principal holds a budget of epsilon. A debit is all or nothing: it
//! succeeds and lowers the remaining budget, or it is refused and nothing changes.
//! The test and the subtraction happen under the principal's lock, so concurrent
//! queries for the same principal can never overspend.
//!

use super::{check_epsilon, dp_event::DpEvent, Error, Result};
use crate::config::PrivacyConfig;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

/// Floating point slack when comparing a request with the remaining budget
pub const BUDGET_TOLERANCE: f64 = 1e-9;

/// Whether a principal can still run realistic queries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrincipalState {
    Active,
    Exhausted,
}

/// The account whose cumulative privacy spend is tracked
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivacyPrincipal {
    id: String,
    initial_budget: f64,
    remaining_budget: f64,
}

impl PrivacyPrincipal {
    pub fn new(id: impl Into<String>, initial_budget: f64) -> Result<Self> {
        if !(initial_budget.is_finite() && initial_budget >= 0.) {
            return Err(Error::invalid_parameter(format!(
                "initial budget must be non-negative, got {initial_budget}"
            )));
        }
        Ok(PrivacyPrincipal {
            id: id.into(),
            initial_budget,
            remaining_budget: initial_budget,
        })
    }

    /// Restore a principal loaded from storage
    pub fn with_remaining(mut self, remaining_budget: f64) -> Result<Self> {
        if !(remaining_budget.is_finite()
            && remaining_budget >= 0.
            && remaining_budget <= self.initial_budget)
        {
            return Err(Error::invalid_parameter(format!(
                "remaining budget must lie in [0, {}], got {remaining_budget}",
                self.initial_budget
            )));
        }
        self.remaining_budget = remaining_budget;
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn initial_budget(&self) -> f64 {
        self.initial_budget
    }

    pub fn remaining_budget(&self) -> f64 {
        self.remaining_budget
    }

    pub fn spent(&self) -> f64 {
        self.initial_budget - self.remaining_budget
    }

    /// Debit `epsilon` if it fits in the remaining budget, return the residual
    pub fn check_and_debit(&mut self, epsilon: f64) -> Result<f64> {
        let epsilon = check_epsilon(epsilon)?;
        if epsilon > self.remaining_budget + BUDGET_TOLERANCE {
            return Err(Error::budget_exceeded(epsilon, self.remaining_budget));
        }
        self.remaining_budget = (self.remaining_budget - epsilon).max(0.);
        Ok(self.remaining_budget)
    }

    pub fn state(&self, min_epsilon: f64) -> PrincipalState {
        if self.remaining_budget + BUDGET_TOLERANCE < min_epsilon || self.remaining_budget <= 0. {
            PrincipalState::Exhausted
        } else {
            PrincipalState::Active
        }
    }

    /// Restore the initial budget, an administrative operation
    pub fn reset(&mut self) {
        self.remaining_budget = self.initial_budget;
    }
}

impl fmt::Display for PrivacyPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}/{})",
            self.id, self.remaining_budget, self.initial_budget
        )
    }
}

/// Loads and stores principals, implemented by the storage layer
pub trait BudgetStore {
    fn load(&self, id: &str) -> Result<Option<PrivacyPrincipal>>;
    fn store(&mut self, principal: &PrivacyPrincipal) -> Result<()>;
}

/// A [`BudgetStore`] keeping principals in memory
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(HashMap<String, PrivacyPrincipal>);

impl BudgetStore for MemoryStore {
    fn load(&self, id: &str) -> Result<Option<PrivacyPrincipal>> {
        Ok(self.0.get(id).cloned())
    }

    fn store(&mut self, principal: &PrivacyPrincipal) -> Result<()> {
        self.0.insert(principal.id().to_string(), principal.clone());
        Ok(())
    }
}

/// A principal and the mechanisms it paid for
#[derive(Debug)]
struct Account {
    principal: PrivacyPrincipal,
    history: DpEvent,
}

/// Tracks and atomically debits the budget of each principal
#[derive(Debug)]
pub struct BudgetAccountant {
    accounts: RwLock<HashMap<String, Arc<Mutex<Account>>>>,
    initial_budget: f64,
    min_epsilon: f64,
}

impl Default for BudgetAccountant {
    fn default() -> Self {
        BudgetAccountant::from_config(&PrivacyConfig::default())
    }
}

impl BudgetAccountant {
    pub fn new(initial_budget: f64, min_epsilon: f64) -> Self {
        BudgetAccountant {
            accounts: RwLock::new(HashMap::new()),
            initial_budget,
            min_epsilon,
        }
    }

    pub fn from_config(config: &PrivacyConfig) -> Self {
        BudgetAccountant::new(config.initial_budget, config.min_epsilon)
    }

    fn account(&self, id: &str) -> Result<Arc<Mutex<Account>>> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::unknown_principal(id))
    }

    /// Run `f` on the account of `id` while holding its lock
    fn with_account<T>(&self, id: &str, f: impl FnOnce(&mut Account) -> T) -> Result<T> {
        let account = self.account(id)?;
        // The account is only mutated by single assignments, it stays consistent after a panic
        let mut account = account.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut account))
    }

    /// Track `principal`, refused when a principal with the same id is already tracked
    pub fn register(&self, principal: PrivacyPrincipal) -> Result<()> {
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        match accounts.entry(principal.id().to_string()) {
            Entry::Occupied(_) => Err(Error::duplicate_principal(principal.id())),
            Entry::Vacant(entry) => {
                log::debug!("Register {principal}");
                entry.insert(Arc::new(Mutex::new(Account {
                    principal,
                    history: DpEvent::no_op(),
                })));
                Ok(())
            }
        }
    }

    /// Open a principal with the default initial budget, unless it already exists
    pub fn open(&self, id: &str) -> Result<f64> {
        if let Ok(remaining) = self.remaining(id) {
            return Ok(remaining);
        }
        let principal = PrivacyPrincipal::new(id, self.initial_budget)?;
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        let account = accounts.entry(id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Account {
                principal,
                history: DpEvent::no_op(),
            }))
        });
        let remaining = account
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .principal
            .remaining_budget();
        Ok(remaining)
    }

    /// Debit `epsilon` from `id`, all or nothing, and return the residual budget
    pub fn check_and_debit(&self, id: &str, epsilon: f64) -> Result<f64> {
        self.charge(id, epsilon, DpEvent::no_op())
    }

    /// Debit `epsilon` from `id` and record `event` in its history
    pub fn charge(&self, id: &str, epsilon: f64, event: DpEvent) -> Result<f64> {
        self.with_account(id, |account| {
            let residual = account.principal.check_and_debit(epsilon);
            match &residual {
                Ok(residual) => {
                    log::debug!("Debited {epsilon} from {id}, {residual} left");
                    let history = std::mem::replace(&mut account.history, DpEvent::no_op());
                    account.history = history.compose(event);
                }
                Err(err) => log::info!("Refused to debit {epsilon} from {id}: {err}"),
            }
            residual
        })?
    }

    pub fn remaining(&self, id: &str) -> Result<f64> {
        self.with_account(id, |account| account.principal.remaining_budget())
    }

    /// A snapshot of the principal, e.g. to persist it
    pub fn principal(&self, id: &str) -> Result<PrivacyPrincipal> {
        self.with_account(id, |account| account.principal.clone())
    }

    pub fn state(&self, id: &str) -> Result<PrincipalState> {
        self.with_account(id, |account| account.principal.state(self.min_epsilon))
    }

    /// The composition of the mechanisms charged to `id`
    pub fn history(&self, id: &str) -> Result<DpEvent> {
        self.with_account(id, |account| account.history.clone())
    }

    /// Restore the initial budget of `id`, the history is kept
    pub fn reset(&self, id: &str) -> Result<f64> {
        self.with_account(id, |account| {
            log::info!("Reset the budget of {}", account.principal);
            account.principal.reset();
            account.principal.remaining_budget()
        })
    }

    /// The ids of the tracked principals, sorted
    pub fn principals(&self) -> Vec<String> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .sorted()
            .collect()
    }

    /// Register the principal `id` from `store`, return whether it was found
    ///
    /// A principal already tracked is never overwritten by its stored state.
    pub fn load_from<S: BudgetStore + ?Sized>(&self, store: &S, id: &str) -> Result<bool> {
        match store.load(id)? {
            Some(principal) => {
                self.register(principal)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Write the current state of `id` to `store`
    pub fn persist_to<S: BudgetStore + ?Sized>(&self, store: &mut S, id: &str) -> Result<()> {
        let principal = self.principal(id)?;
        store.store(&principal)
    }
}
