//! # The DP query engine
//!
//! Runs one aggregate request for one principal:
//! resolve the sensitivity, check the request, debit the budget, then (and only then)
//! run the mechanism.
//!

use super::{
    budget::BudgetAccountant,
    check_epsilon,
    dp_event::DpEvent,
    dp_parameters::{MechanismKind, MechanismSpec},
    mechanisms::{self, CalibratedMechanism, NoisedOutput},
    request::AggregateRequest,
    sensitivity::{MaxLookup, NoLookup},
    Error, Result,
};
use crate::config::PrivacyConfig;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// The privatized output of a request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DpOutput<T> {
    /// One noised value per value of the request
    Noised(Vec<f64>),
    /// The selected candidate, with its item and value when the request has them
    Selected {
        index: usize,
        item: Option<T>,
        value: Option<f64>,
    },
}

impl<T> DpOutput<T> {
    pub fn noised(&self) -> Option<&[f64]> {
        match self {
            DpOutput::Noised(values) => Some(values),
            DpOutput::Selected { .. } => None,
        }
    }

    pub fn selected_index(&self) -> Option<usize> {
        match self {
            DpOutput::Noised(_) => None,
            DpOutput::Selected { index, .. } => Some(*index),
        }
    }

    pub fn selected_item(&self) -> Option<&T> {
        match self {
            DpOutput::Noised(_) => None,
            DpOutput::Selected { item, .. } => item.as_ref(),
        }
    }
}

/// The result of a successful run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DpResult<T = f64> {
    output: DpOutput<T>,
    mechanism: MechanismSpec,
    epsilon_spent: f64,
    residual_budget: f64,
    dp_event: DpEvent,
}

impl<T> DpResult<T> {
    pub fn output(&self) -> &DpOutput<T> {
        &self.output
    }

    pub fn mechanism(&self) -> &MechanismSpec {
        &self.mechanism
    }

    pub fn sensitivity(&self) -> f64 {
        self.mechanism.sensitivity()
    }

    pub fn epsilon_spent(&self) -> f64 {
        self.epsilon_spent
    }

    pub fn residual_budget(&self) -> f64 {
        self.residual_budget
    }

    pub fn dp_event(&self) -> &DpEvent {
        &self.dp_event
    }

    pub fn into_output(self) -> DpOutput<T> {
        self.output
    }
}

impl<T: fmt::Debug> fmt::Display for DpResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} with {} (spent {}, {} left)",
            self.output, self.mechanism, self.epsilon_spent, self.residual_budget
        )
    }
}

/// Orchestrates sensitivity resolution, budget accounting and mechanisms
#[derive(Debug)]
pub struct DpQueryEngine<L = NoLookup> {
    accountant: Arc<BudgetAccountant>,
    lookup: L,
    config: PrivacyConfig,
}

impl DpQueryEngine<NoLookup> {
    pub fn new(accountant: Arc<BudgetAccountant>) -> Self {
        DpQueryEngine {
            accountant,
            lookup: NoLookup,
            config: PrivacyConfig::default(),
        }
    }
}

impl<L: MaxLookup> DpQueryEngine<L> {
    /// Use `lookup` to resolve the sensitivity of column aggregates
    pub fn with_lookup<M: MaxLookup>(self, lookup: M) -> DpQueryEngine<M> {
        DpQueryEngine {
            accountant: self.accountant,
            lookup,
            config: self.config,
        }
    }

    pub fn with_config(mut self, config: PrivacyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn accountant(&self) -> &BudgetAccountant {
        &self.accountant
    }

    pub fn config(&self) -> &PrivacyConfig {
        &self.config
    }

    /// Calibrate `mechanism` for `request`, without charging anything
    pub fn mechanism_spec<T>(
        &self,
        request: &AggregateRequest<T>,
        mechanism: MechanismKind,
        epsilon: f64,
    ) -> Result<MechanismSpec> {
        let epsilon = check_epsilon(epsilon)?;
        if epsilon > self.config.max_query_epsilon {
            return Err(Error::invalid_parameter(format!(
                "epsilon {epsilon} exceeds the per query maximum {}",
                self.config.max_query_epsilon
            )));
        }
        let sensitivity = request.sensitivity_or(&self.lookup, self.config.sensitivity);
        let spec = MechanismSpec::new(mechanism, epsilon, self.config.delta, sensitivity)?;
        mechanisms::calibrated_scale(&spec)?;
        Ok(spec)
    }

    /// Run `mechanism` on `request` for `principal`, using the thread local generator
    pub fn run<T: Clone>(
        &self,
        principal: &str,
        request: &AggregateRequest<T>,
        mechanism: MechanismKind,
        epsilon: f64,
    ) -> Result<DpResult<T>> {
        self.run_with_rng(&mut thread_rng(), principal, request, mechanism, epsilon)
    }

    /// Run the configured default mechanism with the configured default epsilon
    pub fn run_default<T: Clone>(
        &self,
        principal: &str,
        request: &AggregateRequest<T>,
    ) -> Result<DpResult<T>> {
        self.run(principal, request, self.config.mechanism, self.config.epsilon)
    }

    /// Run `mechanism` on `request` for `principal`
    ///
    /// The mechanism is calibrated before the budget is debited: nothing is charged
    /// when the request or the calibration is invalid, and no noise is drawn when the
    /// budget is insufficient.
    pub fn run_with_rng<T: Clone, R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        principal: &str,
        request: &AggregateRequest<T>,
        mechanism: MechanismKind,
        epsilon: f64,
    ) -> Result<DpResult<T>> {
        let spec = self.mechanism_spec(request, mechanism, epsilon)?;
        request.check(mechanism)?;
        let inputs = if mechanism.is_selection() {
            request.scores()
        } else {
            request.values()
        };
        let calibrated = CalibratedMechanism::new(&spec, inputs)?;
        let dp_event = DpEvent::from(&spec);
        let residual_budget = self
            .accountant
            .charge(principal, spec.epsilon(), dp_event.clone())?;
        let output = match calibrated.sample(rng) {
            NoisedOutput::Noised(values) => DpOutput::Noised(values),
            NoisedOutput::Selected(index) => select(request, index),
        };
        log::debug!("{principal} ran {spec}, {residual_budget} left");
        Ok(DpResult {
            output,
            mechanism: spec,
            epsilon_spent: spec.epsilon(),
            residual_budget,
            dp_event,
        })
    }
}

fn select<T: Clone>(request: &AggregateRequest<T>, index: usize) -> DpOutput<T> {
    DpOutput::Selected {
        index,
        item: request.items().and_then(|items| items.get(index)).cloned(),
        value: request.values().get(index).copied(),
    }
}
