//! # Privacy configuration
//!
//! Defaults can be overridden from the environment:
//! - `DP_EPSILON`: the epsilon of a query when none is given
//! - `DP_DELTA`: the delta of the Gaussian mechanism
//! - `DP_SENSITIVITY`: the sensitivity used when none can be resolved
//! - `DP_MAX_QUERY_EPSILON`: the largest epsilon a single query may request
//! - `DP_INITIAL_BUDGET`: the budget of newly opened principals
//! - `DP_MIN_EPSILON`: below this remaining budget a principal is exhausted
//! - `DP_MECHANISM`: the default mechanism (`gaussian`, `laplace`, ...)
//!
//! or read from JSON.
//!

use crate::differential_privacy::{
    check_epsilon, check_sensitivity, dp_parameters::DEFAULT_DELTA, MechanismKind,
};
use serde::{Deserialize, Serialize};
use std::{env, error, fmt, result, str::FromStr};

#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    Parsing(String),
    InvalidValue(String),
}

impl Error {
    pub fn parsing(desc: impl fmt::Display) -> Error {
        Error::Parsing(format!("Cannot parse {}", desc))
    }
    pub fn invalid_value(desc: impl fmt::Display) -> Error {
        Error::InvalidValue(format!("Invalid value {}", desc))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parsing(desc) => writeln!(f, "Parsing: {}", desc),
            Error::InvalidValue(desc) => writeln!(f, "InvalidValue: {}", desc),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::parsing(err)
    }
}

impl error::Error for Error {}
pub type Result<T> = result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub epsilon: f64,
    pub delta: f64,
    pub sensitivity: f64,
    pub max_query_epsilon: f64,
    pub initial_budget: f64,
    pub min_epsilon: f64,
    pub mechanism: MechanismKind,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        PrivacyConfig {
            epsilon: 1.,
            delta: DEFAULT_DELTA,
            sensitivity: 1.,
            max_query_epsilon: 10.,
            initial_budget: 100.,
            min_epsilon: 0.01,
            mechanism: MechanismKind::Gaussian,
        }
    }
}

/// Read a variable, ignoring it with a warning when it does not parse
fn var<T: FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("Ignoring {name}={value}: cannot parse it");
            None
        }
    }
}

impl PrivacyConfig {
    /// The defaults overridden by the `DP_*` environment variables
    pub fn from_env() -> Self {
        let defaults = PrivacyConfig::default();
        let config = PrivacyConfig {
            epsilon: var("DP_EPSILON").unwrap_or(defaults.epsilon),
            delta: var("DP_DELTA").unwrap_or(defaults.delta),
            sensitivity: var("DP_SENSITIVITY").unwrap_or(defaults.sensitivity),
            max_query_epsilon: var("DP_MAX_QUERY_EPSILON").unwrap_or(defaults.max_query_epsilon),
            initial_budget: var("DP_INITIAL_BUDGET").unwrap_or(defaults.initial_budget),
            min_epsilon: var("DP_MIN_EPSILON").unwrap_or(defaults.min_epsilon),
            mechanism: var("DP_MECHANISM").unwrap_or(defaults.mechanism),
        };
        match config.validate() {
            Ok(()) => config,
            Err(err) => {
                log::warn!("Invalid privacy configuration from the environment ({err}), using the defaults");
                defaults
            }
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: PrivacyConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        check_epsilon(self.epsilon).map_err(Error::invalid_value)?;
        check_epsilon(self.max_query_epsilon).map_err(Error::invalid_value)?;
        check_epsilon(self.min_epsilon).map_err(Error::invalid_value)?;
        check_sensitivity(self.sensitivity).map_err(Error::invalid_value)?;
        if !(self.delta > 0. && self.delta < 1.) {
            return Err(Error::invalid_value(format!(
                "delta must lie in (0, 1), got {}",
                self.delta
            )));
        }
        if !(self.initial_budget.is_finite() && self.initial_budget >= 0.) {
            return Err(Error::invalid_value(format!(
                "initial budget must be non-negative, got {}",
                self.initial_budget
            )));
        }
        if self.epsilon > self.max_query_epsilon {
            return Err(Error::invalid_value(format!(
                "default epsilon {} exceeds the per query maximum {}",
                self.epsilon, self.max_query_epsilon
            )));
        }
        Ok(())
    }
}
