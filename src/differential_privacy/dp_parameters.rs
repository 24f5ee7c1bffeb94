use super::{check_epsilon, check_sensitivity, Error, Result};
use serde::{Deserialize, Serialize};
use std::{cmp::Eq, fmt, hash::Hash, str::FromStr};

/// The delta used by the Gaussian mechanism when none is given
pub const DEFAULT_DELTA: f64 = 1e-5;

/// The available mechanisms
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanismKind {
    Gaussian,
    Laplace,
    Exponential,
    ReportNoisyMax,
}

impl MechanismKind {
    /// Mechanisms selecting one candidate instead of noising every value
    pub fn is_selection(&self) -> bool {
        matches!(self, MechanismKind::Exponential | MechanismKind::ReportNoisyMax)
    }
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MechanismKind::Gaussian => write!(f, "Gaussian"),
            MechanismKind::Laplace => write!(f, "Laplace"),
            MechanismKind::Exponential => write!(f, "Exponential"),
            MechanismKind::ReportNoisyMax => write!(f, "ReportNoisyMax"),
        }
    }
}

impl FromStr for MechanismKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s
            .trim()
            .to_ascii_lowercase()
            .replace(['-', ' '], "_")
            .as_str()
        {
            "gaussian" => Ok(MechanismKind::Gaussian),
            "laplace" => Ok(MechanismKind::Laplace),
            "exponential" => Ok(MechanismKind::Exponential),
            "report_noisy_max" | "reportnoisymax" => Ok(MechanismKind::ReportNoisyMax),
            _ => Err(Error::invalid_parameter(format!("unknown mechanism {s}"))),
        }
    }
}

/// A fully calibrated mechanism
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MechanismSpec {
    kind: MechanismKind,
    epsilon: f64,
    delta: f64,
    sensitivity: f64,
}

impl MechanismSpec {
    /// Build a spec, rejecting non-positive epsilon or sensitivity and delta outside (0, 1)
    pub fn new(kind: MechanismKind, epsilon: f64, delta: f64, sensitivity: f64) -> Result<Self> {
        let epsilon = check_epsilon(epsilon)?;
        let sensitivity = check_sensitivity(sensitivity)?;
        if kind == MechanismKind::Gaussian && !(delta > 0. && delta < 1.) {
            return Err(Error::invalid_parameter(format!(
                "delta must lie in (0, 1), got {delta}"
            )));
        }
        Ok(MechanismSpec {
            kind,
            epsilon,
            delta,
            sensitivity,
        })
    }

    pub fn gaussian(epsilon: f64, delta: f64, sensitivity: f64) -> Result<Self> {
        MechanismSpec::new(MechanismKind::Gaussian, epsilon, delta, sensitivity)
    }

    pub fn laplace(epsilon: f64, sensitivity: f64) -> Result<Self> {
        MechanismSpec::new(MechanismKind::Laplace, epsilon, DEFAULT_DELTA, sensitivity)
    }

    pub fn exponential(epsilon: f64, sensitivity: f64) -> Result<Self> {
        MechanismSpec::new(MechanismKind::Exponential, epsilon, DEFAULT_DELTA, sensitivity)
    }

    pub fn report_noisy_max(epsilon: f64, sensitivity: f64) -> Result<Self> {
        MechanismSpec::new(
            MechanismKind::ReportNoisyMax,
            epsilon,
            DEFAULT_DELTA,
            sensitivity,
        )
    }

    pub fn kind(&self) -> MechanismKind {
        self.kind
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Only meaningful for the Gaussian mechanism
    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }
}

impl fmt::Display for MechanismSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MechanismKind::Gaussian => write!(
                f,
                "{} (epsilon={}, delta={}, sensitivity={})",
                self.kind, self.epsilon, self.delta, self.sensitivity
            ),
            _ => write!(
                f,
                "{} (epsilon={}, sensitivity={})",
                self.kind, self.epsilon, self.sensitivity
            ),
        }
    }
}

impl Hash for MechanismSpec {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        Hash::hash(&self.kind, state);
        Hash::hash(&self.epsilon.to_be_bytes(), state);
        Hash::hash(&self.delta.to_be_bytes(), state);
        Hash::hash(&self.sensitivity.to_be_bytes(), state);
    }
}

impl Eq for MechanismSpec {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mechanism_kind() {
        assert_eq!("gaussian".parse::<MechanismKind>(), Ok(MechanismKind::Gaussian));
        assert_eq!("Laplace".parse::<MechanismKind>(), Ok(MechanismKind::Laplace));
        assert_eq!(
            " Exponential ".parse::<MechanismKind>(),
            Ok(MechanismKind::Exponential)
        );
        assert_eq!(
            "report-noisy-max".parse::<MechanismKind>(),
            Ok(MechanismKind::ReportNoisyMax)
        );
        assert_eq!(
            "ReportNoisyMax".parse::<MechanismKind>(),
            Ok(MechanismKind::ReportNoisyMax)
        );
        assert!("geometric".parse::<MechanismKind>().is_err());
    }

    #[test]
    fn test_is_selection() {
        assert!(!MechanismKind::Gaussian.is_selection());
        assert!(!MechanismKind::Laplace.is_selection());
        assert!(MechanismKind::Exponential.is_selection());
        assert!(MechanismKind::ReportNoisyMax.is_selection());
    }

    #[test]
    fn test_mechanism_spec_validation() {
        let spec = MechanismSpec::gaussian(1., 1e-5, 2.).unwrap();
        println!("{spec}");
        assert_eq!(spec.kind(), MechanismKind::Gaussian);
        assert_eq!(spec.sensitivity(), 2.);
        assert!(MechanismSpec::laplace(0., 1.).is_err());
        assert!(MechanismSpec::laplace(1., -1.).is_err());
        assert!(MechanismSpec::gaussian(1., 0., 1.).is_err());
        assert!(MechanismSpec::gaussian(1., 1., 1.).is_err());
        // Delta is ignored outside of the Gaussian mechanism
        assert!(MechanismSpec::new(MechanismKind::Laplace, 1., 0., 1.).is_ok());
    }

    #[test]
    fn test_serde() {
        let spec = MechanismSpec::report_noisy_max(2., 1.).unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        println!("{json}");
        assert!(json.contains("report_noisy_max"));
        let parsed: MechanismSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);
    }
}
