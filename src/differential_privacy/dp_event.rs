use super::{
    dp_parameters::{MechanismKind, MechanismSpec},
    mechanisms::{gaussian_sigma, laplace_scale},
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An object inspired by Google's [DPEvent](https://github.com/google/differential-privacy/blob/main/python/dp_accounting/dp_event.py)
/// to represent the mechanisms applied on behalf of a principal
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DpEvent {
    /// Represents application of an operation with no privacy impact.
    ///
    /// It is the history of a principal that never ran a query.
    NoOp,
    /// Represents an application of the Gaussian mechanism.
    ///
    /// For values v_i and noise z_i ~ N(0, s^2), this mechanism returns v_i + z_i.
    /// `noise_multiplier` is the standard deviation s.
    Gaussian {
        noise_multiplier: f64,
        epsilon: f64,
        delta: f64,
    },
    /// Represents an application of the Laplace mechanism.
    ///
    /// For values v_i and noise z_i sampled from the Laplace distribution L(0, s),
    /// this mechanism returns v_i + z_i. `noise_multiplier` is the scale s.
    Laplace { noise_multiplier: f64, epsilon: f64 },
    /// Represents a selection with the exponential mechanism
    Exponential { epsilon: f64 },
    /// Represents a selection by Report-Noisy-Max with Laplace noise of scale `noise_multiplier`
    ReportNoisyMax { noise_multiplier: f64, epsilon: f64 },
    /// Represents application of a series of composed mechanisms.
    ///
    /// The composition may be adaptive, where the query producing each event depends
    /// on the results of prior queries.
    Composed { events: Vec<DpEvent> },
}

impl DpEvent {
    pub fn no_op() -> Self {
        Self::NoOp
    }

    pub fn compose(self, other: Self) -> Self {
        if other.is_no_op() {
            self
        } else if self.is_no_op() {
            other
        } else {
            let (v1, v2) = match (self, other) {
                (DpEvent::Composed { events: v1 }, DpEvent::Composed { events: v2 }) => (v1, v2),
                (DpEvent::Composed { events: v }, other) => (v, vec![other]),
                (current, DpEvent::Composed { events: v }) => (vec![current], v),
                (current, other) => (vec![current], vec![other]),
            };
            DpEvent::Composed {
                events: v1.into_iter().chain(v2).collect(),
            }
        }
    }

    pub fn is_no_op(&self) -> bool {
        match self {
            DpEvent::NoOp => true,
            DpEvent::Gaussian { epsilon, .. }
            | DpEvent::Laplace { epsilon, .. }
            | DpEvent::Exponential { epsilon }
            | DpEvent::ReportNoisyMax { epsilon, .. } => epsilon == &0.,
            DpEvent::Composed { events } => events.iter().all(|e| e.is_no_op()),
        }
    }

    /// The epsilon spent under basic composition
    pub fn epsilon(&self) -> f64 {
        match self {
            DpEvent::NoOp => 0.,
            DpEvent::Gaussian { epsilon, .. }
            | DpEvent::Laplace { epsilon, .. }
            | DpEvent::Exponential { epsilon }
            | DpEvent::ReportNoisyMax { epsilon, .. } => *epsilon,
            DpEvent::Composed { events } => events.iter().map(DpEvent::epsilon).sum(),
        }
    }

    /// The delta spent under basic composition
    pub fn delta(&self) -> f64 {
        match self {
            DpEvent::Gaussian { delta, .. } => *delta,
            DpEvent::Composed { events } => events.iter().map(DpEvent::delta).sum(),
            _ => 0.,
        }
    }

    /// The number of mechanisms applied
    pub fn len(&self) -> usize {
        match self {
            DpEvent::NoOp => 0,
            DpEvent::Composed { events } => events.iter().map(DpEvent::len).sum(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&MechanismSpec> for DpEvent {
    fn from(spec: &MechanismSpec) -> Self {
        let epsilon = spec.epsilon();
        match spec.kind() {
            MechanismKind::Gaussian => DpEvent::Gaussian {
                noise_multiplier: gaussian_sigma(epsilon, spec.delta(), spec.sensitivity()),
                epsilon,
                delta: spec.delta(),
            },
            MechanismKind::Laplace => DpEvent::Laplace {
                noise_multiplier: laplace_scale(epsilon, spec.sensitivity()),
                epsilon,
            },
            MechanismKind::Exponential => DpEvent::Exponential { epsilon },
            MechanismKind::ReportNoisyMax => DpEvent::ReportNoisyMax {
                noise_multiplier: laplace_scale(epsilon, spec.sensitivity()),
                epsilon,
            },
        }
    }
}

impl fmt::Display for DpEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DpEvent::NoOp => write!(f, "NoOp"),
            DpEvent::Gaussian {
                noise_multiplier,
                epsilon,
                delta,
            } => write!(f, "Gaussian ({noise_multiplier}, eps={epsilon}, delta={delta})"),
            DpEvent::Laplace {
                noise_multiplier,
                epsilon,
            } => write!(f, "Laplace ({noise_multiplier}, eps={epsilon})"),
            DpEvent::Exponential { epsilon } => write!(f, "Exponential (eps={epsilon})"),
            DpEvent::ReportNoisyMax {
                noise_multiplier,
                epsilon,
            } => write!(f, "ReportNoisyMax ({noise_multiplier}, eps={epsilon})"),
            DpEvent::Composed { events } => write!(
                f,
                "Composed ({})",
                events.iter().map(|dpe| format!("{}", dpe)).join(", ")
            ),
        }
    }
}

impl FromIterator<DpEvent> for DpEvent {
    fn from_iter<T: IntoIterator<Item = DpEvent>>(iter: T) -> Self {
        iter.into_iter()
            .fold(DpEvent::NoOp, |composed, event| composed.compose(event))
    }
}

impl From<Vec<DpEvent>> for DpEvent {
    fn from(v: Vec<DpEvent>) -> Self {
        v.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_spec() {
        let event = DpEvent::from(&MechanismSpec::laplace(0.5, 2.).unwrap());
        println!("{event}");
        assert_eq!(
            event,
            DpEvent::Laplace {
                noise_multiplier: 4.,
                epsilon: 0.5
            }
        );
        let event = DpEvent::from(&MechanismSpec::gaussian(1., 1e-5, 1.).unwrap());
        assert_eq!(event.delta(), 1e-5);
        assert_eq!(event.epsilon(), 1.);
    }

    #[test]
    fn test_compose() {
        let events: DpEvent = vec![
            DpEvent::no_op(),
            DpEvent::from(&MechanismSpec::laplace(1., 1.).unwrap()),
            DpEvent::from(&MechanismSpec::exponential(2., 1.).unwrap()),
            DpEvent::no_op(),
        ]
        .into();
        println!("{events}");
        assert_eq!(events.len(), 2);
        assert!((events.epsilon() - 3.).abs() < 1e-12);
        let events = events.compose(DpEvent::from(
            &MechanismSpec::gaussian(0.5, 1e-6, 1.).unwrap(),
        ));
        assert_eq!(events.len(), 3);
        assert!(matches!(&events, DpEvent::Composed { events } if events.len() == 3));
        assert_eq!(events.delta(), 1e-6);
    }

    #[test]
    fn test_no_op() {
        let events: DpEvent = vec![DpEvent::no_op(), DpEvent::no_op()].into();
        assert!(events.is_no_op());
        assert!(events.is_empty());
        assert_eq!(events.epsilon(), 0.);
    }
}
