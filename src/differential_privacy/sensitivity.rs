//! # Sensitivity resolution
//!
//! Counts move by at most one when a record is added or removed.
//! For Sum, Avg, Min and Max the bound is the maximum of the aggregated column,
//! as supplied by the storage layer. This is a heuristic, not a proof: the
//! rigorous bound is the largest change a single record can cause, which the
//! column maximum only approximates when values are non-negative.
//!

use super::request::{AggregateKind, AggregateRequest};

/// The sensitivity used whenever no better bound is available
pub const DEFAULT_SENSITIVITY: f64 = 1.;

/// A capability returning `MAX(column)`, typically backed by storage
pub trait MaxLookup {
    fn max(&self, column: &str) -> Option<f64>;
}

impl<F: Fn(&str) -> Option<f64>> MaxLookup for F {
    fn max(&self, column: &str) -> Option<f64> {
        self(column)
    }
}

/// A lookup that is never available
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoLookup;

impl MaxLookup for NoLookup {
    fn max(&self, _column: &str) -> Option<f64> {
        None
    }
}

/// Derive the sensitivity of an aggregate, falling back to [`DEFAULT_SENSITIVITY`]
pub fn resolve_sensitivity<L: MaxLookup + ?Sized>(
    kind: AggregateKind,
    column: Option<&str>,
    lookup: &L,
) -> f64 {
    resolve_sensitivity_or(kind, column, lookup, DEFAULT_SENSITIVITY)
}

/// Derive the sensitivity of an aggregate, falling back to `fallback` when the
/// column maximum is missing or unusable
pub fn resolve_sensitivity_or<L: MaxLookup + ?Sized>(
    kind: AggregateKind,
    column: Option<&str>,
    lookup: &L,
    fallback: f64,
) -> f64 {
    match kind {
        AggregateKind::Count | AggregateKind::GroupBy => 1.,
        AggregateKind::Sum | AggregateKind::Avg | AggregateKind::Min | AggregateKind::Max => {
            let Some(column) = column else {
                log::warn!("No column for the {kind} aggregate, using the default sensitivity {fallback}");
                return fallback;
            };
            match lookup.max(column) {
                Some(max) if max.is_finite() && max > 0. => {
                    log::debug!("Sensitivity of {kind}({column}) taken from the column maximum {max}");
                    max
                }
                Some(max) => {
                    log::warn!("Unusable maximum {max} for column {column}, using the default sensitivity {fallback}");
                    fallback
                }
                None => {
                    log::warn!("No maximum available for column {column}, using the default sensitivity {fallback}");
                    fallback
                }
            }
        }
    }
}

impl<T> AggregateRequest<T> {
    /// The sensitivity of this request given a max lookup
    pub fn sensitivity<L: MaxLookup + ?Sized>(&self, lookup: &L) -> f64 {
        resolve_sensitivity(self.kind(), self.column(), lookup)
    }

    /// The sensitivity of this request, with a configured fallback
    pub fn sensitivity_or<L: MaxLookup + ?Sized>(&self, lookup: &L, fallback: f64) -> f64 {
        resolve_sensitivity_or(self.kind(), self.column(), lookup, fallback)
    }
}
