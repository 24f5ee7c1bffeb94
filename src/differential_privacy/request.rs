//! # Aggregate requests
//!
//! A structured description of the aggregate the caller computed, replacing any
//! parsing of query text: the aggregate kind drives the sensitivity and the
//! values are the true results to protect.
//!

use super::{dp_parameters::MechanismKind, Error, Result};
use crate::builder::{Ready, With};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The aggregate that produced the values
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    #[default]
    Count,
    Sum,
    Avg,
    Min,
    Max,
    GroupBy,
}

impl AggregateKind {
    /// Aggregates whose sensitivity depends on the range of a column
    pub fn depends_on_column(&self) -> bool {
        matches!(
            self,
            AggregateKind::Sum | AggregateKind::Avg | AggregateKind::Min | AggregateKind::Max
        )
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateKind::Count => write!(f, "count"),
            AggregateKind::Sum => write!(f, "sum"),
            AggregateKind::Avg => write!(f, "avg"),
            AggregateKind::Min => write!(f, "min"),
            AggregateKind::Max => write!(f, "max"),
            AggregateKind::GroupBy => write!(f, "group_by"),
        }
    }
}

/// The true aggregate result(s) and, for selection mechanisms,
/// the candidate items with their utility scores
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateRequest<T = f64> {
    kind: AggregateKind,
    column: Option<String>,
    values: Vec<f64>,
    items: Option<Vec<T>>,
    utility: Option<Vec<f64>>,
}

impl<T> AggregateRequest<T> {
    pub fn new(
        kind: AggregateKind,
        column: Option<String>,
        values: Vec<f64>,
        items: Option<Vec<T>>,
        utility: Option<Vec<f64>>,
    ) -> Self {
        AggregateRequest {
            kind,
            column,
            values,
            items,
            utility,
        }
    }

    pub fn builder() -> RequestBuilder<T> {
        RequestBuilder::new()
    }

    pub fn kind(&self) -> AggregateKind {
        self.kind
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn items(&self) -> Option<&[T]> {
        self.items.as_deref()
    }

    pub fn utility(&self) -> Option<&[f64]> {
        self.utility.as_deref()
    }

    /// The number of candidates a selection mechanism chooses from
    pub fn domain_len(&self) -> usize {
        self.items
            .as_ref()
            .map_or(self.values.len(), |items| items.len())
    }

    /// The scores Report-Noisy-Max compares
    pub fn scores(&self) -> &[f64] {
        self.utility.as_deref().unwrap_or(&self.values)
    }

    /// Structural checks for `mechanism`, run before any budget is charged
    pub fn check(&self, mechanism: MechanismKind) -> Result<()> {
        match mechanism {
            MechanismKind::Gaussian | MechanismKind::Laplace => {
                if self.values.is_empty() {
                    return Err(Error::EmptyInput);
                }
            }
            MechanismKind::ReportNoisyMax => {
                // Scores are the utility, or the values when there is none
                self.check_parallel(self.scores())?;
                check_finite(self.scores())?;
            }
            MechanismKind::Exponential => {
                let utility = self.utility.as_ref().ok_or(Error::MissingUtility)?;
                self.check_parallel(utility)?;
                check_finite(utility)?;
            }
        }
        Ok(())
    }

    fn check_parallel(&self, scores: &[f64]) -> Result<()> {
        match (self.domain_len(), scores.len()) {
            (0, _) | (_, 0) => Err(Error::EmptyInput),
            (domain, scores) if domain != scores => Err(Error::length_mismatch(domain, scores)),
            _ => Ok(()),
        }
    }
}

fn check_finite(scores: &[f64]) -> Result<()> {
    if scores.iter().all(|s| s.is_finite()) {
        Ok(())
    } else {
        Err(Error::invalid_parameter("candidate scores must be finite"))
    }
}

impl AggregateRequest<f64> {
    pub fn count(values: Vec<f64>) -> Self {
        AggregateRequest::new(AggregateKind::Count, None, values, None, None)
    }

    pub fn group_by(values: Vec<f64>) -> Self {
        AggregateRequest::new(AggregateKind::GroupBy, None, values, None, None)
    }

    pub fn sum(column: impl Into<String>, values: Vec<f64>) -> Self {
        AggregateRequest::new(AggregateKind::Sum, Some(column.into()), values, None, None)
    }

    pub fn avg(column: impl Into<String>, values: Vec<f64>) -> Self {
        AggregateRequest::new(AggregateKind::Avg, Some(column.into()), values, None, None)
    }
}

/// Builds an [`AggregateRequest`]
///
/// Candidates are added as `(item, utility)` pairs so that items and scores stay parallel.
#[derive(Clone, Debug)]
pub struct RequestBuilder<T> {
    kind: AggregateKind,
    column: Option<String>,
    values: Vec<f64>,
    items: Option<Vec<T>>,
    utility: Option<Vec<f64>>,
}

impl<T> RequestBuilder<T> {
    pub fn new() -> Self {
        RequestBuilder {
            kind: AggregateKind::default(),
            column: None,
            values: vec![],
            items: None,
            utility: None,
        }
    }

    pub fn kind(mut self, kind: AggregateKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn values(mut self, values: Vec<f64>) -> Self {
        self.values = values;
        self
    }

    pub fn utility(mut self, utility: Vec<f64>) -> Self {
        self.utility = Some(utility);
        self
    }

    pub fn candidate(mut self, item: T, utility: f64) -> Self {
        self.items.get_or_insert_with(Vec::new).push(item);
        self.utility.get_or_insert_with(Vec::new).push(utility);
        self
    }
}

impl<T> Default for RequestBuilder<T> {
    fn default() -> Self {
        RequestBuilder::new()
    }
}

impl<T> With<AggregateKind> for RequestBuilder<T> {
    fn with(self, input: AggregateKind) -> Self {
        self.kind(input)
    }
}

impl<T> With<(T, f64)> for RequestBuilder<T> {
    fn with(self, (item, utility): (T, f64)) -> Self {
        self.candidate(item, utility)
    }
}

impl<T> Ready<AggregateRequest<T>> for RequestBuilder<T> {
    type Error = Error;

    fn try_build(self) -> Result<AggregateRequest<T>> {
        if let (Some(items), Some(utility)) = (&self.items, &self.utility) {
            if items.len() != utility.len() {
                return Err(Error::length_mismatch(items.len(), utility.len()));
            }
        }
        if self.kind.depends_on_column() && self.column.is_none() {
            log::debug!("No column given for a {} aggregate", self.kind);
        }
        Ok(AggregateRequest::new(
            self.kind,
            self.column,
            self.values,
            self.items,
            self.utility,
        ))
    }
}
