//! Real-valued variables and their interval domains.
//!
//! Every automaton carries a fixed, ordered set of [`Variable`]s. The order
//! is significant: it defines the coordinate axes used by the polytope
//! sampler, so that a point `x: &[f64]` maps back to an [`Assignment`] by
//! position.
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// A full or partial valuation of variables, keyed by name.
///
/// A `BTreeMap` keeps serialized trajectories stable across runs.
pub type Assignment = BTreeMap<String, f64>;

/// A closed interval `[lo, hi]`.
///
/// # Invariants
///
/// - `lo <= hi`
/// - both bounds are finite
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Domain {
    lo: f64,
    hi: f64,
}

impl Domain {
    /// Creates a new domain, rejecting empty or unbounded intervals.
    pub fn new(lo: f64, hi: f64) -> Result<Self> {
        if !lo.is_finite() || !hi.is_finite() {
            return Err(Error::InvalidAutomaton(format!(
                "domain [{}, {}] is not bounded",
                lo, hi
            )));
        }
        if lo > hi {
            return Err(Error::InvalidAutomaton(format!(
                "domain [{}, {}] is empty",
                lo, hi
            )));
        }
        Ok(Domain { lo, hi })
    }

    pub fn lo(&self) -> f64 {
        self.lo
    }

    pub fn hi(&self) -> f64 {
        self.hi
    }

    /// Length of the interval.
    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }

    pub fn midpoint(&self) -> f64 {
        0.5 * (self.lo + self.hi)
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lo <= value && value <= self.hi
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}

/// A named real-valued quantity with a closed interval domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    name: String,
    domain: Domain,
}

impl Variable {
    pub fn new(name: impl Into<String>, domain: Domain) -> Self {
        Variable {
            name: name.into(),
            domain,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ∈ {}", self.name, self.domain)
    }
}

/// Maps a point in variable order back to a named assignment.
pub fn to_assignment(vars: &[Variable], point: &[f64]) -> Assignment {
    vars.iter()
        .zip(point)
        .map(|(var, &value)| (var.name().to_string(), value))
        .collect()
}
