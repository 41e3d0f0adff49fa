//! Core types for ReLU network verification.
//!
//! This crate provides the shared vocabulary of the relux workspace:
//! variable bounds, solver statuses, counterexamples, the error taxonomy,
//! and the cooperative cancellation flag polled by solver backends.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A bound on a scalar value: [lower, upper].
///
/// One-sided intervals use `f64::NEG_INFINITY` / `f64::INFINITY` for the
/// missing side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub lower: f64,
    pub upper: f64,
}

impl Bound {
    /// Create a new bound.
    #[inline]
    pub fn new(lower: f64, upper: f64) -> Self {
        debug_assert!(lower <= upper, "Invalid bound: {lower} > {upper}");
        Self { lower, upper }
    }

    /// Create a concrete (point) bound.
    #[inline]
    pub fn concrete(value: f64) -> Self {
        Self {
            lower: value,
            upper: value,
        }
    }

    /// The unconstrained interval.
    #[inline]
    pub fn unbounded() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    /// Lower bound only: `[value, +inf)`.
    #[inline]
    pub fn at_least(value: f64) -> Self {
        Self {
            lower: value,
            upper: f64::INFINITY,
        }
    }

    /// Upper bound only: `(-inf, value]`.
    #[inline]
    pub fn at_most(value: f64) -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: value,
        }
    }

    /// Check if this bound contains a value.
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    /// Width of the bound interval.
    #[inline]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Intersect two bounds.
    #[inline]
    pub fn intersect(&self, other: &Bound) -> Option<Bound> {
        let lower = self.lower.max(other.lower);
        let upper = self.upper.min(other.upper);
        if lower <= upper {
            Some(Bound { lower, upper })
        } else {
            None
        }
    }

    /// Interval sum.
    #[inline]
    pub fn add(&self, other: &Bound) -> Bound {
        Bound {
            lower: self.lower + other.lower,
            upper: self.upper + other.upper,
        }
    }

    /// Interval scaling by a finite constant.
    #[inline]
    pub fn scale(&self, c: f64) -> Bound {
        let a = c * self.lower;
        let b = c * self.upper;
        Bound {
            lower: a.min(b),
            upper: a.max(b),
        }
    }

    /// Image of the interval under `max(0, x)`.
    #[inline]
    pub fn relu(&self) -> Bound {
        Bound {
            lower: self.lower.max(0.0),
            upper: self.upper.max(0.0),
        }
    }
}

/// Terminal status of one solver query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// The constraint system is satisfiable; an assignment is available.
    Sat,
    /// The constraint system is infeasible.
    Unsat,
    /// The solve was cancelled before reaching a verdict.
    Interrupted,
}

/// A satisfying assignment read back from the solver, projected onto the
/// network's input and output neurons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counterexample {
    pub inputs: Vec<f64>,
    pub outputs: Vec<f64>,
}

/// Outcome of a full verification run (possibly several solver queries).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VerificationOutcome {
    /// Every query was UNSAT: the property holds.
    Holds,
    /// Some query was SAT: the property is violated at the counterexample.
    Violated { counterexample: Counterexample },
    /// The run was cancelled; neither verdict applies.
    Inconclusive { reason: String },
}

impl VerificationOutcome {
    pub fn is_violated(&self) -> bool {
        matches!(self, VerificationOutcome::Violated { .. })
    }

    pub fn is_holds(&self) -> bool {
        matches!(self, VerificationOutcome::Holds)
    }
}

/// Error taxonomy for the encoding and compilation layer.
///
/// Cancellation is not an error: it is reported through
/// [`SolveStatus::Interrupted`] and [`VerificationOutcome::Inconclusive`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Structurally invalid network (bad layer sizes, too few layers).
    /// Fatal; raised before any solver call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A network file could not be read or parsed.
    #[error("model loading failed: {0}")]
    ModelLoad(String),

    /// Malformed bound or property string. Recoverable: callers keep the
    /// defaults in effect and continue.
    #[error("parse error: {0}")]
    Parse(String),

    /// Unknown property kind. Recoverable: callers degrade to a plain
    /// satisfiability check.
    #[error("unsupported property: {0}")]
    UnsupportedProperty(String),

    /// Failure surfaced from the decision procedure. Terminal, not retried.
    #[error("solver error: {0}")]
    Solver(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Cooperative cancellation flag shared between the run context, the signal
/// handler, and the solver backend.
///
/// The flag is set with a single atomic store, so it is safe to trigger
/// from signal context. Solvers poll it at decision-procedure suspension
/// points and return [`SolveStatus::Interrupted`] once it is raised.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the active solve.
    #[inline]
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The shared atomic, for registration with low-level signal APIs.
    pub fn inner(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}
