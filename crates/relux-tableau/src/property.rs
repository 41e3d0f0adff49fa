//! Property compilation: bound and row directives expressing the NEGATION
//! of the property to be verified.
//!
//! The external solver searches for a counterexample to the negation; SAT
//! means the property is violated at the returned assignment, UNSAT of
//! every emitted query proves the property.

use crate::solver::TableauSolver;
use crate::vars::{VarId, VariableMap};
use relux_core::{Bound, Error, Result};
use relux_nnet::Network;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default input interval when no bounds string is given.
pub const DEFAULT_INPUT_LOWER: f64 = -10.0;
pub const DEFAULT_INPUT_UPPER: f64 = 10.0;

/// One resolved default interval per input neuron.
pub fn default_input_bounds(input_size: usize) -> Vec<Bound> {
    vec![Bound::new(DEFAULT_INPUT_LOWER, DEFAULT_INPUT_UPPER); input_size]
}

/// Parse an input-bounds string.
///
/// Accepted forms: `all:[lo,hi]` applying one interval to every input, or
/// a comma-separated list of `idx:[lo,hi]` entries overriding individual
/// inputs on top of the defaults. Malformed strings fail with
/// [`Error::Parse`]; callers are expected to keep the defaults in effect.
pub fn parse_input_bounds(spec: &str, input_size: usize) -> Result<Vec<Bound>> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(Error::Parse("empty bounds string".to_string()));
    }

    if let Some(rest) = spec.strip_prefix("all:") {
        let bound = parse_interval(rest)?;
        return Ok(vec![bound; input_size]);
    }

    let mut bounds = default_input_bounds(input_size);
    let mut remaining = spec;
    while !remaining.is_empty() {
        let close = remaining
            .find(']')
            .ok_or_else(|| Error::Parse(format!("unterminated interval in {spec:?}")))?;
        let entry = &remaining[..=close];

        let (idx, interval) = entry
            .split_once(':')
            .ok_or_else(|| Error::Parse(format!("expected idx:[lo,hi], got {entry:?}")))?;
        let idx: usize = idx
            .trim()
            .parse()
            .map_err(|_| Error::Parse(format!("invalid input index {idx:?}")))?;
        if idx >= input_size {
            return Err(Error::Parse(format!(
                "input index {idx} out of range for {input_size} inputs"
            )));
        }
        bounds[idx] = parse_interval(interval)?;

        remaining = remaining[close + 1..].trim_start();
        if let Some(rest) = remaining.strip_prefix(',') {
            remaining = rest.trim_start();
        } else if !remaining.is_empty() {
            return Err(Error::Parse(format!(
                "expected ',' between entries in {spec:?}"
            )));
        }
    }
    Ok(bounds)
}

fn parse_interval(text: &str) -> Result<Bound> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| Error::Parse(format!("expected [lo,hi], got {text:?}")))?;

    let values: Vec<f64> = inner
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| Error::Parse(format!("invalid bound value {v:?}")))
        })
        .collect::<Result<_>>()?;

    if values.len() != 2 {
        return Err(Error::Parse(format!(
            "interval needs exactly two values, got {} in {text:?}",
            values.len()
        )));
    }
    if values[0] > values[1] {
        return Err(Error::Parse(format!(
            "empty interval [{}, {}]",
            values[0], values[1]
        )));
    }
    Ok(Bound::new(values[0], values[1]))
}

/// Direction of an output threshold property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdOp {
    Greater,
    Less,
}

/// A verification property, parsed from the CLI surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyKind {
    /// `output[index] op threshold` holds for every admissible input.
    OutputBounds {
        index: usize,
        op: ThresholdOp,
        threshold: f64,
    },
    /// `target` has the strictly maximal output for every admissible input.
    Classification { target: usize },
    /// The nearest class at `center` is unchanged within the epsilon box.
    Robustness { epsilon: f64, center: Vec<f64> },
}

impl PropertyKind {
    /// Parse a property from its kind string and parameter string.
    ///
    /// Formats: `output_bounds` with `idx:>value` / `idx:<value`;
    /// `classification` with the target class index; `robustness` with
    /// `epsilon@c0,c1,...`. Unknown kinds fail with
    /// [`Error::UnsupportedProperty`], malformed parameters with
    /// [`Error::Parse`]; both are recoverable by degrading to a plain
    /// satisfiability check.
    pub fn parse(kind: &str, params: Option<&str>) -> Result<Self> {
        match kind {
            "output_bounds" => {
                let params = params.ok_or_else(|| {
                    Error::Parse("output_bounds needs parameters idx:>value".to_string())
                })?;
                let (idx, rest) = params
                    .split_once(':')
                    .ok_or_else(|| Error::Parse(format!("expected idx:>value, got {params:?}")))?;
                let index: usize = idx
                    .trim()
                    .parse()
                    .map_err(|_| Error::Parse(format!("invalid output index {idx:?}")))?;
                let rest = rest.trim();
                let op = match rest.chars().next() {
                    Some('>') => ThresholdOp::Greater,
                    Some('<') => ThresholdOp::Less,
                    _ => {
                        return Err(Error::Parse(format!(
                            "expected '>' or '<' in {params:?}"
                        )))
                    }
                };
                let threshold: f64 = rest[1..]
                    .trim()
                    .parse()
                    .map_err(|_| Error::Parse(format!("invalid threshold in {params:?}")))?;
                Ok(PropertyKind::OutputBounds {
                    index,
                    op,
                    threshold,
                })
            }
            "classification" => {
                let params = params.ok_or_else(|| {
                    Error::Parse("classification needs a target class".to_string())
                })?;
                let target: usize = params
                    .trim()
                    .parse()
                    .map_err(|_| Error::Parse(format!("invalid target class {params:?}")))?;
                Ok(PropertyKind::Classification { target })
            }
            "robustness" => {
                let params = params.ok_or_else(|| {
                    Error::Parse("robustness needs parameters epsilon@c0,c1,...".to_string())
                })?;
                let (eps, center) = params.split_once('@').ok_or_else(|| {
                    Error::Parse("robustness needs a center point: epsilon@c0,c1,...".to_string())
                })?;
                let epsilon: f64 = eps
                    .trim()
                    .parse()
                    .map_err(|_| Error::Parse(format!("invalid epsilon {eps:?}")))?;
                if epsilon <= 0.0 {
                    return Err(Error::Parse(format!(
                        "epsilon must be positive, got {epsilon}"
                    )));
                }
                let center: Vec<f64> = center
                    .split(',')
                    .map(|v| {
                        v.trim()
                            .parse::<f64>()
                            .map_err(|_| Error::Parse(format!("invalid center value {v:?}")))
                    })
                    .collect::<Result<_>>()?;
                Ok(PropertyKind::Robustness { epsilon, center })
            }
            other => Err(Error::UnsupportedProperty(other.to_string())),
        }
    }
}

/// One directive against the solver, applied after tableau installation.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Lower(VarId, f64),
    Upper(VarId, f64),
    /// A fresh row-determined difference variable:
    /// `margin = favored - rival`, bounded `(-inf, 0]`.
    MarginRow {
        margin: VarId,
        favored: VarId,
        rival: VarId,
    },
}

/// One solver query: the installed tableau plus these directives.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub label: String,
    pub directives: Vec<Directive>,
}

impl Query {
    /// Apply the directives to a solver holding the installed tableau.
    pub fn apply<S: TableauSolver>(&self, solver: &mut S) {
        for directive in &self.directives {
            match *directive {
                Directive::Lower(var, value) => solver.set_lower_bound(var, value),
                Directive::Upper(var, value) => solver.set_upper_bound(var, value),
                Directive::MarginRow {
                    margin,
                    favored,
                    rival,
                } => {
                    solver.initialize_cell(margin, margin, -1.0);
                    solver.initialize_cell(margin, favored, 1.0);
                    solver.initialize_cell(margin, rival, -1.0);
                    solver.set_upper_bound(margin, 0.0);
                    solver.mark_basic(margin);
                }
            }
        }
    }
}

/// Result of property compilation: resolved input bounds plus the queries
/// whose joint UNSAT proves the property.
#[derive(Debug, Clone)]
pub struct CompiledProperty {
    pub input_bounds: Vec<Bound>,
    pub queries: Vec<Query>,
    /// Ids beyond the variable map's total that each query may reference
    /// (fresh difference variables). Solvers must be sized
    /// `vars.total() + extra_vars`.
    pub extra_vars: usize,
}

/// Compile the negation of `property` against the variable map.
///
/// `None` compiles to a single unconstrained satisfiability query. The
/// disjunction inside a classification property becomes one sub-query per
/// rival class: a single conjunctive query over all margins would assert
/// that the target is the minimum, which is stronger than the negation of
/// "target is the maximum".
pub fn compile_property(
    property: Option<&PropertyKind>,
    network: &Network,
    vars: &VariableMap,
    base_bounds: &[Bound],
) -> Result<CompiledProperty> {
    if base_bounds.len() != vars.input_size() {
        return Err(Error::Configuration(format!(
            "expected {} input bounds, got {}",
            vars.input_size(),
            base_bounds.len()
        )));
    }

    let output_size = vars.output_size();
    match property {
        None => Ok(CompiledProperty {
            input_bounds: base_bounds.to_vec(),
            queries: vec![Query {
                label: "satisfiability".to_string(),
                directives: Vec::new(),
            }],
            extra_vars: 0,
        }),

        Some(PropertyKind::OutputBounds {
            index,
            op,
            threshold,
        }) => {
            if *index >= output_size {
                return Err(Error::Parse(format!(
                    "output index {index} out of range for {output_size} outputs"
                )));
            }
            let out = vars.output(*index);
            // Assert the negated bound and search for a counterexample.
            let (directive, label) = match op {
                ThresholdOp::Greater => (
                    Directive::Upper(out, *threshold),
                    format!("output[{index}] > {threshold} (negated)"),
                ),
                ThresholdOp::Less => (
                    Directive::Lower(out, *threshold),
                    format!("output[{index}] < {threshold} (negated)"),
                ),
            };
            Ok(CompiledProperty {
                input_bounds: base_bounds.to_vec(),
                queries: vec![Query {
                    label,
                    directives: vec![directive],
                }],
                extra_vars: 0,
            })
        }

        Some(PropertyKind::Classification { target }) => Ok(CompiledProperty {
            input_bounds: base_bounds.to_vec(),
            queries: classification_queries(*target, vars)?,
            extra_vars: 1,
        }),

        Some(PropertyKind::Robustness { epsilon, center }) => {
            if center.len() != vars.input_size() {
                return Err(Error::Parse(format!(
                    "robustness center has {} values, network has {} inputs",
                    center.len(),
                    vars.input_size()
                )));
            }
            if *epsilon <= 0.0 {
                return Err(Error::Parse(format!(
                    "epsilon must be positive, got {epsilon}"
                )));
            }

            // The epsilon box overrides the global input bounds.
            let input_bounds: Vec<Bound> = center
                .iter()
                .map(|&c| Bound::new(c - epsilon, c + epsilon))
                .collect();

            // "Nearest class unchanged": the class at the center must stay
            // maximal over the whole box.
            let outputs = network.evaluate(center)?;
            let target = outputs
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .expect("output layer is non-empty");
            debug!(target, ?outputs, "robustness center classified");

            Ok(CompiledProperty {
                input_bounds,
                queries: classification_queries(target, vars)?,
                extra_vars: 1,
            })
        }
    }
}

/// One sub-query per rival class `i`: margin `d = out[target] - out[i]`
/// constrained `d <= 0`, SAT iff some admissible input makes class `i`
/// reach the target's score.
fn classification_queries(target: usize, vars: &VariableMap) -> Result<Vec<Query>> {
    let output_size = vars.output_size();
    if target >= output_size {
        return Err(Error::Parse(format!(
            "target class {target} out of range for {output_size} outputs"
        )));
    }
    if output_size == 1 {
        warn!("classification over a single output is vacuous");
    }

    // Every sub-query runs on a fresh solver, so they share one fresh id.
    let margin = vars.total();
    Ok((0..output_size)
        .filter(|&i| i != target)
        .map(|i| Query {
            label: format!("output[{target}] > output[{i}] (negated)"),
            directives: vec![Directive::MarginRow {
                margin,
                favored: vars.output(target),
                rival: vars.output(i),
            }],
        })
        .collect())
}
