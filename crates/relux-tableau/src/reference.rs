//! Bundled reference backend: records the installed tableau and decides
//! small queries without a full decision procedure.
//!
//! Two half-procedures compose:
//! - fixpoint interval propagation over rows and ReLU pairs; an empty
//!   intersection with a declared bound is a sound UNSAT proof;
//! - seeded uniform sampling of the free variables (box corners first),
//!   closing each sample over the equality rows and pairs; a sample
//!   meeting every declared bound is a SAT witness.
//!
//! Queries neither half can settle fail with [`Error::Solver`] — this
//! backend is deliberately incomplete, and the case-splitting simplex
//! engine it stands in for remains external behind the
//! [`TableauSolver`] trait.

use crate::solver::TableauSolver;
use crate::vars::VarId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relux_core::{Bound, Error, InterruptFlag, Result, SolveStatus};
use std::collections::HashMap;
use tracing::{debug, trace};

const FEASIBILITY_TOL: f64 = 1e-7;

/// Tuning for the sampling half of the backend.
#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    /// Random sample budget after the corner sweep.
    pub samples: usize,
    /// Seed for the uniform draws.
    pub seed: u64,
    /// Cap on free variables for the exhaustive corner sweep.
    pub corner_limit: usize,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            samples: 4096,
            seed: 42,
            corner_limit: 10,
        }
    }
}

/// Recording implementation of [`TableauSolver`] with a built-in
/// interval/sampling decision attempt.
#[derive(Debug)]
pub struct ReferenceSolver {
    lower: Vec<f64>,
    upper: Vec<f64>,
    basic: Vec<bool>,
    pairs: Vec<(VarId, VarId)>,
    rows: Vec<Vec<(VarId, f64)>>,
    row_of: HashMap<VarId, usize>,
    values: Option<Vec<f64>>,
    flag: InterruptFlag,
    config: ReferenceConfig,
}

impl ReferenceSolver {
    /// A solver over `num_vars` variables polling `flag` for cancellation.
    pub fn new(num_vars: usize, flag: InterruptFlag) -> Self {
        Self::with_config(num_vars, flag, ReferenceConfig::default())
    }

    pub fn with_config(num_vars: usize, flag: InterruptFlag, config: ReferenceConfig) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; num_vars],
            upper: vec![f64::INFINITY; num_vars],
            basic: vec![false; num_vars],
            pairs: Vec::new(),
            rows: Vec::new(),
            row_of: HashMap::new(),
            values: None,
            flag,
            config,
        }
    }

    pub fn num_vars(&self) -> usize {
        self.lower.len()
    }

    /// Declared bounds of `var`.
    pub fn bounds(&self, var: VarId) -> Bound {
        Bound {
            lower: self.lower[var],
            upper: self.upper[var],
        }
    }

    /// The recorded rows as `(row key, cells)`.
    pub fn rows(&self) -> impl Iterator<Item = (VarId, &[(VarId, f64)])> + '_ {
        self.row_of
            .iter()
            .map(|(&key, &idx)| (key, self.rows[idx].as_slice()))
    }

    pub fn relu_pairs(&self) -> &[(VarId, VarId)] {
        &self.pairs
    }

    /// Sum of the row under an assignment; rows of a feasible assignment
    /// evaluate to zero.
    pub fn row_residual(&self, row: VarId, values: &[f64]) -> f64 {
        self.rows[self.row_of[&row]]
            .iter()
            .map(|&(var, coeff)| coeff * values[var])
            .sum()
    }

    /// Fixpoint interval tightening. `None` proves infeasibility.
    fn propagate_intervals(&self) -> Option<Vec<Bound>> {
        let mut intervals: Vec<Bound> = (0..self.num_vars()).map(|v| self.bounds(v)).collect();
        if intervals.iter().any(|iv| iv.lower > iv.upper) {
            return None;
        }

        let max_passes = 8 + self.rows.len();
        for _ in 0..max_passes {
            let mut changed = false;

            for cells in &self.rows {
                for &(target, coeff) in cells {
                    if coeff == 0.0 {
                        continue;
                    }
                    // target = -(sum of the other terms) / coeff
                    let mut rest = Bound::concrete(0.0);
                    for &(var, c) in cells {
                        if var != target {
                            rest = rest.add(&intervals[var].scale(c));
                        }
                    }
                    let derived = rest.scale(-1.0 / coeff);
                    match intervals[target].intersect(&derived) {
                        Some(tightened) => {
                            if tightened.width() + 1e-12 < intervals[target].width() {
                                intervals[target] = tightened;
                                changed = true;
                            }
                        }
                        None => return None,
                    }
                }
            }

            for &(b, f) in &self.pairs {
                let derived = intervals[b].relu();
                match intervals[f].intersect(&derived) {
                    Some(tightened) => {
                        if tightened.width() + 1e-12 < intervals[f].width() {
                            intervals[f] = tightened;
                            changed = true;
                        }
                    }
                    None => return None,
                }
            }

            if !changed {
                break;
            }
        }
        Some(intervals)
    }

    /// Variables sampled independently: finite two-sided declared bounds,
    /// not row-determined, not the F side of a pair.
    fn free_vars(&self) -> Vec<VarId> {
        (0..self.num_vars())
            .filter(|&v| {
                self.lower[v].is_finite()
                    && self.upper[v].is_finite()
                    && self.lower[v] < self.upper[v]
                    && !self.basic[v]
                    && !self.pairs.iter().any(|&(_, f)| f == v)
            })
            .collect()
    }

    /// Close a partial assignment over rows and pairs. `None` if some
    /// variable stays undetermined.
    fn complete_assignment(&self, mut values: Vec<Option<f64>>) -> Option<Vec<f64>> {
        loop {
            let mut progressed = false;

            for cells in &self.rows {
                let mut unknown: Option<(VarId, f64)> = None;
                let mut known_sum = 0.0;
                let mut solvable = true;
                for &(var, coeff) in cells {
                    match values[var] {
                        Some(value) => known_sum += coeff * value,
                        None => {
                            if unknown.is_some() {
                                solvable = false;
                                break;
                            }
                            unknown = Some((var, coeff));
                        }
                    }
                }
                if solvable {
                    if let Some((var, coeff)) = unknown {
                        if coeff != 0.0 {
                            values[var] = Some(-known_sum / coeff);
                            progressed = true;
                        }
                    }
                }
            }

            for &(b, f) in &self.pairs {
                if values[f].is_none() {
                    if let Some(bv) = values[b] {
                        values[f] = Some(bv.max(0.0));
                        progressed = true;
                    }
                }
            }

            if !progressed {
                break;
            }
        }

        values.into_iter().collect()
    }

    fn check_feasible(&self, values: &[f64]) -> bool {
        for (v, &value) in values.iter().enumerate() {
            if value < self.lower[v] - FEASIBILITY_TOL || value > self.upper[v] + FEASIBILITY_TOL {
                return false;
            }
        }
        for cells in &self.rows {
            let residual: f64 = cells.iter().map(|&(var, c)| c * values[var]).sum();
            let scale = cells
                .iter()
                .map(|&(var, c)| (c * values[var]).abs())
                .fold(1.0, f64::max);
            if residual.abs() > FEASIBILITY_TOL * scale {
                return false;
            }
        }
        for &(b, f) in &self.pairs {
            if (values[f] - values[b].max(0.0)).abs() > FEASIBILITY_TOL {
                return false;
            }
        }
        true
    }

    fn try_sample(&self, free: &[VarId], draw: impl Fn(VarId) -> f64) -> Option<Vec<f64>> {
        let mut partial: Vec<Option<f64>> = (0..self.num_vars())
            .map(|v| {
                // Point-bounded variables (constant, aux) are pinned.
                if self.lower[v] == self.upper[v] && self.lower[v].is_finite() {
                    Some(self.lower[v])
                } else {
                    None
                }
            })
            .collect();
        for &v in free {
            partial[v] = Some(draw(v));
        }

        let values = self.complete_assignment(partial)?;
        self.check_feasible(&values).then_some(values)
    }
}

impl TableauSolver for ReferenceSolver {
    fn set_lower_bound(&mut self, var: VarId, value: f64) {
        self.lower[var] = value;
    }

    fn set_upper_bound(&mut self, var: VarId, value: f64) {
        self.upper[var] = value;
    }

    fn set_relu_pair(&mut self, b: VarId, f: VarId) {
        self.pairs.push((b, f));
    }

    fn mark_basic(&mut self, var: VarId) {
        self.basic[var] = true;
    }

    fn initialize_cell(&mut self, row: VarId, col: VarId, coefficient: f64) {
        let idx = *self.row_of.entry(row).or_insert_with(|| {
            self.rows.push(Vec::new());
            self.rows.len() - 1
        });
        self.rows[idx].push((col, coefficient));
    }

    fn solve(&mut self) -> Result<SolveStatus> {
        self.values = None;
        if self.flag.is_interrupted() {
            return Ok(SolveStatus::Interrupted);
        }

        let Some(intervals) = self.propagate_intervals() else {
            debug!("interval propagation proved infeasibility");
            return Ok(SolveStatus::Unsat);
        };

        let free = self.free_vars();
        trace!(free = free.len(), "sampling free variables");

        // Exhaustive corner sweep of the free box.
        if free.len() <= self.config.corner_limit {
            for corner in 0u64..(1u64 << free.len()) {
                if self.flag.is_interrupted() {
                    return Ok(SolveStatus::Interrupted);
                }
                let values = self.try_sample(&free, |v| {
                    let pos = free.iter().position(|&w| w == v).expect("free var");
                    if corner >> pos & 1 == 0 {
                        intervals[v].lower.max(self.lower[v])
                    } else {
                        intervals[v].upper.min(self.upper[v])
                    }
                });
                if let Some(values) = values {
                    debug!(corner, "corner sample is a witness");
                    self.values = Some(values);
                    return Ok(SolveStatus::Sat);
                }
            }
        }

        // Seeded uniform draws over the (propagation-tightened) box.
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        for round in 0..self.config.samples {
            if round % 128 == 0 && self.flag.is_interrupted() {
                return Ok(SolveStatus::Interrupted);
            }
            let draws: HashMap<VarId, f64> = free
                .iter()
                .map(|&v| {
                    let lo = intervals[v].lower.max(self.lower[v]);
                    let hi = intervals[v].upper.min(self.upper[v]);
                    let value = if lo < hi {
                        rng.random_range(lo..=hi)
                    } else {
                        lo
                    };
                    (v, value)
                })
                .collect();
            if let Some(values) = self.try_sample(&free, |v| draws[&v]) {
                debug!(round, "random sample is a witness");
                self.values = Some(values);
                return Ok(SolveStatus::Sat);
            }
        }

        Err(Error::Solver(format!(
            "undecided after interval propagation and {} samples; \
             attach a complete decision procedure for this query",
            self.config.samples
        )))
    }

    fn assignment(&self, var: VarId) -> f64 {
        self.values.as_ref().expect("assignment before SAT solve")[var]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::TableauBuilder;
    use crate::vars::VariableMap;
    use relux_nnet::Network;

    /// 2 -> 2 -> 1: h = ReLU([[1,-1],[0.5,0.5]]x + (0, 0.25)), y = h0 + h1 - 1.
    const SMALL_NNET: &str = "\
2,2,1,2
2,2,1
0
0.0,0.0
0.0,0.0
0.0,0.0,0.0
1.0,1.0,1.0
1.0,-1.0
0.5,0.5
0.0
0.25
1.0,1.0
-1.0
";

    fn installed(
        input_bounds: &[Bound],
    ) -> (Network, VariableMap, ReferenceSolver) {
        let network = Network::parse(SMALL_NNET).unwrap();
        let vars = VariableMap::allocate(network.layer_sizes()).unwrap();
        let mut solver = ReferenceSolver::new(vars.total(), InterruptFlag::new());
        TableauBuilder::new(&network, &vars)
            .unwrap()
            .install(&mut solver, input_bounds)
            .unwrap();
        (network, vars, solver)
    }

    #[test]
    fn test_plain_satisfiability_is_sat() {
        let (network, vars, mut solver) =
            installed(&[Bound::new(-1.0, 1.0), Bound::new(-1.0, 1.0)]);

        assert_eq!(solver.solve().unwrap(), SolveStatus::Sat);

        // The witness respects the network semantics exactly.
        let inputs = vec![
            solver.assignment(vars.input(0)),
            solver.assignment(vars.input(1)),
        ];
        let expected = network.evaluate(&inputs).unwrap();
        let got = solver.assignment(vars.output(0));
        assert!((got - expected[0]).abs() < 1e-6, "{got} vs {expected:?}");
    }

    #[test]
    fn test_rows_evaluate_to_zero_at_witness() {
        let (_, vars, mut solver) = installed(&[Bound::new(-2.0, 2.0), Bound::new(-2.0, 2.0)]);
        assert_eq!(solver.solve().unwrap(), SolveStatus::Sat);

        let values: Vec<f64> = (0..solver.num_vars()).map(|v| solver.assignment(v)).collect();
        for aux in vars.aux_ids() {
            let residual = solver.row_residual(aux, &values);
            assert!(residual.abs() < 1e-6, "row {aux} residual {residual}");
        }
    }

    #[test]
    fn test_relu_pairs_hold_at_witness() {
        let (_, _, mut solver) = installed(&[Bound::new(-3.0, 3.0), Bound::new(-3.0, 3.0)]);
        assert_eq!(solver.solve().unwrap(), SolveStatus::Sat);

        for &(b, f) in solver.relu_pairs() {
            let bv = solver.assignment(b);
            let fv = solver.assignment(f);
            assert!((fv - bv.max(0.0)).abs() < 1e-9, "pair ({b}, {f})");
        }
    }

    #[test]
    fn test_interval_propagation_proves_unsat() {
        // Inputs in [0, 1]: h0 in [0, 1], h1 in [0.25, 1.25],
        // y in [-0.75, 1.25]. Requiring y >= 5 is infeasible.
        let (_, vars, mut solver) = installed(&[Bound::new(0.0, 1.0), Bound::new(0.0, 1.0)]);
        solver.set_lower_bound(vars.output(0), 5.0);
        assert_eq!(solver.solve().unwrap(), SolveStatus::Unsat);
    }

    #[test]
    fn test_conflicting_declared_bounds_unsat() {
        let (_, vars, mut solver) = installed(&[Bound::new(0.0, 1.0), Bound::new(0.0, 1.0)]);
        solver.set_lower_bound(vars.input(0), 2.0);
        solver.set_upper_bound(vars.input(0), 1.0);
        assert_eq!(solver.solve().unwrap(), SolveStatus::Unsat);
    }

    #[test]
    fn test_sampling_finds_bounded_output_witness() {
        // y <= 0 is reachable (e.g. x = (0, 0) gives y = -0.75).
        let (network, vars, mut solver) =
            installed(&[Bound::new(-1.0, 1.0), Bound::new(-1.0, 1.0)]);
        solver.set_upper_bound(vars.output(0), 0.0);
        assert_eq!(solver.solve().unwrap(), SolveStatus::Sat);

        let inputs = vec![
            solver.assignment(vars.input(0)),
            solver.assignment(vars.input(1)),
        ];
        let outputs = network.evaluate(&inputs).unwrap();
        assert!(outputs[0] <= FEASIBILITY_TOL);
    }

    #[test]
    fn test_interrupt_before_solve() {
        let flag = InterruptFlag::new();
        let network = Network::parse(SMALL_NNET).unwrap();
        let vars = VariableMap::allocate(network.layer_sizes()).unwrap();
        let mut solver = ReferenceSolver::new(vars.total(), flag.clone());
        TableauBuilder::new(&network, &vars)
            .unwrap()
            .install(
                &mut solver,
                &[Bound::new(-1.0, 1.0), Bound::new(-1.0, 1.0)],
            )
            .unwrap();

        flag.interrupt();
        assert_eq!(solver.solve().unwrap(), SolveStatus::Interrupted);
    }

    #[test]
    fn test_determinism_across_runs() {
        let run = || {
            let (_, vars, mut solver) =
                installed(&[Bound::new(-1.0, 1.0), Bound::new(-1.0, 1.0)]);
            solver.set_upper_bound(vars.output(0), 0.0);
            solver.solve().unwrap();
            (0..solver.num_vars())
                .map(|v| solver.assignment(v))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
