//! One verification run: allocation, installation, property compilation,
//! the sub-query loop, and assignment read-back.

use crate::encode::TableauBuilder;
use crate::property::{compile_property, PropertyKind};
use crate::solver::TableauSolver;
use crate::vars::VariableMap;
use relux_core::{
    Bound, Counterexample, InterruptFlag, Result, SolveStatus, VerificationOutcome,
};
use relux_nnet::Network;
use tracing::{debug, info};

/// Read the witness back through the variable map: input F assignments and
/// output B assignments.
pub fn read_counterexample<S: TableauSolver>(solver: &S, vars: &VariableMap) -> Counterexample {
    Counterexample {
        inputs: (0..vars.input_size())
            .map(|i| solver.assignment(vars.input(i)))
            .collect(),
        outputs: (0..vars.output_size())
            .map(|i| solver.assignment(vars.output(i)))
            .collect(),
    }
}

/// Drives one verification run against a solver factory.
///
/// Every phase works off a single immutable [`VariableMap`]. Each compiled
/// sub-query gets a fresh solver instance sized for the map plus any fresh
/// property variables, sharing the run's [`InterruptFlag`]: SAT of any
/// sub-query yields the counterexample, UNSAT of all of them proves the
/// property, and a raised flag ends the run as inconclusive.
pub struct Runner<'a> {
    network: &'a Network,
    flag: InterruptFlag,
}

impl<'a> Runner<'a> {
    pub fn new(network: &'a Network, flag: InterruptFlag) -> Self {
        Self { network, flag }
    }

    pub fn interrupt_flag(&self) -> &InterruptFlag {
        &self.flag
    }

    /// Allocate, install, compile, and solve.
    ///
    /// `make_solver` receives the variable count and the run's interrupt
    /// flag for each sub-query.
    pub fn verify<S, F>(
        &self,
        property: Option<&PropertyKind>,
        input_bounds: &[Bound],
        mut make_solver: F,
    ) -> Result<VerificationOutcome>
    where
        S: TableauSolver,
        F: FnMut(usize, InterruptFlag) -> S,
    {
        let vars = VariableMap::allocate(self.network.layer_sizes())?;
        info!(
            total_vars = vars.total(),
            layers = vars.num_layers(),
            "variable map allocated"
        );

        let builder = TableauBuilder::new(self.network, &vars)?;
        let compiled = compile_property(property, self.network, &vars, input_bounds)?;
        let num_vars = vars.total() + compiled.extra_vars;

        for query in &compiled.queries {
            if self.flag.is_interrupted() {
                return Ok(interrupted());
            }

            debug!(query = %query.label, "starting sub-query");
            let mut solver = make_solver(num_vars, self.flag.clone());
            builder.install(&mut solver, &compiled.input_bounds)?;
            query.apply(&mut solver);

            match solver.solve()? {
                SolveStatus::Sat => {
                    let counterexample = read_counterexample(&solver, &vars);
                    info!(query = %query.label, "counterexample found");
                    return Ok(VerificationOutcome::Violated { counterexample });
                }
                SolveStatus::Unsat => {
                    debug!(query = %query.label, "sub-query infeasible");
                }
                SolveStatus::Interrupted => return Ok(interrupted()),
            }
        }

        Ok(VerificationOutcome::Holds)
    }
}

fn interrupted() -> VerificationOutcome {
    VerificationOutcome::Inconclusive {
        reason: "solve interrupted by stop signal".to_string(),
    }
}
