//! Tableau installation: equality rows, default bounds, and ReLU pair
//! declarations for one network against one variable map.

use crate::solver::TableauSolver;
use crate::vars::VariableMap;
use relux_core::{Bound, Error, Result};
use relux_nnet::Network;
use tracing::debug;

/// Installs a network's constraint system into a solver.
///
/// For every non-input neuron `(layer, t)` one equality row is emitted,
/// keyed by the neuron's aux variable:
///
/// ```text
/// -aux - b + sum_s weight(layer-1, s, t) * f(layer-1, s) + bias * constant = 0
/// ```
///
/// With the aux variable pinned to `[0, 0]` and marked basic, the solver
/// reads each row as `b = sum_s w * f + bias`. The coefficients are taken
/// verbatim from the network; this is the single place where the
/// floating-point structure of the verification problem is fixed.
#[derive(Debug)]
pub struct TableauBuilder<'a> {
    network: &'a Network,
    vars: &'a VariableMap,
}

impl<'a> TableauBuilder<'a> {
    /// Pair a network with its variable map.
    ///
    /// Fails with [`Error::Configuration`] if the map was allocated for a
    /// different layer shape.
    pub fn new(network: &'a Network, vars: &'a VariableMap) -> Result<Self> {
        if network.layer_sizes() != vars.layer_sizes() {
            return Err(Error::Configuration(format!(
                "variable map shape {:?} does not match network shape {:?}",
                vars.layer_sizes(),
                network.layer_sizes()
            )));
        }
        Ok(Self { network, vars })
    }

    /// Install bounds, ReLU pairs, basic marks, and equality rows.
    ///
    /// `input_bounds` holds one resolved interval per input neuron. Aux
    /// and constant bounds are set before any `mark_basic` call, since
    /// marking requires a determinate zero target.
    pub fn install<S: TableauSolver>(&self, solver: &mut S, input_bounds: &[Bound]) -> Result<()> {
        let vars = self.vars;
        let n = vars.num_layers();

        if input_bounds.len() != vars.input_size() {
            return Err(Error::Configuration(format!(
                "expected {} input bounds, got {}",
                vars.input_size(),
                input_bounds.len()
            )));
        }

        solver.set_lower_bound(vars.constant(), 1.0);
        solver.set_upper_bound(vars.constant(), 1.0);

        for (i, bound) in input_bounds.iter().enumerate() {
            solver.set_lower_bound(vars.input(i), bound.lower);
            solver.set_upper_bound(vars.input(i), bound.upper);
        }

        // ReLU pairs for hidden neurons, with the non-negativity bound on
        // each post-activation variable.
        for layer in 1..n - 1 {
            for pos in 0..vars.layer_size(layer) {
                let b = vars.b(layer, pos);
                let f = vars.f(layer, pos);
                solver.set_relu_pair(b, f);
                solver.set_lower_bound(f, 0.0);
            }
        }

        // Aux variables: pinned to zero, then row-determined.
        for aux in vars.aux_ids() {
            solver.set_lower_bound(aux, 0.0);
            solver.set_upper_bound(aux, 0.0);
        }
        for aux in vars.aux_ids() {
            solver.mark_basic(aux);
        }

        self.populate(solver);
        Ok(())
    }

    /// Emit the equality rows. One row per non-input neuron; each row has
    /// `previous layer size + 3` cells.
    fn populate<S: TableauSolver>(&self, solver: &mut S) {
        let vars = self.vars;
        let mut rows = 0usize;

        for layer in 1..vars.num_layers() {
            let source_size = vars.layer_size(layer - 1);
            for target in 0..vars.layer_size(layer) {
                let aux = vars.aux(layer, target);
                solver.initialize_cell(aux, aux, -1.0);
                solver.initialize_cell(aux, vars.b(layer, target), -1.0);

                for source in 0..source_size {
                    solver.initialize_cell(
                        aux,
                        vars.f(layer - 1, source),
                        self.network.weight(layer - 1, source, target),
                    );
                }

                solver.initialize_cell(aux, vars.constant(), self.network.bias(layer, target));
                rows += 1;
            }
        }

        debug!(rows, total_vars = vars.total(), "tableau populated");
    }
}
