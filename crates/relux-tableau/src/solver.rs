//! The seam to the external decision procedure.

use crate::vars::VarId;
use relux_core::{Result, SolveStatus};

/// Interface of a bound-propagating, case-splitting linear solver.
///
/// The encoder drives an implementation through this trait: interval
/// bounds per variable (last writer wins), ReLU pair declarations, basic
/// marks for row-determined variables, and sparse tableau cells. All
/// declarations must happen before [`solve`](TableauSolver::solve).
///
/// Cancellation is cooperative: implementations receive an
/// [`InterruptFlag`](relux_core::InterruptFlag) at construction, poll it at
/// suspension points (after a pivot or a case split), and return
/// [`SolveStatus::Interrupted`] once it is raised. The handler side never
/// touches solver state.
pub trait TableauSolver {
    /// Constrain `var` from below; the tighter of repeated calls wins last.
    fn set_lower_bound(&mut self, var: VarId, value: f64);

    /// Constrain `var` from above.
    fn set_upper_bound(&mut self, var: VarId, value: f64);

    /// Declare that `f = max(0, b)` links the two variables.
    fn set_relu_pair(&mut self, b: VarId, f: VarId);

    /// Declare `var` as row-determined rather than a free decision
    /// variable. Its bounds must already be set.
    fn mark_basic(&mut self, var: VarId);

    /// Write one sparse tableau entry into the row owned by `row`.
    fn initialize_cell(&mut self, row: VarId, col: VarId, coefficient: f64);

    /// Run the decision procedure to a terminal status.
    fn solve(&mut self) -> Result<SolveStatus>;

    /// Value of `var` in the satisfying assignment. Only meaningful after
    /// [`solve`](TableauSolver::solve) returned [`SolveStatus::Sat`].
    fn assignment(&self, var: VarId) -> f64;
}
