//! Variable allocation: the fixed mapping from neuron identities to dense
//! solver variable ids.
//!
//! Every non-input neuron owns a pre-activation (B) variable and an
//! auxiliary equation variable; hidden neurons additionally own a
//! post-activation (F) variable, as do input neurons (inputs are carried
//! as F-typed variables for encoding uniformity). A single constant
//! variable, pinned to 1, injects bias terms.

use relux_core::{Error, Result};

/// A dense solver variable id in `[0, total)`.
pub type VarId = usize;

/// Immutable mapping from `(layer, position)` neuron slots to variable ids.
///
/// Ids are assigned by a single counter in a fixed insertion order, so the
/// mapping is deterministic for a given layer shape: for each layer `i`
/// from 1 upward, first the F slots of layer `i - 1`, then the B slots of
/// layer `i`, then the aux slots of layer `i`; the constant id comes last.
/// F slots therefore exist for every layer except the output, and B/aux
/// slots for every layer except the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableMap {
    layer_sizes: Vec<usize>,
    f_vars: Vec<Vec<VarId>>,
    b_vars: Vec<Vec<VarId>>,
    aux_vars: Vec<Vec<VarId>>,
    constant: VarId,
    total: usize,
}

impl VariableMap {
    /// Allocate ids for a network with the given per-layer sizes.
    ///
    /// Fails with [`Error::Configuration`] if fewer than two layers are
    /// given or any layer is empty.
    pub fn allocate(layer_sizes: &[usize]) -> Result<Self> {
        if layer_sizes.len() < 2 {
            return Err(Error::Configuration(format!(
                "network needs at least input and output layers, got {}",
                layer_sizes.len()
            )));
        }
        if let Some(idx) = layer_sizes.iter().position(|&s| s == 0) {
            return Err(Error::Configuration(format!("layer {idx} has size 0")));
        }

        let n = layer_sizes.len();
        let mut f_vars = vec![Vec::new(); n];
        let mut b_vars = vec![Vec::new(); n];
        let mut aux_vars = vec![Vec::new(); n];
        let mut next: VarId = 0;

        for i in 1..n {
            // Layer i - 1 becomes the source side exactly once, so its F
            // slots are fresh here.
            for _ in 0..layer_sizes[i - 1] {
                f_vars[i - 1].push(next);
                next += 1;
            }
            for _ in 0..layer_sizes[i] {
                b_vars[i].push(next);
                next += 1;
            }
            for _ in 0..layer_sizes[i] {
                aux_vars[i].push(next);
                next += 1;
            }
        }

        let constant = next;
        next += 1;

        let hidden: usize = layer_sizes[1..n - 1].iter().sum();
        debug_assert_eq!(
            next,
            layer_sizes[0] + 3 * hidden + 2 * layer_sizes[n - 1] + 1
        );

        Ok(Self {
            layer_sizes: layer_sizes.to_vec(),
            f_vars,
            b_vars,
            aux_vars,
            constant,
            total: next,
        })
    }

    /// Post-activation variable of neuron `pos` in `layer`.
    ///
    /// Panics for the output layer, whose neurons carry no F slot.
    pub fn f(&self, layer: usize, pos: usize) -> VarId {
        self.f_vars[layer][pos]
    }

    /// Pre-activation variable of neuron `pos` in `layer`.
    ///
    /// Panics for the input layer, whose neurons carry no B slot.
    pub fn b(&self, layer: usize, pos: usize) -> VarId {
        self.b_vars[layer][pos]
    }

    /// Auxiliary equation variable of neuron `pos` in `layer`.
    pub fn aux(&self, layer: usize, pos: usize) -> VarId {
        self.aux_vars[layer][pos]
    }

    /// The constant-one variable.
    pub fn constant(&self) -> VarId {
        self.constant
    }

    /// Input variable `i` (the F slot of layer 0).
    pub fn input(&self, i: usize) -> VarId {
        self.f(0, i)
    }

    /// Output variable `i` (the B slot of the last layer).
    pub fn output(&self, i: usize) -> VarId {
        self.b(self.layer_sizes.len() - 1, i)
    }

    /// Total number of allocated ids.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn num_layers(&self) -> usize {
        self.layer_sizes.len()
    }

    pub fn layer_size(&self, i: usize) -> usize {
        self.layer_sizes[i]
    }

    pub fn layer_sizes(&self) -> &[usize] {
        &self.layer_sizes
    }

    pub fn input_size(&self) -> usize {
        self.layer_sizes[0]
    }

    pub fn output_size(&self) -> usize {
        *self.layer_sizes.last().expect("validated in allocate")
    }

    /// Iterate the aux ids of every non-input neuron.
    pub fn aux_ids(&self) -> impl Iterator<Item = VarId> + '_ {
        self.aux_vars.iter().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_order_small_network() {
        // Sizes [2, 2, 1]: F of layer 0, B of layer 1, aux of layer 1,
        // F of layer 1, B of layer 2, aux of layer 2, constant.
        let vars = VariableMap::allocate(&[2, 2, 1]).unwrap();

        assert_eq!(vars.f(0, 0), 0);
        assert_eq!(vars.f(0, 1), 1);
        assert_eq!(vars.b(1, 0), 2);
        assert_eq!(vars.b(1, 1), 3);
        assert_eq!(vars.aux(1, 0), 4);
        assert_eq!(vars.aux(1, 1), 5);
        assert_eq!(vars.f(1, 0), 6);
        assert_eq!(vars.f(1, 1), 7);
        assert_eq!(vars.b(2, 0), 8);
        assert_eq!(vars.aux(2, 0), 9);
        assert_eq!(vars.constant(), 10);
        assert_eq!(vars.total(), 11);
    }

    #[test]
    fn test_total_invariant() {
        // total = inputs + 3 * hidden + 2 * outputs + 1
        for sizes in [
            vec![1, 1],
            vec![2, 3, 2],
            vec![5, 50, 50, 5],
            vec![3, 7, 11, 2, 4],
        ] {
            let vars = VariableMap::allocate(&sizes).unwrap();
            let hidden: usize = sizes[1..sizes.len() - 1].iter().sum();
            let expected = sizes[0] + 3 * hidden + 2 * sizes[sizes.len() - 1] + 1;
            assert_eq!(vars.total(), expected, "sizes {sizes:?}");
        }
    }

    #[test]
    fn test_ids_dense_and_unique() {
        let vars = VariableMap::allocate(&[3, 4, 2]).unwrap();
        let mut seen = vec![false; vars.total()];

        let mut mark = |id: VarId| {
            assert!(!seen[id], "id {id} assigned twice");
            seen[id] = true;
        };

        for i in 0..vars.input_size() {
            mark(vars.input(i));
        }
        for layer in 1..vars.num_layers() {
            for pos in 0..vars.layer_size(layer) {
                mark(vars.b(layer, pos));
                mark(vars.aux(layer, pos));
                if layer < vars.num_layers() - 1 {
                    mark(vars.f(layer, pos));
                }
            }
        }
        mark(vars.constant());

        assert!(seen.iter().all(|&s| s), "gap in id space");
    }

    #[test]
    fn test_allocation_deterministic() {
        let a = VariableMap::allocate(&[4, 8, 8, 3]).unwrap();
        let b = VariableMap::allocate(&[4, 8, 8, 3]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_hidden_layers() {
        // A single affine layer still allocates: inputs, outputs, aux, constant.
        let vars = VariableMap::allocate(&[2, 3]).unwrap();
        assert_eq!(vars.total(), 2 + 2 * 3 + 1);
        assert_eq!(vars.output(0), vars.b(1, 0));
    }

    #[test]
    fn test_rejects_degenerate_shapes() {
        assert!(matches!(
            VariableMap::allocate(&[5]),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            VariableMap::allocate(&[]),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            VariableMap::allocate(&[2, 0, 1]),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    #[should_panic]
    fn test_output_layer_has_no_f_slot() {
        let vars = VariableMap::allocate(&[2, 2, 1]).unwrap();
        let _ = vars.f(2, 0);
    }
}
