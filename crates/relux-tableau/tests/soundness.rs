//! Property-based soundness checks: for arbitrary small networks, the
//! allocator keeps its counting invariant, installed rows evaluate to zero
//! at every witness, and ReLU pairs hold in every SAT assignment.

use proptest::prelude::*;
use relux_core::{Bound, InterruptFlag, SolveStatus};
use relux_nnet::Network;
use relux_tableau::{ReferenceSolver, TableauBuilder, TableauSolver, VariableMap};

/// Render a network as `.nnet` text. Values are consumed from `params` in
/// file order: per layer, the row-major weight rows, then the biases.
fn render_nnet(sizes: &[usize], params: &[f64]) -> String {
    let input = sizes[0];
    let output = sizes[sizes.len() - 1];
    let max = *sizes.iter().max().unwrap();

    let mut text = format!("{},{input},{output},{max}\n", sizes.len() - 1);
    text.push_str(
        &sizes
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(","),
    );
    text.push_str("\n0\n");
    for _ in 0..2 {
        text.push_str(&vec!["0.0"; input].join(","));
        text.push('\n');
    }
    text.push_str(&vec!["0.0"; input + 1].join(","));
    text.push('\n');
    text.push_str(&vec!["1.0"; input + 1].join(","));
    text.push('\n');

    let mut next = params.iter();
    let mut take = |n: usize| -> Vec<String> {
        (0..n).map(|_| next.next().unwrap().to_string()).collect()
    };
    for layer in 0..sizes.len() - 1 {
        for _ in 0..sizes[layer + 1] {
            text.push_str(&take(sizes[layer]).join(","));
            text.push('\n');
        }
        for bias in take(sizes[layer + 1]) {
            text.push_str(&bias);
            text.push('\n');
        }
    }
    text
}

fn param_count(sizes: &[usize]) -> usize {
    sizes.windows(2).map(|w| w[0] * w[1] + w[1]).sum()
}

fn arb_network() -> impl Strategy<Value = (Vec<usize>, Vec<f64>)> {
    prop::collection::vec(1usize..=3, 2..=4).prop_flat_map(|sizes| {
        let count = param_count(&sizes);
        (
            Just(sizes),
            prop::collection::vec(-2.0f64..2.0, count..=count),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn allocator_invariant_and_determinism((sizes, _params) in arb_network()) {
        let vars = VariableMap::allocate(&sizes).unwrap();
        let hidden: usize = sizes[1..sizes.len() - 1].iter().sum();
        prop_assert_eq!(
            vars.total(),
            sizes[0] + 3 * hidden + 2 * sizes[sizes.len() - 1] + 1
        );
        prop_assert_eq!(&vars, &VariableMap::allocate(&sizes).unwrap());
    }

    #[test]
    fn witness_satisfies_network_semantics((sizes, params) in arb_network()) {
        let network = Network::parse(&render_nnet(&sizes, &params)).unwrap();
        let vars = VariableMap::allocate(network.layer_sizes()).unwrap();

        let mut solver = ReferenceSolver::new(vars.total(), InterruptFlag::new());
        let input_bounds = vec![Bound::new(-1.0, 1.0); network.input_size()];
        TableauBuilder::new(&network, &vars)
            .unwrap()
            .install(&mut solver, &input_bounds)
            .unwrap();

        // No property directives: the tableau itself must be satisfiable.
        prop_assert_eq!(solver.solve().unwrap(), SolveStatus::Sat);
        let values: Vec<f64> = (0..solver.num_vars())
            .map(|v| solver.assignment(v))
            .collect();

        // Every equality row closes.
        for aux in vars.aux_ids() {
            let residual = solver.row_residual(aux, &values);
            prop_assert!(residual.abs() < 1e-6, "row {} residual {}", aux, residual);
        }

        // Every ReLU pair holds.
        for &(b, f) in solver.relu_pairs() {
            prop_assert!((values[f] - values[b].max(0.0)).abs() < 1e-7);
        }

        // The witness agrees with exact forward evaluation.
        let inputs: Vec<f64> = (0..vars.input_size()).map(|i| values[vars.input(i)]).collect();
        let expected = network.evaluate(&inputs).unwrap();
        for (i, want) in expected.iter().enumerate() {
            let got = values[vars.output(i)];
            prop_assert!((got - want).abs() < 1e-6, "output {}: {} vs {}", i, got, want);
        }
    }
}
