//! relux CLI
//!
//! Verifies properties of feed-forward ReLU networks by encoding them as
//! simplex tableaus and searching for counterexamples to the negated
//! property.
//!
//! # Examples
//!
//! - `relux model.nnet`
//! - `relux model.nnet results.json`
//! - `relux model.nnet --bounds "all:[-1,1]" --property classification --params 0`
//! - `relux model.nnet --bounds "0:[-0.5,0.5]" --property output_bounds --params "0:>0.5"`
//! - `relux model.nnet --property robustness --params "0.1@0.0,0.25"`
//!
//! Exit codes: 1 when the property is violated (SAT), 0 when it holds
//! (UNSAT), -1 on internal errors or an interrupted run.

use clap::Parser;
use relux_core::{Error, InterruptFlag, VerificationOutcome};
use relux_nnet::Network;
use relux_tableau::{
    default_input_bounds, install_interrupt_handler, parse_input_bounds, PropertyKind,
    ReferenceConfig, ReferenceSolver, Runner,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "relux")]
#[command(about = "Verify properties of feed-forward ReLU networks")]
#[command(version)]
struct Cli {
    /// Path to the .nnet network file
    network: PathBuf,

    /// Optional JSON file for the verification record
    output: Option<PathBuf>,

    /// Input bounds, e.g. "all:[-1,1]" or "0:[-0.5,0.5],2:[0,1]"
    #[arg(short, long)]
    bounds: Option<String>,

    /// Property kind: output_bounds, classification, or robustness
    #[arg(short, long)]
    property: Option<String>,

    /// Property parameters, e.g. "0:>0.5", "2", or "0.1@0.0,0.25"
    #[arg(long)]
    params: Option<String>,

    /// Seed for the bundled sampling backend
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Random sample budget for the bundled sampling backend
    #[arg(long, default_value_t = 4096)]
    samples: usize,
}

/// Record written to the optional output file.
#[derive(Serialize)]
struct RunRecord<'a> {
    network: String,
    property: Option<&'a PropertyKind>,
    outcome: &'a VerificationOutcome,
    elapsed_seconds: f64,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    std::process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    let network = match Network::from_file(&cli.network) {
        Ok(network) => network,
        Err(e) => {
            eprintln!("error: {e}");
            return -1;
        }
    };

    println!("Network loaded: {}", cli.network.display());
    println!("  Input layer size: {}", network.input_size());
    println!("  Output layer size: {}", network.output_size());
    println!("  Number of layers: {}", network.num_layers());

    // Malformed bound strings leave the defaults in effect.
    let input_bounds = match &cli.bounds {
        Some(spec) => match parse_input_bounds(spec, network.input_size()) {
            Ok(bounds) => bounds,
            Err(e) => {
                warn!("{e}; keeping default input bounds");
                default_input_bounds(network.input_size())
            }
        },
        None => default_input_bounds(network.input_size()),
    };

    // Unknown or malformed properties degrade to a plain satisfiability
    // check.
    let property = match &cli.property {
        Some(kind) => match PropertyKind::parse(kind, cli.params.as_deref()) {
            Ok(property) => Some(property),
            Err(e @ (Error::UnsupportedProperty(_) | Error::Parse(_))) => {
                warn!("{e}; checking general satisfiability instead");
                None
            }
            Err(e) => {
                eprintln!("error: {e}");
                return -1;
            }
        },
        None => None,
    };

    let flag = InterruptFlag::new();
    if let Err(e) = install_interrupt_handler(&flag) {
        eprintln!("error: {e}");
        return -1;
    }

    let config = ReferenceConfig {
        samples: cli.samples,
        seed: cli.seed,
        ..ReferenceConfig::default()
    };
    let runner = Runner::new(&network, flag);

    let start = Instant::now();
    let outcome = runner.verify(property.as_ref(), &input_bounds, |num_vars, flag| {
        ReferenceSolver::with_config(num_vars, flag, config.clone())
    });
    let elapsed = start.elapsed().as_secs_f64();

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("error: {e}");
            return -1;
        }
    };

    println!("\nVerification completed in {elapsed:.3} seconds");
    let code = report(&outcome);

    if let Some(path) = &cli.output {
        let record = RunRecord {
            network: cli.network.display().to_string(),
            property: property.as_ref(),
            outcome: &outcome,
            elapsed_seconds: elapsed,
        };
        match serde_json::to_string_pretty(&record) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    eprintln!("error: writing {}: {e}", path.display());
                    return -1;
                }
                info!(path = %path.display(), "result record written");
            }
            Err(e) => {
                eprintln!("error: serializing result: {e}");
                return -1;
            }
        }
    }

    code
}

fn report(outcome: &VerificationOutcome) -> i32 {
    match outcome {
        VerificationOutcome::Violated { counterexample } => {
            println!("Result: SAT (property violated)");
            println!("\nCounterexample found:");
            println!("Input values:");
            for (i, value) in counterexample.inputs.iter().enumerate() {
                println!("  Input[{i}] = {value:.6}");
            }
            println!("\nOutput values:");
            for (i, value) in counterexample.outputs.iter().enumerate() {
                println!("  Output[{i}] = {value:.6}");
            }
            1
        }
        VerificationOutcome::Holds => {
            println!("Result: UNSAT (property holds)");
            0
        }
        VerificationOutcome::Inconclusive { reason } => {
            println!("Result: inconclusive ({reason})");
            -1
        }
    }
}
