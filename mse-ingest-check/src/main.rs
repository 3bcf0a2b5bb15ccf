// mse-ingest-check
// Copyright (c) 2019-2026 The Project MSE Ingest Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Replays a JSON-described sequence of operations against a single
//! `SourceBufferStream`, asserting the universal invariants (§8) after
//! every step, and reports a pass/fail summary.

mod scenario;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use scenario::{run_scenario, ScenarioFile};

#[derive(Parser)]
#[command(name = "mse-ingest-check", version, about = "Replay an MSE ingest scenario file and check invariants")]
struct Cli {
    /// Path to a scenario JSON file (see `scenario.rs` for the schema).
    scenario: PathBuf,

    /// Only print the final pass/fail line.
    #[arg(long, short = 'q')]
    quiet: bool,
}

fn main() -> ExitCode {
    pretty_env_logger::init();

    let cli = Cli::parse();

    let text = match fs::read_to_string(&cli.scenario) {
        Ok(text) => text,
        Err(err) => {
            error!("failed to read {}: {err}", cli.scenario.display());
            return ExitCode::FAILURE;
        }
    };

    let file: ScenarioFile = match serde_json::from_str(&text) {
        Ok(file) => file,
        Err(err) => {
            error!("failed to parse {}: {err}", cli.scenario.display());
            return ExitCode::FAILURE;
        }
    };

    if !cli.quiet {
        info!("running scenario: {}", cli.scenario.display());
    }

    let report = run_scenario(&file, cli.quiet);

    println!();
    println!("Test Results");
    println!("=================================================");
    println!();
    println!("  Operations run:       {:>6}", report.ops_run);
    println!("  Invariant violations: {:>6}", report.violations.len());
    for violation in &report.violations {
        println!("    - {violation}");
    }
    println!();

    if report.violations.is_empty() {
        println!("PASS");
        ExitCode::SUCCESS
    }
    else {
        println!("FAIL");
        ExitCode::FAILURE
    }
}
