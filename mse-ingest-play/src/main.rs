// mse-ingest-play
// Copyright (c) 2019-2026 The Project MSE Ingest Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Runs one of the named end-to-end scenarios (S1-S6) against a
//! `SourceBufferStream`/`FrameProcessor` pair, logging every operation's
//! buffered ranges and read sequence as it goes.

mod scenarios;

use clap::{Parser, ValueEnum};
use log::info;

use scenarios::Scenario;

#[derive(Copy, Clone, ValueEnum)]
enum ScenarioArg {
    S1,
    S2,
    S5,
    S6,
}

#[derive(Parser)]
#[command(name = "mse-ingest-play", version, about = "Run a named MSE ingest scenario and log its behavior")]
struct Cli {
    /// Which named scenario to run.
    scenario: ScenarioArg,
}

fn main() {
    pretty_env_logger::init();

    let cli = Cli::parse();

    let scenario = match cli.scenario {
        ScenarioArg::S1 => Scenario::s1_complete_overlap(),
        ScenarioArg::S2 => Scenario::s2_track_buffer_exhaustion(),
        ScenarioArg::S5 => Scenario::s5_pending_seek(),
        ScenarioArg::S6 => Scenario::s6_sequence_mode_offset(),
    };

    info!("running scenario: {}", scenario.name);
    scenario.run();
}
