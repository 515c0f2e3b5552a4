// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Standalone ADCS web enrollment simulator.
//!
//! ```text
//! adcs-sim --listen 127.0.0.1:8080 --root-out root.pem
//! ```
//!
//! Serves plain HTTP; see `usg_adcs_client::simulator` for the CSR name
//! orders it understands.

use clap::Parser;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use usg_adcs_client::simulator::AdcsSimulator;

/// ADCS web enrollment simulator
#[derive(Parser)]
#[command(name = "adcs-sim")]
#[command(author = "U.S. Federal Government")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Simulated ADCS certsrv for testing", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Write the simulator root CA certificate (PEM) here
    #[arg(long, value_name = "PATH")]
    root_out: Option<PathBuf>,

    /// Require HTTP Basic credentials (USER:PASSWORD)
    #[arg(long, value_name = "USER:PASSWORD")]
    basic_auth: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(cli.listen)?;
    let sim = AdcsSimulator::start_on(listener).await?;

    if let Some(credentials) = &cli.basic_auth {
        let (user, password) = credentials
            .split_once(':')
            .ok_or("--basic-auth must be given as USER:PASSWORD")?;
        sim.require_basic_auth(user, password);
    }
    if let Some(path) = &cli.root_out {
        std::fs::write(path, sim.root_pem())?;
    }

    println!("{}", sim.url());
    tokio::signal::ctrl_c().await?;
    tracing::info!(requests = sim.request_count(), "simulator stopped");
    Ok(())
}
