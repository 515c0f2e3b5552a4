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

//! ADCS Enrollment Command-Line Tool
//!
//! Drives certificate requests against an ADCS certsrv web enrollment
//! server and keeps the request state in a JSON file between runs.
//!
//! # Usage
//!
//! ```text
//! adcs-enroll [OPTIONS] <COMMAND>
//!
//! Commands:
//!   request   Submit a CSR, or advance a previously submitted request
//!   ca-cert   Fetch the CA certificate
//!   ca-chain  Fetch the CA certificate chain
//!   check     Verify certsrv connectivity and credentials
//!
//! Options:
//!   -s, --server <URL>          Certsrv base URL
//!   -u, --username <USER>       Username (DOMAIN\user or user@domain)
//!   -p, --password <PASSWORD>   Password [env: ADCS_PASSWORD]
//!       --ca-bundle <PATH>      PEM bundle to trust instead of system roots
//!       --registry <PATH>       Issuer registry file
//!       --issuer <KIND/NAME>    Issuer to resolve from the registry
//!       --namespace <NS>        Namespace of the requester [default: default]
//!   -v, --verbose               Enable verbose output
//!   -q, --quiet                 Suppress non-error output
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Submit a request and wait until it is issued, denied or failed
//! adcs-enroll -s https://adcs.example.com/certsrv -u 'CORP\svc' \
//!     request --csr host.csr --state host.json --out host.pem --wait
//!
//! # Advance the same request later (e.g. from cron)
//! adcs-enroll -s https://adcs.example.com/certsrv -u 'CORP\svc' \
//!     request --csr host.csr --state host.json --out host.pem
//!
//! # Use an issuer from a registry
//! adcs-enroll --registry issuers.toml --issuer ClusterAdcsIssuer/corp ca-chain
//! ```

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use usg_adcs_client::config::parse_interval;
use usg_adcs_client::issuer::DEFAULT_TEMPLATE;
use usg_adcs_client::{
    AdcsClient, AdcsClientConfig, CaChain, CertificateAuthority, EnrollmentRequest, Intervals,
    Issuer, IssuerRef, IssuerRegistry, RequestState, RequestStatus, Schedule,
};

/// ADCS Enrollment Command-Line Tool
#[derive(Parser)]
#[command(name = "adcs-enroll")]
#[command(author = "U.S. Federal Government")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Certificate enrollment against ADCS web enrollment (certsrv)", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Certsrv base URL
    #[arg(short, long, global = true, value_name = "URL")]
    server: Option<String>,

    /// Username (DOMAIN\user or user@domain)
    #[arg(short, long, global = true, value_name = "USER")]
    username: Option<String>,

    /// Password
    #[arg(short, long, global = true, env = "ADCS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// PEM bundle to trust instead of the system roots
    #[arg(long, global = true, value_name = "PATH")]
    ca_bundle: Option<PathBuf>,

    /// Issuer registry file
    #[arg(long, global = true, value_name = "PATH", requires = "issuer")]
    registry: Option<PathBuf>,

    /// Issuer to resolve from the registry
    #[arg(long, global = true, value_name = "KIND/NAME")]
    issuer: Option<String>,

    /// Namespace of the requester
    #[arg(long, global = true, default_value = "default")]
    namespace: String,

    /// Delay between checks of a pending request (e.g. 6h, 90s)
    #[arg(long, global = true, value_name = "DURATION")]
    status_check_interval: Option<String>,

    /// Delay before retrying after a local error (e.g. 1h)
    #[arg(long, global = true, value_name = "DURATION")]
    retry_interval: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value = "30")]
    timeout: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a CSR, or advance a previously submitted request
    Request {
        /// CSR file (PEM or DER)
        #[arg(long, value_name = "PATH")]
        csr: PathBuf,

        /// Certificate template (overrides the issuer's)
        #[arg(short, long, value_name = "NAME")]
        template: Option<String>,

        /// Request state file
        #[arg(long, value_name = "PATH")]
        state: PathBuf,

        /// Where to write the issued certificate (default: stdout)
        #[arg(short, long, value_name = "PATH")]
        out: Option<PathBuf>,

        /// Where to write the CA chain (PEM)
        #[arg(long, value_name = "PATH")]
        chain_out: Option<PathBuf>,

        /// Keep going until the request reaches a terminal state
        #[arg(short, long)]
        wait: bool,
    },

    /// Fetch the CA certificate
    CaCert {
        /// Output file (default: stdout)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Fetch the CA certificate chain
    CaChain {
        /// Output file (default: stdout)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "pem")]
        format: ChainFormat,
    },

    /// Verify certsrv connectivity and credentials
    Check,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum ChainFormat {
    /// One PEM block per certificate
    #[default]
    Pem,
    /// The PKCS#7 body as returned by certsrv
    P7b,
}

/// Contents of the request state file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    /// SHA-256 of the CSR the state belongs to.
    csr_sha256: String,
    /// Lifecycle state of the request.
    status: RequestStatus,
}

/// An issuer ready to be talked to.
struct Target {
    config: AdcsClientConfig,
    intervals: Intervals,
    template: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Create runtime for async operations
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_command(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_command(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match &cli.command {
        Commands::Request {
            csr,
            template,
            state,
            out,
            chain_out,
            wait,
        } => {
            cmd_request(
                &cli,
                csr,
                template.clone(),
                state,
                out.as_deref(),
                chain_out.as_deref(),
                *wait,
            )
            .await
        }
        Commands::CaCert { output } => cmd_ca_cert(&cli, output.as_deref()).await,
        Commands::CaChain { output, format } => {
            cmd_ca_chain(&cli, output.as_deref(), *format).await
        }
        Commands::Check => cmd_check(&cli).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_request(
    cli: &Cli,
    csr_path: &Path,
    template: Option<String>,
    state_path: &Path,
    out: Option<&Path>,
    chain_out: Option<&Path>,
    wait: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let csr = std::fs::read(csr_path)?;
    let csr_sha256 = hex::encode(Sha256::digest(&csr));

    let mut state = load_state(state_path)?;
    if state.csr_sha256 != csr_sha256 {
        if state.status.state != RequestState::Unset {
            tracing::info!(
                previous = %state.status.enrollment_id,
                "CSR changed, discarding previous request state"
            );
        }
        state = StateFile {
            csr_sha256,
            status: RequestStatus::default(),
        };
    }

    let target = resolve_target(cli)?;
    let template = template.unwrap_or(target.template);
    let request = EnrollmentRequest::new(csr, template);
    let client = AdcsClient::new(target.config).await?;
    let issuer = Issuer::new(Arc::new(client), target.intervals);

    loop {
        let transition = issuer.advance(&request, &state.status).await?;
        state.status = transition.status;
        save_state(state_path, &state)?;

        if let Some(e) = &transition.error {
            eprintln!("Request could not be advanced: {}", e);
            if !e.is_retryable() {
                return Ok(ExitCode::FAILURE);
            }
        }

        match state.status.state {
            RequestState::Ready => {
                if let Some(certificate) = &transition.certificate {
                    write_output(out, certificate)?;
                }
                if let (Some(path), Some(chain)) = (chain_out, &transition.ca_chain) {
                    std::fs::write(path, CaChain::parse(chain)?.to_pem()?)?;
                }
                if !cli.quiet {
                    eprintln!("Certificate issued (request id '{}')", state.status.enrollment_id);
                }
                return Ok(ExitCode::SUCCESS);
            }
            RequestState::Rejected | RequestState::Errored => {
                eprintln!(
                    "Request {} (request id '{}'): {}",
                    state.status.state, state.status.enrollment_id, state.status.reason
                );
                return Ok(ExitCode::FAILURE);
            }
            RequestState::Pending | RequestState::Unset => {}
        }

        let delay = match transition.schedule {
            Schedule::Done => return Ok(ExitCode::SUCCESS),
            Schedule::RetryNow => Duration::ZERO,
            Schedule::RetryAfter(delay) => delay,
        };

        if !wait {
            if !cli.quiet {
                eprintln!(
                    "Request {} (request id '{}'), check again in {:?}",
                    state.status.state, state.status.enrollment_id, delay
                );
            }
            return Ok(if transition.error.is_some() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            });
        }

        tracing::info!(state = %state.status.state, delay = ?delay, "waiting");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupted, state saved to {}", state_path.display());
                return Ok(ExitCode::FAILURE);
            }
        }
    }
}

async fn cmd_ca_cert(
    cli: &Cli,
    output: Option<&Path>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let client = AdcsClient::new(resolve_target(cli)?.config).await?;
    let ca = client.get_ca_certificate().await?;
    write_output(output, &ca)?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_ca_chain(
    cli: &Cli,
    output: Option<&Path>,
    format: ChainFormat,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let client = AdcsClient::new(resolve_target(cli)?.config).await?;
    let body = client.get_ca_certificate_chain().await?;
    match format {
        ChainFormat::P7b => write_output(output, &body)?,
        ChainFormat::Pem => {
            let chain = CaChain::parse(&body)?;
            tracing::debug!(certificates = chain.len(), "CA chain parsed");
            write_output(output, chain.to_pem()?.as_bytes())?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_check(cli: &Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut target = resolve_target(cli)?;
    target.config.verify_credentials = true;
    let url = target.config.server_url.clone();

    let client = AdcsClient::new(target.config).await?;
    println!("Credentials: OK");
    println!("  Server: {}", url);

    let ca = client.get_ca_certificate().await?;
    println!("CA certificate: OK ({} bytes)", ca.len());
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helpers
// ============================================================================

fn resolve_target(cli: &Cli) -> Result<Target, Box<dyn std::error::Error>> {
    let mut target = match (&cli.registry, &cli.issuer) {
        (Some(registry), Some(issuer)) => {
            let (kind, name) = issuer
                .split_once('/')
                .ok_or("--issuer must be given as KIND/NAME")?;
            let registry = IssuerRegistry::load(registry)?;
            let resolved = registry.resolve(&IssuerRef::new(kind, name)?, &cli.namespace)?;
            Target {
                config: resolved.client_config,
                intervals: resolved.intervals,
                template: resolved.template,
            }
        }
        _ => {
            let server = cli
                .server
                .as_deref()
                .ok_or("either --server or --registry/--issuer is required")?;
            let mut builder = AdcsClientConfig::builder().server_url(server)?;
            if let Some(username) = &cli.username {
                builder = builder.http_auth(username, cli.password.clone().unwrap_or_default());
            }
            if let Some(path) = &cli.ca_bundle {
                builder = builder.trust_explicit(vec![std::fs::read(path)?]);
            }
            Target {
                config: builder.build()?,
                intervals: Intervals::default(),
                template: DEFAULT_TEMPLATE.to_string(),
            }
        }
    };

    target.config.timeout = Duration::from_secs(cli.timeout);
    if let Some(value) = &cli.status_check_interval {
        target.intervals.status_check = parse_interval(value)?;
    }
    if let Some(value) = &cli.retry_interval {
        target.intervals.retry = parse_interval(value)?;
    }
    tracing::debug!(
        url = %target.config.server_url,
        status_check = ?target.intervals.status_check,
        retry = ?target.intervals.retry,
        "target resolved"
    );
    Ok(target)
}

fn load_state(path: &Path) -> Result<StateFile, Box<dyn std::error::Error>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateFile::default()),
        Err(e) => Err(e.into()),
    }
}

fn save_state(path: &Path, state: &StateFile) -> Result<(), Box<dyn std::error::Error>> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn write_output(path: Option<&Path>, data: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(path) => std::fs::write(path, data)?,
        None => {
            use std::io::Write;
            std::io::stdout().write_all(data)?;
        }
    }
    Ok(())
}
