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

//! # usg-adcs-client
//!
//! A Rust client for the Microsoft Active Directory Certificate Services
//! (ADCS) web enrollment interface (`/certsrv`), with a request lifecycle
//! state machine on top.
//!
//! Certsrv has no structured API: requests are submitted as HTML forms and
//! outcomes are scraped from the returned pages. This library turns those
//! pages into typed [`EnrollmentOutcome`]s and drives certificate requests
//! from submission through approval to issuance.
//!
//! ## Features
//!
//! - **Async-first design** using Tokio
//! - **NTLMv2 and HTTP Basic** authentication, negotiated per request
//! - **Certsrv operations**: submit a CSR, poll a request id, fetch the CA
//!   certificate and the CA chain
//! - **Lifecycle state machine** returning explicit scheduling hints
//! - **Issuer registry** for namespaced and cluster-wide issuers
//! - **In-process simulator** for end-to-end tests (feature `simulator`)
//!
//! ## Quick Start
//!
//! ```no_run
//! use usg_adcs_client::{AdcsClient, AdcsClientConfig, CertificateAuthority};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AdcsClientConfig::builder()
//!         .server_url("https://adcs.example.com/certsrv")?
//!         .http_auth("CORP\\svc-enroll", "secret")
//!         .build()?;
//!
//!     let client = AdcsClient::new(config).await?;
//!
//!     let csr = std::fs::read_to_string("host.csr")?;
//!     let outcome = client.request_certificate(&csr, "WebServer").await;
//!     println!("{} (request id '{}')", outcome.status, outcome.enrollment_id);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Request Lifecycle
//!
//! See [`lifecycle`] for driving a request to a terminal state, and
//! [`issuer`] for resolving issuers from a registry file.
//!
//! ## Cargo Features
//!
//! - `simulator` (default): Enables [`simulator::AdcsSimulator`] using
//!   `wiremock` and `rcgen`

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod issuer;
pub mod lifecycle;
pub mod ntlm;
pub mod tls;
pub mod transport;
pub mod types;

#[cfg(feature = "simulator")]
pub mod simulator;

// Re-export main types at crate root for convenience
pub use classifier::ResponseClassifier;
pub use client::{AdcsClient, CertificateAuthority};
pub use config::{AdcsClientConfig, AdcsClientConfigBuilder, HttpAuth, TrustAnchors};
pub use error::{AdcsError, Result};
pub use issuer::{IssuerKind, IssuerRef, IssuerRegistry, ResolvedIssuer};
pub use lifecycle::{Intervals, Issuer, RequestState, RequestStatus, Schedule, Transition};
pub use types::{CaChain, EnrollmentOutcome, EnrollmentRequest, EnrollmentStatus};

// Re-export x509_cert::Certificate for convenience
pub use x509_cert::Certificate;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
