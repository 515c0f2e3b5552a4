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

//! Certificate request lifecycle.
//!
//! A request moves from `Unset` through `Pending` to one of the terminal
//! states `Ready`, `Rejected` or `Errored`. [`Issuer::advance`] performs at
//! most one step: it never mutates the caller's state, it returns a
//! [`Transition`] carrying the next state and a scheduling hint. The caller
//! persists the state and re-invokes according to the hint.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use usg_adcs_client::{AdcsClient, AdcsClientConfig, EnrollmentRequest};
//! use usg_adcs_client::lifecycle::{Intervals, Issuer, RequestStatus, Schedule};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AdcsClientConfig::builder()
//!     .server_url("https://adcs.example.com/certsrv")?
//!     .http_auth("CORP\\svc-enroll", "secret")
//!     .build()?;
//! let issuer = Issuer::new(Arc::new(AdcsClient::new(config).await?), Intervals::default());
//!
//! let request = EnrollmentRequest::new(std::fs::read("host.csr")?, "WebServer");
//! let mut status = RequestStatus::default();
//! loop {
//!     let transition = issuer.advance(&request, &status).await?;
//!     status = transition.status;
//!     match transition.schedule {
//!         Schedule::Done => break,
//!         Schedule::RetryNow => continue,
//!         Schedule::RetryAfter(delay) => tokio::time::sleep(delay).await,
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::client::CertificateAuthority;
use crate::error::{AdcsError, Result};
use crate::types::{EnrollmentOutcome, EnrollmentRequest, EnrollmentStatus};

/// Default delay between status checks of a pending request.
pub const DEFAULT_STATUS_CHECK_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Default delay before retrying after a local error.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Durable state of a certificate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// Not yet submitted.
    #[default]
    Unset,
    /// Submitted, waiting for the CA.
    Pending,
    /// Certificate issued.
    Ready,
    /// Denied by the CA.
    Rejected,
    /// Failed on the CA.
    Errored,
}

impl RequestState {
    /// Returns true for `Ready`, `Rejected` and `Errored`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Rejected | Self::Errored)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unset => "unset",
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Rejected => "rejected",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Persisted request status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestStatus {
    /// Lifecycle state.
    #[serde(default)]
    pub state: RequestState,

    /// Last known ADCS request id.
    #[serde(rename = "id", default)]
    pub enrollment_id: String,

    /// Last disposition text; empty when ready.
    #[serde(default)]
    pub reason: String,
}

impl RequestStatus {
    fn from_outcome(state: RequestState, outcome: &EnrollmentOutcome, reason: String) -> Self {
        Self {
            state,
            enrollment_id: outcome.enrollment_id.clone(),
            reason,
        }
    }
}

/// When the caller should invoke [`Issuer::advance`] again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Immediately.
    RetryNow,
    /// After the given delay.
    RetryAfter(Duration),
    /// Never; the request is in a terminal state.
    Done,
}

impl Schedule {
    /// Retry after `delay`, or immediately if it is zero.
    pub fn after(delay: Duration) -> Self {
        if delay.is_zero() {
            Self::RetryNow
        } else {
            Self::RetryAfter(delay)
        }
    }

    /// The delay before the next invocation, if any.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::RetryNow => Some(Duration::ZERO),
            Self::RetryAfter(delay) => Some(*delay),
            Self::Done => None,
        }
    }
}

/// Status check and retry intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    /// Delay between checks of a pending request.
    pub status_check: Duration,
    /// Delay before retrying after a local error.
    pub retry: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            status_check: DEFAULT_STATUS_CHECK_INTERVAL,
            retry: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl Intervals {
    /// Set the status check interval.
    pub fn with_status_check(mut self, interval: Duration) -> Self {
        self.status_check = interval;
        self
    }

    /// Set the retry interval.
    pub fn with_retry(mut self, interval: Duration) -> Self {
        self.retry = interval;
        self
    }
}

/// Result of one lifecycle step.
#[derive(Debug)]
pub struct Transition {
    /// Status to persist.
    pub status: RequestStatus,
    /// Issued PEM certificate, on `Ready`.
    pub certificate: Option<Vec<u8>>,
    /// CA chain (PKCS#7 as served by certsrv), on `Ready` when available.
    pub ca_chain: Option<Vec<u8>>,
    /// When to invoke again.
    pub schedule: Schedule,
    /// Local error that prevented the step; the status is then unchanged.
    pub error: Option<AdcsError>,
}

impl Transition {
    fn unchanged(status: RequestStatus, schedule: Schedule, error: Option<AdcsError>) -> Self {
        Self {
            status,
            certificate: None,
            ca_chain: None,
            schedule,
            error,
        }
    }

    fn to(status: RequestStatus, schedule: Schedule) -> Self {
        Self::unchanged(status, schedule, None)
    }

    /// Returns true if a local error kept the state from advancing.
    pub fn is_local_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Drives requests through their lifecycle against one certificate authority.
#[derive(Clone)]
pub struct Issuer {
    authority: Arc<dyn CertificateAuthority>,
    intervals: Intervals,
}

impl fmt::Debug for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Issuer")
            .field("intervals", &self.intervals)
            .finish_non_exhaustive()
    }
}

impl Issuer {
    /// Create an issuer over the given authority.
    pub fn new(authority: Arc<dyn CertificateAuthority>, intervals: Intervals) -> Self {
        Self {
            authority,
            intervals,
        }
    }

    /// The configured intervals.
    pub fn intervals(&self) -> Intervals {
        self.intervals
    }

    /// Perform one lifecycle step for `request` in state `current`.
    ///
    /// Terminal states are returned unchanged without contacting the CA.
    ///
    /// # Errors
    ///
    /// Returns [`AdcsError::MissingEnrollmentId`] if `current` is pending
    /// without a recorded id. All other failures are reported through
    /// [`Transition::error`].
    pub async fn advance(
        &self,
        request: &EnrollmentRequest,
        current: &RequestStatus,
    ) -> Result<Transition> {
        let outcome = match current.state {
            state if state.is_terminal() => {
                debug!(state = %state, id = %current.enrollment_id, "nothing to do");
                return Ok(Transition::to(current.clone(), Schedule::Done));
            }
            RequestState::Pending => {
                if current.enrollment_id.is_empty() {
                    return Err(AdcsError::MissingEnrollmentId);
                }
                self.authority
                    .get_existing_certificate(&current.enrollment_id)
                    .await
            }
            _ => {
                let csr_pem = match request.csr_pem() {
                    Ok(pem) => pem,
                    Err(e) => return Ok(self.local_failure(current, e)),
                };
                self.authority
                    .request_certificate(&csr_pem, &request.template)
                    .await
            }
        };

        Ok(self.apply(current, outcome).await)
    }

    async fn apply(&self, current: &RequestStatus, outcome: EnrollmentOutcome) -> Transition {
        if let Some(e) = &outcome.error {
            if outcome.status != EnrollmentStatus::Unknown {
                error!(id = %outcome.enrollment_id, error = %e, "certsrv response could not be interpreted");
            }
        }

        let transition = match outcome.status {
            EnrollmentStatus::Unknown => {
                let e = outcome
                    .error
                    .unwrap_or_else(|| AdcsError::server_error(0, "no outcome from certsrv"));
                return self.local_failure(current, e);
            }
            EnrollmentStatus::Pending => Transition::to(
                RequestStatus::from_outcome(RequestState::Pending, &outcome, outcome.description()),
                Schedule::after(self.intervals.status_check),
            ),
            EnrollmentStatus::Ready => {
                let ca_chain = match self.authority.get_ca_certificate_chain().await {
                    Ok(chain) => Some(chain),
                    Err(e) => {
                        warn!(id = %outcome.enrollment_id, error = %e, "CA chain unavailable");
                        None
                    }
                };
                Transition {
                    status: RequestStatus::from_outcome(RequestState::Ready, &outcome, String::new()),
                    certificate: Some(outcome.payload),
                    ca_chain,
                    schedule: Schedule::Done,
                    error: None,
                }
            }
            EnrollmentStatus::Rejected => Transition::to(
                RequestStatus::from_outcome(RequestState::Rejected, &outcome, outcome.description()),
                Schedule::Done,
            ),
            EnrollmentStatus::Errored => Transition::to(
                RequestStatus::from_outcome(RequestState::Errored, &outcome, outcome.description()),
                Schedule::Done,
            ),
        };

        info!(
            from = %current.state,
            to = %transition.status.state,
            id = %transition.status.enrollment_id,
            "request state changed"
        );
        transition
    }

    fn local_failure(&self, current: &RequestStatus, e: AdcsError) -> Transition {
        error!(
            state = %current.state,
            id = %current.enrollment_id,
            error = %e,
            "local error, state unchanged"
        );
        Transition::unchanged(current.clone(), Schedule::after(self.intervals.retry), Some(e))
    }
}
