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

//! ADCS enrollment message types.
//!
//! This module provides the outcome of a single protocol interaction, the
//! enrollment request handed in by the caller, and the page and
//! content-type names of the certsrv web interface.

mod pkcs7;

pub use pkcs7::{encode_base64_wrapped, pem_encode, CaChain};
pub(crate) use pkcs7::decode_base64;

use std::fmt;

use crate::error::{AdcsError, Result};

/// Classification of one certsrv response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrollmentStatus {
    /// No classification; a local error prevented an answer.
    Unknown,
    /// Taken under submission; waiting for a CA manager.
    Pending,
    /// Issued; the payload holds the PEM certificate.
    Ready,
    /// The server reported a failure other than denial.
    Errored,
    /// Denied by the CA or a CA manager.
    Rejected,
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Pending => "Pending",
            Self::Ready => "Ready",
            Self::Errored => "Errored",
            Self::Rejected => "Rejected",
        };
        f.write_str(name)
    }
}

/// Result of one protocol interaction with certsrv.
///
/// `error` is orthogonal to `status`: a transport failure carries
/// `status == Unknown` and `error` set.
#[derive(Debug)]
pub struct EnrollmentOutcome {
    /// Classified status.
    pub status: EnrollmentStatus,
    /// PEM certificate on `Ready`; a human-readable description otherwise.
    pub payload: Vec<u8>,
    /// Server-assigned request id, empty if none was assigned.
    pub enrollment_id: String,
    /// Local or transport error.
    pub error: Option<AdcsError>,
}

impl EnrollmentOutcome {
    /// An issued certificate.
    pub fn ready(certificate_pem: impl Into<Vec<u8>>, id: impl Into<String>) -> Self {
        Self {
            status: EnrollmentStatus::Ready,
            payload: certificate_pem.into(),
            enrollment_id: id.into(),
            error: None,
        }
    }

    /// A request waiting for approval.
    pub fn pending(description: impl Into<String>, id: impl Into<String>) -> Self {
        Self::described(EnrollmentStatus::Pending, description, id)
    }

    /// A denied request.
    pub fn rejected(description: impl Into<String>, id: impl Into<String>) -> Self {
        Self::described(EnrollmentStatus::Rejected, description, id)
    }

    /// A server-side failure.
    pub fn errored(description: impl Into<String>, id: impl Into<String>) -> Self {
        Self::described(EnrollmentStatus::Errored, description, id)
    }

    /// A classified `Errored` that also carries the local error behind it.
    pub fn errored_with(error: AdcsError, id: impl Into<String>) -> Self {
        Self {
            status: EnrollmentStatus::Errored,
            payload: error.to_string().into_bytes(),
            enrollment_id: id.into(),
            error: Some(error),
        }
    }

    /// A local failure; nothing is known about the request.
    pub fn local_error(error: AdcsError, id: impl Into<String>) -> Self {
        Self {
            status: EnrollmentStatus::Unknown,
            payload: Vec::new(),
            enrollment_id: id.into(),
            error: Some(error),
        }
    }

    fn described(
        status: EnrollmentStatus,
        description: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            status,
            payload: description.into().into_bytes(),
            enrollment_id: id.into(),
            error: None,
        }
    }

    /// The payload as text (the description, or the PEM certificate).
    pub fn description(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Returns true if a local error prevented classification.
    pub fn is_local_error(&self) -> bool {
        self.status == EnrollmentStatus::Unknown
    }
}

/// A certificate request handed in by the caller.
#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    /// CSR, PEM or DER encoded.
    pub csr: Vec<u8>,
    /// Certificate template name.
    pub template: String,
}

impl EnrollmentRequest {
    /// Create a new enrollment request.
    pub fn new(csr: impl Into<Vec<u8>>, template: impl Into<String>) -> Self {
        Self {
            csr: csr.into(),
            template: template.into(),
        }
    }

    /// The CSR as PEM text.
    ///
    /// DER input is wrapped into a `CERTIFICATE REQUEST` block.
    pub fn csr_pem(&self) -> Result<String> {
        if self.csr.first() == Some(&0x30) {
            return Ok(pem_encode("CERTIFICATE REQUEST", &self.csr));
        }
        let text = std::str::from_utf8(&self.csr)
            .map_err(|_| AdcsError::csr("CSR is neither DER nor PEM"))?;
        if !text.contains("-----BEGIN") || !text.contains("REQUEST-----") {
            return Err(AdcsError::csr("CSR is missing a PEM CERTIFICATE REQUEST block"));
        }
        Ok(text.trim().to_string())
    }
}

/// Content types returned by certsrv.
pub mod content_types {
    /// A single DER or base64 certificate.
    pub const PKIX_CERT: &str = "application/pkix-cert";

    /// PKCS#7 certs-only chain.
    pub const PKCS7_CERTIFICATES: &str = "application/x-pkcs7-certificates";

    /// HTML disposition pages.
    pub const HTML: &str = "text/html";
}

/// Certsrv pages, relative to the base URL.
pub mod pages {
    /// Certificate retrieval by request id.
    pub const CERTNEW_CER: &str = "certnew.cer";

    /// CA chain retrieval.
    pub const CERTNEW_P7B: &str = "certnew.p7b";

    /// CA certificate page exposing the renewal counter.
    pub const CERTCARC_ASP: &str = "certcarc.asp";

    /// Request submission.
    pub const CERTFNSH_ASP: &str = "certfnsh.asp";
}
