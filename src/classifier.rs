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

//! Response classification for certsrv pages.
//!
//! Certsrv has no structured API. Outcomes are scraped from HTML pages by
//! fixed textual anchors, and anything that does not have the expected
//! shape is classified `Errored`, never `Ready`.

use std::sync::LazyLock;

use der::Decode;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use x509_cert::Certificate;

use crate::error::AdcsError;
use crate::tls::parse_pem_certificates;
use crate::types::{content_types, decode_base64, pem_encode, EnrollmentOutcome};

/// Phrase marking a request waiting for a CA manager.
pub const PENDING_PHRASE: &str = "Taken Under Submission";

/// Phrase marking a denied request.
pub const REJECTED_PHRASE: &str = "Denied by";

/// Fallback description when a failed submission page carries no reason.
pub const UNKNOWN_SUBMISSION_ERROR: &str = "Unknown error occurred";

static DISPOSITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Disposition message:[^\t]+\t\t([^\r\n]+)").unwrap());

static LAST_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"LastStatus:[^\t]+\t\t([^\r\n]+)").unwrap());

static REQUEST_ID: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"certnew\.cer\?ReqID=([0-9]+)&").unwrap(),
        Regex::new(r"Your Request Id is ([0-9]+)\.").unwrap(),
    ]
});

static SUBMISSION_FAILURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"The disposition message is "([^"]+)"#).unwrap());

static RENEWAL_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"var nRenewals=([0-9]+);").unwrap());

/// What a submission to `certfnsh.asp` produced.
#[derive(Debug)]
pub enum Submission {
    /// The server allocated a request id; its state must be fetched.
    Assigned(String),
    /// The submission resolved without an id to follow up on.
    Complete(EnrollmentOutcome),
}

/// Scrapes certsrv responses into [`EnrollmentOutcome`]s.
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    pending_phrases: Vec<String>,
    rejected_phrases: Vec<String>,
}

impl ResponseClassifier {
    /// Create a classifier with the phrases used by current ADCS releases.
    pub fn new() -> Self {
        Self {
            pending_phrases: vec![PENDING_PHRASE.to_string()],
            rejected_phrases: vec![REJECTED_PHRASE.to_string()],
        }
    }

    /// Recognize an additional phrase as meaning "pending".
    pub fn with_pending_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.pending_phrases.push(phrase.into());
        self
    }

    /// Recognize an additional phrase as meaning "rejected".
    pub fn with_rejected_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.rejected_phrases.push(phrase.into());
        self
    }

    /// Classify a `certnew.cer?ReqID=<id>` response.
    ///
    /// The returned outcome always carries `id`. An error status without a
    /// disposition page is a local error: the server gave no answer about
    /// the request itself.
    pub fn classify(
        &self,
        id: &str,
        status: StatusCode,
        headers: &HeaderMap,
        body: &[u8],
    ) -> EnrollmentOutcome {
        let content_type = media_type(headers);

        if !status.is_success() {
            let text = String::from_utf8_lossy(body);
            if content_type == content_types::HTML && DISPOSITION.is_match(&text) {
                return self.classify_disposition(id, &text);
            }
            tracing::error!(id, status = status.as_u16(), "certsrv returned an error status");
            return EnrollmentOutcome::local_error(status_error(status), id);
        }

        match content_type.as_str() {
            content_types::HTML => self.classify_disposition(id, &String::from_utf8_lossy(body)),
            content_types::PKIX_CERT => classify_certificate(id, body),
            other => {
                tracing::error!(id, content_type = other, "unexpected content type");
                EnrollmentOutcome::errored_with(
                    AdcsError::invalid_content_type(
                        format!("{} or {}", content_types::HTML, content_types::PKIX_CERT),
                        other,
                    ),
                    id,
                )
            }
        }
    }

    /// Classify the response to a `certfnsh.asp` submission.
    pub fn classify_submission(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Submission {
        if media_type(headers) == content_types::PKIX_CERT {
            return Submission::Complete(classify_certificate("", body));
        }

        let text = String::from_utf8_lossy(body);
        if let Some(id) = self.extract_request_id(&text) {
            return Submission::Assigned(id);
        }

        tracing::error!("couldn't obtain new request id");
        if let Some(message) = self.extract_submission_failure(&text) {
            return Submission::Complete(EnrollmentOutcome::errored(message, ""));
        }
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "certsrv returned an error status");
            return Submission::Complete(EnrollmentOutcome::local_error(status_error(status), ""));
        }
        tracing::error!(body = %text, "unrecognized submission page");
        Submission::Complete(EnrollmentOutcome::errored(UNKNOWN_SUBMISSION_ERROR, ""))
    }

    /// Find the request id on a submission page.
    pub fn extract_request_id(&self, page: &str) -> Option<String> {
        REQUEST_ID
            .iter()
            .find_map(|re| re.captures(page))
            .map(|caps| caps[1].to_string())
    }

    /// Find the disposition text on a failed submission page.
    pub fn extract_submission_failure(&self, page: &str) -> Option<String> {
        SUBMISSION_FAILURE
            .captures(page)
            .map(|caps| caps[1].to_string())
    }

    /// Find the CA renewal counter on `certcarc.asp`.
    pub fn extract_renewal_count(&self, page: &str) -> Option<u32> {
        RENEWAL_COUNT
            .captures(page)
            .and_then(|caps| caps[1].parse().ok())
    }

    fn classify_disposition(&self, id: &str, page: &str) -> EnrollmentOutcome {
        let last_status = match LAST_STATUS.captures(page) {
            Some(caps) => format!(" {}", &caps[1]),
            None => {
                tracing::warn!(id, "last status unknown");
                String::new()
            }
        };

        let Some(caps) = DISPOSITION.captures(page) else {
            tracing::error!(id, body = %page, "disposition message unknown");
            return EnrollmentOutcome::errored(
                format!("Disposition message unknown: {}{}", page, last_status),
                id,
            );
        };
        let description = format!("{}{}", &caps[1], last_status);

        if self.pending_phrases.iter().any(|p| page.contains(p.as_str())) {
            EnrollmentOutcome::pending(description, id)
        } else if self.rejected_phrases.iter().any(|p| page.contains(p.as_str())) {
            EnrollmentOutcome::rejected(description, id)
        } else {
            EnrollmentOutcome::errored(description, id)
        }
    }
}

impl Default for ResponseClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercased media type without parameters, empty if absent.
pub(crate) fn media_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

fn status_error(status: StatusCode) -> AdcsError {
    AdcsError::server_error(
        status.as_u16(),
        status.canonical_reason().unwrap_or("unknown status"),
    )
}

/// A `pkix-cert` body as a PEM certificate.
///
/// PEM is kept as-is; DER and bare base64 are wrapped. Anything else is
/// `Errored`.
fn classify_certificate(id: &str, body: &[u8]) -> EnrollmentOutcome {
    if parse_pem_certificates(body).is_ok() {
        return EnrollmentOutcome::ready(body.to_vec(), id);
    }
    if Certificate::from_der(body).is_ok() {
        return EnrollmentOutcome::ready(pem_encode("CERTIFICATE", body), id);
    }
    match decode_base64(body) {
        Ok(der) if Certificate::from_der(&der).is_ok() => {
            EnrollmentOutcome::ready(pem_encode("CERTIFICATE", &der), id)
        }
        _ => {
            tracing::error!(id, "certificate response is neither PEM, DER nor base64");
            EnrollmentOutcome::errored_with(
                AdcsError::invalid_pem("certificate response is not a certificate"),
                id,
            )
        }
    }
}
