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

//! Configuration types for the ADCS client.
//!
//! This module provides configuration structures for setting up an ADCS
//! client, including the certsrv base URL, credentials, and TLS trust.

use std::time::Duration;
use url::Url;

use crate::error::{AdcsError, Result};

/// Configuration for an ADCS client.
#[derive(Clone)]
pub struct AdcsClientConfig {
    /// Certsrv base URL (e.g., "https://adcs.example.com/certsrv").
    ///
    /// ADCS pages such as `certfnsh.asp` are resolved relative to this path.
    pub server_url: Url,

    /// Credentials for NTLM (or HTTP Basic fallback) authentication.
    ///
    /// When absent, requests are sent without authentication.
    pub http_auth: Option<HttpAuth>,

    /// Trust anchor configuration for server certificate verification.
    pub trust_anchors: TrustAnchors,

    /// Request timeout duration, applied to every HTTP round trip.
    pub timeout: Duration,

    /// Probe the server once at client construction and fail if the
    /// credentials are rejected.
    pub verify_credentials: bool,

    /// Additional HTTP headers to include in requests.
    pub additional_headers: Vec<(String, String)>,
}

impl std::fmt::Debug for AdcsClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdcsClientConfig")
            .field("server_url", &self.server_url)
            .field("http_auth", &self.http_auth.as_ref().map(|a| &a.username))
            .field("trust_anchors", &self.trust_anchors)
            .field("timeout", &self.timeout)
            .field("verify_credentials", &self.verify_credentials)
            .finish()
    }
}

impl AdcsClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> AdcsClientConfigBuilder {
        AdcsClientConfigBuilder::new()
    }

    /// Build the URL of a certsrv page.
    ///
    /// The page is appended to the base path, so a base of
    /// `https://host/certsrv` yields `https://host/certsrv/certfnsh.asp`.
    pub fn page_url(&self, page: &str) -> Url {
        let mut url = self.server_url.clone();
        let path = format!("{}/{}", url.path().trim_end_matches('/'), page);
        url.set_path(&path);
        url.set_query(None);
        url
    }
}

/// Builder for [`AdcsClientConfig`].
#[derive(Default)]
pub struct AdcsClientConfigBuilder {
    server_url: Option<Url>,
    http_auth: Option<HttpAuth>,
    trust_anchors: Option<TrustAnchors>,
    timeout: Option<Duration>,
    verify_credentials: bool,
    additional_headers: Vec<(String, String)>,
}

impl AdcsClientConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the certsrv base URL.
    pub fn server_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.server_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Set the certsrv base URL from a pre-parsed URL.
    pub fn server_url_parsed(mut self, url: Url) -> Self {
        self.server_url = Some(url);
        self
    }

    /// Set credentials.
    ///
    /// The username may carry a domain as `DOMAIN\user` or `user@domain`.
    pub fn http_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.http_auth = Some(HttpAuth::new(username, password));
        self
    }

    /// Use the built-in Mozilla root store for server verification.
    pub fn trust_webpki_roots(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::WebPki);
        self
    }

    /// Use explicit CA certificates (PEM bundles) for server verification.
    pub fn trust_explicit(mut self, ca_bundles: Vec<Vec<u8>>) -> Self {
        self.trust_anchors = Some(TrustAnchors::Explicit(ca_bundles));
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable the start-up credential probe.
    pub fn verify_credentials(mut self, verify: bool) -> Self {
        self.verify_credentials = verify;
        self
    }

    /// Add an additional HTTP header to all requests.
    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.push((name.into(), value.into()));
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the server URL is not set or is not http(s).
    pub fn build(self) -> Result<AdcsClientConfig> {
        let server_url = self
            .server_url
            .ok_or_else(|| AdcsError::config("server_url is required"))?;

        if !matches!(server_url.scheme(), "http" | "https") {
            return Err(AdcsError::config(format!(
                "Invalid URL scheme '{}'. Must be 'http' or 'https'.",
                server_url.scheme()
            )));
        }

        Ok(AdcsClientConfig {
            server_url,
            http_auth: self.http_auth,
            trust_anchors: self.trust_anchors.unwrap_or(TrustAnchors::WebPki),
            timeout: self.timeout.unwrap_or(Duration::from_secs(30)),
            verify_credentials: self.verify_credentials,
            additional_headers: self.additional_headers,
        })
    }
}

/// Credentials presented to the server.
#[derive(Clone)]
pub struct HttpAuth {
    /// Username, optionally qualified as `DOMAIN\user` or `user@domain`.
    pub username: String,

    /// Password.
    pub password: String,
}

impl HttpAuth {
    /// Create new credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Split the username into `(user, domain)`.
    pub fn user_and_domain(&self) -> (&str, &str) {
        if let Some((domain, user)) = self.username.split_once('\\') {
            return (user, domain);
        }
        if let Some((user, domain)) = self.username.split_once('@') {
            return (user, domain);
        }
        (&self.username, "")
    }
}

impl std::fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Trust anchor configuration for server certificate verification.
///
/// There is deliberately no variant that disables verification.
#[derive(Clone)]
pub enum TrustAnchors {
    /// Use the root store built into the TLS stack (Mozilla roots).
    WebPki,

    /// Use explicit CA certificates (PEM-encoded bundles).
    Explicit(Vec<Vec<u8>>),
}

impl std::fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebPki => write!(f, "WebPki"),
            Self::Explicit(bundles) => write!(f, "Explicit({} bundles)", bundles.len()),
        }
    }
}

/// Parse a Go-style duration string such as `"6h"`, `"1h30m"` or `"1.5s"`.
///
/// Supported units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare
/// `"0"` is accepted; any other number needs a unit.
pub fn parse_interval(value: &str) -> Result<Duration> {
    let s = value.trim();
    if s.is_empty() {
        return Err(AdcsError::invalid_interval(value, "empty interval"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = s;
    let mut total = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(AdcsError::invalid_interval(value, "expected a number"));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| AdcsError::invalid_interval(value, "invalid number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(AdcsError::invalid_interval(value, "missing unit")),
            unit => {
                return Err(AdcsError::invalid_interval(
                    value,
                    format!("unknown unit '{unit}'"),
                ))
            }
        };
        rest = &rest[unit_len..];
        total += number * seconds_per_unit;
    }

    Duration::try_from_secs_f64(total)
        .map_err(|e| AdcsError::invalid_interval(value, e.to_string()))
}
