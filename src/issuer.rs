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

//! Issuer sources.
//!
//! An issuer is either namespaced (`AdcsIssuer`) or cluster-wide
//! (`ClusterAdcsIssuer`). The only difference is where its credentials
//! live: a namespaced issuer reads them from its own namespace, a cluster
//! issuer from the cluster resource namespace. Both resolve into the same
//! [`ResolvedIssuer`].
//!
//! Issuers and credentials are declared in a TOML registry:
//!
//! ```toml
//! cluster_resource_namespace = "kube-system"
//!
//! [[issuers]]
//! kind = "AdcsIssuer"
//! name = "corp-adcs"
//! namespace = "default"
//! url = "https://adcs.example.com/certsrv"
//! credentials_ref = "adcs-credentials"
//! ca_bundle_file = "adcs-ca.pem"
//! status_check_interval = "6h"
//! retry_interval = "1h"
//!
//! [[credentials]]
//! name = "adcs-credentials"
//! namespace = "default"
//! username = 'CORP\svc-enroll'
//! password = "secret"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::AdcsClient;
use crate::config::{parse_interval, AdcsClientConfig};
use crate::error::{AdcsError, Result};
use crate::lifecycle::{Intervals, Issuer, DEFAULT_RETRY_INTERVAL, DEFAULT_STATUS_CHECK_INTERVAL};
use crate::tls::parse_pem_certificates;

/// Certificate template used when an issuer does not name one.
pub const DEFAULT_TEMPLATE: &str = "BasicSSLWebServer";

/// Namespace holding credentials of cluster-wide issuers.
pub const DEFAULT_CLUSTER_RESOURCE_NAMESPACE: &str = "kube-system";

/// Namespace assumed for namespaced entries that do not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Kind of issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IssuerKind {
    /// Namespaced issuer.
    AdcsIssuer,
    /// Cluster-wide issuer.
    ClusterAdcsIssuer,
}

impl FromStr for IssuerKind {
    type Err = AdcsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "adcsissuer" => Ok(Self::AdcsIssuer),
            "clusteradcsissuer" => Ok(Self::ClusterAdcsIssuer),
            _ => Err(AdcsError::UnsupportedIssuerKind(s.to_string())),
        }
    }
}

impl TryFrom<String> for IssuerKind {
    type Error = AdcsError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<IssuerKind> for String {
    fn from(kind: IssuerKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for IssuerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdcsIssuer => f.write_str("AdcsIssuer"),
            Self::ClusterAdcsIssuer => f.write_str("ClusterAdcsIssuer"),
        }
    }
}

/// Reference to an issuer, as carried by a certificate request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerRef {
    /// Issuer kind.
    pub kind: IssuerKind,
    /// Issuer name.
    pub name: String,
}

impl IssuerRef {
    /// Parse a reference from a kind string and a name.
    pub fn new(kind: &str, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            kind: kind.parse()?,
            name: name.into(),
        })
    }
}

/// Declared issuer.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuerSpec {
    /// Issuer kind.
    pub kind: IssuerKind,
    /// Issuer name.
    pub name: String,
    /// Namespace of a namespaced issuer.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Certsrv base URL.
    pub url: String,
    /// Name of the credentials entry.
    pub credentials_ref: String,
    /// Inline PEM CA bundle.
    #[serde(default)]
    pub ca_bundle: Option<String>,
    /// Path to a PEM CA bundle, relative to the registry file.
    #[serde(default)]
    pub ca_bundle_file: Option<PathBuf>,
    /// Pending request check interval (e.g. `"6h"`).
    #[serde(default)]
    pub status_check_interval: Option<String>,
    /// Retry interval after local errors (e.g. `"1h"`).
    #[serde(default)]
    pub retry_interval: Option<String>,
    /// Certificate template name.
    #[serde(default)]
    pub template: Option<String>,
}

impl IssuerSpec {
    /// Check the declaration: intervals, URL scheme and CA bundle.
    pub fn validate(&self, base_dir: Option<&Path>) -> Result<()> {
        for value in [&self.status_check_interval, &self.retry_interval]
            .into_iter()
            .flatten()
        {
            parse_interval(value)?;
        }

        let url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AdcsError::config(
                "Invalid URL format. Must be valid 'http://' or 'https://' URL.",
            ));
        }

        let bundle = self.ca_bundle_bytes(base_dir)?;
        if bundle.is_empty() {
            return Err(AdcsError::config("CA Bundle required"));
        }
        parse_pem_certificates(&bundle)?;
        Ok(())
    }

    fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    fn ca_bundle_bytes(&self, base_dir: Option<&Path>) -> Result<Vec<u8>> {
        if let Some(pem) = &self.ca_bundle {
            return Ok(pem.as_bytes().to_vec());
        }
        match &self.ca_bundle_file {
            Some(path) => {
                let path = match base_dir {
                    Some(dir) if path.is_relative() => dir.join(path),
                    _ => path.clone(),
                };
                Ok(std::fs::read(path)?)
            }
            None => Ok(Vec::new()),
        }
    }
}

/// Credentials entry.
#[derive(Clone, Deserialize)]
pub struct CredentialsEntry {
    /// Entry name.
    pub name: String,
    /// Namespace the entry lives in.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Username, possibly domain-qualified.
    #[serde(default)]
    pub username: Option<String>,
    /// Password.
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for CredentialsEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsEntry")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Issuer and credentials registry.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuerRegistry {
    /// Namespace holding credentials of cluster-wide issuers.
    #[serde(default = "default_cluster_resource_namespace")]
    pub cluster_resource_namespace: String,
    /// Declared issuers.
    #[serde(default)]
    pub issuers: Vec<IssuerSpec>,
    /// Declared credentials.
    #[serde(default)]
    pub credentials: Vec<CredentialsEntry>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

fn default_cluster_resource_namespace() -> String {
    DEFAULT_CLUSTER_RESOURCE_NAMESPACE.to_string()
}

/// An issuer resolved into everything needed to drive requests.
#[derive(Debug, Clone)]
pub struct ResolvedIssuer {
    /// Client configuration (URL, credentials, trust).
    pub client_config: AdcsClientConfig,
    /// Status check and retry intervals.
    pub intervals: Intervals,
    /// Certificate template.
    pub template: String,
}

impl ResolvedIssuer {
    /// Build a lifecycle [`Issuer`] talking to this issuer's certsrv.
    pub async fn issuer(&self) -> Result<Issuer> {
        let client = AdcsClient::new(self.client_config.clone()).await?;
        Ok(Issuer::new(Arc::new(client), self.intervals))
    }
}

impl IssuerRegistry {
    /// Parse a registry from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AdcsError::config(format!("invalid registry: {}", e)))
    }

    /// Load a registry file. Relative CA bundle paths resolve against its
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut registry = Self::from_toml(&text)?;
        registry.base_dir = path.parent().map(Path::to_path_buf);
        Ok(registry)
    }

    /// Validate every declared issuer.
    pub fn validate(&self) -> Result<()> {
        for spec in &self.issuers {
            spec.validate(self.base_dir.as_deref()).map_err(|e| {
                AdcsError::config(format!("{} {}: {}", spec.kind, spec.name, e))
            })?;
        }
        Ok(())
    }

    /// Resolve an issuer reference made from `namespace`.
    pub fn resolve(&self, reference: &IssuerRef, namespace: &str) -> Result<ResolvedIssuer> {
        let (spec, credentials_namespace) = match reference.kind {
            IssuerKind::AdcsIssuer => {
                let spec = self
                    .issuers
                    .iter()
                    .find(|s| {
                        s.kind == IssuerKind::AdcsIssuer
                            && s.name == reference.name
                            && s.namespace() == namespace
                    })
                    .ok_or_else(|| {
                        AdcsError::not_found(format!("AdcsIssuer {}/{}", namespace, reference.name))
                    })?;
                (spec, spec.namespace())
            }
            IssuerKind::ClusterAdcsIssuer => {
                let spec = self
                    .issuers
                    .iter()
                    .find(|s| s.kind == IssuerKind::ClusterAdcsIssuer && s.name == reference.name)
                    .ok_or_else(|| {
                        AdcsError::not_found(format!("ClusterAdcsIssuer {}", reference.name))
                    })?;
                (spec, self.cluster_resource_namespace.as_str())
            }
        };
        tracing::debug!(kind = %spec.kind, name = %spec.name, "resolving issuer");

        let (username, password) = self.user_password(&spec.credentials_ref, credentials_namespace)?;

        let bundle = spec.ca_bundle_bytes(self.base_dir.as_deref())?;
        if bundle.is_empty() {
            return Err(AdcsError::config("CA Bundle required"));
        }
        if parse_pem_certificates(&bundle).is_err() {
            return Err(AdcsError::config("error loading ADCS CA bundle"));
        }

        let client_config = AdcsClientConfig::builder()
            .server_url(&spec.url)?
            .http_auth(username, password)
            .trust_explicit(vec![bundle])
            .build()?;

        let intervals = Intervals {
            status_check: interval_or_default(
                spec.status_check_interval.as_deref(),
                DEFAULT_STATUS_CHECK_INTERVAL,
                "statusCheckInterval",
            ),
            retry: interval_or_default(
                spec.retry_interval.as_deref(),
                DEFAULT_RETRY_INTERVAL,
                "retryInterval",
            ),
        };

        Ok(ResolvedIssuer {
            client_config,
            intervals,
            template: spec
                .template
                .clone()
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
        })
    }

    fn user_password(&self, name: &str, namespace: &str) -> Result<(String, String)> {
        let entry = self
            .credentials
            .iter()
            .find(|c| {
                c.name == name && c.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE) == namespace
            })
            .ok_or_else(|| AdcsError::not_found(format!("credentials {}/{}", namespace, name)))?;

        let username = entry
            .username
            .clone()
            .ok_or_else(|| AdcsError::config("User name not set in credentials"))?;
        let password = entry
            .password
            .clone()
            .ok_or_else(|| AdcsError::config("Password not set in credentials"))?;
        Ok((username, password))
    }
}

fn interval_or_default(value: Option<&str>, default: Duration, name: &str) -> Duration {
    match value.filter(|v| !v.is_empty()) {
        Some(v) => match parse_interval(v) {
            Ok(interval) => interval,
            Err(e) => {
                tracing::error!(interval = name, error = %e, "cannot parse interval, using default");
                default
            }
        },
        None => {
            tracing::info!(interval = name, "using default");
            default
        }
    }
}
