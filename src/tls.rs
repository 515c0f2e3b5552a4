//! TLS and HTTP client construction for the ADCS client.
//!
//! Certsrv speaks HTTP/1.1 only; NTLM authenticates a single TCP
//! connection, so the client is pinned to HTTP/1.1 with keep-alive.

use std::time::Duration;

use crate::config::{AdcsClientConfig, TrustAnchors};
use crate::error::{AdcsError, Result};

/// User agent sent with every request. Some IIS deployments refuse
/// certsrv pages to clients that do not look like a browser.
pub const USER_AGENT: &str = "Mozilla";

/// Build a reqwest Client with the appropriate TLS configuration.
pub fn build_http_client(config: &AdcsClientConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .use_rustls_tls()
        .http1_only()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(1)
        .user_agent(USER_AGENT);

    match &config.trust_anchors {
        TrustAnchors::WebPki => {
            builder = builder.tls_built_in_root_certs(true);
        }
        TrustAnchors::Explicit(ca_bundles) => {
            builder = builder.tls_built_in_root_certs(false);
            for bundle in ca_bundles {
                for der in parse_pem_certificates(bundle)? {
                    let cert = reqwest::Certificate::from_der(&der).map_err(|e| {
                        AdcsError::tls(format!("Failed to parse CA certificate: {}", e))
                    })?;
                    builder = builder.add_root_certificate(cert);
                }
            }
        }
    }

    builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_2);

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in &config.additional_headers {
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::try_from(name.as_str()),
            reqwest::header::HeaderValue::try_from(value.as_str()),
        ) {
            headers.insert(name, value);
        }
    }
    builder = builder.default_headers(headers);

    builder
        .build()
        .map_err(|e| AdcsError::tls(format!("Failed to build HTTP client: {}", e)))
}

/// Parse PEM-encoded certificates into their DER encodings.
///
/// Non-certificate PEM blocks are skipped. At least one certificate
/// must be present.
pub fn parse_pem_certificates(pem_data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut reader = std::io::BufReader::new(pem_data);
    let mut certs = Vec::new();
    for item in rustls_pemfile::certs(&mut reader) {
        let cert =
            item.map_err(|e| AdcsError::invalid_pem(format!("Failed to parse PEM: {}", e)))?;
        certs.push(cert.as_ref().to_vec());
    }

    if certs.is_empty() {
        return Err(AdcsError::invalid_pem("No certificates found in PEM data"));
    }

    Ok(certs)
}
