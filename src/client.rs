//! ADCS web enrollment client implementation.
//!
//! This module provides the [`CertificateAuthority`] capability and its
//! certsrv implementation, [`AdcsClient`].

use async_trait::async_trait;
use reqwest::Method;
use url::Url;

use crate::classifier::{media_type, ResponseClassifier, Submission};
use crate::config::AdcsClientConfig;
use crate::error::{AdcsError, Result};
use crate::transport::Transport;
use crate::types::{content_types, pages, EnrollmentOutcome};

/// Renewal index used when `certcarc.asp` does not expose the counter.
const DEFAULT_RENEWAL: u32 = 0;

/// The operations a certificate authority offers to the request lifecycle.
///
/// Outcome-returning operations never fail: local errors are carried in
/// [`EnrollmentOutcome::error`] with status `Unknown`.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Submit a PEM CSR for the given template and resolve its state.
    async fn request_certificate(&self, csr_pem: &str, template: &str) -> EnrollmentOutcome;

    /// Fetch the current state of a previously submitted request.
    async fn get_existing_certificate(&self, id: &str) -> EnrollmentOutcome;

    /// Fetch the current CA certificate.
    async fn get_ca_certificate(&self) -> Result<Vec<u8>>;

    /// Fetch the current CA chain (PKCS#7).
    async fn get_ca_certificate_chain(&self) -> Result<Vec<u8>>;
}

/// Client for the ADCS certsrv web enrollment pages.
///
/// # Example
///
/// ```no_run
/// use usg_adcs_client::{AdcsClient, AdcsClientConfig, CertificateAuthority};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AdcsClientConfig::builder()
///     .server_url("https://adcs.example.com/certsrv")?
///     .http_auth("CORP\\svc-enroll", "secret")
///     .build()?;
///
/// let client = AdcsClient::new(config).await?;
/// let ca = client.get_ca_certificate().await?;
/// println!("{}", String::from_utf8_lossy(&ca));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AdcsClient {
    config: AdcsClientConfig,
    transport: Transport,
    classifier: ResponseClassifier,
}

impl AdcsClient {
    /// Create a new ADCS client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS configuration fails, or, when
    /// `verify_credentials` is set, if the server rejects the credentials.
    pub async fn new(config: AdcsClientConfig) -> Result<Self> {
        let transport = Transport::new(&config)?;

        if config.verify_credentials {
            let user = config
                .http_auth
                .as_ref()
                .map(|a| a.username.as_str())
                .unwrap_or("");
            tracing::info!(url = %config.server_url, user, "verifying credentials");
            transport.probe(config.server_url.clone()).await?;
        }

        Ok(Self {
            config,
            transport,
            classifier: ResponseClassifier::new(),
        })
    }

    /// Replace the response classifier, e.g. to add localized phrases.
    pub fn with_classifier(mut self, classifier: ResponseClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Get the client configuration.
    pub fn config(&self) -> &AdcsClientConfig {
        &self.config
    }

    async fn submit(&self, csr_pem: &str, template: &str) -> Result<Submission> {
        let url = self.config.page_url(pages::CERTFNSH_ASP);
        let cert_attrib = format!("CertificateTemplate:{}", template);
        let form = [
            ("Mode", "newreq"),
            ("CertRequest", csr_pem),
            ("CertAttrib", cert_attrib.as_str()),
            ("FriendlyType", "Saved-Request Certificate"),
            ("TargetStoreFlags", "0"),
            ("SaveCert", "yes"),
            ("CertificateTemplate", template),
        ];

        let reply = self
            .transport
            .send(self.transport.request(Method::POST, url).form(&form))
            .await?;
        tracing::debug!(body = %reply.text(), "submission response");

        Ok(self
            .classifier
            .classify_submission(reply.status, &reply.headers, &reply.body))
    }

    async fn fetch(&self, id: &str) -> Result<EnrollmentOutcome> {
        let mut url = self.config.page_url(pages::CERTNEW_CER);
        url.query_pairs_mut()
            .append_pair("ReqID", id)
            .append_pair("ENC", "b64");

        let reply = self
            .transport
            .send(self.transport.request(Method::GET, url))
            .await?;

        Ok(self
            .classifier
            .classify(id, reply.status, &reply.headers, &reply.body))
    }

    /// Discover the CA renewal counter, defaulting to the first generation.
    async fn renewal(&self) -> Result<u32> {
        let url = self.config.page_url(pages::CERTCARC_ASP);
        let reply = self
            .transport
            .send(self.transport.request(Method::GET, url))
            .await?;

        Ok(match self.classifier.extract_renewal_count(&reply.text()) {
            Some(n) => n,
            None => {
                tracing::warn!("renewal not found, using '{}'", DEFAULT_RENEWAL);
                DEFAULT_RENEWAL
            }
        })
    }

    async fn obtain_ca_certificate(&self, page: &str, expected: &str) -> Result<Vec<u8>> {
        let renewal = self.renewal().await?;

        let mut url: Url = self.config.page_url(page);
        url.query_pairs_mut()
            .append_pair("ReqID", "CACert")
            .append_pair("ENC", "b64")
            .append_pair("Renewal", &renewal.to_string());

        let reply = self
            .transport
            .send(self.transport.request(Method::GET, url.clone()))
            .await?;

        if !reply.status.is_success() {
            tracing::error!(url = %url, status = reply.status.as_u16(), "CA certificate fetch failed");
            return Err(AdcsError::server_error(reply.status.as_u16(), reply.text()));
        }

        let content_type = media_type(&reply.headers);
        if content_type != expected {
            tracing::error!(url = %url, content_type = %content_type, "unexpected content type");
            return Err(AdcsError::invalid_content_type(expected, content_type));
        }

        Ok(reply.body)
    }
}

#[async_trait]
impl CertificateAuthority for AdcsClient {
    async fn request_certificate(&self, csr_pem: &str, template: &str) -> EnrollmentOutcome {
        tracing::info!(
            operation = "request_certificate",
            url = %self.config.server_url,
            template,
            "submitting certificate request"
        );

        match self.submit(csr_pem, template).await {
            Ok(Submission::Assigned(id)) => {
                tracing::debug!(id = %id, "request id assigned");
                self.get_existing_certificate(&id).await
            }
            Ok(Submission::Complete(outcome)) => outcome,
            Err(e) => {
                tracing::error!(
                    operation = "request_certificate",
                    url = %self.config.server_url,
                    error = %e,
                    "certsrv request failed"
                );
                EnrollmentOutcome::local_error(e, "")
            }
        }
    }

    async fn get_existing_certificate(&self, id: &str) -> EnrollmentOutcome {
        match self.fetch(id).await {
            Ok(outcome) => {
                tracing::debug!(id, status = %outcome.status, "request state fetched");
                outcome
            }
            Err(e) => {
                tracing::error!(
                    operation = "get_existing_certificate",
                    url = %self.config.server_url,
                    id,
                    error = %e,
                    "certsrv request failed"
                );
                EnrollmentOutcome::local_error(e, id)
            }
        }
    }

    async fn get_ca_certificate(&self) -> Result<Vec<u8>> {
        tracing::info!(url = %self.config.server_url, "getting CA from certsrv");
        self.obtain_ca_certificate(pages::CERTNEW_CER, content_types::PKIX_CERT)
            .await
    }

    async fn get_ca_certificate_chain(&self) -> Result<Vec<u8>> {
        tracing::info!(url = %self.config.server_url, "getting CA chain from certsrv");
        self.obtain_ca_certificate(pages::CERTNEW_P7B, content_types::PKCS7_CERTIFICATES)
            .await
    }
}
