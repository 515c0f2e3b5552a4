//! Error types for the ADCS client.
//!
//! These are *local* errors: transport failures, malformed input, broken
//! configuration. A definitive answer from the certificate server (pending,
//! denied, failed) is never an error, it is an
//! [`EnrollmentOutcome`](crate::types::EnrollmentOutcome).

use thiserror::Error;

/// Result type alias using [`AdcsError`].
pub type Result<T> = std::result::Result<T, AdcsError>;

/// Errors that can occur while talking to an ADCS web enrollment server.
#[derive(Debug, Error)]
pub enum AdcsError {
    /// TLS configuration or connection error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP request or response error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response Content-Type header does not match expected value.
    #[error("Unexpected content type: expected '{expected}', got '{actual}'")]
    InvalidContentType {
        /// Expected content-type.
        expected: String,
        /// Actual content-type received.
        actual: String,
    },

    /// Server answered with a non-success HTTP status.
    #[error("ADCS Certsrv response status {status}: {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// Server rejected the configured credentials.
    #[error("Authentication rejected: {challenge}")]
    AuthenticationRejected {
        /// WWW-Authenticate challenge from server.
        challenge: String,
    },

    /// NTLM handshake failure.
    #[error("NTLM error: {0}")]
    Ntlm(String),

    /// Invalid PEM data.
    #[error("Invalid PEM data: {0}")]
    InvalidPem(String),

    /// Invalid certificate signing request.
    #[error("CSR error: {0}")]
    Csr(String),

    /// Failed to parse CMS/PKCS#7 structure.
    #[error("CMS/PKCS#7 parsing error: {0}")]
    CmsParsing(String),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// DER encoding/decoding error.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Interval string could not be parsed.
    #[error("Invalid interval '{value}': {reason}")]
    InvalidInterval {
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Issuer kind is neither `AdcsIssuer` nor `ClusterAdcsIssuer`.
    #[error("Unsupported issuer kind {0}")]
    UnsupportedIssuerKind(String),

    /// Issuer or credentials entry does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A pending request has no enrollment id recorded.
    #[error("ADCS request id not set for pending request")]
    MissingEnrollmentId,

    /// Simulator failure (certificate generation, CSR decoding).
    #[cfg(feature = "simulator")]
    #[error("Simulator error: {0}")]
    Simulator(String),
}

impl AdcsError {
    /// Create a TLS error with the given message.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create an NTLM error with the given message.
    pub fn ntlm(msg: impl Into<String>) -> Self {
        Self::Ntlm(msg.into())
    }

    /// Create an invalid PEM error.
    pub fn invalid_pem(msg: impl Into<String>) -> Self {
        Self::InvalidPem(msg.into())
    }

    /// Create a CSR error.
    pub fn csr(msg: impl Into<String>) -> Self {
        Self::Csr(msg.into())
    }

    /// Create a CMS parsing error with the given message.
    pub fn cms_parsing(msg: impl Into<String>) -> Self {
        Self::CmsParsing(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a server error with status and message.
    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Create an authentication rejected error.
    pub fn authentication_rejected(challenge: impl Into<String>) -> Self {
        Self::AuthenticationRejected {
            challenge: challenge.into(),
        }
    }

    /// Create an invalid content-type error.
    pub fn invalid_content_type(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidContentType {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an invalid interval error.
    pub fn invalid_interval(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInterval {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a simulator error.
    #[cfg(feature = "simulator")]
    pub fn simulator(msg: impl Into<String>) -> Self {
        Self::Simulator(msg.into())
    }

    /// Returns true if retrying the same operation later may succeed.
    ///
    /// Transport and response-handling failures are retryable. Configuration
    /// problems, unusable CSRs and lifecycle invariant violations are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Config(_)
                | Self::Csr(_)
                | Self::InvalidInterval { .. }
                | Self::UnsupportedIssuerKind(_)
                | Self::NotFound(_)
                | Self::MissingEnrollmentId
        )
    }
}
