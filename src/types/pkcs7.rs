//! PKCS#7/CMS and PEM utilities.
//!
//! ADCS returns the CA chain from `certnew.p7b` as a degenerate PKCS#7
//! SignedData ("certs-only"), base64 encoded when `ENC=b64` is requested.
//! Some deployments add `-----BEGIN PKCS7-----` framing; plain DER is also
//! accepted.

use base64::prelude::*;
use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use const_oid::db::rfc5911::ID_SIGNED_DATA;
use der::{Decode, Encode};
use x509_cert::Certificate;

use crate::error::{AdcsError, Result};

/// PEM line length.
const PEM_LINE_LENGTH: usize = 64;

/// Certificates of a CA chain returned by `certnew.p7b`.
#[derive(Debug, Clone)]
pub struct CaChain {
    /// The CA certificates, in the order the server returned them.
    pub certificates: Vec<Certificate>,
}

impl CaChain {
    /// Create a chain from certificates.
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self { certificates }
    }

    /// Parse a PKCS#7 chain body (base64, PEM-framed base64, or DER).
    pub fn parse(body: &[u8]) -> Result<Self> {
        let der_bytes = if body.first() == Some(&0x30) {
            body.to_vec()
        } else {
            decode_base64(&strip_pem_framing(body))?
        };

        let content_info = ContentInfo::from_der(&der_bytes)
            .map_err(|e| AdcsError::cms_parsing(format!("Failed to parse ContentInfo: {}", e)))?;
        let signed_data = extract_signed_data(&content_info)?;

        Ok(Self::new(extract_certificates(&signed_data)?))
    }

    /// Returns true if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Returns the number of certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Iterate over the certificates.
    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.certificates.iter()
    }

    /// Encode the chain as concatenated `CERTIFICATE` PEM blocks.
    pub fn to_pem(&self) -> Result<String> {
        let mut out = String::new();
        for cert in &self.certificates {
            let der = cert.to_der()?;
            out.push_str(&pem_encode("CERTIFICATE", &der));
        }
        Ok(out)
    }
}

impl IntoIterator for CaChain {
    type Item = Certificate;
    type IntoIter = std::vec::IntoIter<Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certificates.into_iter()
    }
}

/// Decode base64 data, ignoring whitespace and line endings.
pub(crate) fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    BASE64_STANDARD.decode(&cleaned).map_err(AdcsError::Base64)
}

/// Drop `-----BEGIN ...-----` / `-----END ...-----` lines.
fn strip_pem_framing(data: &[u8]) -> Vec<u8> {
    String::from_utf8_lossy(data)
        .lines()
        .filter(|line| !line.trim_start().starts_with("-----"))
        .collect::<Vec<_>>()
        .join("")
        .into_bytes()
}

fn extract_signed_data(content_info: &ContentInfo) -> Result<SignedData> {
    if content_info.content_type != ID_SIGNED_DATA {
        return Err(AdcsError::cms_parsing(format!(
            "Expected SignedData OID, got {}",
            content_info.content_type
        )));
    }

    let content = content_info
        .content
        .to_der()
        .map_err(|e| AdcsError::cms_parsing(format!("Failed to encode content: {}", e)))?;

    SignedData::from_der(&content)
        .map_err(|e| AdcsError::cms_parsing(format!("Failed to parse SignedData: {}", e)))
}

fn extract_certificates(signed_data: &SignedData) -> Result<Vec<Certificate>> {
    let Some(cert_set) = &signed_data.certificates else {
        return Ok(Vec::new());
    };

    let mut certificates = Vec::new();
    for cert_choice in cert_set.0.iter() {
        let cert_der = cert_choice
            .to_der()
            .map_err(|e| AdcsError::cms_parsing(format!("Failed to encode certificate: {}", e)))?;

        match Certificate::from_der(&cert_der) {
            Ok(cert) => certificates.push(cert),
            Err(e) => tracing::warn!("Skipping non-X.509 certificate: {}", e),
        }
    }

    Ok(certificates)
}

/// Encode data to base64 with line wrapping.
pub fn encode_base64_wrapped(data: &[u8], line_length: usize) -> String {
    let encoded = BASE64_STANDARD.encode(data);
    encoded
        .as_bytes()
        .chunks(line_length.max(1))
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap DER bytes in a PEM block with the given label.
pub fn pem_encode(label: &str, der: &[u8]) -> String {
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        encode_base64_wrapped(der, PEM_LINE_LENGTH)
    )
}
