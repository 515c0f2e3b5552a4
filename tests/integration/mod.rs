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

//! Integration test utilities and helpers
//!
//! This module provides common test infrastructure for ADCS client
//! integration tests: a scripted certsrv mock, CSR and certificate
//! fixtures, and NTLM challenge construction.

#[cfg(feature = "simulator")]
pub mod cli_test;
pub mod lifecycle_test;
pub mod transport_test;

use base64::prelude::*;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use usg_adcs_client::{AdcsClient, AdcsClientConfig};

/// Content types used by certsrv
pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";
pub const CONTENT_TYPE_PKIX_CERT: &str = "application/pkix-cert";
pub const CONTENT_TYPE_PKCS7: &str = "application/x-pkcs7-certificates";

/// Certsrv page paths
pub const PATH_CERTFNSH: &str = "/certsrv/certfnsh.asp";
pub const PATH_CERTNEW_CER: &str = "/certsrv/certnew.cer";
pub const PATH_CERTNEW_P7B: &str = "/certsrv/certnew.p7b";
pub const PATH_CERTCARC: &str = "/certsrv/certcarc.asp";

pub const PENDING_STATUS: &str = "The operation completed successfully. 0x0 (WIN32: 0)";
pub const DENIED_STATUS: &str = "The request was denied by a certificate manager or CA administrator. 0x80094014 (-2146877420 CERTSRV_E_ADMIN_DENIED_REQUEST)";

/// Scripted certsrv for integration tests
pub struct MockCertsrv {
    server: MockServer,
}

impl MockCertsrv {
    /// Create a new mock certsrv
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    /// Base URL of the certsrv application
    pub fn url(&self) -> String {
        format!("{}/certsrv", self.server.uri())
    }

    /// Get a reference to the inner MockServer for custom mocking
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Client without credentials pointed at this server
    pub async fn client(&self) -> AdcsClient {
        let config = AdcsClientConfig::builder()
            .server_url(self.url())
            .expect("Valid URL")
            .build()
            .expect("Valid config");
        AdcsClient::new(config).await.expect("Client creation failed")
    }

    /// Mock a submission page assigning the given request id
    pub async fn mock_submission_assigned(&self, id: u32) {
        let page = format!(
            "<html><body><p>Your Request Id is {id}.</p>\
             <a href=\"certnew.cer?ReqID={id}&amp;Enc=b64\">Download certificate</a></body></html>"
        );
        self.mock_submission(200, CONTENT_TYPE_HTML, page.into_bytes())
            .await;
    }

    /// Mock a raw submission response
    pub async fn mock_submission(&self, status: u16, content_type: &str, body: Vec<u8>) {
        Mock::given(method("POST"))
            .and(path(PATH_CERTFNSH))
            .respond_with(ResponseTemplate::new(status).set_body_raw(body, content_type))
            .mount(&self.server)
            .await;
    }

    /// Mock the `certnew.cer` answer for a request id
    pub async fn mock_certnew(&self, id: &str, status: u16, content_type: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(PATH_CERTNEW_CER))
            .and(query_param("ReqID", id))
            .respond_with(ResponseTemplate::new(status).set_body_raw(body, content_type))
            .mount(&self.server)
            .await;
    }

    /// Mock a disposition page for a request id
    pub async fn mock_disposition(&self, id: &str, message: &str, last_status: &str) {
        self.mock_certnew(
            id,
            200,
            CONTENT_TYPE_HTML,
            disposition_page(message, last_status).into_bytes(),
        )
        .await;
    }

    /// Mock `certcarc.asp` exposing a renewal counter
    pub async fn mock_certcarc(&self, renewals: u32) {
        let page = format!("<script>\r\nvar nRenewals={renewals};\r\n</script>");
        Mock::given(method("GET"))
            .and(path(PATH_CERTCARC))
            .respond_with(ResponseTemplate::new(200).set_body_raw(page, CONTENT_TYPE_HTML))
            .mount(&self.server)
            .await;
    }

    /// Mock the CA certificate for the given renewal
    pub async fn mock_ca_cert(&self, renewal: &str, content_type: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(PATH_CERTNEW_CER))
            .and(query_param("ReqID", "CACert"))
            .and(query_param("Renewal", renewal))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, content_type))
            .mount(&self.server)
            .await;
    }

    /// Mock the CA chain
    pub async fn mock_ca_chain(&self, status: u16, content_type: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(PATH_CERTNEW_P7B))
            .respond_with(ResponseTemplate::new(status).set_body_raw(body, content_type))
            .mount(&self.server)
            .await;
    }
}

/// A certsrv disposition page
pub fn disposition_page(message: &str, last_status: &str) -> String {
    format!(
        "<html><body><table>\r\n\
         <tr><td>Disposition message:</td><td>\t\t{message}\r\n</td></tr>\r\n\
         <tr><td>LastStatus:</td><td>\t\t{last_status}\r\n</td></tr>\r\n\
         </table></body></html>"
    )
}

/// A PEM CSR carrying the given DNS names
pub fn csr_pem(names: &[&str]) -> String {
    let key = rcgen::KeyPair::generate().expect("Key generation failed");
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let params = rcgen::CertificateParams::new(names).expect("Valid params");
    params
        .serialize_request(&key)
        .expect("CSR generation failed")
        .pem()
        .expect("PEM encoding failed")
}

/// A self-signed PEM certificate
pub fn cert_pem(name: &str) -> String {
    let key = rcgen::KeyPair::generate().expect("Key generation failed");
    let params = rcgen::CertificateParams::new(vec![name.to_string()]).expect("Valid params");
    params.self_signed(&key).expect("Signing failed").pem()
}

/// A degenerate PKCS#7 holding the given PEM certificates, base64 encoded
pub fn p7b_base64(pems: &[String]) -> String {
    use der::{Decode, Encode};

    let certs: Vec<x509_cert::Certificate> = pems
        .iter()
        .map(|pem| {
            let der = usg_adcs_client::tls::parse_pem_certificates(pem.as_bytes())
                .expect("Valid PEM")
                .remove(0);
            x509_cert::Certificate::from_der(&der).expect("Valid DER")
        })
        .collect();
    let p7 = cms::content_info::ContentInfo::try_from(certs)
        .expect("Degenerate SignedData")
        .to_der()
        .expect("DER encoding failed");
    BASE64_STANDARD.encode(p7)
}

/// An NTLM CHALLENGE (type 2) message with a NetBIOS domain AV pair
pub fn ntlm_challenge(target_name: &str) -> Vec<u8> {
    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    let name = utf16(target_name);
    let mut info = Vec::new();
    info.extend_from_slice(&2u16.to_le_bytes());
    info.extend_from_slice(&(name.len() as u16).to_le_bytes());
    info.extend_from_slice(&name);
    info.extend_from_slice(&[0, 0, 0, 0]);

    // UNICODE | NTLM | EXTENDED_SESSIONSECURITY | TARGET_INFO
    let flags: u32 = 0x0000_0001 | 0x0000_0200 | 0x0008_0000 | 0x0080_0000;

    let mut msg = Vec::new();
    msg.extend_from_slice(b"NTLMSSP\0");
    msg.extend_from_slice(&2u32.to_le_bytes());
    msg.extend_from_slice(&(name.len() as u16).to_le_bytes());
    msg.extend_from_slice(&(name.len() as u16).to_le_bytes());
    msg.extend_from_slice(&48u32.to_le_bytes());
    msg.extend_from_slice(&flags.to_le_bytes());
    msg.extend_from_slice(&[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]);
    msg.extend_from_slice(&[0; 8]);
    msg.extend_from_slice(&(info.len() as u16).to_le_bytes());
    msg.extend_from_slice(&(info.len() as u16).to_le_bytes());
    msg.extend_from_slice(&((48 + name.len()) as u32).to_le_bytes());
    msg.extend_from_slice(&name);
    msg.extend_from_slice(&info);
    msg
}
