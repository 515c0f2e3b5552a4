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

//! Integration tests for NTLM and HTTP Basic authentication

use crate::integration::*;
use base64::prelude::*;
use wiremock::matchers::{header, header_regex, method, path};
use wiremock::{Mock, ResponseTemplate};

use usg_adcs_client::{AdcsClient, AdcsClientConfig, AdcsError, CertificateAuthority};

/// `NTLMSSP\0` followed by message type 1 / 3, base64 encoded.
const NTLM_NEGOTIATE_PREFIX: &str = "^NTLM TlRMTVNTUAABAAAA";
const NTLM_AUTHENTICATE_PREFIX: &str = "^NTLM TlRMTVNTUAADAAAA";

async fn client_for(mock: &MockCertsrv, username: &str, password: &str) -> AdcsClient {
    let config = AdcsClientConfig::builder()
        .server_url(mock.url())
        .expect("Valid URL")
        .http_auth(username, password)
        .build()
        .expect("Valid config");
    AdcsClient::new(config).await.expect("Client creation failed")
}

/// Mount a certsrv page behind an NTLM handshake.
async fn mount_ntlm_protected(mock: &MockCertsrv, page_path: &str, ok: ResponseTemplate) {
    let challenge = BASE64_STANDARD.encode(ntlm_challenge("CORP"));

    Mock::given(method("GET"))
        .and(path(page_path))
        .and(header_regex("Authorization", NTLM_AUTHENTICATE_PREFIX))
        .respond_with(ok)
        .with_priority(1)
        .mount(mock.inner())
        .await;
    Mock::given(method("GET"))
        .and(path(page_path))
        .and(header_regex("Authorization", NTLM_NEGOTIATE_PREFIX))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", format!("NTLM {}", challenge).as_str()),
        )
        .with_priority(2)
        .mount(mock.inner())
        .await;
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(
            ResponseTemplate::new(401)
                .append_header("WWW-Authenticate", "Negotiate")
                .append_header("WWW-Authenticate", "NTLM"),
        )
        .with_priority(10)
        .mount(mock.inner())
        .await;
}

#[tokio::test]
async fn test_ntlm_handshake() {
    let mock = MockCertsrv::start().await;
    let pem = cert_pem("host.example.com");
    mount_ntlm_protected(
        &mock,
        PATH_CERTNEW_CER,
        ResponseTemplate::new(200).set_body_raw(pem.clone(), CONTENT_TYPE_PKIX_CERT),
    )
    .await;

    let client = client_for(&mock, "CORP\\svc-enroll", "secret").await;
    let outcome = client.get_existing_certificate("31").await;

    assert!(outcome.error.is_none(), "unexpected error {:?}", outcome.error);
    assert_eq!(outcome.payload, pem.as_bytes());

    let requests = mock.inner().received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_ntlm_handshakes_do_not_interleave() {
    let mock = MockCertsrv::start().await;
    let pem = cert_pem("host.example.com");
    mount_ntlm_protected(
        &mock,
        PATH_CERTNEW_CER,
        ResponseTemplate::new(200).set_body_raw(pem.clone(), CONTENT_TYPE_PKIX_CERT),
    )
    .await;

    let client = std::sync::Arc::new(client_for(&mock, "CORP\\svc-enroll", "secret").await);
    let (first, second) = tokio::join!(
        {
            let client = client.clone();
            tokio::spawn(async move { client.get_existing_certificate("35").await })
        },
        {
            let client = client.clone();
            tokio::spawn(async move { client.get_existing_certificate("36").await })
        }
    );
    for outcome in [first.unwrap(), second.unwrap()] {
        assert!(outcome.error.is_none(), "unexpected error {:?}", outcome.error);
        assert_eq!(outcome.payload, pem.as_bytes());
    }

    // Each handshake runs to completion before the next one starts.
    let legs: Vec<&str> = mock
        .inner()
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| match r.headers.get("authorization").map(|v| v.to_str().unwrap()) {
            None => "plain",
            Some(v) if v.starts_with("NTLM TlRMTVNTUAABAAAA") => "negotiate",
            Some(v) if v.starts_with("NTLM TlRMTVNTUAADAAAA") => "authenticate",
            Some(_) => "other",
        })
        .collect();
    assert_eq!(
        legs,
        ["plain", "negotiate", "authenticate", "plain", "negotiate", "authenticate"]
    );
}

#[tokio::test]
async fn test_ntlm_with_upn_username() {
    let mock = MockCertsrv::start().await;
    mount_ntlm_protected(
        &mock,
        PATH_CERTNEW_CER,
        ResponseTemplate::new(200).set_body_raw(
            disposition_page("Taken Under Submission", PENDING_STATUS),
            CONTENT_TYPE_HTML,
        ),
    )
    .await;

    let client = client_for(&mock, "svc-enroll@corp.example.com", "secret").await;
    let outcome = client.get_existing_certificate("32").await;
    assert_eq!(outcome.status, usg_adcs_client::EnrollmentStatus::Pending);
}

#[tokio::test]
async fn test_ntlm_without_challenge_fails() {
    let mock = MockCertsrv::start().await;
    Mock::given(method("GET"))
        .and(path(PATH_CERTNEW_CER))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", "NTLM"))
        .mount(mock.inner())
        .await;

    let client = client_for(&mock, "CORP\\svc-enroll", "secret").await;
    let outcome = client.get_existing_certificate("33").await;

    assert!(outcome.is_local_error());
    assert!(matches!(outcome.error, Some(AdcsError::Ntlm(_))));
}

#[tokio::test]
async fn test_basic_fallback() {
    let mock = MockCertsrv::start().await;
    let expected = format!("Basic {}", BASE64_STANDARD.encode("user:pass"));

    Mock::given(method("GET"))
        .and(path(PATH_CERTNEW_CER))
        .and(header("Authorization", expected.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            disposition_page("Taken Under Submission", PENDING_STATUS),
            CONTENT_TYPE_HTML,
        ))
        .with_priority(1)
        .mount(mock.inner())
        .await;
    Mock::given(method("GET"))
        .and(path(PATH_CERTNEW_CER))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Basic realm=\"certsrv\""),
        )
        .with_priority(10)
        .mount(mock.inner())
        .await;

    let client = client_for(&mock, "user", "pass").await;
    let outcome = client.get_existing_certificate("34").await;
    assert_eq!(outcome.status, usg_adcs_client::EnrollmentStatus::Pending);
}

#[tokio::test]
async fn test_post_body_is_replayed() {
    let mock = MockCertsrv::start().await;
    let expected = format!("Basic {}", BASE64_STANDARD.encode("user:pass"));

    Mock::given(method("POST"))
        .and(path(PATH_CERTFNSH))
        .and(header("Authorization", expected.as_str()))
        .and(wiremock::matchers::body_string_contains("Mode=newreq"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<p>Your Request Id is 40.</p>", CONTENT_TYPE_HTML),
        )
        .with_priority(1)
        .mount(mock.inner())
        .await;
    Mock::given(method("POST"))
        .and(path(PATH_CERTFNSH))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Basic realm=\"certsrv\""),
        )
        .with_priority(10)
        .mount(mock.inner())
        .await;
    Mock::given(method("GET"))
        .and(path(PATH_CERTNEW_CER))
        .and(header("Authorization", expected.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            disposition_page("Taken Under Submission", PENDING_STATUS),
            CONTENT_TYPE_HTML,
        ))
        .mount(mock.inner())
        .await;

    let client = client_for(&mock, "user", "pass").await;
    let outcome = client
        .request_certificate(&csr_pem(&["host.example.com"]), "WebServer")
        .await;
    assert_eq!(outcome.status, usg_adcs_client::EnrollmentStatus::Pending);
    assert_eq!(outcome.enrollment_id, "40");
}

#[tokio::test]
async fn test_verify_credentials_rejected() {
    let mock = MockCertsrv::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Basic realm=\"certsrv\""),
        )
        .mount(mock.inner())
        .await;

    let config = AdcsClientConfig::builder()
        .server_url(mock.url())
        .unwrap()
        .http_auth("user", "wrong")
        .verify_credentials(true)
        .build()
        .unwrap();

    let result = AdcsClient::new(config).await;
    assert!(matches!(
        result,
        Err(AdcsError::AuthenticationRejected { .. })
    ));
}

#[tokio::test]
async fn test_verify_credentials_accepted() {
    let mock = MockCertsrv::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html/>", CONTENT_TYPE_HTML))
        .mount(mock.inner())
        .await;

    let config = AdcsClientConfig::builder()
        .server_url(mock.url())
        .unwrap()
        .http_auth("user", "pass")
        .verify_credentials(true)
        .build()
        .unwrap();

    assert!(AdcsClient::new(config).await.is_ok());
}
