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

//! Integration tests for the request lifecycle over HTTP

use crate::integration::*;
use std::sync::Arc;
use std::time::Duration;

use usg_adcs_client::{
    AdcsClient, AdcsClientConfig, AdcsError, EnrollmentRequest, Intervals, Issuer, RequestState,
    RequestStatus, Schedule,
};

fn intervals() -> Intervals {
    Intervals::default()
        .with_status_check(Duration::from_secs(30))
        .with_retry(Duration::from_secs(5))
}

async fn issuer_for(mock: &MockCertsrv) -> Issuer {
    Issuer::new(Arc::new(mock.client().await), intervals())
}

fn pending(id: &str) -> RequestStatus {
    RequestStatus {
        state: RequestState::Pending,
        enrollment_id: id.to_string(),
        reason: "Taken Under Submission".to_string(),
    }
}

#[tokio::test]
async fn test_unset_to_pending() {
    let mock = MockCertsrv::start().await;
    mock.mock_submission_assigned(51).await;
    mock.mock_disposition("51", "Taken Under Submission", PENDING_STATUS)
        .await;

    let issuer = issuer_for(&mock).await;
    let request = EnrollmentRequest::new(csr_pem(&["host.example.com"]), "WebServer");
    let transition = issuer
        .advance(&request, &RequestStatus::default())
        .await
        .unwrap();

    assert_eq!(transition.status.state, RequestState::Pending);
    assert_eq!(transition.status.enrollment_id, "51");
    assert!(transition.status.reason.starts_with("Taken Under Submission"));
    assert_eq!(transition.schedule, Schedule::RetryAfter(Duration::from_secs(30)));
    assert!(transition.error.is_none());
}

#[tokio::test]
async fn test_pending_to_ready_with_chain() {
    let mock = MockCertsrv::start().await;
    let pem = cert_pem("host.example.com");
    let chain = p7b_base64(&[cert_pem("root.example.com")]);
    mock.mock_certnew("52", 200, CONTENT_TYPE_PKIX_CERT, pem.clone().into_bytes())
        .await;
    mock.mock_certcarc(0).await;
    mock.mock_ca_chain(200, CONTENT_TYPE_PKCS7, chain.clone().into_bytes())
        .await;

    let issuer = issuer_for(&mock).await;
    let request = EnrollmentRequest::new(csr_pem(&["host.example.com"]), "WebServer");
    let transition = issuer.advance(&request, &pending("52")).await.unwrap();

    assert_eq!(transition.status.state, RequestState::Ready);
    assert_eq!(transition.status.enrollment_id, "52");
    assert!(transition.status.reason.is_empty());
    assert_eq!(transition.certificate.as_deref(), Some(pem.as_bytes()));
    assert_eq!(transition.ca_chain.as_deref(), Some(chain.as_bytes()));
    assert_eq!(transition.schedule, Schedule::Done);
}

#[tokio::test]
async fn test_ready_without_chain() {
    let mock = MockCertsrv::start().await;
    let pem = cert_pem("host.example.com");
    mock.mock_certnew("53", 200, CONTENT_TYPE_PKIX_CERT, pem.into_bytes())
        .await;
    mock.mock_certcarc(0).await;
    mock.mock_ca_chain(500, "text/plain", b"broken".to_vec()).await;

    let issuer = issuer_for(&mock).await;
    let request = EnrollmentRequest::new(csr_pem(&["host.example.com"]), "WebServer");
    let transition = issuer.advance(&request, &pending("53")).await.unwrap();

    assert_eq!(transition.status.state, RequestState::Ready);
    assert!(transition.certificate.is_some());
    assert!(transition.ca_chain.is_none());
    assert!(transition.error.is_none());
}

#[tokio::test]
async fn test_pending_to_rejected() {
    let mock = MockCertsrv::start().await;
    mock.mock_disposition("54", "Denied by Policy Module", DENIED_STATUS)
        .await;

    let issuer = issuer_for(&mock).await;
    let request = EnrollmentRequest::new(csr_pem(&["host.example.com"]), "WebServer");
    let transition = issuer.advance(&request, &pending("54")).await.unwrap();

    assert_eq!(transition.status.state, RequestState::Rejected);
    assert_eq!(transition.status.enrollment_id, "54");
    assert!(transition.status.reason.contains("CERTSRV_E_ADMIN_DENIED_REQUEST"));
    assert_eq!(transition.schedule, Schedule::Done);
}

#[tokio::test]
async fn test_transport_failure_keeps_state() {
    let config = AdcsClientConfig::builder()
        .server_url("http://127.0.0.1:9/certsrv")
        .unwrap()
        .build()
        .unwrap();
    let issuer = Issuer::new(
        Arc::new(AdcsClient::new(config).await.unwrap()),
        intervals(),
    );
    let request = EnrollmentRequest::new(csr_pem(&["host.example.com"]), "WebServer");

    let current = pending("55");
    let transition = issuer.advance(&request, &current).await.unwrap();

    assert_eq!(transition.status, current);
    assert_eq!(transition.schedule, Schedule::RetryAfter(Duration::from_secs(5)));
    assert!(transition.is_local_error());
}

#[tokio::test]
async fn test_server_error_keeps_pending_state() {
    let mock = MockCertsrv::start().await;
    mock.mock_certnew("56", 503, "text/html", b"<h1>Service Unavailable</h1>".to_vec())
        .await;

    let issuer = issuer_for(&mock).await;
    let request = EnrollmentRequest::new(csr_pem(&["host.example.com"]), "WebServer");
    let current = pending("56");
    let transition = issuer.advance(&request, &current).await.unwrap();

    assert_eq!(transition.status, current);
    assert_eq!(transition.schedule, Schedule::RetryAfter(Duration::from_secs(5)));
    assert!(matches!(
        transition.error,
        Some(AdcsError::ServerError { status: 503, .. })
    ));
}

#[tokio::test]
async fn test_rejected_credentials_keep_unset_state() {
    let mock = MockCertsrv::start().await;
    mock.mock_submission(401, "text/html", b"<h1>401 - Unauthorized</h1>".to_vec())
        .await;

    let issuer = issuer_for(&mock).await;
    let request = EnrollmentRequest::new(csr_pem(&["host.example.com"]), "WebServer");
    let transition = issuer
        .advance(&request, &RequestStatus::default())
        .await
        .unwrap();

    assert_eq!(transition.status, RequestStatus::default());
    assert_eq!(transition.schedule, Schedule::RetryAfter(Duration::from_secs(5)));
    assert!(transition.is_local_error());
}
