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

//! Integration tests for the adcs-enroll command-line tool

use crate::integration::csr_pem;
use der::DecodePem;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;

use usg_adcs_client::simulator::AdcsSimulator;
use usg_adcs_client::{Certificate, RequestState, RequestStatus};

async fn adcs_enroll(server: &str, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_adcs-enroll"))
        .arg("--server")
        .arg(server)
        .arg("--quiet")
        .args(args)
        .env_remove("ADCS_PASSWORD")
        .env_remove("RUST_LOG")
        .output()
        .await
        .expect("Failed to run adcs-enroll")
}

fn read_status(path: &Path) -> (String, RequestStatus) {
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    let status = serde_json::from_value(value["status"].clone()).unwrap();
    (value["csr_sha256"].as_str().unwrap().to_string(), status)
}

fn assert_root(pem: &[u8], sim: &AdcsSimulator) {
    let root = Certificate::from_pem(sim.root_pem().as_bytes()).unwrap();
    assert_eq!(Certificate::from_pem(pem).unwrap(), root);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_issues_and_persists_state() {
    let sim = AdcsSimulator::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let csr = dir.path().join("host.csr");
    let state = dir.path().join("host.json");
    let out = dir.path().join("host.pem");
    let chain = dir.path().join("chain.pem");
    std::fs::write(&csr, csr_pem(&["host.example.com"])).unwrap();

    let output = adcs_enroll(
        &sim.url(),
        &[
            "request",
            "--csr",
            csr.to_str().unwrap(),
            "--state",
            state.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
            "--chain-out",
            chain.to_str().unwrap(),
        ],
    )
    .await;

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(std::fs::read_to_string(&out)
        .unwrap()
        .starts_with("-----BEGIN CERTIFICATE-----"));
    assert_root(&std::fs::read(&chain).unwrap(), &sim);

    let (_, status) = read_status(&state);
    assert_eq!(status.state, RequestState::Ready);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pending_request_resumes() {
    let sim = AdcsSimulator::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let csr = dir.path().join("host.csr");
    let state = dir.path().join("host.json");
    let out = dir.path().join("host.pem");
    std::fs::write(&csr, csr_pem(&["host.example.com", "delay.1s.sim"])).unwrap();

    let args = [
        "request",
        "--csr",
        csr.to_str().unwrap(),
        "--state",
        state.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
    ];

    let output = adcs_enroll(&sim.url(), &args).await;
    assert!(output.status.success());
    let (digest, status) = read_status(&state);
    assert_eq!(status.state, RequestState::Pending);
    assert_eq!(status.enrollment_id, "1");
    assert!(!out.exists());

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;

    let output = adcs_enroll(&sim.url(), &args).await;
    assert!(output.status.success());
    let (same_digest, status) = read_status(&state);
    assert_eq!(same_digest, digest);
    assert_eq!(status.state, RequestState::Ready);
    assert_eq!(status.enrollment_id, "1");
    assert!(out.exists());

    // Only one request was ever submitted.
    assert_eq!(sim.submitted_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_changed_csr_resets_state() {
    let sim = AdcsSimulator::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let csr = dir.path().join("host.csr");
    let state = dir.path().join("host.json");
    let args = [
        "request",
        "--csr",
        csr.to_str().unwrap(),
        "--state",
        state.to_str().unwrap(),
    ];

    std::fs::write(&csr, csr_pem(&["reject.sim"])).unwrap();
    let output = adcs_enroll(&sim.url(), &args).await;
    assert!(!output.status.success());
    let (first_digest, status) = read_status(&state);
    assert_eq!(status.state, RequestState::Rejected);

    // Unchanged CSR: terminal state is kept, nothing is submitted.
    let output = adcs_enroll(&sim.url(), &args).await;
    assert!(!output.status.success());
    assert_eq!(sim.submitted_count(), 1);

    std::fs::write(&csr, csr_pem(&["host.example.com"])).unwrap();
    let output = adcs_enroll(&sim.url(), &args).await;
    assert!(output.status.success());
    let (digest, status) = read_status(&state);
    assert_ne!(digest, first_digest);
    assert_eq!(status.state, RequestState::Ready);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ca_commands() {
    let sim = AdcsSimulator::start().await.unwrap();

    let output = adcs_enroll(&sim.url(), &["ca-cert"]).await;
    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout).unwrap(), sim.root_pem());

    let output = adcs_enroll(&sim.url(), &["ca-chain"]).await;
    assert!(output.status.success());
    assert_root(&output.stdout, &sim);

    let output = adcs_enroll(&sim.url(), &["ca-chain", "--format", "p7b"]).await;
    assert!(output.status.success());
    assert!(!String::from_utf8(output.stdout).unwrap().contains("BEGIN"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_registry_issuer() {
    let sim = AdcsSimulator::start().await.unwrap();
    sim.require_basic_auth("svc", "secret");
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("root.pem"), sim.root_pem()).unwrap();
    let registry = dir.path().join("issuers.toml");
    std::fs::write(
        &registry,
        format!(
            r#"
[[issuers]]
kind = "ClusterAdcsIssuer"
name = "sim"
url = "{}"
credentials_ref = "sim-creds"
ca_bundle_file = "root.pem"

[[credentials]]
name = "sim-creds"
namespace = "kube-system"
username = "svc"
password = "secret"
"#,
            sim.url()
        ),
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_adcs-enroll"))
        .arg("--registry")
        .arg(&registry)
        .arg("--issuer")
        .arg("clusteradcsissuer/sim")
        .arg("ca-cert")
        .env_remove("ADCS_PASSWORD")
        .output()
        .await
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8(output.stdout).unwrap(), sim.root_pem());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unusable_csr_stops_waiting() {
    let sim = AdcsSimulator::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let csr = dir.path().join("host.csr");
    let state = dir.path().join("host.json");
    std::fs::write(&csr, "not a certificate request").unwrap();

    let output = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        adcs_enroll(
            &sim.url(),
            &[
                "request",
                "--csr",
                csr.to_str().unwrap(),
                "--state",
                state.to_str().unwrap(),
                "--retry-interval",
                "1h",
                "--wait",
            ],
        ),
    )
    .await
    .expect("adcs-enroll kept waiting on an unusable CSR");

    assert!(!output.status.success());
    let (_, status) = read_status(&state);
    assert_eq!(status.state, RequestState::Unset);
    assert_eq!(sim.request_count(), 0);
}
