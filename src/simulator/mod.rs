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

//! In-process ADCS web enrollment simulator.
//!
//! Serves `certfnsh.asp`, `certnew.cer`, `certnew.p7b` and `certcarc.asp`
//! under `/certsrv` on a wiremock server. Issued certificates are signed
//! by a root generated at start-up.
//!
//! Behavior is ordered through DNS names in the CSR:
//!
//! | Name | Effect |
//! |---|---|
//! | `reject.sim` | Request is taken under submission, then denied |
//! | `delay.<duration>.sim` | Request stays pending for `<duration>` (e.g. `delay.5s.sim`) |
//! | `unauthorized.sim` | Server answers `401` |
//!
//! Any other CSR is issued synchronously by `certfnsh.asp`.
//!
//! # Example
//!
//! ```no_run
//! use usg_adcs_client::simulator::AdcsSimulator;
//! use usg_adcs_client::{AdcsClient, AdcsClientConfig, CertificateAuthority};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sim = AdcsSimulator::start().await?;
//! let config = AdcsClientConfig::builder().server_url(sim.url())?.build()?;
//! let client = AdcsClient::new(config).await?;
//! let ca = client.get_ca_certificate().await?;
//! assert_eq!(ca, sim.root_pem().as_bytes());
//! # Ok(())
//! # }
//! ```

mod pages;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

use base64::prelude::*;
use cms::content_info::ContentInfo;
use der::{Decode, Encode};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use regex::Regex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
use x509_cert::Certificate;

use crate::config::parse_interval;
use crate::error::{AdcsError, Result};
use crate::types::{content_types, encode_base64_wrapped, pages as certsrv_pages};

/// Path prefix of the simulated certsrv application.
pub const CERTSRV_PATH: &str = "/certsrv";

const HTML_UTF8: &str = "text/html; charset=utf-8";

/// Orders carried by the DNS names of a CSR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimOrders {
    /// Deny the request once its delay has passed.
    pub reject: bool,
    /// How long the request stays pending.
    pub delay: Duration,
    /// Answer `401`.
    pub unauthorized: bool,
}

static ORDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z0-9\-]+)\.(([a-z0-9\-]+)\.)?sim$").unwrap());

impl SimOrders {
    /// Read orders from DNS names. Unknown names are ignored and an
    /// unparseable delay counts as no delay.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut orders = Self::default();
        for name in names {
            let Some(caps) = ORDER.captures(name) else {
                continue;
            };
            match &caps[1] {
                "delay" => {
                    orders.delay = caps
                        .get(3)
                        .and_then(|d| parse_interval(d.as_str()).ok())
                        .unwrap_or_default();
                }
                "reject" => orders.reject = true,
                "unauthorized" => orders.unauthorized = true,
                _ => {}
            }
        }
        orders
    }

    fn is_deferred(&self) -> bool {
        self.reject || !self.delay.is_zero()
    }
}

#[derive(Debug)]
struct PendingRequest {
    csr_pem: String,
    orders: SimOrders,
    submitted: Instant,
    issued: Option<String>,
}

struct SimulatedCa {
    cert: rcgen::Certificate,
    key: KeyPair,
    chain_p7b: String,
}

impl SimulatedCa {
    fn generate() -> Result<Self> {
        let key = KeyPair::generate().map_err(|e| AdcsError::simulator(e.to_string()))?;
        let mut params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| AdcsError::simulator(e.to_string()))?;
        params
            .distinguished_name
            .push(DnType::CommonName, "ADCS Simulator Root CA");
        params
            .distinguished_name
            .push(DnType::OrganizationName, "ADCS simulator");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params
            .self_signed(&key)
            .map_err(|e| AdcsError::simulator(e.to_string()))?;

        let root = Certificate::from_der(cert.der())?;
        let p7 = ContentInfo::try_from(vec![root])
            .map_err(|e| AdcsError::cms_parsing(e.to_string()))?
            .to_der()?;

        Ok(Self {
            cert,
            key,
            chain_p7b: encode_base64_wrapped(&p7, 76),
        })
    }

    /// Sign a CSR: one year, ServerAuth, subject and SANs from the CSR.
    fn issue(&self, csr_pem: &str) -> Result<String> {
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| AdcsError::simulator(format!("Cannot decode CSR: {}", e)))?;

        let now = time::OffsetDateTime::now_utc();
        let mut serial = rand::random::<[u8; 16]>();
        serial[0] = (serial[0] & 0x7f) | 0x01;

        csr.params.serial_number = Some(SerialNumber::from_slice(&serial));
        csr.params.not_before = now;
        csr.params.not_after = now + time::Duration::days(365);
        csr.params.is_ca = IsCa::NoCa;
        csr.params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        csr.params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let cert = csr
            .signed_by(&self.cert, &self.key)
            .map_err(|e| AdcsError::simulator(format!("Cannot create certificate: {}", e)))?;
        Ok(cert.pem())
    }
}

struct SimState {
    ca: SimulatedCa,
    next_id: AtomicU64,
    requests: Mutex<HashMap<u64, PendingRequest>>,
    seen: AtomicUsize,
    basic_auth: Mutex<Option<String>>,
}

impl SimState {
    /// Count the request and check credentials. Returns the `401` answer
    /// when they are required and missing.
    fn admit(&self, request: &Request) -> Option<ResponseTemplate> {
        self.seen.fetch_add(1, Ordering::SeqCst);

        let expected = self.basic_auth.lock().ok()?.clone()?;
        let given = request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok());
        if given == Some(expected.as_str()) {
            return None;
        }
        Some(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", "Basic realm=\"certsrv\"")
                .set_body_raw(pages::unauthorized(), HTML_UTF8),
        )
    }

    fn csr_names(csr_pem: &str) -> Result<Vec<String>> {
        let csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| AdcsError::simulator(format!("Cannot decode CSR: {}", e)))?;
        Ok(csr
            .params
            .subject_alt_names
            .iter()
            .filter_map(|san| match san {
                SanType::DnsName(name) => Some(name.as_str().to_string()),
                _ => None,
            })
            .collect())
    }
}

fn html(page: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(page, HTML_UTF8)
}

fn certificate(pem: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(pem, content_types::PKIX_CERT)
}

fn bad_request(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_raw(format!("{}\n", text), "text/plain")
}

fn unauthorized_order() -> ResponseTemplate {
    ResponseTemplate::new(401).set_body_raw(pages::unauthorized(), HTML_UTF8)
}

struct CertfnshAsp(Arc<SimState>);

impl Respond for CertfnshAsp {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let state = &self.0;
        if let Some(denied) = state.admit(request) {
            return denied;
        }

        let Some(csr_pem) = url::form_urlencoded::parse(&request.body)
            .find(|(k, _)| k == "CertRequest")
            .map(|(_, v)| v.into_owned())
        else {
            return bad_request("No CertRequest found");
        };

        let names = match SimState::csr_names(&csr_pem) {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "simulator received an undecodable CSR");
                return bad_request("Cannot decode CSR");
            }
        };
        let orders = SimOrders::from_names(names.iter().map(String::as_str));
        tracing::debug!(?orders, "simulator submission");

        if orders.unauthorized {
            return unauthorized_order();
        }

        if orders.is_deferred() {
            let id = state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let entry = PendingRequest {
                csr_pem,
                orders,
                submitted: Instant::now(),
                issued: None,
            };
            match state.requests.lock() {
                Ok(mut requests) => {
                    requests.insert(id, entry);
                }
                Err(_) => return bad_request("Cannot store CSR"),
            }
            return html(pages::submitted(id));
        }

        match state.ca.issue(&csr_pem) {
            Ok(pem) => certificate(pem),
            Err(e) => {
                tracing::warn!(error = %e, "simulator could not issue");
                bad_request("Cannot create certificate")
            }
        }
    }
}

struct CertnewCer(Arc<SimState>);

impl Respond for CertnewCer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let state = &self.0;
        if let Some(denied) = state.admit(request) {
            return denied;
        }

        let Some(req_id) = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "ReqID")
            .map(|(_, v)| v.into_owned())
        else {
            return bad_request("Missing ReqID");
        };

        if req_id == "CACert" {
            return certificate(state.ca.cert.pem());
        }

        let Ok(mut requests) = state.requests.lock() else {
            return bad_request("Cannot open CSR");
        };
        let Some(entry) = req_id.parse::<u64>().ok().and_then(|id| requests.get_mut(&id)) else {
            return html(pages::disposition(&format!("Cannot open CSR {}.", req_id), "Error"));
        };

        if let Some(pem) = &entry.issued {
            return certificate(pem.clone());
        }
        if entry.orders.unauthorized {
            return unauthorized_order();
        }
        if entry.submitted.elapsed() < entry.orders.delay {
            return html(pages::disposition(pages::PENDING_MESSAGE, pages::PENDING_STATUS));
        }
        if entry.orders.reject {
            return html(pages::disposition(pages::REJECTED_MESSAGE, pages::REJECTED_STATUS));
        }

        match state.ca.issue(&entry.csr_pem) {
            Ok(pem) => {
                entry.issued = Some(pem.clone());
                certificate(pem)
            }
            Err(_) => html(pages::disposition("Cannot create certificate", "Error")),
        }
    }
}

struct CertnewP7b(Arc<SimState>);

impl Respond for CertnewP7b {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if let Some(denied) = self.0.admit(request) {
            return denied;
        }
        ResponseTemplate::new(200)
            .set_body_raw(self.0.ca.chain_p7b.clone(), content_types::PKCS7_CERTIFICATES)
    }
}

struct CertcarcAsp(Arc<SimState>);

impl Respond for CertcarcAsp {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if let Some(denied) = self.0.admit(request) {
            return denied;
        }
        html(pages::ca_renewals(0))
    }
}

/// Simulated ADCS certsrv server.
pub struct AdcsSimulator {
    server: MockServer,
    state: Arc<SimState>,
}

impl AdcsSimulator {
    /// Start a simulator on a random local port.
    pub async fn start() -> Result<Self> {
        Self::serve(MockServer::start().await).await
    }

    /// Start a simulator on the given listener.
    pub async fn start_on(listener: std::net::TcpListener) -> Result<Self> {
        Self::serve(MockServer::builder().listener(listener).start().await).await
    }

    async fn serve(server: MockServer) -> Result<Self> {
        let state = Arc::new(SimState {
            ca: SimulatedCa::generate()?,
            next_id: AtomicU64::new(0),
            requests: Mutex::new(HashMap::new()),
            seen: AtomicUsize::new(0),
            basic_auth: Mutex::new(None),
        });
        let sim = Self { server, state };
        sim.mount().await;
        tracing::info!(url = %sim.url(), "ADCS simulator listening");
        Ok(sim)
    }

    /// Base URL of the simulated certsrv application.
    pub fn url(&self) -> String {
        format!("{}{}", self.server.uri(), CERTSRV_PATH)
    }

    /// Root CA certificate (PEM) that signs issued certificates.
    pub fn root_pem(&self) -> String {
        self.state.ca.cert.pem()
    }

    /// Answer `401` unless requests carry these Basic credentials.
    pub fn require_basic_auth(&self, username: &str, password: &str) {
        let token = BASE64_STANDARD.encode(format!("{}:{}", username, password));
        if let Ok(mut auth) = self.state.basic_auth.lock() {
            *auth = Some(format!("Basic {}", token));
        }
    }

    /// Number of HTTP requests the simulator has answered.
    pub fn request_count(&self) -> usize {
        self.state.seen.load(Ordering::SeqCst)
    }

    /// Number of requests taken under submission so far.
    pub fn submitted_count(&self) -> u64 {
        self.state.next_id.load(Ordering::SeqCst)
    }

    async fn mount(&self) {
        let page = |name: &str| format!("{}/{}", CERTSRV_PATH, name);

        Mock::given(method("POST"))
            .and(path(page(certsrv_pages::CERTFNSH_ASP)))
            .respond_with(CertfnshAsp(self.state.clone()))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path(page(certsrv_pages::CERTNEW_CER)))
            .respond_with(CertnewCer(self.state.clone()))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path(page(certsrv_pages::CERTNEW_P7B)))
            .respond_with(CertnewP7b(self.state.clone()))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path(page(certsrv_pages::CERTCARC_ASP)))
            .respond_with(CertcarcAsp(self.state.clone()))
            .mount(&self.server)
            .await;
    }
}
