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

//! HTTP transport with NTLM / Basic credential negotiation.
//!
//! Every request is first sent without an `Authorization` header. When the
//! server answers `401` and offers `NTLM` (or `Negotiate`), a three-leg
//! NTLM handshake is run on the same keep-alive connection; otherwise the
//! request is replayed once with HTTP Basic credentials.
//!
//! NTLM authenticates a connection, not a request, so authenticated sends
//! are serialized: the client keeps a single idle connection per host and
//! only one handshake uses it at a time.

use std::sync::Arc;

use base64::prelude::*;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Method, Request, RequestBuilder, Response, StatusCode};
use tokio::sync::Mutex;
use url::Url;

use crate::config::{AdcsClientConfig, HttpAuth};
use crate::error::{AdcsError, Result};
use crate::ntlm::NtlmClient;
use crate::tls::build_http_client;

/// Authentication scheme selected from a `WWW-Authenticate` challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Ntlm,
    Negotiate,
    Basic,
}

impl Scheme {
    fn name(self) -> &'static str {
        match self {
            Scheme::Ntlm => "NTLM",
            Scheme::Negotiate => "Negotiate",
            Scheme::Basic => "Basic",
        }
    }
}

/// Authenticated HTTP access to a certsrv host.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
    auth: Option<HttpAuth>,
    connection: Arc<Mutex<()>>,
}

impl Transport {
    /// Build a transport from client configuration.
    ///
    /// Without credentials the transport sends plain requests; this is
    /// logged as a warning since certsrv normally requires authentication.
    pub fn new(config: &AdcsClientConfig) -> Result<Self> {
        let http = build_http_client(config)?;
        if config.http_auth.is_none() {
            tracing::warn!(
                url = %config.server_url,
                "no credentials configured, requests will be sent unauthenticated"
            );
        }
        Ok(Self {
            http,
            auth: config.http_auth.clone(),
            connection: Arc::new(Mutex::new(())),
        })
    }

    /// Start a request against the given URL.
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url)
    }

    /// Send a request, negotiating credentials if the server asks for them.
    ///
    /// The response body is read before returning, so an authenticated
    /// connection is back in the pool before the next handshake starts.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Reply> {
        let request = builder.build()?;
        tracing::debug!("{} {}", request.method(), request.url());

        let Some(auth) = &self.auth else {
            return Reply::read(self.http.execute(request).await?).await;
        };

        let _connection = self.connection.lock().await;
        let response = self.authenticate(request, auth).await?;
        Reply::read(response).await
    }

    async fn authenticate(&self, request: Request, auth: &HttpAuth) -> Result<Response> {
        let response = self.http.execute(replayable(&request)?).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(scheme) = select_scheme(response.headers()) else {
            return Ok(response);
        };
        drain(response).await;

        tracing::debug!(scheme = scheme.name(), url = %request.url(), "authenticating");
        match scheme {
            Scheme::Ntlm | Scheme::Negotiate => self.ntlm_handshake(request, auth, scheme).await,
            Scheme::Basic => {
                let mut request = request;
                let credentials =
                    BASE64_STANDARD.encode(format!("{}:{}", auth.username, auth.password));
                set_authorization(&mut request, scheme, &credentials)?;
                Ok(self.http.execute(request).await?)
            }
        }
    }

    /// Probe the server once and fail if the credentials are rejected.
    pub async fn probe(&self, url: Url) -> Result<()> {
        let reply = self.send(self.request(Method::GET, url.clone())).await?;
        if reply.status == StatusCode::UNAUTHORIZED {
            let challenge = reply
                .headers
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string();
            tracing::error!(url = %url, "credential probe rejected");
            return Err(AdcsError::authentication_rejected(challenge));
        }
        tracing::debug!(url = %url, status = %reply.status, "credential probe accepted");
        Ok(())
    }

    async fn ntlm_handshake(
        &self,
        request: Request,
        auth: &HttpAuth,
        scheme: Scheme,
    ) -> Result<Response> {
        let ntlm = NtlmClient::new(auth);

        let mut negotiate = replayable(&request)?;
        set_authorization(&mut negotiate, scheme, &BASE64_STANDARD.encode(ntlm.negotiate()))?;
        let response = self.http.execute(negotiate).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = challenge_token(response.headers(), scheme)
            .ok_or_else(|| AdcsError::ntlm("server did not answer with an NTLM challenge"))?;
        drain(response).await;

        let authenticate = ntlm.authenticate(&challenge)?;
        let mut request = request;
        set_authorization(&mut request, scheme, &BASE64_STANDARD.encode(authenticate))?;
        Ok(self.http.execute(request).await?)
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Vec<u8>,
}

impl Reply {
    async fn read(response: Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// The body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn replayable(request: &Request) -> Result<Request> {
    request
        .try_clone()
        .ok_or_else(|| AdcsError::ntlm("request body cannot be replayed"))
}

/// Read and discard a body so the connection returns to the pool.
async fn drain(response: Response) {
    let _ = response.bytes().await;
}

fn set_authorization(request: &mut Request, scheme: Scheme, token: &str) -> Result<()> {
    let value = HeaderValue::from_str(&format!("{} {}", scheme.name(), token))
        .map_err(|e| AdcsError::ntlm(format!("invalid authorization header: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

fn challenges(headers: &HeaderMap) -> impl Iterator<Item = &str> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
}

fn scheme_of(challenge: &str) -> &str {
    challenge.split_whitespace().next().unwrap_or("")
}

fn select_scheme(headers: &HeaderMap) -> Option<Scheme> {
    let offered: Vec<&str> = challenges(headers).map(scheme_of).collect();
    let has = |name: &str| offered.iter().any(|s| s.eq_ignore_ascii_case(name));
    if has("NTLM") {
        Some(Scheme::Ntlm)
    } else if has("Negotiate") {
        Some(Scheme::Negotiate)
    } else if has("Basic") {
        Some(Scheme::Basic)
    } else {
        None
    }
}

fn challenge_token(headers: &HeaderMap, scheme: Scheme) -> Option<Vec<u8>> {
    challenges(headers)
        .filter(|c| scheme_of(c).eq_ignore_ascii_case(scheme.name()))
        .filter_map(|c| c.split_whitespace().nth(1))
        .find_map(|token| BASE64_STANDARD.decode(token).ok())
}
