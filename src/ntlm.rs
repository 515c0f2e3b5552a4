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

//! NTLMv2 message construction (MS-NLMP).
//!
//! Only the connection-oriented client side is implemented: a NEGOTIATE
//! message, parsing of the server CHALLENGE, and the AUTHENTICATE message
//! carrying an NTLMv2 response. Signing, sealing and key exchange are never
//! negotiated; the handshake only authenticates the HTTP connection.

use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use rand::RngCore;

use crate::config::HttpAuth;
use crate::error::{AdcsError, Result};

type HmacMd5 = Hmac<Md5>;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const MESSAGE_NEGOTIATE: u32 = 1;
const MESSAGE_CHALLENGE: u32 = 2;
const MESSAGE_AUTHENTICATE: u32 = 3;

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_SIGN: u32 = 0x0000_0010;
const NEGOTIATE_SEAL: u32 = 0x0000_0020;
const NEGOTIATE_LM_KEY: u32 = 0x0000_0080;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NEGOTIATE_VERSION: u32 = 0x0200_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_KEY_EXCH: u32 = 0x4000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const NEGOTIATE_FLAGS: u32 = NEGOTIATE_UNICODE
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_128
    | NEGOTIATE_56;

const AV_EOL: u16 = 0;
const AV_TIMESTAMP: u16 = 7;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET_SECS: u64 = 11_644_473_600;

const AUTHENTICATE_HEADER_LEN: usize = 64;

/// Client-side NTLM state for a single handshake.
#[derive(Clone)]
pub struct NtlmClient {
    user: String,
    domain: String,
    password: String,
    workstation: String,
}

impl std::fmt::Debug for NtlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NtlmClient")
            .field("user", &self.user)
            .field("domain", &self.domain)
            .field("workstation", &self.workstation)
            .finish()
    }
}

impl NtlmClient {
    /// Create an NTLM client from configured credentials.
    ///
    /// The workstation name is the local hostname, or empty if unavailable.
    pub fn new(auth: &HttpAuth) -> Self {
        let (user, domain) = auth.user_and_domain();
        let workstation = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_default();
        Self {
            user: user.to_string(),
            domain: domain.to_string(),
            password: auth.password.clone(),
            workstation,
        }
    }

    /// Build the NEGOTIATE (type 1) message.
    pub fn negotiate(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(32);
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&MESSAGE_NEGOTIATE.to_le_bytes());
        msg.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());
        // Empty domain and workstation fields.
        write_field(&mut msg, 0, 32);
        write_field(&mut msg, 0, 32);
        msg
    }

    /// Build the AUTHENTICATE (type 3) message answering a server CHALLENGE.
    pub fn authenticate(&self, challenge: &[u8]) -> Result<Vec<u8>> {
        let challenge = ChallengeMessage::parse(challenge)?;

        let mut client_challenge = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut client_challenge);

        let timestamp = challenge.timestamp().unwrap_or_else(now_filetime);

        self.authenticate_with(&challenge, client_challenge, timestamp)
    }

    fn authenticate_with(
        &self,
        challenge: &ChallengeMessage,
        client_challenge: [u8; 8],
        timestamp: [u8; 8],
    ) -> Result<Vec<u8>> {
        if challenge.flags & NEGOTIATE_UNICODE == 0 {
            return Err(AdcsError::ntlm("server does not support unicode"));
        }
        if challenge.flags & NEGOTIATE_LM_KEY != 0 {
            return Err(AdcsError::ntlm("server requested NTLMv1 (LM_KEY)"));
        }

        let domain = if self.domain.is_empty() {
            challenge.target_name.as_str()
        } else {
            self.domain.as_str()
        };

        let v2_hash = ntowf_v2(&self.password, &self.user, domain)?;
        let nt_response = ntlmv2_response(
            &v2_hash,
            &challenge.server_challenge,
            &client_challenge,
            &timestamp,
            &challenge.target_info,
        )?;
        let lm_response = if challenge.target_info.is_empty() {
            lmv2_response(&v2_hash, &challenge.server_challenge, &client_challenge)?
        } else {
            Vec::new()
        };

        let flags = challenge.flags
            & !(NEGOTIATE_KEY_EXCH | NEGOTIATE_SIGN | NEGOTIATE_SEAL | NEGOTIATE_VERSION);

        let domain = utf16le(domain);
        let user = utf16le(&self.user);
        let workstation = utf16le(&self.workstation);

        let payloads: [&[u8]; 6] = [&lm_response, &nt_response, &domain, &user, &workstation, &[]];

        let mut msg = Vec::with_capacity(
            AUTHENTICATE_HEADER_LEN + payloads.iter().map(|p| p.len()).sum::<usize>(),
        );
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&MESSAGE_AUTHENTICATE.to_le_bytes());

        let mut offset = AUTHENTICATE_HEADER_LEN;
        for payload in payloads {
            let len = u16::try_from(payload.len())
                .map_err(|_| AdcsError::ntlm("authenticate field too large"))?;
            write_field(&mut msg, len, offset as u32);
            offset += payload.len();
        }
        msg.extend_from_slice(&flags.to_le_bytes());

        for payload in payloads {
            msg.extend_from_slice(payload);
        }
        Ok(msg)
    }
}

/// A parsed server CHALLENGE (type 2) message.
#[derive(Debug, Clone)]
pub struct ChallengeMessage {
    /// Negotiated flags.
    pub flags: u32,
    /// Server challenge nonce.
    pub server_challenge: [u8; 8],
    /// Server's NetBIOS domain (target name), decoded.
    pub target_name: String,
    /// Raw AV_PAIR list.
    pub target_info: Vec<u8>,
}

impl ChallengeMessage {
    /// Parse a CHALLENGE message.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 32 || &bytes[..8] != SIGNATURE {
            return Err(AdcsError::ntlm("invalid challenge message"));
        }
        if read_u32(bytes, 8) != MESSAGE_CHALLENGE {
            return Err(AdcsError::ntlm("unexpected NTLM message type"));
        }

        let target_name = read_field(bytes, 12)?;
        let flags = read_u32(bytes, 20);
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&bytes[24..32]);

        let target_info = if bytes.len() >= 48 {
            read_field(bytes, 40)?.to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            flags,
            server_challenge,
            target_name: from_utf16le(target_name),
            target_info,
        })
    }

    /// The MsvAvTimestamp value, if the server sent one.
    pub fn timestamp(&self) -> Option<[u8; 8]> {
        let mut rest = self.target_info.as_slice();
        while rest.len() >= 4 {
            let id = u16::from_le_bytes([rest[0], rest[1]]);
            let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
            if id == AV_EOL || rest.len() < 4 + len {
                break;
            }
            if id == AV_TIMESTAMP && len == 8 {
                let mut ts = [0u8; 8];
                ts.copy_from_slice(&rest[4..12]);
                return Some(ts);
            }
            rest = &rest[4 + len..];
        }
        None
    }
}

/// NT one-way function: MD4 over the UTF-16LE password.
fn nt_hash(password: &str) -> [u8; 16] {
    Md4::digest(utf16le(password)).into()
}

/// NTOWFv2: HMAC-MD5 keyed by the NT hash over `UPPER(user) || domain`.
fn ntowf_v2(password: &str, user: &str, domain: &str) -> Result<[u8; 16]> {
    let identity = format!("{}{}", user.to_uppercase(), domain);
    hmac_md5(&nt_hash(password), &[&utf16le(&identity)])
}

fn ntlmv2_response(
    v2_hash: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
    timestamp: &[u8; 8],
    target_info: &[u8],
) -> Result<Vec<u8>> {
    let mut temp = Vec::with_capacity(32 + target_info.len());
    temp.extend_from_slice(&[0x01, 0x01, 0, 0, 0, 0, 0, 0]);
    temp.extend_from_slice(timestamp);
    temp.extend_from_slice(client_challenge);
    temp.extend_from_slice(&[0; 4]);
    temp.extend_from_slice(target_info);
    temp.extend_from_slice(&[0; 4]);

    let proof = hmac_md5(v2_hash, &[server_challenge, &temp])?;

    let mut response = proof.to_vec();
    response.extend_from_slice(&temp);
    Ok(response)
}

fn lmv2_response(
    v2_hash: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
) -> Result<Vec<u8>> {
    let proof = hmac_md5(v2_hash, &[server_challenge, client_challenge])?;
    let mut response = proof.to_vec();
    response.extend_from_slice(client_challenge);
    Ok(response)
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 16]> {
    let mut mac =
        HmacMd5::new_from_slice(key).map_err(|e| AdcsError::ntlm(format!("HMAC key: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

fn now_filetime() -> [u8; 8] {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let ticks = (since_epoch.as_secs() + FILETIME_UNIX_OFFSET_SECS) * 10_000_000
        + u64::from(since_epoch.subsec_nanos() / 100);
    ticks.to_le_bytes()
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn from_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn write_field(msg: &mut Vec<u8>, len: u16, offset: u32) {
    msg.extend_from_slice(&len.to_le_bytes());
    msg.extend_from_slice(&len.to_le_bytes());
    msg.extend_from_slice(&offset.to_le_bytes());
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_field(bytes: &[u8], at: usize) -> Result<&[u8]> {
    let len = u16::from_le_bytes([bytes[at], bytes[at + 1]]) as usize;
    let offset = read_u32(bytes, at + 4) as usize;
    bytes
        .get(offset..offset + len)
        .ok_or_else(|| AdcsError::ntlm("challenge field out of bounds"))
}
