//! Macaroon parsing, binding, and `Authorization` header formatting.
//!
//! Tokens use the libmacaroons V1 binary layout: base64 over a sequence of
//! packets, each `LLLLkey value\n` where `LLLL` is the total packet length
//! in four lowercase hex digits. Packets appear in the order `location`,
//! `identifier`, zero or more caveats (`cid`, optional `vid`, optional `cl`),
//! then `signature`.
//!
//! Signatures are never verified here; the service does that. The codec
//! only needs to read caveats and bind discharges to their root.
//!
//! # Example
//!
//! ```rust,ignore
//! use storeauth_core::macaroon::{extract_caveat_id, authorization_header};
//!
//! let caveat_id = extract_caveat_id(&root, "login.ubuntu.com")?;
//! // ... obtain `discharge` from the service ...
//! let header = authorization_header(&root, &discharge)?;
//! assert!(header.starts_with("Macaroon root="));
//! ```

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_LEN: usize = 32;
const PACKET_HEADER_LEN: usize = 4;
const MAX_PACKET_LEN: usize = 0xFFFF;
const KEY_GENERATOR: &[u8] = b"macaroons-key-generator";

/// A condition embedded in a macaroon.
///
/// First-party caveats carry only an id. Third-party caveats also carry a
/// verification id and the location of the service that discharges them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caveat {
    pub id: Vec<u8>,
    pub verification_id: Option<Vec<u8>>,
    pub location: Option<String>,
}

impl Caveat {
    /// Whether this caveat must be discharged by a third party.
    pub fn is_third_party(&self) -> bool {
        self.verification_id.is_some()
    }
}

/// A parsed macaroon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macaroon {
    location: String,
    identifier: Vec<u8>,
    caveats: Vec<Caveat>,
    signature: [u8; SIGNATURE_LEN],
}

impl Macaroon {
    /// Mint a macaroon from a root key.
    pub fn new(location: impl Into<String>, identifier: impl Into<Vec<u8>>, key: &[u8]) -> Self {
        let identifier = identifier.into();
        let derived = hmac(KEY_GENERATOR, key);
        let signature = hmac(&derived, &identifier);
        Self {
            location: location.into(),
            identifier,
            caveats: Vec::new(),
            signature,
        }
    }

    /// Append a first-party caveat, chaining the signature.
    pub fn add_first_party_caveat(mut self, id: impl Into<Vec<u8>>) -> Self {
        let id = id.into();
        self.signature = hmac(&self.signature, &id);
        self.caveats.push(Caveat {
            id,
            verification_id: None,
            location: None,
        });
        self
    }

    /// Append a third-party caveat with a precomputed verification id.
    pub fn add_third_party_caveat(
        mut self,
        location: impl Into<String>,
        id: impl Into<Vec<u8>>,
        verification_id: impl Into<Vec<u8>>,
    ) -> Self {
        let id = id.into();
        let verification_id = verification_id.into();
        self.signature = hmac_concat(&self.signature, &verification_id, &id);
        self.caveats.push(Caveat {
            id,
            verification_id: Some(verification_id),
            location: Some(location.into()),
        });
        self
    }

    /// Parse a serialized macaroon.
    ///
    /// Accepts URL-safe or standard base64, with or without padding. Every
    /// failure is reported as [`AuthError::InvalidCredential`].
    pub fn deserialize(token: &str) -> Result<Self, AuthError> {
        let normalized: String = token
            .trim()
            .trim_end_matches('=')
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                c => c,
            })
            .collect();

        let data = URL_SAFE_NO_PAD
            .decode(normalized.as_bytes())
            .map_err(|e| AuthError::invalid(format!("failed to deserialize macaroon: {}", e)))?;

        Self::from_packets(&data)
    }

    /// Serialize to URL-safe base64 without padding.
    pub fn serialize(&self) -> Result<String, AuthError> {
        let mut out = Vec::new();
        write_packet(&mut out, "location", self.location.as_bytes())?;
        write_packet(&mut out, "identifier", &self.identifier)?;
        for caveat in &self.caveats {
            write_packet(&mut out, "cid", &caveat.id)?;
            if let Some(vid) = &caveat.verification_id {
                write_packet(&mut out, "vid", vid)?;
            }
            if let Some(location) = &caveat.location {
                write_packet(&mut out, "cl", location.as_bytes())?;
            }
        }
        write_packet(&mut out, "signature", &self.signature)?;
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn identifier(&self) -> &[u8] {
        &self.identifier
    }

    pub fn caveats(&self) -> &[Caveat] {
        &self.caveats
    }

    pub fn signature(&self) -> &[u8; SIGNATURE_LEN] {
        &self.signature
    }

    /// Bind a discharge macaroon to this root for use in a request.
    ///
    /// Returns a copy of `discharge` whose signature is tied to this root's
    /// signature, so it cannot be replayed with another root.
    pub fn bind(&self, discharge: &Macaroon) -> Macaroon {
        let zero = [0u8; SIGNATURE_LEN];
        let mut bound = discharge.clone();
        bound.signature = hmac_concat(&zero, &self.signature, &discharge.signature);
        bound
    }

    fn from_packets(data: &[u8]) -> Result<Self, AuthError> {
        let mut location = None;
        let mut identifier = None;
        let mut caveats: Vec<Caveat> = Vec::new();
        let mut signature = None;

        let mut pos = 0;
        while pos < data.len() {
            if signature.is_some() {
                return Err(AuthError::invalid("trailing data after signature"));
            }
            let (key, value, next) = read_packet(data, pos)?;
            pos = next;

            match key {
                b"location" if location.is_none() => {
                    let value = String::from_utf8(value.to_vec())
                        .map_err(|_| AuthError::invalid("location is not valid UTF-8"))?;
                    location = Some(value);
                }
                b"identifier" if location.is_some() && identifier.is_none() => {
                    identifier = Some(value.to_vec());
                }
                b"cid" if identifier.is_some() => {
                    caveats.push(Caveat {
                        id: value.to_vec(),
                        verification_id: None,
                        location: None,
                    });
                }
                b"vid" => {
                    let caveat = caveats
                        .last_mut()
                        .filter(|c| c.verification_id.is_none())
                        .ok_or_else(|| AuthError::invalid("vid without caveat"))?;
                    caveat.verification_id = Some(value.to_vec());
                }
                b"cl" => {
                    let caveat = caveats
                        .last_mut()
                        .filter(|c| c.location.is_none())
                        .ok_or_else(|| AuthError::invalid("cl without caveat"))?;
                    let value = String::from_utf8(value.to_vec())
                        .map_err(|_| AuthError::invalid("caveat location is not valid UTF-8"))?;
                    caveat.location = Some(value);
                }
                b"signature" if identifier.is_some() => {
                    let sig: [u8; SIGNATURE_LEN] = value
                        .try_into()
                        .map_err(|_| AuthError::invalid("signature has wrong length"))?;
                    signature = Some(sig);
                }
                other => {
                    return Err(AuthError::invalid(format!(
                        "unexpected packet {:?}",
                        String::from_utf8_lossy(other)
                    )));
                }
            }
        }

        match (location, identifier, signature) {
            (Some(location), Some(identifier), Some(signature)) => Ok(Self {
                location,
                identifier,
                caveats,
                signature,
            }),
            _ => Err(AuthError::invalid("incomplete macaroon")),
        }
    }
}

/// Find the caveat id that `authority_host` must discharge.
///
/// Returns the id of the first caveat, in caveat order, whose location is
/// `authority_host`. Fails if the root is malformed or carries no such
/// caveat.
pub fn extract_caveat_id(root: &str, authority_host: &str) -> Result<String, AuthError> {
    let macaroon = Macaroon::deserialize(root)?;
    let caveat = macaroon
        .caveats()
        .iter()
        .find(|c| c.location.as_deref() == Some(authority_host))
        .ok_or_else(|| {
            AuthError::invalid(format!(
                "root macaroon has no caveat for {}",
                authority_host
            ))
        })?;

    String::from_utf8(caveat.id.clone())
        .map_err(|_| AuthError::invalid("caveat id is not valid UTF-8"))
}

/// Bind a serialized unbound discharge to a serialized root.
pub fn bind(root: &str, unbound_discharge: &str) -> Result<String, AuthError> {
    let root = Macaroon::deserialize(root)?;
    let discharge = Macaroon::deserialize(unbound_discharge)?;
    root.bind(&discharge).serialize()
}

/// Build the literal `Authorization` header value.
pub fn format_auth_header(root: &str, bound_discharge: &str) -> String {
    format!("Macaroon root={}, discharge={}", root, bound_discharge)
}

/// Compute the `Authorization` header for a root and its unbound discharge.
///
/// The root is passed through verbatim; only the discharge is re-serialized.
pub fn authorization_header(root: &str, unbound_discharge: &str) -> Result<String, AuthError> {
    let bound = bind(root, unbound_discharge)?;
    Ok(format_auth_header(root, &bound))
}

fn read_packet(data: &[u8], pos: usize) -> Result<(&[u8], &[u8], usize), AuthError> {
    let header = data
        .get(pos..pos + PACKET_HEADER_LEN)
        .ok_or_else(|| AuthError::invalid("truncated packet header"))?;
    if !header.iter().all(u8::is_ascii_hexdigit) {
        return Err(AuthError::invalid("packet header is not hex"));
    }
    let size = std::str::from_utf8(header)
        .ok()
        .and_then(|h| usize::from_str_radix(h, 16).ok())
        .ok_or_else(|| AuthError::invalid("packet header is not hex"))?;

    if size < PACKET_HEADER_LEN + 2 {
        return Err(AuthError::invalid("packet too short"));
    }
    let end = pos + size;
    let body = data
        .get(pos + PACKET_HEADER_LEN..end)
        .ok_or_else(|| AuthError::invalid("truncated packet"))?;

    let body = body
        .strip_suffix(b"\n")
        .ok_or_else(|| AuthError::invalid("packet missing terminator"))?;
    let split = body
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| AuthError::invalid("packet missing key separator"))?;

    Ok((&body[..split], &body[split + 1..], end))
}

fn write_packet(out: &mut Vec<u8>, key: &str, value: &[u8]) -> Result<(), AuthError> {
    let size = PACKET_HEADER_LEN + key.len() + 1 + value.len() + 1;
    if size > MAX_PACKET_LEN {
        return Err(AuthError::invalid(format!("{} packet too large", key)));
    }
    out.extend_from_slice(format!("{:04x}", size).as_bytes());
    out.extend_from_slice(key.as_bytes());
    out.push(b' ');
    out.extend_from_slice(value);
    out.push(b'\n');
    Ok(())
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; SIGNATURE_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    let mut out = [0u8; SIGNATURE_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

fn hmac_concat(key: &[u8], first: &[u8], second: &[u8]) -> [u8; SIGNATURE_LEN] {
    let mut joined = Vec::with_capacity(SIGNATURE_LEN * 2);
    joined.extend_from_slice(&hmac(key, first));
    joined.extend_from_slice(&hmac(key, second));
    hmac(key, &joined)
}
