//! Minimal SPNEGO (RFC 4178) framing around NTLMSSP tokens

use super::ntlm::NTLMSSP_SIGNATURE;
use super::AuthMechanism;
use crate::error::{Error, Result};

/// 1.3.6.1.5.5.2
const SPNEGO_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
/// 1.3.6.1.4.1.311.2.2.10
const NTLMSSP_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a];

const TAG_APPLICATION_0: u8 = 0x60;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_OID: u8 = 0x06;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_ENUMERATED: u8 = 0x0a;

fn context(n: u8) -> u8 {
    0xa0 | n
}

/// negState values of a NegTokenResp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NegState {
    AcceptCompleted = 0,
    AcceptIncomplete = 1,
    Reject = 2,
}

fn der_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xff {
        out.extend_from_slice(&[0x81, len as u8]);
    } else {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    }
}

fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 4);
    out.push(tag);
    der_length(value.len(), &mut out);
    out.extend_from_slice(value);
    out
}

/// GSS-API initial context token carrying a NegTokenInit that offers NTLMSSP
pub fn wrap_neg_token_init(mech_token: &[u8]) -> Vec<u8> {
    let mech_types = tlv(context(0), &tlv(TAG_SEQUENCE, &tlv(TAG_OID, NTLMSSP_OID)));
    let token = tlv(context(2), &tlv(TAG_OCTET_STRING, mech_token));

    let mut neg_token_init = mech_types;
    neg_token_init.extend_from_slice(&token);
    let neg_token_init = tlv(context(0), &tlv(TAG_SEQUENCE, &neg_token_init));

    let mut inner = tlv(TAG_OID, SPNEGO_OID);
    inner.extend_from_slice(&neg_token_init);
    tlv(TAG_APPLICATION_0, &inner)
}

/// NegTokenResp carrying a follow-up token from the client
pub fn wrap_neg_token_resp(response_token: &[u8]) -> Vec<u8> {
    let token = tlv(context(2), &tlv(TAG_OCTET_STRING, response_token));
    tlv(context(1), &tlv(TAG_SEQUENCE, &token))
}

/// NegTokenResp as a server sends it
pub fn server_neg_token_resp(state: NegState, response_token: Option<&[u8]>) -> Vec<u8> {
    let mut fields = tlv(context(0), &tlv(TAG_ENUMERATED, &[state as u8]));
    if state == NegState::AcceptIncomplete {
        fields.extend_from_slice(&tlv(context(1), &tlv(TAG_OID, NTLMSSP_OID)));
    }
    if let Some(token) = response_token {
        fields.extend_from_slice(&tlv(context(2), &tlv(TAG_OCTET_STRING, token)));
    }
    tlv(context(1), &tlv(TAG_SEQUENCE, &fields))
}

/// Locate the NTLMSSP message inside a security blob, whether it is raw or
/// wrapped in SPNEGO. Returns `None` when no NTLMSSP token is present.
pub fn extract_ntlmssp(blob: &[u8]) -> Option<&[u8]> {
    let start = blob
        .windows(NTLMSSP_SIGNATURE.len())
        .position(|w| w == NTLMSSP_SIGNATURE)?;

    // The enclosing OCTET STRING header gives the exact token length
    let declared = match start {
        s if s >= 4 && blob[s - 4] == TAG_OCTET_STRING && blob[s - 3] == 0x82 => {
            Some(((blob[s - 2] as usize) << 8) | blob[s - 1] as usize)
        }
        s if s >= 3 && blob[s - 3] == TAG_OCTET_STRING && blob[s - 2] == 0x81 => {
            Some(blob[s - 1] as usize)
        }
        s if s >= 2 && blob[s - 2] == TAG_OCTET_STRING && blob[s - 1] < 0x80 => {
            Some(blob[s - 1] as usize)
        }
        _ => None,
    };

    let end = declared
        .map(|len| (start + len).min(blob.len()))
        .unwrap_or(blob.len());
    Some(&blob[start..end])
}

/// Pull the negState out of a server NegTokenResp
pub fn neg_state(blob: &[u8]) -> Option<NegState> {
    let marker = [context(0), 0x03, TAG_ENUMERATED, 0x01];
    let pos = blob.windows(marker.len()).position(|w| w == marker)?;
    match blob.get(pos + marker.len())? {
        0 => Some(NegState::AcceptCompleted),
        1 => Some(NegState::AcceptIncomplete),
        2 => Some(NegState::Reject),
        _ => None,
    }
}

/// Wraps another mechanism's tokens in SPNEGO and unwraps the server's
pub struct Spnego<M> {
    inner: M,
}

impl<M: AuthMechanism> Spnego<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<M: AuthMechanism> AuthMechanism for Spnego<M> {
    fn initial_token(&mut self) -> Result<Vec<u8>> {
        Ok(wrap_neg_token_init(&self.inner.initial_token()?))
    }

    fn challenge_response(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        if neg_state(challenge) == Some(NegState::Reject) {
            return Err(Error::AuthenticationFailed(
                "Server rejected the offered mechanism".into(),
            ));
        }
        let token = extract_ntlmssp(challenge).ok_or_else(|| {
            Error::AuthenticationError("No NTLMSSP token in server response".into())
        })?;
        Ok(wrap_neg_token_resp(&self.inner.challenge_response(token)?))
    }
}
