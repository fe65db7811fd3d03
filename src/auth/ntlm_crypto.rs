//! NTLM cryptographic functions

use crate::error::{Error, Result};
use crate::protocol::messages::common::utf16le_bytes;
use crate::protocol::messages::file_info::datetime_to_filetime;
use byteorder::{LittleEndian, WriteBytesExt};
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use rand::RngCore;

type HmacMd5 = Hmac<Md5>;

/// Length of the HMAC proof that prefixes an NTLMv2 response
pub const NT_PROOF_LEN: usize = 16;

/// Smallest blob: signature, reserved, timestamp, client challenge, reserved
const MIN_BLOB_LEN: usize = 28;

fn hmac_md5(key: &[u8]) -> Result<HmacMd5> {
    HmacMd5::new_from_slice(key).map_err(|e| Error::CryptoError(format!("HMAC error: {}", e)))
}

/// NT one-way function: MD4 of the UTF-16LE password
pub fn ntlm_hash(password: &str) -> [u8; 16] {
    let mut hasher = Md4::new();
    hasher.update(utf16le_bytes(password));
    let mut hash = [0u8; 16];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

/// NTLMv2 response key. Only the user name is uppercased; the domain is
/// hashed as given.
pub fn ntlmv2_hash(username: &str, domain: &str, password: &str) -> Result<Vec<u8>> {
    let mut mac = hmac_md5(&ntlm_hash(password))?;
    mac.update(&utf16le_bytes(&username.to_uppercase()));
    mac.update(&utf16le_bytes(domain));
    Ok(mac.finalize().into_bytes().to_vec())
}

/// LMv2 response: HMAC over both challenges followed by the client challenge
pub fn lmv2_response(
    ntlmv2_hash: &[u8],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
) -> Result<Vec<u8>> {
    let mut mac = hmac_md5(ntlmv2_hash)?;
    mac.update(server_challenge);
    mac.update(client_challenge);

    let mut response = mac.finalize().into_bytes().to_vec();
    response.extend_from_slice(client_challenge);
    Ok(response)
}

/// Client half of an NTLMv2 response
#[derive(Debug, Clone)]
pub struct NtlmV2Blob {
    pub timestamp: u64,
    pub client_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl NtlmV2Blob {
    pub fn new(timestamp: u64, client_challenge: [u8; 8], target_info: Vec<u8>) -> Self {
        Self {
            timestamp,
            client_challenge,
            target_info,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut blob = Vec::with_capacity(MIN_BLOB_LEN + self.target_info.len() + 4);
        blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
        blob.write_u32::<LittleEndian>(0)?;
        blob.write_u64::<LittleEndian>(self.timestamp)?;
        blob.extend_from_slice(&self.client_challenge);
        blob.write_u32::<LittleEndian>(0)?;
        blob.extend_from_slice(&self.target_info);
        blob.write_u32::<LittleEndian>(0)?;
        Ok(blob)
    }
}

/// NT proof followed by the blob
pub fn ntlmv2_response(
    ntlmv2_hash: &[u8],
    server_challenge: &[u8; 8],
    blob: &NtlmV2Blob,
) -> Result<Vec<u8>> {
    let blob_bytes = blob.to_bytes()?;

    let mut mac = hmac_md5(ntlmv2_hash)?;
    mac.update(server_challenge);
    mac.update(&blob_bytes);

    let mut response = mac.finalize().into_bytes().to_vec();
    response.extend_from_slice(&blob_bytes);
    Ok(response)
}

/// Recompute the NT proof over the blob a client sent and compare
pub fn verify_ntlmv2_response(
    ntlmv2_hash: &[u8],
    server_challenge: &[u8; 8],
    nt_response: &[u8],
) -> Result<bool> {
    if nt_response.len() < NT_PROOF_LEN + MIN_BLOB_LEN {
        return Ok(false);
    }
    let (proof, blob) = nt_response.split_at(NT_PROOF_LEN);

    let mut mac = hmac_md5(ntlmv2_hash)?;
    mac.update(server_challenge);
    mac.update(blob);
    Ok(mac.verify_slice(proof).is_ok())
}

/// Session base key: HMAC of the NT proof
pub fn ntlmv2_session_key(ntlmv2_hash: &[u8], nt_response: &[u8]) -> Result<Vec<u8>> {
    let mut mac = hmac_md5(ntlmv2_hash)?;
    mac.update(&nt_response[..NT_PROOF_LEN.min(nt_response.len())]);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn generate_challenge() -> [u8; 8] {
    let mut challenge = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

/// Current time as a Windows FILETIME
pub fn windows_timestamp() -> u64 {
    datetime_to_filetime(chrono::Utc::now())
}
