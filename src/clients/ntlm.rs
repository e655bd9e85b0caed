//! NTLMv2 negotiate/authenticate messages for WinRM over HTTP(S).
//!
//! Only connection authentication is implemented: no signing or sealing, so a
//! listener that insists on message encryption over plain HTTP rejects us.

use anyhow::{anyhow, bail, Result};
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;

type HmacMd5 = Hmac<Md5>;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_128
    | NEGOTIATE_56;

/// AV pair id carrying the server's FILETIME.
const MSV_AV_TIMESTAMP: u16 = 7;
const MSV_AV_EOL: u16 = 0;

/// Seconds between 1601-01-01 and the Unix epoch.
const FILETIME_EPOCH_OFFSET: u64 = 11_644_473_600;

/// Windows account split into user and domain parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmCredentials {
    pub user: String,
    pub domain: String,
    pub password: String,
}

impl NtlmCredentials {
    /// Accepts `DOMAIN\user`, `user@domain` (sent as-is with an empty domain)
    /// or a bare local account name.
    pub fn parse(username: &str, password: &str) -> Self {
        let (domain, user) = match username.split_once('\\') {
            Some((domain, user)) => (domain.to_string(), user.to_string()),
            None => (String::new(), username.to_string()),
        };
        Self {
            user,
            domain,
            password: password.to_string(),
        }
    }
}

/// Server challenge extracted from a type 2 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl Challenge {
    pub fn parse(message: &[u8]) -> Result<Self> {
        if message.len() < 32 || &message[..8] != SIGNATURE {
            bail!("not an NTLMSSP message");
        }
        if read_u32(message, 8)? != 2 {
            bail!("expected NTLM challenge message");
        }
        let flags = read_u32(message, 20)?;
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&message[24..32]);

        let target_info = if message.len() >= 48 {
            let len = read_u16(message, 40)? as usize;
            let offset = read_u32(message, 44)? as usize;
            message
                .get(offset..offset + len)
                .ok_or_else(|| anyhow!("target info outside challenge message"))?
                .to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            flags,
            server_challenge,
            target_info,
        })
    }

    /// FILETIME from the target info, when the server supplied one.
    fn timestamp(&self) -> Option<u64> {
        let info = &self.target_info;
        let mut pos = 0;
        while pos + 4 <= info.len() {
            let id = u16::from_le_bytes([info[pos], info[pos + 1]]);
            let len = u16::from_le_bytes([info[pos + 2], info[pos + 3]]) as usize;
            pos += 4;
            if id == MSV_AV_EOL {
                break;
            }
            if id == MSV_AV_TIMESTAMP && len == 8 && pos + 8 <= info.len() {
                let mut ts = [0u8; 8];
                ts.copy_from_slice(&info[pos..pos + 8]);
                return Some(u64::from_le_bytes(ts));
            }
            pos += len;
        }
        None
    }
}

/// Type 1 message.
pub fn negotiate_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&1u32.to_le_bytes());
    msg.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    // Empty domain and workstation buffers pointing at the end of the header.
    for _ in 0..2 {
        msg.extend_from_slice(&0u16.to_le_bytes());
        msg.extend_from_slice(&0u16.to_le_bytes());
        msg.extend_from_slice(&32u32.to_le_bytes());
    }
    msg
}

/// Type 3 message answering `challenge`.
pub fn authenticate_message(
    credentials: &NtlmCredentials,
    challenge: &Challenge,
    client_challenge: [u8; 8],
    now_filetime: u64,
) -> Result<Vec<u8>> {
    let response_key = ntowf_v2(credentials)?;

    let (timestamp, lm_response) = match challenge.timestamp() {
        // With a server timestamp the LMv2 response must be zeroed.
        Some(ts) => (ts, vec![0u8; 24]),
        None => {
            let mut lm = hmac_md5(
                &response_key,
                &[&challenge.server_challenge[..], &client_challenge[..]],
            )?
            .to_vec();
            lm.extend_from_slice(&client_challenge);
            (now_filetime, lm)
        }
    };

    let mut blob = Vec::with_capacity(28 + challenge.target_info.len() + 4);
    blob.extend_from_slice(&[1, 1, 0, 0, 0, 0, 0, 0]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(&client_challenge);
    blob.extend_from_slice(&[0; 4]);
    blob.extend_from_slice(&challenge.target_info);
    blob.extend_from_slice(&[0; 4]);

    let proof = hmac_md5(&response_key, &[&challenge.server_challenge[..], &blob[..]])?;
    let mut nt_response = proof.to_vec();
    nt_response.extend_from_slice(&blob);

    let domain = utf16le(&credentials.domain);
    let user = utf16le(&credentials.user);
    let workstation = utf16le(
        &hostname::get()
            .map(|h| h.to_string_lossy().to_uppercase())
            .unwrap_or_default(),
    );

    let flags = (challenge.flags & CLIENT_FLAGS) | NEGOTIATE_UNICODE;

    let payloads: [&[u8]; 6] = [&lm_response, &nt_response, &domain, &user, &workstation, &[]];
    let header_len = 64u32;
    let mut header = Vec::with_capacity(64);
    header.extend_from_slice(SIGNATURE);
    header.extend_from_slice(&3u32.to_le_bytes());

    let mut offset = header_len;
    let mut body = Vec::new();
    for payload in payloads {
        let len = u16::try_from(payload.len())
            .map_err(|_| anyhow!("NTLM field too long ({} bytes)", payload.len()))?;
        header.extend_from_slice(&len.to_le_bytes());
        header.extend_from_slice(&len.to_le_bytes());
        header.extend_from_slice(&offset.to_le_bytes());
        offset += u32::from(len);
        body.extend_from_slice(payload);
    }
    header.extend_from_slice(&flags.to_le_bytes());
    header.extend_from_slice(&body);
    Ok(header)
}

/// Current time as a Windows FILETIME (100 ns ticks since 1601).
pub fn filetime_now() -> u64 {
    let now = chrono::Utc::now();
    let secs = now.timestamp().max(0) as u64 + FILETIME_EPOCH_OFFSET;
    secs * 10_000_000 + u64::from(now.timestamp_subsec_nanos() / 100)
}

fn ntowf_v2(credentials: &NtlmCredentials) -> Result<[u8; 16]> {
    let nt_hash = Md4::digest(utf16le(&credentials.password));
    let identity = utf16le(&format!(
        "{}{}",
        credentials.user.to_uppercase(),
        credentials.domain
    ));
    hmac_md5(&nt_hash, &[&identity[..]])
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 16]> {
    let mut mac =
        HmacMd5::new_from_slice(key).map_err(|e| anyhow!("invalid HMAC key: {e}"))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn read_u16(buf: &[u8], at: usize) -> Result<u16> {
    buf.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| anyhow!("NTLM message truncated at {at}"))
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| anyhow!("NTLM message truncated at {at}"))
}
