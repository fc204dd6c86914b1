// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Signed-image marker handling and the device authentication handshake.
// Author: Lukas Bower

//! Image signatures and root authentication.
//!
//! A signed image carries a trailing [`SignatureMarker`]: two magic words, a
//! fixed size field, and a 64-byte detached Ed25519 signature over every
//! byte before the marker. The same module drives the four-message
//! challenge-response handshake against `/dev/auth` that elevates a session
//! to root.

use std::io::{Read, Seek, SeekFrom, Write};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::TryRngCore;
use sha2::{Digest, Sha256};

use heliolink_wire::{requests, SignatureMarker, PUBLIC_KEY_SIZE, SIGNATURE_SIZE, TOKEN_SIZE};

use crate::driver::DeviceDriver;
use crate::error::{LinkError, Result};
use crate::fs::{OpenMode, RemoteFile};
use crate::link::Link;

/// Digest plus signature of a signed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    /// SHA-256 over the bytes preceding the marker.
    pub hash: [u8; 32],
    /// The detached signature from the marker.
    pub signature: [u8; SIGNATURE_SIZE],
    /// Length of the hashed region, which is the image without its marker.
    pub size: u64,
}

fn io_error(tag: &str, error: std::io::Error) -> LinkError {
    LinkError::transport(tag, error)
}

fn stream_len<F: Seek>(file: &mut F, tag: &str) -> Result<u64> {
    let saved = file.stream_position().map_err(|e| io_error(tag, e))?;
    let len = file.seek(SeekFrom::End(0)).map_err(|e| io_error(tag, e))?;
    file.seek(SeekFrom::Start(saved))
        .map_err(|e| io_error(tag, e))?;
    Ok(len)
}

/// Read the trailing marker of `file`, if one is present and well formed.
///
/// The file position is saved and restored around the probe.
pub fn get_signature<F: Read + Seek>(file: &mut F) -> Result<Option<[u8; SIGNATURE_SIZE]>> {
    const TAG: &str = "get-signature";
    let len = stream_len(file, TAG)?;
    if len < SignatureMarker::SIZE as u64 {
        return Ok(None);
    }
    let saved = file.stream_position().map_err(|e| io_error(TAG, e))?;
    file.seek(SeekFrom::Start(len - SignatureMarker::SIZE as u64))
        .map_err(|e| io_error(TAG, e))?;
    let mut bytes = [0u8; SignatureMarker::SIZE];
    let read = file.read_exact(&mut bytes);
    file.seek(SeekFrom::Start(saved))
        .map_err(|e| io_error(TAG, e))?;
    read.map_err(|e| io_error(TAG, e))?;

    let marker =
        SignatureMarker::from_bytes(&bytes).map_err(|error| LinkError::from_wire(TAG, error))?;
    Ok(marker.is_valid().then_some(marker.signature))
}

/// Hash the signed region of `file` and return it with the marker's
/// signature. `None` when the file carries no valid marker.
pub fn get_signature_info<F: Read + Seek>(file: &mut F) -> Result<Option<SignatureInfo>> {
    const TAG: &str = "signature-info";
    let Some(signature) = get_signature(file)? else {
        return Ok(None);
    };
    let len = stream_len(file, TAG)?;
    let hashed = len - SignatureMarker::SIZE as u64;

    let saved = file.stream_position().map_err(|e| io_error(TAG, e))?;
    file.seek(SeekFrom::Start(0)).map_err(|e| io_error(TAG, e))?;
    let hash = hash_prefix(file, hashed)?;
    file.seek(SeekFrom::Start(saved))
        .map_err(|e| io_error(TAG, e))?;

    Ok(Some(SignatureInfo {
        hash,
        signature,
        size: hashed,
    }))
}

fn hash_prefix<F: Read>(file: &mut F, mut remaining: u64) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 4096];
    while remaining > 0 {
        let want = buffer.len().min(remaining as usize);
        let count = file
            .read(&mut buffer[..want])
            .map_err(|e| io_error("hash", e))?;
        if count == 0 {
            return Err(LinkError::transport("hash", "file shrank while hashing"));
        }
        hasher.update(&buffer[..count]);
        remaining -= count as u64;
    }
    Ok(hasher.finalize().into())
}

/// Append a marker wrapping `signature` to the end of `file`.
pub fn append_signature<F: Write + Seek>(
    file: &mut F,
    signature: &[u8; SIGNATURE_SIZE],
) -> Result<()> {
    const TAG: &str = "append-signature";
    let saved = file.stream_position().map_err(|e| io_error(TAG, e))?;
    file.seek(SeekFrom::End(0)).map_err(|e| io_error(TAG, e))?;
    file.write_all(&SignatureMarker::new(*signature).to_bytes())
        .map_err(|e| io_error(TAG, e))?;
    file.seek(SeekFrom::Start(saved))
        .map_err(|e| io_error(TAG, e))?;
    Ok(())
}

/// Sign `file` with `key` and append the marker. Returns the signature.
pub fn sign<F: Read + Write + Seek>(
    file: &mut F,
    key: &SigningKey,
) -> Result<[u8; SIGNATURE_SIZE]> {
    const TAG: &str = "sign";
    let len = stream_len(file, TAG)?;
    file.seek(SeekFrom::Start(0)).map_err(|e| io_error(TAG, e))?;
    let hash = hash_prefix(file, len)?;
    let signature: Signature = key.sign(&hash);
    let bytes = signature.to_bytes();
    append_signature(file, &bytes)?;
    Ok(bytes)
}

/// Verify the trailing signature of `file` against `public_key`.
///
/// `false` for unsigned files, malformed markers, or signature mismatches.
pub fn verify<F: Read + Seek>(file: &mut F, public_key: &VerifyingKey) -> Result<bool> {
    let Some(info) = get_signature_info(file)? else {
        return Ok(false);
    };
    let signature = Signature::from_bytes(&info.signature);
    Ok(public_key.verify(&info.hash, &signature).is_ok())
}

/// A 32-byte authentication token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthToken([u8; TOKEN_SIZE]);

impl AuthToken {
    /// Build a token from up to 32 bytes, zero-padded on the right.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut token = [0u8; TOKEN_SIZE];
        let len = bytes.len().min(TOKEN_SIZE);
        token[..len].copy_from_slice(&bytes[..len]);
        Self(token)
    }

    /// A token is valid when any byte is nonzero.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0.iter().any(|&byte| byte != 0)
    }

    /// The raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }

    /// Hex rendering for logs and printers.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// The `/dev/auth` challenge-response client.
pub struct Auth<D: DeviceDriver> {
    file: RemoteFile<D>,
}

impl<D: DeviceDriver> Auth<D> {
    /// Open `/dev/auth` on the connected device.
    pub fn new(link: &Link<D>) -> Result<Self> {
        Self::with_device(link, "/dev/auth")
    }

    /// Open an alternate authentication device node.
    pub fn with_device(link: &Link<D>, path: &str) -> Result<Self> {
        let file = RemoteFile::open(link, path, OpenMode::read_write())?;
        Ok(Self { file })
    }

    /// First handshake exchange: send the caller token, receive the
    /// device-extended random token.
    pub fn start(&mut self, token: &AuthToken) -> Result<AuthToken> {
        self.exchange(requests::AUTH_START, token)
    }

    /// Second handshake exchange: send the caller proof, receive the
    /// device proof.
    pub fn finish(&mut self, token: &AuthToken) -> Result<AuthToken> {
        self.exchange(requests::AUTH_FINISH, token)
    }

    fn exchange(&mut self, request: u32, token: &AuthToken) -> Result<AuthToken> {
        let (_, reply) = self.file.ioctl(request, token.as_bytes())?;
        Ok(AuthToken::from_bytes(&reply))
    }

    /// Fetch the device's public key.
    pub fn get_public_key(&mut self) -> Result<[u8; PUBLIC_KEY_SIZE]> {
        let arg = vec![0u8; PUBLIC_KEY_SIZE];
        let (_, reply) = self.file.ioctl(requests::AUTH_GET_PUBLIC_KEY, &arg)?;
        let mut key = [0u8; PUBLIC_KEY_SIZE];
        let len = reply.len().min(PUBLIC_KEY_SIZE);
        key[..len].copy_from_slice(&reply[..len]);
        Ok(key)
    }

    /// Run the four-message handshake with the shared `key`.
    ///
    /// 1. sends 16 random bytes zero-padded to a token,
    /// 2. checks the device echoed them in the first half of its reply,
    /// 3. sends `SHA-256(key || device_token)`,
    /// 4. checks the device returned `SHA-256(device_token || key)`.
    ///
    /// Every mismatch is a silent `false`; there is no retry.
    pub fn authenticate(&mut self, key: &[u8]) -> Result<bool> {
        let mut nonce = [0u8; TOKEN_SIZE / 2];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|error| LinkError::transport("authenticate", error))?;

        let key_token = AuthToken::from_bytes(key);
        let token_out = AuthToken::from_bytes(&nonce);

        let device_token = self.start(&token_out)?;
        if device_token.as_bytes()[..nonce.len()] != nonce {
            // first half must echo our nonce
            return Ok(false);
        }

        let proof_out = AuthToken::from_bytes(&token_pair_hash(&key_token, &device_token));
        let device_proof = self.finish(&proof_out)?;
        let expected = AuthToken::from_bytes(&token_pair_hash(&device_token, &key_token));

        Ok(device_proof == expected)
    }
}

fn token_pair_hash(first: &AuthToken, second: &AuthToken) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(first.as_bytes());
    hasher.update(second.as_bytes());
    hasher.finalize().into()
}
