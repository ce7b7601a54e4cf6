//! Cryptographic provider surface for the macaroon chain
//!
//! Every signature-bearing operation goes through a [`CryptoProvider`]: the
//! chained MAC, the root-key encryption inside third-party caveats, and the
//! one-way binding transform applied to discharge signatures. Providers are
//! plain values; the same provider must be used for minting, appending,
//! binding and verifying a given macaroon.
//!
//! [`HmacAesProvider`] is the standard realization. Its cipher construction
//! (AES-128-CTR with an IV derived from the key itself) is intentionally kept
//! compatible with credentials minted by earlier deployments; it is not a
//! general-purpose encryption scheme, and the key material it sees never
//! leaves the chain.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes128;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::bytes::Signature;
use crate::error::MacaroonError;

type HmacSha256 = Hmac<Sha256>;
type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Size of the conditioned AES key, in bytes
pub const CIPHER_KEY_SIZE: usize = 16;
/// Size of the derived IV, in bytes
pub const CIPHER_IV_SIZE: usize = 16;

/// The cryptographic operations a macaroon chain is built from
///
/// All operations are pure functions of their inputs. `mac` must be
/// deterministic and collision-resistant; `decrypt` must invert `encrypt`
/// under the same key; `bind` must be one-way.
pub trait CryptoProvider {
    /// Keyed message authentication over `data`
    fn mac(&self, key: &[u8], data: &[u8]) -> Signature;

    /// Symmetrically encrypt `plaintext` under `key`
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, MacaroonError>;

    /// Invert [`CryptoProvider::encrypt`], recovering the plaintext as text
    ///
    /// Recovery may be lossy for plaintext that is not valid UTF-8; a
    /// provider must not fail on such input.
    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<String, MacaroonError>;

    /// One-way transform tying a discharge signature to the macaroon it was
    /// bound to
    fn bind(&self, signature: &Signature) -> Signature;
}

/// Standard provider: HMAC-SHA-256 signatures, AES-128-CTR key wrapping,
/// SHA-256 discharge binding
///
/// The MAC emits the Base64 text of the digest; that text's bytes key every
/// subsequent chain step. Cipher keys are conditioned to exactly
/// [`CIPHER_KEY_SIZE`] bytes by cyclic repetition and truncation, and the IV
/// is the leading [`CIPHER_IV_SIZE`] bytes of SHA-256 over the conditioned
/// key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HmacAesProvider;

impl CryptoProvider for HmacAesProvider {
    fn mac(&self, key: &[u8], data: &[u8]) -> Signature {
        let mut mac =
            HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
        mac.update(data);
        Signature::new(BASE64.encode(mac.finalize().into_bytes()).into_bytes())
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, MacaroonError> {
        let mut buffer = plaintext.to_vec();
        self.cipher_for(key)?.apply_keystream(&mut buffer);
        Ok(buffer)
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<String, MacaroonError> {
        let mut buffer = ciphertext.to_vec();
        self.cipher_for(key)?.apply_keystream(&mut buffer);
        // Lossy recovery: a keystream cannot tell a wrong key from a right
        // one, and non-text plaintext must still round-trip through here.
        // Mismatches surface later as a signature-chain mismatch instead.
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    fn bind(&self, signature: &Signature) -> Signature {
        Signature::new(Sha256::digest(signature.as_bytes()).to_vec())
    }
}

impl HmacAesProvider {
    fn cipher_for(&self, key: &[u8]) -> Result<Aes128Ctr, MacaroonError> {
        let key = condition_key(key)?;
        let digest = Sha256::digest(key);
        let mut iv = [0u8; CIPHER_IV_SIZE];
        iv.copy_from_slice(&digest[..CIPHER_IV_SIZE]);
        Ok(Aes128Ctr::new(&key.into(), &iv.into()))
    }
}

/// Condition an arbitrary-length key to exactly [`CIPHER_KEY_SIZE`] bytes:
/// short keys repeat cyclically, long keys truncate.
fn condition_key(key: &[u8]) -> Result<[u8; CIPHER_KEY_SIZE], MacaroonError> {
    if key.is_empty() {
        return Err(MacaroonError::EmptyCipherKey);
    }
    let mut conditioned = [0u8; CIPHER_KEY_SIZE];
    for (slot, byte) in conditioned.iter_mut().zip(key.iter().cycle()) {
        *slot = *byte;
    }
    Ok(conditioned)
}
