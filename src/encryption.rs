//! AES encryption support for ZIP members
//!
//! Implements the WinZip AE-2 format: AES-256-CTR encryption with
//! PBKDF2-HMAC-SHA1 key derivation (1000 iterations) and HMAC-SHA1
//! authentication over the ciphertext. AE-2 replaces the CRC's integrity
//! role with the MAC, so every CRC-32 stored in the archive structures is
//! forced to zero for encrypted members.
//!
//! Each member's data region becomes:
//! salt (16 bytes) + password verifier (2 bytes) + ciphertext +
//! truncated MAC (10 bytes).

use crate::body::{BodySizes, BodyStage, Step};
use crate::error::{Result, ZipStreamError};
use aes::Aes256;
use bytes::Bytes;
use ctr::{
    cipher::{KeyIvInit, StreamCipher},
    Ctr128LE,
};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// AES encryption strength
///
/// Only AES-256 is emitted; the strength byte in the AES extra field is
/// derived from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AesStrength {
    Aes256,
}

impl AesStrength {
    pub(crate) fn salt_size(&self) -> usize {
        match self {
            AesStrength::Aes256 => 16,
        }
    }

    pub(crate) fn key_size(&self) -> usize {
        match self {
            AesStrength::Aes256 => 32,
        }
    }

    /// Total derived key material (encryption key + MAC key + 2-byte
    /// password verifier)
    pub(crate) fn derived_key_size(&self) -> usize {
        self.key_size() * 2 + 2
    }

    /// Bytes the envelope adds around the data region: salt, verifier,
    /// truncated MAC.
    pub(crate) fn overhead(&self) -> u64 {
        self.salt_size() as u64 + 2 + 10
    }
}

#[derive(Clone, Copy)]
enum EnvelopeState {
    Salt,
    Verifier,
    Body,
    Mac(BodySizes),
    Done(BodySizes),
}

/// Body stage wrapping another stage in the AE-2 envelope. The inner
/// stage's final sizes are forwarded unchanged; the emitter accounts for
/// the envelope overhead.
pub(crate) struct AesBody<'a> {
    inner: Box<dyn BodyStage + 'a>,
    cipher: Ctr128LE<Aes256>,
    hmac: HmacSha1,
    salt: Vec<u8>,
    password_verify: [u8; 2],
    state: EnvelopeState,
}

impl<'a> AesBody<'a> {
    pub(crate) fn new(
        inner: Box<dyn BodyStage + 'a>,
        password: &str,
        salt: Vec<u8>,
    ) -> Result<Self> {
        let strength = AesStrength::Aes256;

        // Derive keys using PBKDF2-HMAC-SHA1 with 1000 iterations
        let mut derived_keys = vec![0u8; strength.derived_key_size()];
        pbkdf2_hmac::<Sha1>(password.as_bytes(), &salt, 1000, &mut derived_keys);

        let key_size = strength.key_size();
        let encryption_key = &derived_keys[..key_size];
        let auth_key = &derived_keys[key_size..key_size * 2];
        let password_verify = [derived_keys[key_size * 2], derived_keys[key_size * 2 + 1]];

        // Little-endian 128-bit counter starting at zero
        let iv = [0u8; 16];
        let cipher = Ctr128LE::<Aes256>::new(encryption_key.into(), iv.as_slice().into());

        let hmac = HmacSha1::new_from_slice(auth_key)
            .map_err(|e| ZipStreamError::EncryptionError(format!("HMAC init failed: {}", e)))?;

        Ok(Self {
            inner,
            cipher,
            hmac,
            salt,
            password_verify,
            state: EnvelopeState::Salt,
        })
    }
}

impl BodyStage for AesBody<'_> {
    fn advance(&mut self) -> Result<Step> {
        loop {
            match self.state {
                EnvelopeState::Salt => {
                    self.state = EnvelopeState::Verifier;
                    return Ok(Step::Block(Bytes::copy_from_slice(&self.salt)));
                }
                EnvelopeState::Verifier => {
                    self.state = EnvelopeState::Body;
                    return Ok(Step::Block(Bytes::copy_from_slice(&self.password_verify)));
                }
                EnvelopeState::Body => match self.inner.advance()? {
                    Step::Block(block) => {
                        if block.is_empty() {
                            continue;
                        }
                        let mut buf = block.to_vec();
                        self.cipher.apply_keystream(&mut buf);
                        // AE-2 authenticates the ciphertext
                        self.hmac.update(&buf);
                        return Ok(Step::Block(Bytes::from(buf)));
                    }
                    Step::Finished(sizes) => {
                        self.state = EnvelopeState::Mac(sizes);
                    }
                },
                EnvelopeState::Mac(sizes) => {
                    let mac = self.hmac.clone().finalize().into_bytes();
                    self.state = EnvelopeState::Done(sizes);
                    // First 10 bytes as per WinZip AE-2
                    return Ok(Step::Block(Bytes::copy_from_slice(&mac[..10])));
                }
                EnvelopeState::Done(sizes) => return Ok(Step::Finished(sizes)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BufferedBody;
    use crc32fast::Hasher as Crc32;

    fn drain(stage: &mut dyn BodyStage) -> (Vec<u8>, BodySizes) {
        let mut out = Vec::new();
        loop {
            match stage.advance().unwrap() {
                Step::Block(block) => out.extend_from_slice(&block),
                Step::Finished(sizes) => return (out, sizes),
            }
        }
    }

    #[test]
    fn test_aes_strength_sizes() {
        assert_eq!(AesStrength::Aes256.salt_size(), 16);
        assert_eq!(AesStrength::Aes256.key_size(), 32);
        assert_eq!(AesStrength::Aes256.derived_key_size(), 66);
        assert_eq!(AesStrength::Aes256.overhead(), 28);
    }

    #[test]
    fn test_envelope_layout_and_decryption() {
        let plaintext = b"Hello, encrypted world!";
        let mut crc = Crc32::new();
        crc.update(plaintext);
        let inner = BufferedBody::new(
            vec![Bytes::from_static(plaintext)],
            plaintext.len() as u64,
            crc.finalize(),
        );

        let password = "test_password_123";
        let salt = vec![b'-'; 16];
        let mut stage = AesBody::new(Box::new(inner), password, salt.clone()).unwrap();
        let (out, sizes) = drain(&mut stage);

        // salt + verifier + ciphertext + truncated MAC
        assert_eq!(out.len(), 16 + 2 + plaintext.len() + 10);
        assert_eq!(&out[..16], &salt[..]);

        let mut derived = vec![0u8; 66];
        pbkdf2_hmac::<Sha1>(password.as_bytes(), &salt, 1000, &mut derived);
        assert_eq!(&out[16..18], &derived[64..66]);

        let ciphertext = &out[18..18 + plaintext.len()];
        assert_ne!(ciphertext, plaintext);

        // Same keystream decrypts
        let iv = [0u8; 16];
        let mut cipher = Ctr128LE::<Aes256>::new(derived[..32].into(), iv.as_slice().into());
        let mut decrypted = ciphertext.to_vec();
        cipher.apply_keystream(&mut decrypted);
        assert_eq!(decrypted, plaintext);

        // MAC covers the ciphertext
        let mut hmac = HmacSha1::new_from_slice(&derived[32..64]).unwrap();
        hmac.update(ciphertext);
        assert_eq!(&out[out.len() - 10..], &hmac.finalize().into_bytes()[..10]);

        // Inner sizes forwarded unchanged
        assert_eq!(sizes.uncompressed, plaintext.len() as u64);
        assert_eq!(sizes.compressed, plaintext.len() as u64);
    }

    #[test]
    fn test_envelope_of_empty_content() {
        let inner = BufferedBody::new(vec![], 0, 0);
        let mut stage = AesBody::new(Box::new(inner), "pw", vec![0u8; 16]).unwrap();
        let (out, sizes) = drain(&mut stage);
        assert_eq!(out.len(), 28);
        assert_eq!(sizes.uncompressed, 0);
    }

    #[test]
    fn test_different_salts_differ() {
        let make = |salt: Vec<u8>| {
            let inner = BufferedBody::new(vec![Bytes::from_static(b"secret")], 6, 0);
            let mut stage = AesBody::new(Box::new(inner), "pw", salt).unwrap();
            drain(&mut stage).0
        };
        assert_ne!(make(vec![1u8; 16]), make(vec![2u8; 16]));
    }
}
