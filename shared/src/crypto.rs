use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::byte_buffer::ByteBuffer;

/// Length of the symmetric session key minted per ticket.
pub const SESSION_KEY_LEN: usize = 16;
/// Length of the per-datagram nonce prepended to session ciphertext.
pub const SESSION_NONCE_LEN: usize = 24;

/// Errors raised by the crypto envelope. A failed session decrypt never
/// mutates session state; the offending datagram is simply dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("signing key generation failed")]
    KeyGeneration,

    #[error("session encrypt failed")]
    EncryptFailed,

    #[error("ciphertext of {len} bytes is shorter than the {expected}-byte nonce")]
    CiphertextTooShort { len: usize, expected: usize },

    #[error("integrity check failed on session decrypt")]
    IntegrityCheckFailed,

    #[error("malformed signature of {len} bytes")]
    MalformedSignature { len: usize },
}

/// Which long-lived signing key pair an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySize {
    Rsa1024,
    Rsa2048,
}

/// Holder for the server's long-lived signing key pairs.
///
/// Session traffic uses the symmetric path ([`encrypt_session`] /
/// [`decrypt_session`]); the RSA pairs only sign the public-key blob
/// handed to clients and verify client-presented signatures.
pub struct CryptoEnvelope {
    signer_1024: SigningKey<Sha256>,
    verifier_1024: VerifyingKey<Sha256>,
    signer_2048: SigningKey<Sha256>,
    verifier_2048: VerifyingKey<Sha256>,
    public_2048: RsaPublicKey,
}

impl CryptoEnvelope {
    /// Generates fresh 1024- and 2048-bit pairs. Key generation is slow;
    /// this runs once at server startup.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut rng = OsRng;
        let private_1024 =
            RsaPrivateKey::new(&mut rng, 1024).map_err(|_| CryptoError::KeyGeneration)?;
        let private_2048 =
            RsaPrivateKey::new(&mut rng, 2048).map_err(|_| CryptoError::KeyGeneration)?;
        Ok(Self::from_keys(private_1024, private_2048))
    }

    pub fn from_keys(private_1024: RsaPrivateKey, private_2048: RsaPrivateKey) -> Self {
        let public_2048 = RsaPublicKey::from(&private_2048);
        Self {
            verifier_1024: VerifyingKey::new(RsaPublicKey::from(&private_1024)),
            signer_1024: SigningKey::new(private_1024),
            verifier_2048: VerifyingKey::new(public_2048.clone()),
            signer_2048: SigningKey::new(private_2048),
            public_2048,
        }
    }

    /// The public-key blob handed to clients: the 2048-bit modulus,
    /// signed with the same long-lived key so the client can pin it.
    pub fn public_key_data(&self) -> Vec<u8> {
        let modulus = self.public_2048.n().to_bytes_be();
        let signature = self.sign(&modulus, KeySize::Rsa2048);

        let mut blob = ByteBuffer::new();
        blob.write_u16(modulus.len() as u16);
        blob.append(&modulus);
        blob.write_u16(signature.len() as u16);
        blob.append(&signature);
        blob.into_bytes()
    }

    pub fn sign(&self, message: &[u8], key_size: KeySize) -> Vec<u8> {
        let signature = match key_size {
            KeySize::Rsa1024 => self.signer_1024.sign(message),
            KeySize::Rsa2048 => self.signer_2048.sign(message),
        };
        signature.to_vec()
    }

    /// Verifies a signature made with the selected key pair. Malformed
    /// signatures verify as false rather than erroring; callers only care
    /// whether the peer proved possession.
    pub fn verify_signed(&self, message: &[u8], signature: &[u8], key_size: KeySize) -> bool {
        let Ok(signature) = Signature::try_from(signature) else {
            return false;
        };
        let verifier = match key_size {
            KeySize::Rsa1024 => &self.verifier_1024,
            KeySize::Rsa2048 => &self.verifier_2048,
        };
        verifier.verify(message, &signature).is_ok()
    }
}

/// Mints a fresh random session key.
pub fn generate_session_key() -> [u8; SESSION_KEY_LEN] {
    let mut key = [0u8; SESSION_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

fn session_cipher(session_key: &[u8]) -> XChaCha20Poly1305 {
    // the 16-byte wire key is expanded to the cipher's 256-bit key
    let digest = Sha256::digest(session_key);
    XChaCha20Poly1305::new(Key::from_slice(&digest))
}

/// Encrypts a payload under the session key. Output is a fresh random
/// nonce followed by the ciphertext and tag.
pub fn encrypt_session(session_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = session_cipher(session_key);
    let mut nonce = [0u8; SESSION_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptFailed)?;

    let mut out = Vec::with_capacity(SESSION_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a payload produced by [`encrypt_session`]. Any tampering with
/// the nonce, ciphertext, or tag fails the integrity check.
pub fn decrypt_session(session_key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < SESSION_NONCE_LEN {
        return Err(CryptoError::CiphertextTooShort {
            len: ciphertext.len(),
            expected: SESSION_NONCE_LEN,
        });
    }
    let (nonce, body) = ciphertext.split_at(SESSION_NONCE_LEN);
    let cipher = session_cipher(session_key);
    cipher
        .decrypt(XNonce::from_slice(nonce), body)
        .map_err(|_| CryptoError::IntegrityCheckFailed)
}
