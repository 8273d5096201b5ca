use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::ChainError;
use crate::Result;

/// Version byte prepended to the RIPEMD160 digest before checksumming.
pub const ADDRESS_VERSION: u8 = 0x00;

/// Hex-encoded SHA-256 of a string. Used for block/transaction hashes and
/// password digests.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// secp256k1 ECDSA key pair. The secret key never leaves this type except
/// as the base64 blob handed to the registry document.
#[derive(Debug, Clone)]
pub struct KeyPair {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let signing = SigningKey::random(&mut OsRng);
        let verifying = signing.verifying_key().to_owned();
        Self { signing, verifying }
    }

    /// Rebuild a pair from the base64 secret scalar stored in the registry
    /// document.
    pub fn from_secret_b64(secret_b64: &str) -> Result<Self> {
        let bytes = base64::decode(secret_b64)
            .map_err(|e| ChainError::Crypto(format!("invalid secret key encoding: {e}")))?;
        let signing = SigningKey::from_slice(&bytes)
            .map_err(|e| ChainError::Crypto(format!("invalid secret key: {e}")))?;
        let verifying = signing.verifying_key().to_owned();
        Ok(Self { signing, verifying })
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }

    pub fn secret_b64(&self) -> String {
        base64::encode(self.signing.to_bytes())
    }

    pub fn public_b64(&self) -> String {
        base64::encode(self.verifying.to_encoded_point(false).as_bytes())
    }

    /// Sign a payload, returning the DER-encoded signature.
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing.sign(payload);
        signature.to_der().as_bytes().to_vec()
    }
}

/// Verify a DER-encoded signature against a public key. Malformed
/// signatures simply fail verification.
pub fn verify_signature(payload: &[u8], signature_der: &[u8], key: &VerifyingKey) -> bool {
    match Signature::from_der(signature_der) {
        Ok(signature) => key.verify(payload, &signature).is_ok(),
        Err(_) => false,
    }
}

/// Decode a base64 SEC1 public key from the registry document.
pub fn verifying_key_from_b64(public_b64: &str) -> Result<VerifyingKey> {
    let bytes = base64::decode(public_b64)
        .map_err(|e| ChainError::Crypto(format!("invalid public key encoding: {e}")))?;
    VerifyingKey::from_sec1_bytes(&bytes)
        .map_err(|e| ChainError::Crypto(format!("invalid public key: {e}")))
}

/// Base58check address derivation:
/// `"1" + base58(version ‖ ripemd160(sha256(pubkey)) ‖ checksum[..4])`
/// where the checksum is a double SHA-256 over the versioned payload.
pub fn derive_address(key: &VerifyingKey) -> String {
    let pub_bytes = key.to_encoded_point(false);
    let sha = Sha256::digest(pub_bytes.as_bytes());
    let ripe = Ripemd160::digest(sha);

    let mut versioned = Vec::with_capacity(25);
    versioned.push(ADDRESS_VERSION);
    versioned.extend_from_slice(&ripe);

    let checksum = Sha256::digest(Sha256::digest(&versioned));
    versioned.extend_from_slice(&checksum[..4]);

    format!("1{}", bs58::encode(versioned).into_string())
}

/// Throwaway password for simulation-created wallets.
pub fn random_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}
