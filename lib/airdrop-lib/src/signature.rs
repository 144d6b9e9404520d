//! Wallet ownership check: a detached Ed25519 signature over a message
//! chosen by the application.

use base64::prelude::*;
use ed25519_dalek::{Signature, VerifyingKey};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid wallet base58")]
    InvalidAddressEncoding,
    #[error("invalid signature encoding")]
    InvalidSignatureEncoding,
    #[error("signature verification failed")]
    SignatureMismatch,
}

/// Decode a base58 wallet address into its 32 public key bytes.
pub fn decode_wallet(wallet: &str) -> Result<[u8; 32], SignatureError> {
    let mut pubkey = [0u8; 32];
    let size = bs58::decode(wallet)
        .into(&mut pubkey)
        .map_err(|_| SignatureError::InvalidAddressEncoding)?;
    if size != pubkey.len() {
        return Err(SignatureError::InvalidAddressEncoding);
    }
    Ok(pubkey)
}

/// Decode a base64 signature. Length is checked during verification.
pub fn decode_signature(signature: &str) -> Result<Vec<u8>, SignatureError> {
    BASE64_STANDARD
        .decode(signature.trim())
        .map_err(|_| SignatureError::InvalidSignatureEncoding)
}

pub fn verify_bytes(
    pubkey: &[u8; 32],
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignatureError> {
    let signature =
        Signature::from_slice(signature).map_err(|_| SignatureError::SignatureMismatch)?;
    let pubkey = VerifyingKey::from_bytes(pubkey).map_err(|_| SignatureError::SignatureMismatch)?;
    pubkey
        .verify_strict(message, &signature)
        .map_err(|_| SignatureError::SignatureMismatch)
}

/// `wallet` is base58, `signature` is base64 over the UTF-8 bytes of `message`.
pub fn verify(wallet: &str, message: &str, signature: &str) -> Result<(), SignatureError> {
    let pubkey = decode_wallet(wallet)?;
    let signature = decode_signature(signature)?;
    verify_bytes(&pubkey, message.as_bytes(), &signature)
}
