use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, VerifyingKey};

use crate::error::{AppError, Result};

/// Verifies Solana wallet signatures (Ed25519 over the raw UTF-8 message).
pub struct SignatureVerifier;

impl SignatureVerifier {
    /// Parses a base58 Solana address into an Ed25519 public key.
    pub fn parse_address(address: &str) -> Result<VerifyingKey> {
        let bytes = bs58::decode(address.trim())
            .into_vec()
            .map_err(|_| AppError::BadRequest("Wallet address is not valid base58".into()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AppError::BadRequest("Wallet address must be 32 bytes".into()))?;
        VerifyingKey::from_bytes(&key)
            .map_err(|_| AppError::BadRequest("Wallet address is not a valid public key".into()))
    }

    /// Signatures arrive base58 encoded (wallet adapters) or base64.
    fn decode_signature(signature: &str) -> Result<Signature> {
        let raw = signature.trim();
        let bytes = bs58::decode(raw)
            .into_vec()
            .ok()
            .filter(|b| b.len() == 64)
            .or_else(|| STANDARD.decode(raw).ok().filter(|b| b.len() == 64))
            .ok_or(AppError::InvalidSignature)?;
        let bytes: [u8; 64] = bytes.try_into().map_err(|_| AppError::InvalidSignature)?;
        Ok(Signature::from_bytes(&bytes))
    }

    pub fn verify_signature(address: &str, message: &str, signature: &str) -> Result<bool> {
        if address.trim().is_empty() || signature.trim().is_empty() {
            return Err(AppError::BadRequest(
                "Address or signature cannot be empty".into(),
            ));
        }
        let key = Self::parse_address(address)?;
        let signature = Self::decode_signature(signature)?;

        tracing::debug!("Verifying wallet signature for address: {}", address);
        Ok(key.verify_strict(message.as_bytes(), &signature).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn address() -> String {
        bs58::encode(signing_key().verifying_key().to_bytes()).into_string()
    }

    #[test]
    fn empty_inputs_return_bad_request() {
        let result = SignatureVerifier::verify_signature("", "hello", "sig");
        assert!(matches!(result, Err(AppError::BadRequest(_))));
        let result = SignatureVerifier::verify_signature(&address(), "hello", "");
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn valid_base58_signature_verifies() {
        let sig = signing_key().sign(b"link fern");
        let encoded = bs58::encode(sig.to_bytes()).into_string();
        let result = SignatureVerifier::verify_signature(&address(), "link fern", &encoded);
        assert!(matches!(result, Ok(true)));
    }

    #[test]
    fn valid_base64_signature_verifies() {
        let sig = signing_key().sign(b"link fern");
        let encoded = STANDARD.encode(sig.to_bytes());
        let result = SignatureVerifier::verify_signature(&address(), "link fern", &encoded);
        assert!(matches!(result, Ok(true)));
    }

    #[test]
    fn signature_over_other_message_fails() {
        let sig = signing_key().sign(b"link fern");
        let encoded = bs58::encode(sig.to_bytes()).into_string();
        let result = SignatureVerifier::verify_signature(&address(), "link moss", &encoded);
        assert!(matches!(result, Ok(false)));
    }

    #[test]
    fn malformed_signature_is_invalid() {
        let result = SignatureVerifier::verify_signature(&address(), "hello", "deadbeef");
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn malformed_address_is_bad_request() {
        let result = SignatureVerifier::verify_signature("0OIl", "hello", "deadbeef");
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
