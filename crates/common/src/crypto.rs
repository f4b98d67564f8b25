//! Cryptographic utilities for `ActivityPub` signatures.
//!
//! RSA key generation and parsing for the HTTP Signatures used on outbound
//! federation delivery.

use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding},
};
use std::path::Path;

use crate::{AppError, AppResult};

/// RSA key pair for `ActivityPub` HTTP Signatures.
#[derive(Debug, Clone)]
pub struct RsaKeypair {
    /// Public key in PEM format (SPKI encoding).
    pub public_key_pem: String,
    /// Private key in PEM format (PKCS#8 encoding).
    pub private_key_pem: String,
}

/// Default RSA key size (2048 bits).
const RSA_KEY_SIZE: usize = 2048;

/// Generate a new RSA key pair for `ActivityPub` HTTP Signatures.
///
/// # Errors
///
/// Returns [`AppError::Internal`] if key generation or PEM encoding fails.
pub fn generate_rsa_keypair() -> AppResult<RsaKeypair> {
    let mut rng = rand::thread_rng();

    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_SIZE)
        .map_err(|e| AppError::Internal(format!("Failed to generate RSA key: {e}")))?;

    let public_key = RsaPublicKey::from(&private_key);

    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(format!("Failed to encode private key: {e}")))?
        .to_string();

    let public_key_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(format!("Failed to encode public key: {e}")))?;

    Ok(RsaKeypair {
        public_key_pem,
        private_key_pem,
    })
}

/// Parse an RSA private key from PKCS#8 PEM format.
///
/// # Errors
///
/// Returns [`AppError::Internal`] if the PEM is not a valid PKCS#8 RSA key.
pub fn parse_private_key(pem: &str) -> AppResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .map_err(|e| AppError::Internal(format!("Failed to parse private key: {e}")))
}

/// Load the instance signing key from `path`, generating and persisting a
/// fresh one when the file does not exist yet.
pub async fn load_or_generate_key<P: AsRef<Path>>(path: P) -> AppResult<RsaPrivateKey> {
    let path = path.as_ref();

    match tokio::fs::read_to_string(path).await {
        Ok(pem) => parse_private_key(&pem),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let keypair = generate_rsa_keypair()?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, &keypair.private_key_pem).await?;
            parse_private_key(&keypair.private_key_pem)
        }
        Err(e) => Err(AppError::Internal(format!(
            "Failed to read key file {}: {e}",
            path.display()
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_keypair() {
        let keypair = generate_rsa_keypair().unwrap();

        assert!(keypair.public_key_pem.contains("BEGIN PUBLIC KEY"));
        assert!(keypair.private_key_pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn test_parse_generated_key() {
        let keypair = generate_rsa_keypair().unwrap();

        let _private = parse_private_key(&keypair.private_key_pem).unwrap();
    }

    #[tokio::test]
    async fn test_load_or_generate_creates_file() {
        let dir = std::env::temp_dir().join("pelago-crypto-test");
        let path = dir.join("instance_key.pem");
        let _ = tokio::fs::remove_file(&path).await;

        let first = load_or_generate_key(&path).await.unwrap();
        let second = load_or_generate_key(&path).await.unwrap();

        // Second load reads the persisted key rather than generating anew.
        assert_eq!(first.to_public_key(), second.to_public_key());

        let _ = tokio::fs::remove_file(&path).await;
    }
}
