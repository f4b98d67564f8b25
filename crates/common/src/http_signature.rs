//! HTTP Signature signing for `ActivityPub` delivery.
//!
//! Implements the outbound half of HTTP Signatures as used by `ActivityPub`
//! for request authentication.
//! See: <https://datatracker.ietf.org/doc/html/draft-cavage-http-signatures>
//!
//! Inbound verification belongs to the federation layer and is not part of
//! this crate.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rsa::{
    RsaPrivateKey,
    pkcs1v15::SigningKey,
    sha2::Sha256,
    signature::{SignatureEncoding, Signer},
};
use sha2::{Digest, Sha256 as Sha256Hasher};
use std::collections::HashMap;

use crate::{AppError, AppResult};

/// Build the signature string from request components.
///
/// This creates the string that gets signed.
pub fn build_signature_string(
    method: &str,
    path: &str,
    headers: &HashMap<String, String>,
    signed_headers: &[&str],
) -> AppResult<String> {
    let mut parts = Vec::new();

    for header_name in signed_headers {
        let value = if *header_name == "(request-target)" {
            format!("{} {}", method.to_lowercase(), path)
        } else {
            headers
                .get(&header_name.to_lowercase())
                .cloned()
                .ok_or_else(|| AppError::BadRequest(format!("Missing header: {header_name}")))?
        };

        parts.push(format!("{header_name}: {value}"));
    }

    Ok(parts.join("\n"))
}

/// Sign an HTTP request, returning the `Signature` header value.
///
/// # Arguments
/// * `private_key` - The RSA private key
/// * `key_id` - The key ID (public key URL)
/// * `method` - HTTP method
/// * `path` - Request path
/// * `headers` - Headers to include in the signature
pub fn sign_request(
    private_key: &RsaPrivateKey,
    key_id: &str,
    method: &str,
    path: &str,
    headers: &HashMap<String, String>,
    signed_header_names: &[&str],
) -> AppResult<String> {
    let sig_string = build_signature_string(method, path, headers, signed_header_names)?;

    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let signature = signing_key.sign(sig_string.as_bytes());
    let sig_base64 = BASE64.encode(signature.to_bytes());

    Ok(format!(
        r#"keyId="{}",algorithm="rsa-sha256",headers="{}",signature="{}""#,
        key_id,
        signed_header_names.join(" "),
        sig_base64
    ))
}

/// Calculate the SHA-256 digest header value for a request body.
#[must_use]
pub fn calculate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256Hasher::new();
    hasher.update(body);
    let hash = hasher.finalize();
    format!("SHA-256={}", BASE64.encode(hash))
}
