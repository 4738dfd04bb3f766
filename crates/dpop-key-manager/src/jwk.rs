//! JWK encoding of DPoP keys.

use crate::{KeyLifecycleError, KeyResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const RSA_KEY_BITS: usize = 2048;

/// Signing algorithm of a DPoP key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DpopAlgorithm {
    /// ECDSA P-256 with SHA-256
    #[default]
    ES256,
    /// RSASSA-PKCS1-v1_5 with SHA-256, 2048-bit modulus
    RS256,
}

impl DpopAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DpopAlgorithm::ES256 => "ES256",
            DpopAlgorithm::RS256 => "RS256",
        }
    }
}

impl fmt::Display for DpopAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Private JWK (RFC 7517). Base64url members without padding.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum DpopJwk {
    #[serde(rename = "EC")]
    Ec {
        crv: String,
        x: String,
        y: String,
        d: String,
    },
    #[serde(rename = "RSA")]
    Rsa {
        n: String,
        e: String,
        d: String,
        p: String,
        q: String,
    },
}

impl DpopJwk {
    /// Generate a fresh key. CPU-bound; RSA takes noticeable time.
    pub fn generate(algorithm: DpopAlgorithm) -> KeyResult<Self> {
        match algorithm {
            DpopAlgorithm::ES256 => generate_es256(),
            DpopAlgorithm::RS256 => generate_rs256(),
        }
    }

    pub fn from_json(json: &str) -> KeyResult<Self> {
        let jwk: DpopJwk = serde_json::from_str(json)
            .map_err(|e| KeyLifecycleError::InvalidKey(e.to_string()))?;
        if let DpopJwk::Ec { crv, .. } = &jwk {
            if crv != "P-256" {
                return Err(KeyLifecycleError::InvalidKey(format!(
                    "unsupported curve {}",
                    crv
                )));
            }
        }
        Ok(jwk)
    }

    pub fn to_json(&self) -> KeyResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn algorithm(&self) -> DpopAlgorithm {
        match self {
            DpopJwk::Ec { .. } => DpopAlgorithm::ES256,
            DpopJwk::Rsa { .. } => DpopAlgorithm::RS256,
        }
    }

    /// Public members only, with `kty` and `alg`.
    pub fn public_jwk(&self) -> serde_json::Value {
        match self {
            DpopJwk::Ec { crv, x, y, .. } => serde_json::json!({
                "kty": "EC",
                "alg": "ES256",
                "crv": crv,
                "x": x,
                "y": y,
            }),
            DpopJwk::Rsa { n, e, .. } => serde_json::json!({
                "kty": "RSA",
                "alg": "RS256",
                "n": n,
                "e": e,
            }),
        }
    }

    /// RFC 7638 SHA-256 thumbprint, base64url.
    pub fn thumbprint(&self) -> String {
        // Required members only, lexicographic order (serde_json maps are sorted).
        let required = match self {
            DpopJwk::Ec { crv, x, y, .. } => serde_json::json!({
                "crv": crv,
                "kty": "EC",
                "x": x,
                "y": y,
            }),
            DpopJwk::Rsa { n, e, .. } => serde_json::json!({
                "e": e,
                "kty": "RSA",
                "n": n,
            }),
        };
        let hash = Sha256::digest(required.to_string().as_bytes());
        URL_SAFE_NO_PAD.encode(hash)
    }
}

impl fmt::Debug for DpopJwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DpopJwk")
            .field("alg", &self.algorithm())
            .field("thumbprint", &self.thumbprint())
            .finish_non_exhaustive()
    }
}

fn generate_es256() -> KeyResult<DpopJwk> {
    use p256::ecdsa::{SigningKey, VerifyingKey};

    let signing_key = SigningKey::random(&mut OsRng);
    let verifying_key = VerifyingKey::from(&signing_key);
    let point = verifying_key.to_encoded_point(false);

    let x = point
        .x()
        .ok_or_else(|| KeyLifecycleError::Generation("P-256 key has no X coordinate".to_string()))?;
    let y = point
        .y()
        .ok_or_else(|| KeyLifecycleError::Generation("P-256 key has no Y coordinate".to_string()))?;

    Ok(DpopJwk::Ec {
        crv: "P-256".to_string(),
        x: URL_SAFE_NO_PAD.encode(x),
        y: URL_SAFE_NO_PAD.encode(y),
        d: URL_SAFE_NO_PAD.encode(signing_key.to_bytes()),
    })
}

fn generate_rs256() -> KeyResult<DpopJwk> {
    use rsa::traits::{PrivateKeyParts, PublicKeyParts};
    use rsa::RsaPrivateKey;

    let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
        .map_err(|e| KeyLifecycleError::Generation(format!("RSA: {}", e)))?;

    let primes = private_key.primes();
    if primes.len() < 2 {
        return Err(KeyLifecycleError::Generation(
            "RSA key is missing its prime factors".to_string(),
        ));
    }

    Ok(DpopJwk::Rsa {
        n: URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
        e: URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
        d: URL_SAFE_NO_PAD.encode(private_key.d().to_bytes_be()),
        p: URL_SAFE_NO_PAD.encode(primes[0].to_bytes_be()),
        q: URL_SAFE_NO_PAD.encode(primes[1].to_bytes_be()),
    })
}
