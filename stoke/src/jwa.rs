//! Selection of the signature algorithm for a key
//!
//! The algorithm is never taken from the token. It is derived purely from
//! the key metadata, and the token header must then agree with it.
//!
//! | Key                         | Algorithm |
//! |-----------------------------|-----------|
//! | `EC` on `P-256`             | `ES256`   |
//! | `EC` on `P-384`             | `ES384`   |
//! | `EC` on `P-521`             | `ES512`   |
//! | `RSA` with 256-bit modulus  | `PS256`   |
//! | `RSA` with 384-bit modulus  | `PS384`   |
//! | `RSA` with 512-bit modulus  | `PS521`   |
//! | `OKP`                       | `EdDSA`   |
//!
//! The RSA rows compare the modulus length against hash output sizes, so
//! RSA keys of any practical size do not resolve and are skipped during
//! verification.

use std::fmt;

use crate::{
    error,
    jwk::{KeyMaterial, KeyType, VerificationKey},
};

/// A signature algorithm that a key can resolve to
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// ECDSA using P-256 and SHA-256
    ES256,
    /// ECDSA using P-384 and SHA-384
    ES384,
    /// ECDSA using P-521 and SHA-512
    ES512,
    /// RSASSA-PSS using SHA-256
    PS256,
    /// RSASSA-PSS using SHA-384
    PS384,
    /// The name produced for a 512-bit RSA modulus
    ///
    /// This is not a registered algorithm, and tokens will never verify
    /// with it.
    PS521,
    /// EdDSA over an octet key pair curve
    EdDSA,
}

impl Algorithm {
    /// The name of the algorithm as it appears in a JWT `alg` header
    pub const fn name(self) -> &'static str {
        match self {
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS521 => "PS521",
            Self::EdDSA => "EdDSA",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Determines the algorithm used to verify signatures made by this key
///
/// # Errors
///
/// Returns an error when the key type, curve, or size has no mapping.
pub fn resolve(key: &VerificationKey) -> Result<Algorithm, error::UnresolvedAlgorithm> {
    match key.material() {
        KeyMaterial::EllipticCurve { curve, .. } => match curve.as_str() {
            "P-256" => Ok(Algorithm::ES256),
            "P-384" => Ok(Algorithm::ES384),
            "P-521" => Ok(Algorithm::ES512),
            other => Err(error::unresolved_algorithm(
                KeyType::EllipticCurve,
                format!("curve {other}"),
            )),
        },
        KeyMaterial::Rsa { modulus, .. } => match rsa_key_bits(modulus) {
            256 => Ok(Algorithm::PS256),
            384 => Ok(Algorithm::PS384),
            512 => Ok(Algorithm::PS521),
            bits => Err(error::unresolved_algorithm(
                KeyType::Rsa,
                format!("{bits}-bit modulus"),
            )),
        },
        KeyMaterial::OctetKeyPair { .. } => Ok(Algorithm::EdDSA),
        KeyMaterial::Unknown { kty } => Err(error::unresolved_algorithm(
            KeyType::Unknown,
            format!("kty {kty}"),
        )),
    }
}

/// The bit length of a big-endian RSA modulus, ignoring leading zeros
pub fn rsa_key_bits(modulus: &[u8]) -> usize {
    let significant = match modulus.iter().position(|&b| b != 0) {
        Some(idx) => &modulus[idx..],
        None => return 0,
    };

    let lead_bits = 8 - significant[0].leading_zeros() as usize;
    (significant.len() - 1) * 8 + lead_bits
}
