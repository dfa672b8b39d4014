//! Public verification keys as published in a JSON Web Key Set
//!
//! Only the public portion of a key is ever modeled. A key carries its
//! type-specific material along with the optional `kid`, `use`, and `alg`
//! metadata fields.
//!
//! ```
//! use stoke::jwk::{KeyType, VerificationKey};
//!
//! let key: VerificationKey = serde_json::from_str(r#"{
//!     "kty": "OKP",
//!     "crv": "Ed25519",
//!     "kid": "signing-1",
//!     "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"
//! }"#).unwrap();
//!
//! assert_eq!(key.key_type(), KeyType::OctetKeyPair);
//! assert_eq!(key.key_id().map(|k| k.as_str()), Some("signing-1"));
//! ```

use std::{convert::TryFrom, fmt};

use aliri_braid::braid;
use serde::{Deserialize, Serialize};

use crate::{b64, error};

/// An identifier for a JWK
#[braid(serde, ref_doc = "A borrowed reference to a [`KeyId`]")]
pub struct KeyId;

/// The intended use for a JWK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[must_use]
pub enum Usage {
    /// The key is intended for signing and verification
    #[serde(rename = "sig")]
    Signing,

    /// The key is intended for encryption
    #[serde(rename = "enc")]
    Encryption,

    /// Some other declared use
    #[serde(rename = "other")]
    Other,
}

impl Usage {
    fn from_declared(declared: &str) -> Self {
        match declared {
            "sig" => Self::Signing,
            "enc" => Self::Encryption,
            _ => Self::Other,
        }
    }
}

/// The family of a key, as named by the `kty` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// `EC`
    EllipticCurve,
    /// `RSA`
    Rsa,
    /// `OKP`
    OctetKeyPair,
    /// Anything else
    Unknown,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::EllipticCurve => "EC",
            Self::Rsa => "RSA",
            Self::OctetKeyPair => "OKP",
            Self::Unknown => "unknown",
        })
    }
}

/// The public material of a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// An elliptic curve point
    EllipticCurve {
        /// The curve name, such as `P-256`
        curve: String,
        /// The x coordinate, big-endian
        x: Vec<u8>,
        /// The y coordinate, big-endian
        y: Vec<u8>,
    },

    /// An RSA public key
    Rsa {
        /// The modulus, big-endian
        modulus: Vec<u8>,
        /// The public exponent, big-endian
        exponent: Vec<u8>,
    },

    /// An octet key pair public key, such as Ed25519
    OctetKeyPair {
        /// The curve name, such as `Ed25519`
        curve: String,
        /// The public key bytes
        x: Vec<u8>,
    },

    /// A key of a type that is not understood
    Unknown {
        /// The declared `kty`
        kty: String,
    },
}

impl KeyMaterial {
    /// The key family of this material
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::EllipticCurve { .. } => KeyType::EllipticCurve,
            Self::Rsa { .. } => KeyType::Rsa,
            Self::OctetKeyPair { .. } => KeyType::OctetKeyPair,
            Self::Unknown { .. } => KeyType::Unknown,
        }
    }
}

/// A single public key from a key set
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "JwkDto")]
#[must_use]
pub struct VerificationKey {
    key_id: Option<KeyId>,
    usage: Option<Usage>,
    algorithm: Option<String>,
    material: KeyMaterial,
}

impl VerificationKey {
    /// Wraps key material without any metadata
    pub fn new(material: KeyMaterial) -> Self {
        Self {
            key_id: None,
            usage: None,
            algorithm: None,
            material,
        }
    }

    /// Sets the key ID
    pub fn with_key_id(self, key_id: KeyId) -> Self {
        Self {
            key_id: Some(key_id),
            ..self
        }
    }

    /// Sets the intended usage
    pub fn with_usage(self, usage: Usage) -> Self {
        Self {
            usage: Some(usage),
            ..self
        }
    }

    /// The key ID, if any
    pub fn key_id(&self) -> Option<&KeyIdRef> {
        self.key_id.as_deref()
    }

    /// The declared usage, if any
    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    /// The `alg` declared by the key set, if any
    ///
    /// This is informational only. The verification algorithm is always
    /// derived from the key material by [`jwa::resolve`][crate::jwa::resolve].
    pub fn declared_algorithm(&self) -> Option<&str> {
        self.algorithm.as_deref()
    }

    /// The public key material
    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    /// The key family
    pub fn key_type(&self) -> KeyType {
        self.material.key_type()
    }

    /// Whether the key may be used to verify signatures
    ///
    /// Keys without a `use` are assumed to be signing keys.
    pub fn is_signing_key(&self) -> bool {
        matches!(self.usage, None | Some(Usage::Signing))
    }
}

#[derive(Deserialize)]
struct JwkDto {
    kty: String,
    #[serde(default)]
    kid: Option<KeyId>,
    #[serde(rename = "use", default)]
    usage: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

fn required(field: Option<String>, reason: &'static str) -> Result<String, error::MalformedJwk> {
    field.ok_or_else(|| error::malformed_jwk(reason))
}

fn decode_field(field: Option<String>, reason: &'static str) -> Result<Vec<u8>, error::MalformedJwk> {
    let encoded = required(field, reason)?;
    b64::decode(&encoded).map_err(|err| error::malformed_jwk_field(reason, err))
}

impl TryFrom<JwkDto> for VerificationKey {
    type Error = error::MalformedJwk;

    fn try_from(dto: JwkDto) -> Result<Self, Self::Error> {
        let material = match dto.kty.as_str() {
            "EC" => KeyMaterial::EllipticCurve {
                curve: required(dto.crv, "missing curve")?,
                x: decode_field(dto.x, "invalid x coordinate")?,
                y: decode_field(dto.y, "invalid y coordinate")?,
            },
            "RSA" => KeyMaterial::Rsa {
                modulus: decode_field(dto.n, "invalid modulus")?,
                exponent: decode_field(dto.e, "invalid exponent")?,
            },
            "OKP" => KeyMaterial::OctetKeyPair {
                curve: required(dto.crv, "missing curve")?,
                x: decode_field(dto.x, "invalid public key")?,
            },
            _ => KeyMaterial::Unknown { kty: dto.kty },
        };

        Ok(Self {
            key_id: dto.kid,
            usage: dto.usage.as_deref().map(Usage::from_declared),
            algorithm: dto.alg,
            material,
        })
    }
}
