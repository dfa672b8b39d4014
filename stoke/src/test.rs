//! Signing and key-serving helpers for unit tests

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use ring::{
    rand::SystemRandom,
    signature::{self, EcdsaKeyPair, Ed25519KeyPair, KeyPair},
};
use serde_json::{json, Value};
use stoke_clock::{Clock, DurationSecs, TestClock};

use crate::{
    b64,
    cache::KeySetSource,
    error::KeyFetchError,
    jwa::Algorithm,
    jwk::{KeyId, KeyMaterial, VerificationKey},
    jwt::Jwt,
    KeySet,
};

#[derive(Debug)]
enum Pair {
    Ecdsa {
        pair: EcdsaKeyPair,
        curve: &'static str,
        field_len: usize,
        alg: Algorithm,
    },
    Ed25519(Ed25519KeyPair),
}

/// A freshly generated key pair that produces tokens for tests
#[derive(Debug)]
pub(crate) struct TestSigner {
    pair: Pair,
    kid: Option<KeyId>,
    rng: SystemRandom,
}

impl TestSigner {
    fn ecdsa(
        signing: &'static signature::EcdsaSigningAlgorithm,
        curve: &'static str,
        field_len: usize,
        alg: Algorithm,
    ) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(signing, &rng).unwrap();
        let pair = EcdsaKeyPair::from_pkcs8(signing, pkcs8.as_ref(), &rng).unwrap();
        Self {
            pair: Pair::Ecdsa {
                pair,
                curve,
                field_len,
                alg,
            },
            kid: None,
            rng,
        }
    }

    pub(crate) fn p256() -> Self {
        Self::ecdsa(
            &signature::ECDSA_P256_SHA256_FIXED_SIGNING,
            "P-256",
            32,
            Algorithm::ES256,
        )
    }

    pub(crate) fn p384() -> Self {
        Self::ecdsa(
            &signature::ECDSA_P384_SHA384_FIXED_SIGNING,
            "P-384",
            48,
            Algorithm::ES384,
        )
    }

    pub(crate) fn ed25519() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        Self {
            pair: Pair::Ed25519(pair),
            kid: None,
            rng,
        }
    }

    pub(crate) fn with_kid(self, kid: &str) -> Self {
        Self {
            kid: Some(KeyId::from(kid)),
            ..self
        }
    }

    pub(crate) fn alg(&self) -> Algorithm {
        match &self.pair {
            Pair::Ecdsa { alg, .. } => *alg,
            Pair::Ed25519(_) => Algorithm::EdDSA,
        }
    }

    fn material(&self) -> KeyMaterial {
        match &self.pair {
            Pair::Ecdsa {
                pair,
                curve,
                field_len,
                ..
            } => {
                let point = pair.public_key().as_ref();
                KeyMaterial::EllipticCurve {
                    curve: (*curve).to_owned(),
                    x: point[1..=*field_len].to_vec(),
                    y: point[1 + *field_len..].to_vec(),
                }
            }
            Pair::Ed25519(pair) => KeyMaterial::OctetKeyPair {
                curve: "Ed25519".to_owned(),
                x: pair.public_key().as_ref().to_vec(),
            },
        }
    }

    pub(crate) fn key(&self) -> VerificationKey {
        let key = VerificationKey::new(self.material());
        match &self.kid {
            Some(kid) => key.with_key_id(kid.clone()),
            None => key,
        }
    }

    /// The public key as it would appear in a published key set
    pub(crate) fn jwk_json(&self) -> Value {
        let mut jwk = match self.material() {
            KeyMaterial::EllipticCurve { curve, x, y } => json!({
                "kty": "EC",
                "crv": curve,
                "x": b64::encode(x),
                "y": b64::encode(y),
            }),
            KeyMaterial::OctetKeyPair { curve, x } => json!({
                "kty": "OKP",
                "crv": curve,
                "x": b64::encode(x),
            }),
            _ => unreachable!(),
        };

        jwk["use"] = json!("sig");
        if let Some(kid) = &self.kid {
            jwk["kid"] = json!(kid.as_str());
        }
        jwk
    }

    pub(crate) fn sign_raw(&self, message: &[u8]) -> Vec<u8> {
        match &self.pair {
            Pair::Ecdsa { pair, .. } => pair.sign(&self.rng, message).unwrap().as_ref().to_vec(),
            Pair::Ed25519(pair) => pair.sign(message).as_ref().to_vec(),
        }
    }

    /// Signs the claims with a header naming this key's algorithm and ID
    pub(crate) fn sign(&self, claims: &Value) -> Jwt {
        let mut header = json!({ "alg": self.alg().name() });
        if let Some(kid) = &self.kid {
            header["kid"] = json!(kid.as_str());
        }
        self.sign_with_header(&header, claims)
    }

    pub(crate) fn sign_with_header(&self, header: &Value, claims: &Value) -> Jwt {
        let message = format!(
            "{}.{}",
            b64::encode(header.to_string()),
            b64::encode(claims.to_string())
        );
        let signature = self.sign_raw(message.as_bytes());
        Jwt::from(format!("{}.{}", message, b64::encode(signature)))
    }
}

/// A token with a well-formed structure and a meaningless signature
pub(crate) fn unsigned_token(header: &Value, claims: &Value) -> Jwt {
    Jwt::from(format!(
        "{}.{}.c2ln",
        b64::encode(header.to_string()),
        b64::encode(claims.to_string())
    ))
}

/// Serves `router` on an ephemeral local port, returning its base URL
#[cfg(feature = "reqwest")]
pub(crate) async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await });
    format!("http://{addr}")
}

/// A key source that counts fetches and can be switched off
///
/// Each fetch relabels the keys as `gen-{fetch}-{index}` so that readers
/// can tell which fetch produced a snapshot.
#[derive(Debug)]
pub(crate) struct CountingSource {
    fetches: AtomicUsize,
    failing: AtomicBool,
    keys: Vec<VerificationKey>,
    valid_for: DurationSecs,
    clock: Arc<TestClock>,
}

impl CountingSource {
    pub(crate) fn new(
        keys: Vec<VerificationKey>,
        valid_for: DurationSecs,
        clock: Arc<TestClock>,
    ) -> Self {
        Self {
            fetches: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            keys,
            valid_for,
            clock,
        }
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeySetSource for CountingSource {
    async fn fetch_key_set(&self) -> Result<KeySet, KeyFetchError> {
        let generation = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;

        if self.failing.load(Ordering::SeqCst) {
            return Err(KeyFetchError::source_error("key source offline"));
        }

        let keys = self
            .keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                key.clone()
                    .with_key_id(KeyId::from(format!("gen-{generation}-{i}")))
            })
            .collect();

        Ok(KeySet::new(keys, self.clock.now() + self.valid_for))
    }
}
