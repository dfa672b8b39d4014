//! Signature verification with public keys

use ring::signature::{self, RsaPublicKeyComponents, UnparsedPublicKey};

use crate::{
    error,
    jwa::Algorithm,
    jwk::{KeyMaterial, VerificationKey},
};

/// A type that can verify signatures
pub trait Verifier {
    /// The algorithm type used to describe the signature
    type Algorithm;

    /// The error returned when a signature does not verify
    type Error;

    /// Verifies `signature` over `data` using `alg`
    ///
    /// # Errors
    ///
    /// Returns an error if the signature is invalid or the key cannot be
    /// used with the algorithm.
    fn verify(&self, alg: Self::Algorithm, data: &[u8], signature: &[u8])
        -> Result<(), Self::Error>;
}

impl Verifier for VerificationKey {
    type Algorithm = Algorithm;
    type Error = error::SignatureError;

    fn verify(&self, alg: Algorithm, data: &[u8], signature: &[u8]) -> Result<(), Self::Error> {
        match (alg, self.material()) {
            (Algorithm::ES256, KeyMaterial::EllipticCurve { x, y, .. }) => verify_ecdsa(
                &signature::ECDSA_P256_SHA256_FIXED,
                32,
                (x.as_slice(), y.as_slice()),
                alg,
                data,
                signature,
            ),
            (Algorithm::ES384, KeyMaterial::EllipticCurve { x, y, .. }) => verify_ecdsa(
                &signature::ECDSA_P384_SHA384_FIXED,
                48,
                (x.as_slice(), y.as_slice()),
                alg,
                data,
                signature,
            ),
            (Algorithm::PS256, KeyMaterial::Rsa { modulus, exponent }) => verify_rsa(
                &signature::RSA_PSS_2048_8192_SHA256,
                (modulus.as_slice(), exponent.as_slice()),
                data,
                signature,
            ),
            (Algorithm::PS384, KeyMaterial::Rsa { modulus, exponent }) => verify_rsa(
                &signature::RSA_PSS_2048_8192_SHA384,
                (modulus.as_slice(), exponent.as_slice()),
                data,
                signature,
            ),
            (Algorithm::EdDSA, KeyMaterial::OctetKeyPair { curve, x }) => {
                if curve != "Ed25519" {
                    return Err(error::unsupported_algorithm(alg).into());
                }

                UnparsedPublicKey::new(&signature::ED25519, x)
                    .verify(data, signature)
                    .map_err(|_| error::signature_mismatch().into())
            }
            // No P-521 or "PS521" verifier is available
            (Algorithm::ES512, KeyMaterial::EllipticCurve { .. })
            | (Algorithm::PS521, KeyMaterial::Rsa { .. }) => {
                Err(error::unsupported_algorithm(alg).into())
            }
            _ => Err(error::incompatible_algorithm(alg).into()),
        }
    }
}

fn verify_ecdsa(
    params: &'static signature::EcdsaVerificationAlgorithm,
    field_len: usize,
    (x, y): (&[u8], &[u8]),
    alg: Algorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<(), error::SignatureError> {
    let x = left_pad(x, field_len).ok_or_else(|| error::incompatible_algorithm(alg))?;
    let y = left_pad(y, field_len).ok_or_else(|| error::incompatible_algorithm(alg))?;

    let mut point = Vec::with_capacity(1 + 2 * field_len);
    point.push(0x04);
    point.extend_from_slice(&x);
    point.extend_from_slice(&y);

    UnparsedPublicKey::new(params, point)
        .verify(data, signature)
        .map_err(|_| error::signature_mismatch().into())
}

fn verify_rsa(
    params: &'static signature::RsaParameters,
    (modulus, exponent): (&[u8], &[u8]),
    data: &[u8],
    signature: &[u8],
) -> Result<(), error::SignatureError> {
    let components = RsaPublicKeyComponents {
        n: strip_leading_zeros(modulus),
        e: strip_leading_zeros(exponent),
    };

    components
        .verify(params, data, signature)
        .map_err(|_| error::signature_mismatch().into())
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Left-pads a big-endian coordinate to the curve's field size
///
/// Coordinates may arrive with their leading zero bytes trimmed, or with an
/// extra sign byte.
fn left_pad(coordinate: &[u8], len: usize) -> Option<Vec<u8>> {
    let significant = strip_leading_zeros(coordinate);
    if significant.len() > len {
        return None;
    }

    let mut padded = vec![0; len - significant.len()];
    padded.extend_from_slice(significant);
    Some(padded)
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::test::TestSigner;

    #[test]
    fn left_pad_restores_trimmed_coordinates() {
        assert_eq!(left_pad(&[1, 2], 4), Some(vec![0, 0, 1, 2]));
        assert_eq!(left_pad(&[0, 0, 0, 1, 2], 4), Some(vec![0, 0, 1, 2]));
        assert_eq!(left_pad(&[1, 2, 3, 4, 5], 4), None);
    }

    #[test]
    fn verifies_p256_signature() -> Result<()> {
        let signer = TestSigner::p256();
        let sig = signer.sign_raw(b"hello");

        signer.key().verify(Algorithm::ES256, b"hello", &sig)?;
        let err = signer
            .key()
            .verify(Algorithm::ES256, b"goodbye", &sig)
            .unwrap_err();
        assert!(err.is_signature_mismatch());
        Ok(())
    }

    #[test]
    fn verifies_p384_signature() -> Result<()> {
        let signer = TestSigner::p384();
        let sig = signer.sign_raw(b"hello");

        signer.key().verify(Algorithm::ES384, b"hello", &sig)?;
        Ok(())
    }

    #[test]
    fn verifies_ed25519_signature() -> Result<()> {
        let signer = TestSigner::ed25519();
        let sig = signer.sign_raw(b"hello");

        signer.key().verify(Algorithm::EdDSA, b"hello", &sig)?;
        Ok(())
    }

    #[test]
    fn mismatched_material_is_incompatible() {
        let signer = TestSigner::ed25519();
        let sig = signer.sign_raw(b"hello");

        let err = signer
            .key()
            .verify(Algorithm::ES256, b"hello", &sig)
            .unwrap_err();
        assert!(matches!(err, error::SignatureError::IncompatibleAlgorithm(_)));
    }

    #[test]
    fn p521_is_unsupported() {
        let key = VerificationKey::new(KeyMaterial::EllipticCurve {
            curve: "P-521".into(),
            x: vec![1; 66],
            y: vec![1; 66],
        });

        let err = key.verify(Algorithm::ES512, b"hello", &[0; 132]).unwrap_err();
        assert!(matches!(err, error::SignatureError::UnsupportedAlgorithm(_)));
    }
}
