//! Base64url decoding that tolerates both padded and unpadded input
//!
//! Key sets published by some authorities pad their coordinates with `=`
//! while JWT sections never are, so both must decode.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    DecodeError, Engine,
};

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub(crate) fn decode(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    URL_SAFE_LENIENT.decode(encoded)
}

#[cfg(test)]
pub(crate) fn encode(raw: impl AsRef<[u8]>) -> String {
    URL_SAFE_LENIENT.encode(raw)
}
