use std::fmt;

use serde::{Deserialize, Deserializer};
use stoke_clock::UnixTime;
use time::{
    format_description::{well_known, BorrowedFormatItem},
    macros::format_description,
    OffsetDateTime,
};

use crate::jwk::{self, VerificationKey};

/// A published set of verification keys along with the time at which it
/// should be fetched again
///
/// ```
/// use stoke::KeySet;
/// use stoke_clock::UnixTime;
///
/// let keys: KeySet = serde_json::from_str(r#"{
///     "exp": "2024-05-01T12:00:00Z",
///     "keys": [{ "kty": "OKP", "crv": "Ed25519", "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo" }]
/// }"#).unwrap();
///
/// assert_eq!(keys.len(), 1);
/// assert_eq!(keys.next_update(), UnixTime(1_714_564_800));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[must_use]
pub struct KeySet {
    #[serde(deserialize_with = "deserialize_keys")]
    keys: Vec<VerificationKey>,
    #[serde(rename = "exp", deserialize_with = "deserialize_timestamp")]
    next_update: UnixTime,
}

impl KeySet {
    /// Constructs a key set valid until `next_update`
    pub fn new(keys: Vec<VerificationKey>, next_update: UnixTime) -> Self {
        Self { keys, next_update }
    }

    /// The keys in the order they were published
    pub fn keys(&self) -> &[VerificationKey] {
        &self.keys
    }

    /// The time at which this set must be fetched again
    pub fn next_update(&self) -> UnixTime {
        self.next_update
    }

    /// Whether the set should no longer be trusted at `now`
    pub fn is_stale(&self, now: UnixTime) -> bool {
        now >= self.next_update
    }

    /// The number of keys in the set
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set has no keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

const COMPACT_OFFSET: &[BorrowedFormatItem<'_>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"
);

/// Parses an RFC 3339 or ISO 8601 timestamp, such as `2024-05-01T12:00:00+00:00`
pub(crate) fn parse_timestamp(value: &str) -> Option<UnixTime> {
    let parsed = OffsetDateTime::parse(value, &well_known::Rfc3339)
        .or_else(|_| OffsetDateTime::parse(value, &well_known::Iso8601::DEFAULT))
        .ok()
        // Offsets written without a colon, as in `+0000`
        .or_else(|| OffsetDateTime::parse(value, COMPACT_OFFSET).ok())?;

    Some(UnixTime(u64::try_from(parsed.unix_timestamp()).unwrap_or(0)))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<UnixTime, D::Error>
where
    D: Deserializer<'de>,
{
    struct TimestampVisitor;

    impl<'de> serde::de::Visitor<'de> for TimestampVisitor {
        type Value = UnixTime;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an ISO 8601 timestamp")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_timestamp(v).ok_or_else(|| E::invalid_value(serde::de::Unexpected::Str(v), &self))
        }
    }

    deserializer.deserialize_str(TimestampVisitor)
}

fn deserialize_keys<'de, D>(deserializer: D) -> Result<Vec<VerificationKey>, D::Error>
where
    D: Deserializer<'de>,
{
    struct MaybeJwksVisitor;

    impl<'de> serde::de::Visitor<'de> for MaybeJwksVisitor {
        type Value = Vec<VerificationKey>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a list of JWK objects")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de>,
        {
            let mut values = Vec::with_capacity(seq.size_hint().unwrap_or_default());
            let mut index = 0_usize;

            while let Some(value) = seq.next_element()? {
                match value {
                    MaybeJwk::Jwk(jwk) => values.push(jwk),
                    MaybeJwk::Malformed(key) => {
                        tracing::warn!(
                            jwks.idx = index,
                            jwk.kty = ?key.kty,
                            jwk.kid = ?key.kid,
                            "ignoring malformed JWK"
                        );
                    }
                }
                index += 1;
            }

            Ok(values)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MaybeJwk {
        Jwk(VerificationKey),
        Malformed(JwkLike),
    }

    #[derive(Deserialize)]
    struct JwkLike {
        #[serde(default)]
        kty: Option<String>,
        #[serde(default)]
        kid: Option<jwk::KeyId>,
    }

    deserializer.deserialize_seq(MaybeJwksVisitor)
}
