//! Policies evaluated against verified claims

use std::{borrow::Cow, collections::BTreeMap, fmt};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::jwt::Claims;

/// A policy against which a request will be evaluated
pub trait Policy {
    /// The request type evaluated by this policy
    type Request;

    /// The error returned when this policy denies a request
    type Denial: fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Evaluates the request, producing an effect
    fn evaluate(&self, request: &Self::Request) -> Result<(), Self::Denial>;
}

impl<T> Policy for &'_ T
where
    T: Policy,
{
    type Request = T::Request;
    type Denial = T::Denial;

    fn evaluate(&self, request: &Self::Request) -> Result<(), Self::Denial> {
        T::evaluate(self, request)
    }
}

impl<T> Policy for std::sync::Arc<T>
where
    T: Policy,
{
    type Request = T::Request;
    type Denial = T::Denial;

    fn evaluate(&self, request: &Self::Request) -> Result<(), Self::Denial> {
        T::evaluate(self, request)
    }
}

/// The claims did not satisfy a [`RequiredClaims`] or [`ClaimRequirements`] policy
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("missing required claims: {}", .missing.join(", "))]
pub struct MissingRequiredClaims {
    missing: Vec<String>,
}

impl MissingRequiredClaims {
    /// The required claims that were absent or held a different value
    pub fn missing(&self) -> &[String] {
        &self.missing
    }
}

/// Claims that must be present with exactly the given values
///
/// An empty set of required claims admits any claims.
///
/// ```
/// use serde_json::json;
/// use stoke::{jwt::Claims, policy::{Policy, RequiredClaims}};
///
/// let policy = RequiredClaims::none()
///     .and_require("role", "eng")
///     .and_require("level", 3);
///
/// let claims = Claims::new()
///     .with("role", "eng")
///     .with("level", 3)
///     .with("name", "alice");
///
/// assert!(policy.evaluate(&claims).is_ok());
/// assert!(policy.evaluate(&claims.with("role", "ops")).is_err());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
#[must_use]
pub struct RequiredClaims(BTreeMap<String, Value>);

impl RequiredClaims {
    /// Requires nothing
    pub fn none() -> Self {
        Self::default()
    }

    /// Adds a required claim
    pub fn and_require(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.require(key, value);
        self
    }

    /// Adds a required claim in place
    pub fn require(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Whether nothing is required
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the required claims in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for RequiredClaims {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl Policy for RequiredClaims {
    type Request = Claims;
    type Denial = MissingRequiredClaims;

    fn evaluate(&self, claims: &Claims) -> Result<(), Self::Denial> {
        let missing: Vec<String> = self
            .0
            .iter()
            .filter(|(key, required)| claims.get(key) != Some(*required))
            .map(|(key, _)| key.clone())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingRequiredClaims { missing })
        }
    }
}

/// A test applied to the value of a single claim
#[derive(Clone, Debug)]
pub enum ClaimTest {
    /// The whole value equals this JSON value
    Exactly(Value),

    /// Some comma-separated element equals this string
    Equals(String),

    /// Some comma-separated element contains this substring
    Contains(String),

    /// Some comma-separated element matches this pattern anywhere
    Matches(Regex),
}

impl ClaimTest {
    fn passes(&self, value: &Value) -> bool {
        if let Self::Exactly(required) = self {
            return value == required;
        }

        let text: Cow<str> = match value {
            Value::String(s) => Cow::Borrowed(s),
            Value::Number(n) => Cow::Owned(n.to_string()),
            Value::Bool(b) => Cow::Owned(b.to_string()),
            _ => return false,
        };

        text.split(',').any(|element| match self {
            Self::Equals(expected) => element == expected,
            Self::Contains(needle) => element.contains(needle.as_str()),
            Self::Matches(pattern) => pattern.is_match(element),
            Self::Exactly(_) => false,
        })
    }
}

/// A conjunction of claim tests, with alternatives
///
/// The requirements pass when every test passes, or when any alternative
/// added with [`or`][ClaimRequirements::or] passes. Requirements made up
/// only of alternatives need one of them to pass. A claim holding a
/// comma-separated list passes a string test if any one element does.
///
/// ```
/// use stoke::{jwt::Claims, policy::{ClaimRequirements, Policy}};
///
/// let policy = ClaimRequirements::new()
///     .with_claim("grp", "eng")
///     .or(ClaimRequirements::new().with_claim_contains("sub", "@ops."));
///
/// assert!(policy.evaluate(&Claims::new().with("grp", "sales,eng")).is_ok());
/// assert!(policy.evaluate(&Claims::new().with("sub", "kim@ops.example")).is_ok());
/// assert!(policy.evaluate(&Claims::new().with("grp", "sales")).is_err());
/// ```
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct ClaimRequirements {
    tests: Vec<(String, ClaimTest)>,
    alternatives: Vec<ClaimRequirements>,
}

impl ClaimRequirements {
    /// Requires nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a test against the named claim
    pub fn with_test(mut self, key: impl Into<String>, test: ClaimTest) -> Self {
        self.tests.push((key.into(), test));
        self
    }

    /// Requires an element of the claim to equal `value`
    pub fn with_claim(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_test(key, ClaimTest::Equals(value.into()))
    }

    /// Requires an element of the claim to contain `needle`
    pub fn with_claim_contains(self, key: impl Into<String>, needle: impl Into<String>) -> Self {
        self.with_test(key, ClaimTest::Contains(needle.into()))
    }

    /// Requires an element of the claim to match `pattern`
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is not a valid regular expression.
    pub fn with_claim_match(
        self,
        key: impl Into<String>,
        pattern: &str,
    ) -> Result<Self, regex::Error> {
        Ok(self.with_test(key, ClaimTest::Matches(Regex::new(pattern)?)))
    }

    /// Accepts claims that satisfy `alternative` instead
    pub fn or(mut self, alternative: impl Into<ClaimRequirements>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Whether nothing is required
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty() && self.alternatives.is_empty()
    }
}

impl From<RequiredClaims> for ClaimRequirements {
    fn from(required: RequiredClaims) -> Self {
        required
            .0
            .into_iter()
            .fold(Self::new(), |acc, (key, value)| {
                acc.with_test(key, ClaimTest::Exactly(value))
            })
    }
}

impl Policy for ClaimRequirements {
    type Request = Claims;
    type Denial = MissingRequiredClaims;

    fn evaluate(&self, claims: &Claims) -> Result<(), Self::Denial> {
        let mut missing = Vec::new();
        for alternative in &self.alternatives {
            match alternative.evaluate(claims) {
                Ok(()) => return Ok(()),
                Err(denial) if self.tests.is_empty() => missing.extend(denial.missing),
                Err(_) => {}
            }
        }

        missing.extend(
            self.tests
                .iter()
                .filter(|(key, test)| !claims.get(key).is_some_and(|value| test.passes(value)))
                .map(|(key, _)| key.clone()),
        );
        missing.sort_unstable();
        missing.dedup();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingRequiredClaims { missing })
        }
    }
}

/// Constructs a [`RequiredClaims`] policy from key/value pairs
///
/// ```
/// use stoke::required_claims;
///
/// let policy = required_claims! {
///     "role" => "eng",
///     "level" => 3,
/// };
/// ```
///
/// This is equivalent to the following:
///
/// ```
/// use stoke::policy::RequiredClaims;
///
/// let policy = RequiredClaims::none()
///     .and_require("role", "eng")
///     .and_require("level", 3);
/// ```
#[macro_export]
macro_rules! required_claims {
    ($($key:expr => $value:expr),* $(,)?) => {
        $crate::policy::RequiredClaims::none()
        $(
            .and_require($key, $value)
        )*
    };
}
