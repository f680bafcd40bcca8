//! Human-facing reference identifiers of the form `APP-NNNNNN`.
//!
//! Identifiers are drawn at random and are not checked against stored records,
//! so two applications can share one. Callers that need a uniqueness guarantee
//! should supply their own [`ReferenceIdGenerator`].

use std::{fmt, sync::Mutex};

use rand::{Rng as _, SeedableRng as _, rngs::StdRng};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub const REF_ID_PREFIX: &str = "APP-";
pub const REF_ID_MIN: u32 = 100_000;
pub const REF_ID_MAX: u32 = 999_999;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid reference id `{0}`; expected `APP-` followed by 6 digits")]
pub struct RefIdError(String);

impl RefId {
    pub fn from_number(number: u32) -> Option<Self> {
        (REF_ID_MIN..=REF_ID_MAX)
            .contains(&number)
            .then(|| Self(format!("{REF_ID_PREFIX}{number}")))
    }

    pub fn parse(raw: &str) -> Result<Self, RefIdError> {
        let number = raw
            .strip_prefix(REF_ID_PREFIX)
            .filter(|digits| digits.len() == 6 && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse::<u32>().ok());
        number
            .and_then(Self::from_number)
            .ok_or_else(|| RefIdError(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for RefId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RefId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

pub trait ReferenceIdGenerator: Send + Sync + fmt::Debug {
    fn generate(&self) -> RefId;
}

/// Uniform draw from `100000..=999999`.
#[derive(Debug)]
pub struct RandomRefIds {
    rng: Mutex<StdRng>,
}

impl RandomRefIds {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomRefIds {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceIdGenerator for RandomRefIds {
    fn generate(&self) -> RefId {
        let number = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .gen_range(REF_ID_MIN..=REF_ID_MAX);
        RefId(format!("{REF_ID_PREFIX}{number}"))
    }
}
