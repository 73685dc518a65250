use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ordered mapping of environment-variable overrides supplied by operators
/// via slash command. Held in process memory only for the lifetime of the
/// PR's environment; lost on restart.
pub type EnvVarMap = BTreeMap<String, EnvVar>;

/// A single override. An empty value is the explicit "clear" marker consumed
/// by the provisioner update API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn set(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }

    pub fn clear() -> Self {
        Self::default()
    }

    pub fn is_clear(&self) -> bool {
        self.value.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvParseError {
    #[error("invalid empty argument")]
    Empty,
    #[error("no key/val pairs found")]
    NoPairs,
    #[error("invalid key/val pair: {0:?}")]
    MalformedPair(String),
    #[error("duplicate key: {0:?}")]
    DuplicateKey(String),
}

/// Splits a comma separated string into parts, stripping one level of outer
/// quotes and trimming whitespace from each part.
pub fn split_comma_separated(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }

    let mut raw = raw.trim();
    if (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
        || (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
    {
        raw = &raw[1..raw.len() - 1];
    }

    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parses a `"VAR1=VAL1,VAR2=VAL2"` argument into an [`EnvVarMap`].
/// Duplicate keys and pairs without an `=` are hard errors.
pub fn parse_env_arg(arg: &str) -> Result<EnvVarMap, EnvParseError> {
    if arg.is_empty() {
        return Err(EnvParseError::Empty);
    }

    let pairs = split_comma_separated(arg);
    if pairs.is_empty() {
        return Err(EnvParseError::NoPairs);
    }

    let mut map = EnvVarMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(EnvParseError::MalformedPair(pair));
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(EnvParseError::MalformedPair(pair));
        }
        if map.contains_key(key) {
            return Err(EnvParseError::DuplicateKey(key.to_owned()));
        }

        map.insert(key.to_owned(), EnvVar::set(value));
    }

    Ok(map)
}
