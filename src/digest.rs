//! Content digests (`algorithm:hex`) for layers, configs and manifests.
//!
//! A [`ContentDigest`] is validated on parse, so it is always safe to turn into
//! a `<algorithm>/<hex>` path below a blob directory.

use sha2::{Digest as _, Sha256, Sha384, Sha512};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }

    fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha384 => 96,
            Algorithm::Sha512 => 128,
        }
    }

    fn hash(&self, data: &[u8]) -> String {
        match self {
            Algorithm::Sha256 => hex::encode(Sha256::digest(data)),
            Algorithm::Sha384 => hex::encode(Sha384::digest(data)),
            Algorithm::Sha512 => hex::encode(Sha512::digest(data)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest {
    algorithm: Algorithm,
    hex: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid digest '{0}'")]
pub struct InvalidDigest(pub String);

impl ContentDigest {
    /// sha256 digest of `data`
    pub fn sha256(data: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            hex: Algorithm::Sha256.hash(data),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Whether `data` hashes to this digest under the same algorithm.
    pub fn matches(&self, data: &[u8]) -> bool {
        self.algorithm.hash(data) == self.hex
    }

    /// Relative blob path: `<algorithm>/<hex>`.
    pub fn to_relative_path(&self) -> PathBuf {
        PathBuf::from(self.algorithm.as_str()).join(&self.hex)
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.hex[..12]
    }
}

impl FromStr for ContentDigest {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, hex) = s.split_once(':').ok_or_else(|| InvalidDigest(s.to_string()))?;
        let algorithm = match algo {
            "sha256" => Algorithm::Sha256,
            "sha384" => Algorithm::Sha384,
            "sha512" => Algorithm::Sha512,
            _ => return Err(InvalidDigest(s.to_string())),
        };
        let well_formed = hex.len() == algorithm.hex_len()
            && hex
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !well_formed {
            return Err(InvalidDigest(s.to_string()));
        }
        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}
