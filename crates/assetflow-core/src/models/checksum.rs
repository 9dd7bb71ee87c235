use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Digest length in bytes.
    fn digest_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Md5 => 16,
            ChecksumAlgorithm::Sha1 => 20,
            ChecksumAlgorithm::Sha256 => 32,
            ChecksumAlgorithm::Sha512 => 64,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha1" => Ok(ChecksumAlgorithm::Sha1),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            _ => Err(anyhow::anyhow!("Unsupported checksum algorithm: {}", s)),
        }
    }
}

/// Content hash in `algorithm:hex-digest` form. The digest is stored
/// lowercase so equal content always compares equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    digest: String,
}

impl Checksum {
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// SHA-256 checksum of the given bytes.
    pub fn sha256_of(bytes: &[u8]) -> Self {
        Self {
            algorithm: ChecksumAlgorithm::Sha256,
            digest: hex::encode(Sha256::digest(bytes)),
        }
    }
}

impl FromStr for Checksum {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, digest) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Checksum must be formatted as algorithm:hex-digest"))?;
        let algorithm: ChecksumAlgorithm = algorithm.to_lowercase().parse()?;
        let digest = digest.to_lowercase();
        let bytes = hex::decode(&digest)
            .map_err(|e| anyhow::anyhow!("Checksum digest is not valid hex: {}", e))?;
        if bytes.len() != algorithm.digest_len() {
            return Err(anyhow::anyhow!(
                "{} digest must be {} bytes, got {}",
                algorithm.as_str(),
                algorithm.digest_len(),
                bytes.len()
            ));
        }
        Ok(Self { algorithm, digest })
    }
}

impl TryFrom<String> for Checksum {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.to_string()
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{}", self.algorithm.as_str(), self.digest)
    }
}
