use std::path::{Path, PathBuf};

use md5::Md5;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use xxhash_rust::xxh64::Xxh64;

use crate::domain::{Serialize, Deserialize};

pub const DEFAULT_CHUNK_SIZE: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("File too large to hash: {path} ({size} bytes, cap {limit})")]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown hash algorithm: '{0}'. Expected 'sha256', 'xxh64' or 'md5'.")]
pub struct HashAlgorithmParseError(String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Xxh64,
    Md5,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Xxh64 => "xxh64",
            HashAlgorithm::Md5 => "md5",
        }
    }
}

impl TryFrom<&str> for HashAlgorithm {
    type Error = HashAlgorithmParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().trim() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "xxh64" | "xxhash64" => Ok(HashAlgorithm::Xxh64),
            "md5" => Ok(HashAlgorithm::Md5),
            _ => Err(HashAlgorithmParseError(value.to_string())),
        }
    }
}

enum Hasher {
    Sha256(Sha256),
    Xxh64(Xxh64),
    Md5(Md5),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            HashAlgorithm::Xxh64 => Hasher::Xxh64(Xxh64::new(0)),
            HashAlgorithm::Md5 => Hasher::Md5(Md5::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Xxh64(h) => h.update(data),
            Hasher::Md5(h) => h.update(data),
        }
    }

    fn finalize(self) -> String {
        match self {
            Hasher::Sha256(h) => hex(&h.finalize()),
            Hasher::Md5(h) => hex(&h.finalize()),
            Hasher::Xxh64(h) => format!("{:016x}", h.digest()),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Chunked file hashing. Files over the optional size cap are refused
/// rather than silently hashed for minutes.
pub async fn hash_file(
    path: &Path,
    algorithm: HashAlgorithm,
    chunk_size: usize,
    max_size: Option<u64>,
) -> Result<String, HashError> {
    let mut file = tokio::fs::File::open(path).await?;

    if let Some(limit) = max_size {
        let size = file.metadata().await?.len();
        if size > limit {
            return Err(HashError::FileTooLarge { path: path.to_path_buf(), size, limit });
        }
    }

    let mut hasher = Hasher::new(algorithm);
    let mut chunk = vec![0u8; chunk_size.max(1)];

    loop {
        let read = file.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }

    Ok(hasher.finalize())
}
