//! File digest computation
//!
//! A single streaming pass feeds every requested digest, so enabling the
//! optional auxiliary digests never re-reads the file.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use crc32fast::Hasher as Crc32;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Which auxiliary digests to compute alongside the content hash
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestRequest {
    pub crc32: bool,
    pub md5: bool,
    pub sha1: bool,
}

/// Digests computed for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestSet {
    /// Canonical content identity (SHA-256, lowercase hex)
    pub content_hash: String,
    pub size_bytes: i64,
    pub crc32: Option<String>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
}

impl DigestSet {
    /// Whether every digest in the request is present
    pub fn satisfies(&self, request: DigestRequest) -> bool {
        (!request.crc32 || self.crc32.is_some())
            && (!request.md5 || self.md5.is_some())
            && (!request.sha1 || self.sha1.is_some())
    }
}

/// Computes file digests
#[async_trait]
pub trait FileHasher: Send + Sync {
    async fn digest(&self, path: &Path, request: DigestRequest) -> Result<DigestSet>;
}

/// Default hasher: one buffered read pass updating all requested digests
#[derive(Debug, Default)]
pub struct StreamingHasher;

#[async_trait]
impl FileHasher for StreamingHasher {
    async fn digest(&self, path: &Path, request: DigestRequest) -> Result<DigestSet> {
        let mut file = File::open(path)
            .await
            .with_context(|| format!("Failed to open {} for hashing", path.display()))?;

        let mut content = Sha256::new();
        let mut crc = request.crc32.then(Crc32::new);
        let mut md5 = request.md5.then(Md5::new);
        let mut sha1 = request.sha1.then(Sha1::new);

        let mut size_bytes: i64 = 0;
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read = file
                .read(&mut buffer)
                .await
                .with_context(|| format!("Failed reading {} while hashing", path.display()))?;
            if read == 0 {
                break;
            }

            let chunk = &buffer[..read];
            size_bytes += read as i64;
            content.update(chunk);
            if let Some(crc) = crc.as_mut() {
                crc.update(chunk);
            }
            if let Some(md5) = md5.as_mut() {
                md5.update(chunk);
            }
            if let Some(sha1) = sha1.as_mut() {
                sha1.update(chunk);
            }
        }

        let digests = DigestSet {
            content_hash: hex_lower(&content.finalize()),
            size_bytes,
            crc32: crc.map(|c| format!("{:08x}", c.finalize())),
            md5: md5.map(|m| hex_lower(&m.finalize())),
            sha1: sha1.map(|s| hex_lower(&s.finalize())),
        };

        debug!(
            path = %path.display(),
            size_bytes = digests.size_bytes,
            content_hash = %digests.content_hash,
            "File hashed"
        );

        Ok(digests)
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}
