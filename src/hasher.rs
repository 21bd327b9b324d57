//! Content fingerprints.
//!
//! A fingerprint is the lowercase hex SHA-256 of the file's bytes. Files are
//! streamed in fixed-size chunks so large images never sit in memory whole.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::Result;

const CHUNK_SIZE: usize = 64 * 1024;

pub async fn fingerprint(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint_bytes(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }
    use tempfile::TempDir;

    #[tokio::test]
    async fn identical_bytes_share_a_fingerprint() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.bin");
        let b = tmp.path().join("b.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&a, &data).unwrap();
        std::fs::write(&b, &data).unwrap();

        let fa = fingerprint(&a).await.unwrap();
        assert_eq!(fa, fingerprint(&b).await.unwrap());
        assert_eq!(fa, fingerprint_bytes(&data));
        assert_eq!(fa.len(), 64);
    }

    #[tokio::test]
    async fn empty_file_hashes_to_known_digest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(
            fingerprint(&path).await.unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(fingerprint(&tmp.path().join("nope")).await.is_err());
    }
}
