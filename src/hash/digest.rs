//! SHA-256 content digests
//!
//! The package layer identifies entries by the SHA-256 of their content;
//! these helpers stream a file through the hasher without loading it.

use crate::error::{IoResultExt, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Compute the hex SHA-256 of a file
pub fn sha256_file(path: &Path) -> Result<String> {
    sha256_file_with_buffer(path, 1024 * 1024) // 1MB buffer
}

/// Compute the hex SHA-256 of a file with custom buffer size
pub fn sha256_file_with_buffer(path: &Path, buffer_size: usize) -> Result<String> {
    let file = File::open(path).with_path(path)?;
    let mut reader = BufReader::with_capacity(buffer_size, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; buffer_size.max(1)];

    loop {
        let bytes_read = reader.read(&mut buffer).with_path(path)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the hex SHA-256 of data in memory
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
