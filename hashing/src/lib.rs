// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha256Digest, Sha256};

///
/// The observed content state of a tracked file: the SHA-256 of its bytes, or
/// the empty byte string when the file has never been read successfully.
///
/// The empty value is distinct from the digest of any real content (including
/// empty content, which hashes to the well-known empty-input SHA-256), so a
/// comparison against it always reports a difference once the file becomes
/// readable.
///
#[derive(Clone, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct ContentDigest(Vec<u8>);

impl ContentDigest {
    pub fn empty() -> ContentDigest {
        ContentDigest(Vec::new())
    }

    pub fn of_bytes(bytes: &[u8]) -> ContentDigest {
        let mut hasher = Sha256::default();
        hasher.update(bytes);
        ContentDigest(hasher.finalize().to_vec())
    }

    ///
    /// Hashes the file at `path` in one streaming pass. Any I/O failure,
    /// including the file being absent or unreadable, yields the empty digest.
    ///
    pub fn of_file(path: &Path) -> ContentDigest {
        hash_file(path).unwrap_or_else(|_| ContentDigest::empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::new();
        for &byte in &self.0 {
            fmt::Write::write_fmt(&mut s, format_args!("{byte:02x}")).unwrap();
        }
        s
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "<empty>")
        } else {
            write!(f, "{}", self.to_hex())
        }
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest<{self}>")
    }
}

fn hash_file(path: &Path) -> io::Result<ContentDigest> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::default();
    io::copy(&mut file, &mut hasher)?;
    Ok(ContentDigest(hasher.finalize().to_vec()))
}

#[cfg(test)]
mod digest_tests;
