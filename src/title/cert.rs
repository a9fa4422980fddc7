// title/cert.rs from rustctr (c) 2025 NinjaCheetah & Contributors
// https://github.com/NinjaCheetah/rustctr
//
// Implements assembly of the CIA certificate chain out of the console's certificate database.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;
use crate::title::header::CIA_CERT_SIZE;

/// Location of the certificate database, relative to the root of a NAND.
pub const CERTS_DB_PATH: &str = "dbs/certs.db";

/// The ranges of certs.db that make up the CIA certificate chain, as (source offset, length). They
/// are copied back to back in this order.
pub const CIA_CERT_RANGES: [(u64, usize); 4] = [
    (0x0C10, 0x1F0),
    (0x3A00, 0x210),
    (0x3F10, 0x300),
    (0x3C10, 0x300),
];

/// SHA-256 of the retail CIA certificate chain.
pub const CIA_CERT_HASH: [u8; 32] = [
    0xC7, 0x2E, 0x1C, 0xA5, 0x61, 0xDC, 0x9B, 0xC8, 0x05, 0x58, 0x58, 0x9C, 0x63, 0x08, 0x1C, 0x8A,
    0x10, 0x78, 0xDF, 0x42, 0x99, 0x80, 0x3A, 0x68, 0x58, 0xF0, 0x41, 0xF9, 0xCB, 0x10, 0xE6, 0x35,
];

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate database `{0}` could not be read")]
    NotFound(String),
    #[error("certificate chain hash did not match the expected value (was {hash}, expected {expected})")]
    HashMismatch { hash: String, expected: String },
}

/// A source of files that the certificate database can be read from.
pub trait CertificateStore {
    type Reader: Read + Seek;

    fn open(&self, path: &str) -> std::io::Result<Self::Reader>;
}

/// A certificate store backed by a NAND that has been mounted or dumped to a directory.
#[derive(Debug, Clone)]
pub struct NandStore {
    root: PathBuf,
}

impl NandStore {
    pub fn new(root: &Path) -> Self {
        NandStore { root: root.to_path_buf() }
    }
}

impl CertificateStore for NandStore {
    type Reader = File;

    fn open(&self, path: &str) -> std::io::Result<File> {
        File::open(self.root.join(path))
    }
}

/// A certificate store that keeps files in memory, for callers that read the database once and
/// reuse it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore { files: HashMap::new() }
    }

    pub fn insert(&mut self, path: &str, data: Vec<u8>) {
        self.files.insert(path.to_owned(), data);
    }
}

impl CertificateStore for MemoryStore {
    type Reader = Cursor<Vec<u8>>;

    fn open(&self, path: &str) -> std::io::Result<Cursor<Vec<u8>>> {
        self.files.get(path)
            .map(|data| Cursor::new(data.clone()))
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.to_owned()))
    }
}

/// Builds the certificate chain for a CIA out of the certificate database in the provided store,
/// and checks it against the hash of the known good chain.
pub fn build_cia_cert<S: CertificateStore>(store: &S) -> Result<Vec<u8>, CertificateError> {
    build_cia_cert_with_digest(store, &CIA_CERT_HASH)
}

/// Builds the certificate chain for a CIA out of the certificate database in the provided store,
/// and checks it against the provided SHA-256 hash.
pub fn build_cia_cert_with_digest<S: CertificateStore>(store: &S, expected: &[u8; 32]) -> Result<Vec<u8>, CertificateError> {
    let not_found = |err: std::io::Error| {
        warn!("failed to read {}: {}", CERTS_DB_PATH, err);
        CertificateError::NotFound(CERTS_DB_PATH.to_owned())
    };
    let mut db = store.open(CERTS_DB_PATH).map_err(not_found)?;
    let mut cert_chain = vec![0u8; CIA_CERT_SIZE as usize];
    let mut dest = 0;
    for (offset, length) in CIA_CERT_RANGES {
        db.seek(SeekFrom::Start(offset)).map_err(not_found)?;
        db.read_exact(&mut cert_chain[dest..dest + length]).map_err(not_found)?;
        dest += length;
    }
    let hash: [u8; 32] = Sha256::digest(&cert_chain).into();
    if &hash != expected {
        return Err(CertificateError::HashMismatch { hash: hex::encode(hash), expected: hex::encode(expected) });
    }
    debug!("built CIA certificate chain from {}", CERTS_DB_PATH);
    Ok(cert_chain)
}

/// Checks whether a certificate chain is the known good CIA certificate chain.
pub fn verify_cia_cert(cert_chain: &[u8]) -> bool {
    cert_chain.len() == CIA_CERT_SIZE as usize && Sha256::digest(cert_chain)[..] == CIA_CERT_HASH
}
