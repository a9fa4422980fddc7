// title/content.rs from rustctr (c) 2025 NinjaCheetah & Contributors
// https://github.com/NinjaCheetah/rustctr
//
// Implements content parsing and editing, and streamed content encryption/decryption.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use log::debug;
use sha2::{Digest, Sha256};
use thiserror::Error;
use crate::title::crypto::{self, AesEngine, ContentCrypt, CryptDirection, CryptoError, SoftwareAes, AES_BLOCK_SIZE};
use crate::title::tmd::{ContentChunk, ContentFlag};

/// How much content is held in memory at once while streaming.
pub const STREAM_BUFFER_SIZE: usize = 0x100000;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("requested index {index} is out of range (must not exceed {max})")]
    IndexOutOfRange { index: usize, max: usize },
    #[error("content with requested Content ID {0} could not be found")]
    CIDNotFound(u32),
    #[error("content's hash did not match the expected value (was {hash}, expected {expected})")]
    BadHash { hash: String, expected: String },
    #[error("content could not be encrypted or decrypted")]
    Crypto(#[from] CryptoError),
    #[error("content data is not in a valid format")]
    IO(#[from] std::io::Error),
}

/// A structure that represents the block of data containing the content of a 3DS title. Contents
/// are stored back to back in the order of their chunk records.
#[derive(Debug, Clone)]
pub struct ContentRegion {
    pub content_chunks: Vec<ContentChunk>,
    pub contents: Vec<Vec<u8>>,
}

impl ContentRegion {
    /// Creates a ContentRegion instance from the content section of a CIA and the content chunks
    /// of its TMD.
    pub fn from_bytes(data: &[u8], content_chunks: Vec<ContentChunk>) -> Result<Self, ContentError> {
        let mut buf = Cursor::new(data);
        let mut contents = Vec::with_capacity(content_chunks.len());
        let mut offset = 0u64;
        for chunk in &content_chunks {
            // Sizes come from the TMD, so check them against the data before allocating anything.
            let end = offset.checked_add(chunk.content_size)
                .filter(|&end| end <= data.len() as u64)
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, format!(
                    "content {} declares {:#X} bytes at offset {:#X}, but the region is only {:#X} bytes",
                    chunk.index, chunk.content_size, offset, data.len())))?;
            buf.seek(SeekFrom::Start(offset))?;
            let mut content = vec![0u8; chunk.content_size as usize];
            buf.read_exact(&mut content)?;
            contents.push(content);
            offset = end;
        }
        if offset != data.len() as u64 {
            debug!("content region has {} bytes past the last content", data.len() as u64 - offset);
        }
        Ok(ContentRegion {
            content_chunks,
            contents,
        })
    }

    /// Creates a ContentRegion instance from content chunks without any actual content. This can
    /// be used to load existing content from files.
    pub fn new(content_chunks: Vec<ContentChunk>) -> Self {
        let contents = vec![Vec::new(); content_chunks.len()];
        ContentRegion {
            content_chunks,
            contents,
        }
    }

    /// Dumps the entire ContentRegion back into binary data that can be written to a file.
    pub fn to_bytes(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut buf: Vec<u8> = Vec::with_capacity(self.size() as usize);
        for content in &self.contents {
            buf.write_all(content)?;
        }
        Ok(buf)
    }

    /// Gets the total size of all contents.
    pub fn size(&self) -> u64 {
        self.contents.iter().map(|c| c.len() as u64).sum()
    }

    fn check_index(&self, index: usize) -> Result<(), ContentError> {
        if index >= self.content_chunks.len() {
            return Err(ContentError::IndexOutOfRange { index, max: self.content_chunks.len().saturating_sub(1) });
        }
        Ok(())
    }

    /// Gets the encrypted content from the ContentRegion at the specified position.
    pub fn get_enc_content_by_index(&self, index: usize) -> Result<Vec<u8>, ContentError> {
        self.check_index(index)?;
        Ok(self.contents[index].clone())
    }

    /// Gets the decrypted content from the ContentRegion at the specified position, and checks it
    /// against the hash in its chunk record.
    pub fn get_content_by_index(&self, index: usize, title_key: [u8; 16]) -> Result<Vec<u8>, ContentError> {
        let content = self.get_enc_content_by_index(index)?;
        let chunk = &self.content_chunks[index];
        let content_dec = if chunk.has_flag(ContentFlag::Encrypted) {
            crypto::decrypt_content(&content, title_key, chunk.index)?
        } else {
            content
        };
        let result: [u8; 32] = Sha256::digest(&content_dec).into();
        if result != chunk.content_hash {
            return Err(ContentError::BadHash { hash: hex::encode(result), expected: hex::encode(chunk.content_hash) });
        }
        Ok(content_dec)
    }

    fn position_of_cid(&self, cid: u32) -> Result<usize, ContentError> {
        self.content_chunks.iter().position(|x| x.content_id == cid).ok_or(ContentError::CIDNotFound(cid))
    }

    /// Gets the encrypted content from the ContentRegion with the specified Content ID.
    pub fn get_enc_content_by_cid(&self, cid: u32) -> Result<Vec<u8>, ContentError> {
        self.get_enc_content_by_index(self.position_of_cid(cid)?)
    }

    /// Gets the decrypted content from the ContentRegion with the specified Content ID.
    pub fn get_content_by_cid(&self, cid: u32, title_key: [u8; 16]) -> Result<Vec<u8>, ContentError> {
        self.get_content_by_index(self.position_of_cid(cid)?, title_key)
    }

    /// Loads decrypted content into the specified position. The size and hash in the matching
    /// chunk record are updated to match the new content, and it is encrypted if the record is
    /// flagged as encrypted. Encrypted content must be a multiple of 16 bytes long.
    pub fn load_content(&mut self, content: &[u8], index: usize, title_key: [u8; 16]) -> Result<(), ContentError> {
        self.check_index(index)?;
        let chunk = &mut self.content_chunks[index];
        let mut content_enc = content.to_vec();
        if chunk.has_flag(ContentFlag::Encrypted) {
            crypto::transform_content(&mut SoftwareAes::new(), CryptDirection::Encrypt, &mut content_enc, chunk.index, title_key)?;
        }
        chunk.content_size = content.len() as u64;
        chunk.content_hash = Sha256::digest(content).into();
        self.contents[index] = content_enc;
        Ok(())
    }
}

/// Streams `length` bytes of content from a reader into a writer, encrypting or decrypting it on
/// the way through. Returns the SHA-256 hash of the decrypted side of the data, which is what a
/// content chunk record stores.
pub fn transform_stream<R: Read, W: Write, E: AesEngine>(reader: &mut R, writer: &mut W, length: u64,
                                                         crypt: &mut ContentCrypt<E>) -> Result<[u8; 32], ContentError> {
    if length % AES_BLOCK_SIZE as u64 != 0 {
        return Err(ContentError::Crypto(CryptoError::MisalignedInput(length as usize)));
    }
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; STREAM_BUFFER_SIZE.min(length as usize)];
    let mut remaining = length;
    while remaining > 0 {
        let piece = &mut buf[..STREAM_BUFFER_SIZE.min(remaining as usize)];
        reader.read_exact(piece)?;
        match crypt.direction() {
            CryptDirection::Encrypt => {
                hasher.update(&*piece);
                crypt.update(piece)?;
            },
            CryptDirection::Decrypt => {
                crypt.update(piece)?;
                hasher.update(&*piece);
            },
        }
        writer.write_all(piece)?;
        remaining -= piece.len() as u64;
    }
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TITLE_KEY: [u8; 16] = [0x42; 16];

    fn make_chunk(content_id: u32, index: u16, content: &[u8], encrypted: bool) -> ContentChunk {
        ContentChunk {
            content_id,
            index,
            content_type: if encrypted { ContentFlag::Encrypted as u16 } else { 0 },
            content_size: content.len() as u64,
            content_hash: Sha256::digest(content).into(),
        }
    }

    fn make_region() -> (ContentRegion, Vec<Vec<u8>>) {
        let plain = vec![vec![0xABu8; 0x200], vec![0x12u8; 0x30]];
        let chunks = vec![
            make_chunk(0x10, 0, &plain[0], true),
            make_chunk(0x11, 1, &plain[1], false),
        ];
        let mut region = ContentRegion::new(chunks);
        region.load_content(&plain[0], 0, TITLE_KEY).unwrap();
        region.load_content(&plain[1], 1, TITLE_KEY).unwrap();
        (region, plain)
    }

    #[test]
    fn test_load_and_get_content() {
        let (region, plain) = make_region();
        assert_ne!(region.contents[0], plain[0]);
        assert_eq!(region.contents[1], plain[1]);
        assert_eq!(region.get_content_by_index(0, TITLE_KEY).unwrap(), plain[0]);
        assert_eq!(region.get_content_by_cid(0x11, TITLE_KEY).unwrap(), plain[1]);
        assert_eq!(region.get_enc_content_by_cid(0x10).unwrap(), region.contents[0]);
    }

    #[test]
    fn test_region_from_bytes() {
        let (region, plain) = make_region();
        let data = region.to_bytes().unwrap();
        assert_eq!(data.len(), 0x230);
        let parsed = ContentRegion::from_bytes(&data, region.content_chunks.clone()).unwrap();
        assert_eq!(parsed.contents, region.contents);
        assert_eq!(parsed.get_content_by_index(0, TITLE_KEY).unwrap(), plain[0]);
        assert!(matches!(ContentRegion::from_bytes(&data[..0x220], region.content_chunks.clone()), Err(ContentError::IO(_))));
    }

    #[test]
    fn test_region_from_bytes_oversized_chunk() {
        let (region, _) = make_region();
        let data = region.to_bytes().unwrap();
        for sizes in [[u64::MAX, 0x30], [0x200, u64::MAX], [0x200, u64::MAX - 0x100], [0x231, 0]] {
            let mut chunks = region.content_chunks.clone();
            chunks[0].content_size = sizes[0];
            chunks[1].content_size = sizes[1];
            let result = ContentRegion::from_bytes(&data, chunks);
            assert!(matches!(result, Err(ContentError::IO(ref e)) if e.kind() == std::io::ErrorKind::InvalidData));
        }
    }

    #[test]
    fn test_bad_hash_and_key() {
        let (region, _) = make_region();
        assert!(matches!(region.get_content_by_index(0, [0x24; 16]), Err(ContentError::BadHash { .. })));
        let mut region = region;
        region.contents[1][0] ^= 0xFF;
        assert!(matches!(region.get_content_by_index(1, TITLE_KEY), Err(ContentError::BadHash { .. })));
    }

    #[test]
    fn test_missing_content() {
        let (mut region, _) = make_region();
        assert!(matches!(region.get_enc_content_by_index(2), Err(ContentError::IndexOutOfRange { index: 2, max: 1 })));
        assert!(matches!(region.get_content_by_cid(0x99, TITLE_KEY), Err(ContentError::CIDNotFound(0x99))));
        assert!(matches!(region.load_content(&[0u8; 0x10], 5, TITLE_KEY), Err(ContentError::IndexOutOfRange { .. })));
        assert!(matches!(region.load_content(&[0u8; 0x11], 0, TITLE_KEY),
            Err(ContentError::Crypto(CryptoError::MisalignedInput(0x11)))));
    }

    #[test]
    fn test_transform_stream() {
        let plain: Vec<u8> = (0..STREAM_BUFFER_SIZE + 0x40).map(|i| (i % 199) as u8).collect();
        let mut engine = SoftwareAes::new();
        let mut encrypted = Vec::new();
        let mut crypt = ContentCrypt::new(&mut engine, CryptDirection::Encrypt, TITLE_KEY, 7).unwrap();
        let hash = transform_stream(&mut Cursor::new(&plain), &mut encrypted, plain.len() as u64, &mut crypt).unwrap();
        assert_eq!(hash, <[u8; 32]>::from(Sha256::digest(&plain)));
        assert_eq!(encrypted, crypto::encrypt_content(&plain, TITLE_KEY, 7).unwrap());

        let mut decrypted = Vec::new();
        let mut crypt = ContentCrypt::new(&mut engine, CryptDirection::Decrypt, TITLE_KEY, 7).unwrap();
        let hash_dec = transform_stream(&mut Cursor::new(&encrypted), &mut decrypted, encrypted.len() as u64, &mut crypt).unwrap();
        assert_eq!(decrypted, plain);
        assert_eq!(hash_dec, hash);
    }

    #[test]
    fn test_transform_stream_misaligned() {
        let mut engine = SoftwareAes::new();
        let mut crypt = ContentCrypt::new(&mut engine, CryptDirection::Decrypt, TITLE_KEY, 0).unwrap();
        let result = transform_stream(&mut Cursor::new(vec![0u8; 0x20]), &mut Vec::new(), 0x18, &mut crypt);
        assert!(matches!(result, Err(ContentError::Crypto(CryptoError::MisalignedInput(0x18)))));
    }
}
