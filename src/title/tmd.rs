// title/tmd.rs from rustctr (c) 2025 NinjaCheetah & Contributors
// https://github.com/NinjaCheetah/rustctr
//
// Implements the structures and methods required for TMD parsing, creation, and hash tree repair.

use std::fmt;
use std::io::{Cursor, Read, Write};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Size of the fixed part of a TMD, from the signature type up to and including the 64 content
/// info records. The content chunk records follow directly after this.
pub const TMD_HEADER_SIZE: usize = 0xB04;
pub const CONTENT_INFO_SIZE: usize = 0x24;
pub const CONTENT_INFO_COUNT: usize = 64;
pub const CONTENT_CHUNK_SIZE: usize = 0x30;
/// Theme CIAs hold up to 100 themes plus one index content.
pub const CIA_MAX_CONTENTS: usize = 100 + 1;
/// RSA-2048 with SHA-256.
pub const TMD_SIG_TYPE: u32 = 0x00010004;
pub const TMD_ISSUER: &str = "Root-CA00000003-CP0000000b";

/// Gets the size of a TMD holding the specified number of content chunk records.
pub const fn tmd_size_for(num_contents: usize) -> usize {
    TMD_HEADER_SIZE + num_contents * CONTENT_CHUNK_SIZE
}

#[derive(Debug, Error)]
pub enum TMDError {
    #[error("a TMD may not contain more than {max} contents (requested {0})", max = CIA_MAX_CONTENTS)]
    TooManyContents(usize),
    #[error("content info record covers chunks {start}..{end}, but only {available} content chunks exist")]
    ChunkSpanOutOfRange { start: usize, end: usize, available: usize },
    #[error("TMD data is not in a valid format")]
    IO(#[from] std::io::Error),
}

/// Flags that can be set in the type field of a content chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u16)]
pub enum ContentFlag {
    Encrypted = 0x0001,
    Disc = 0x0002,
    Cfm = 0x0004,
    Optional = 0x4000,
    Shared = 0x8000,
}

impl fmt::Display for ContentFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ContentFlag::Encrypted => write!(f, "Encrypted"),
            ContentFlag::Disc => write!(f, "Disc"),
            ContentFlag::Cfm => write!(f, "CFM"),
            ContentFlag::Optional => write!(f, "Optional"),
            ContentFlag::Shared => write!(f, "Shared"),
        }
    }
}

const CONTENT_FLAGS: [ContentFlag; 5] = [
    ContentFlag::Encrypted,
    ContentFlag::Disc,
    ContentFlag::Cfm,
    ContentFlag::Optional,
    ContentFlag::Shared,
];

/// A content info record. Each one covers a run of consecutive content chunks and stores the
/// SHA-256 hash of those chunk records.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContentInfo {
    pub index_offset: u16,
    pub chunk_count: u16,
    pub hash: [u8; 32],
}

impl ContentInfo {
    fn read_from<R: Read>(buf: &mut R) -> Result<Self, std::io::Error> {
        let index_offset = buf.read_u16::<BigEndian>()?;
        let chunk_count = buf.read_u16::<BigEndian>()?;
        let mut hash = [0u8; 32];
        buf.read_exact(&mut hash)?;
        Ok(ContentInfo { index_offset, chunk_count, hash })
    }

    fn write_to<W: Write>(&self, buf: &mut W) -> Result<(), std::io::Error> {
        buf.write_u16::<BigEndian>(self.index_offset)?;
        buf.write_u16::<BigEndian>(self.chunk_count)?;
        buf.write_all(&self.hash)?;
        Ok(())
    }
}

/// A structure that represents the metadata of a single content in a 3DS title.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentChunk {
    pub content_id: u32,
    pub index: u16,
    pub content_type: u16,
    pub content_size: u64,
    pub content_hash: [u8; 32],
}

impl ContentChunk {
    fn read_from<R: Read>(buf: &mut R) -> Result<Self, std::io::Error> {
        let content_id = buf.read_u32::<BigEndian>()?;
        let index = buf.read_u16::<BigEndian>()?;
        let content_type = buf.read_u16::<BigEndian>()?;
        let content_size = buf.read_u64::<BigEndian>()?;
        let mut content_hash = [0u8; 32];
        buf.read_exact(&mut content_hash)?;
        Ok(ContentChunk { content_id, index, content_type, content_size, content_hash })
    }

    /// Dumps a content chunk into the 0x30 bytes it occupies in a TMD.
    pub fn to_bytes(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut buf = Vec::with_capacity(CONTENT_CHUNK_SIZE);
        buf.write_u32::<BigEndian>(self.content_id)?;
        buf.write_u16::<BigEndian>(self.index)?;
        buf.write_u16::<BigEndian>(self.content_type)?;
        buf.write_u64::<BigEndian>(self.content_size)?;
        buf.write_all(&self.content_hash)?;
        Ok(buf)
    }

    pub fn has_flag(&self, flag: ContentFlag) -> bool {
        self.content_type & flag as u16 != 0
    }

    pub fn flags(&self) -> Vec<ContentFlag> {
        CONTENT_FLAGS.iter().copied().filter(|f| self.has_flag(*f)).collect()
    }
}

/// A structure that represents a 3DS TMD (Title Metadata) file.
#[derive(Debug, Clone, PartialEq)]
pub struct TMD {
    pub signature_type: u32,
    pub signature: [u8; 256],
    padding1: [u8; 60],
    pub signature_issuer: [u8; 64],
    pub tmd_version: u8,
    pub ca_crl_version: u8,
    pub signer_crl_version: u8,
    reserved1: u8,
    pub system_version: [u8; 8],
    pub title_id: [u8; 8],
    pub title_type: [u8; 4],
    pub group_id: u16,
    pub save_size: [u8; 4],
    pub srl_private_save_size: [u8; 4],
    reserved2: [u8; 4],
    pub srl_flag: u8,
    reserved3: [u8; 49],
    pub access_rights: u32,
    pub title_version: u16,
    pub num_contents: u16,
    pub boot_index: u16,
    reserved4: [u8; 2],
    pub content_info_hash: [u8; 32],
    pub content_infos: [ContentInfo; CONTENT_INFO_COUNT],
    pub content_chunks: Vec<ContentChunk>,
}

impl TMD {
    /// Creates a new TMD instance from the binary data of a TMD file.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TMDError> {
        let mut buf = Cursor::new(data);
        let signature_type = buf.read_u32::<BigEndian>()?;
        let mut signature = [0u8; 256];
        buf.read_exact(&mut signature)?;
        let mut padding1 = [0u8; 60];
        buf.read_exact(&mut padding1)?;
        let mut signature_issuer = [0u8; 64];
        buf.read_exact(&mut signature_issuer)?;
        let tmd_version = buf.read_u8()?;
        let ca_crl_version = buf.read_u8()?;
        let signer_crl_version = buf.read_u8()?;
        let reserved1 = buf.read_u8()?;
        let mut system_version = [0u8; 8];
        buf.read_exact(&mut system_version)?;
        let mut title_id = [0u8; 8];
        buf.read_exact(&mut title_id)?;
        let mut title_type = [0u8; 4];
        buf.read_exact(&mut title_type)?;
        let group_id = buf.read_u16::<BigEndian>()?;
        let mut save_size = [0u8; 4];
        buf.read_exact(&mut save_size)?;
        let mut srl_private_save_size = [0u8; 4];
        buf.read_exact(&mut srl_private_save_size)?;
        let mut reserved2 = [0u8; 4];
        buf.read_exact(&mut reserved2)?;
        let srl_flag = buf.read_u8()?;
        let mut reserved3 = [0u8; 49];
        buf.read_exact(&mut reserved3)?;
        let access_rights = buf.read_u32::<BigEndian>()?;
        let title_version = buf.read_u16::<BigEndian>()?;
        let num_contents = buf.read_u16::<BigEndian>()?;
        let boot_index = buf.read_u16::<BigEndian>()?;
        let mut reserved4 = [0u8; 2];
        buf.read_exact(&mut reserved4)?;
        let mut content_info_hash = [0u8; 32];
        buf.read_exact(&mut content_info_hash)?;
        let mut content_infos = [ContentInfo::default(); CONTENT_INFO_COUNT];
        for info in content_infos.iter_mut() {
            *info = ContentInfo::read_from(&mut buf)?;
        }
        // The chunk list is the variable length part, with one record per content.
        let mut content_chunks = Vec::with_capacity(num_contents as usize);
        for _ in 0..num_contents {
            content_chunks.push(ContentChunk::read_from(&mut buf)?);
        }
        Ok(TMD {
            signature_type,
            signature,
            padding1,
            signature_issuer,
            tmd_version,
            ca_crl_version,
            signer_crl_version,
            reserved1,
            system_version,
            title_id,
            title_type,
            group_id,
            save_size,
            srl_private_save_size,
            reserved2,
            srl_flag,
            reserved3,
            access_rights,
            title_version,
            num_contents,
            boot_index,
            reserved4,
            content_info_hash,
            content_infos,
            content_chunks,
        })
    }

    /// Creates a new unsigned TMD for the specified Title ID with room for the specified number of
    /// contents. Every content starts out as a zeroed chunk record covered by the first content
    /// info record, and the hashes are filled with placeholders. Populate the content chunks and
    /// then call fix_hashes() to get a consistent TMD.
    pub fn new_fake(title_id: [u8; 8], num_contents: usize) -> Result<Self, TMDError> {
        if num_contents > CIA_MAX_CONTENTS {
            return Err(TMDError::TooManyContents(num_contents));
        }
        let mut signature_issuer = [0u8; 64];
        signature_issuer[..TMD_ISSUER.len()].copy_from_slice(TMD_ISSUER.as_bytes());
        let mut content_infos = [ContentInfo::default(); CONTENT_INFO_COUNT];
        content_infos[0].chunk_count = num_contents as u16;
        content_infos[0].hash = [0xFF; 32];
        Ok(TMD {
            signature_type: TMD_SIG_TYPE,
            signature: [0xFF; 256],
            padding1: [0; 60],
            signature_issuer,
            tmd_version: 1,
            ca_crl_version: 0,
            signer_crl_version: 0,
            reserved1: 0,
            system_version: [0; 8],
            title_id,
            title_type: [0x00, 0x00, 0x00, 0x40],
            group_id: 0,
            save_size: [0; 4],
            srl_private_save_size: [0; 4],
            reserved2: [0; 4],
            srl_flag: 0,
            reserved3: [0; 49],
            access_rights: 0,
            title_version: 0,
            num_contents: num_contents as u16,
            boot_index: 0,
            reserved4: [0; 2],
            content_info_hash: [0xFF; 32],
            content_infos,
            content_chunks: vec![ContentChunk::default(); num_contents],
        })
    }

    /// Dumps the data in a TMD back into binary data that can be written to a file.
    pub fn to_bytes(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u32::<BigEndian>(self.signature_type)?;
        buf.write_all(&self.signature)?;
        buf.write_all(&self.padding1)?;
        buf.write_all(&self.signature_issuer)?;
        buf.write_u8(self.tmd_version)?;
        buf.write_u8(self.ca_crl_version)?;
        buf.write_u8(self.signer_crl_version)?;
        buf.write_u8(self.reserved1)?;
        buf.write_all(&self.system_version)?;
        buf.write_all(&self.title_id)?;
        buf.write_all(&self.title_type)?;
        buf.write_u16::<BigEndian>(self.group_id)?;
        buf.write_all(&self.save_size)?;
        buf.write_all(&self.srl_private_save_size)?;
        buf.write_all(&self.reserved2)?;
        buf.write_u8(self.srl_flag)?;
        buf.write_all(&self.reserved3)?;
        buf.write_u32::<BigEndian>(self.access_rights)?;
        buf.write_u16::<BigEndian>(self.title_version)?;
        buf.write_u16::<BigEndian>(self.num_contents)?;
        buf.write_u16::<BigEndian>(self.boot_index)?;
        buf.write_all(&self.reserved4)?;
        buf.write_all(&self.content_info_hash)?;
        buf.write_all(&self.content_infos_bytes()?)?;
        for chunk in &self.content_chunks {
            buf.write_all(&chunk.to_bytes()?)?;
        }
        Ok(buf)
    }

    // All 64 content info records, including unused ones.
    fn content_infos_bytes(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut buf = Vec::with_capacity(CONTENT_INFO_SIZE * CONTENT_INFO_COUNT);
        for info in &self.content_infos {
            info.write_to(&mut buf)?;
        }
        Ok(buf)
    }

    // Computes the hash of every in-use content info record, and then the hash over the whole
    // content info table. Nothing is written back.
    fn compute_hashes(&self) -> Result<([[u8; 32]; CONTENT_INFO_COUNT], [u8; 32]), TMDError> {
        let num_contents = self.num_contents as usize;
        let mut infos = self.content_infos;
        let mut start = 0;
        for info in infos.iter_mut() {
            if start >= num_contents {
                break;
            }
            let end = start + info.chunk_count as usize;
            if end > self.content_chunks.len() {
                return Err(TMDError::ChunkSpanOutOfRange { start, end, available: self.content_chunks.len() });
            }
            let mut hasher = Sha256::new();
            for chunk in &self.content_chunks[start..end] {
                hasher.update(chunk.to_bytes()?);
            }
            info.hash = hasher.finalize().into();
            start = end;
        }
        let mut info_table = Vec::with_capacity(CONTENT_INFO_SIZE * CONTENT_INFO_COUNT);
        for info in &infos {
            info.write_to(&mut info_table)?;
        }
        let info_hashes = infos.map(|info| info.hash);
        Ok((info_hashes, Sha256::digest(&info_table).into()))
    }

    /// Recalculates the content info hashes from the content chunk records, and then the content
    /// info table hash from the content info records. This needs to be done after any change to
    /// the content chunks.
    pub fn fix_hashes(&mut self) -> Result<(), TMDError> {
        let (info_hashes, table_hash) = self.compute_hashes()?;
        for (info, hash) in self.content_infos.iter_mut().zip(info_hashes) {
            info.hash = hash;
        }
        self.content_info_hash = table_hash;
        debug!("fixed TMD hash tree for {} ({} contents), table hash {}",
            hex::encode(self.title_id), self.num_contents, hex::encode(self.content_info_hash));
        Ok(())
    }

    /// Checks whether the stored content info hashes and content info table hash match the
    /// content chunk records.
    pub fn verify_hashes(&self) -> bool {
        match self.compute_hashes() {
            Ok((info_hashes, table_hash)) => {
                table_hash == self.content_info_hash &&
                    self.content_infos.iter().zip(info_hashes).all(|(info, hash)| info.hash == hash)
            },
            Err(_) => false,
        }
    }

    /// Gets the size of this TMD as declared by its content count. This only matches the length
    /// of to_bytes() when there is exactly one chunk record per declared content.
    pub fn size(&self) -> usize {
        tmd_size_for(self.num_contents as usize)
    }

    /// Gets the name of the certificate used to sign the TMD as a string.
    pub fn signature_issuer(&self) -> String {
        String::from_utf8_lossy(&self.signature_issuer).trim_end_matches('\0').to_owned()
    }

    pub fn title_id_u64(&self) -> u64 {
        u64::from_be_bytes(self.title_id)
    }
}
