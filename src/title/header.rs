// title/header.rs from rustctr (c) 2025 NinjaCheetah & Contributors
// https://github.com/NinjaCheetah/rustctr
//
// Implements the CIA header, validation of its section sizes, and the layout derived from it.

use std::io::{Cursor, Read, Write};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use thiserror::Error;
use crate::title::align64;
use crate::title::meta::CIA_META_SIZE;
use crate::title::tmd::{self, CIA_MAX_CONTENTS, CONTENT_CHUNK_SIZE, TMD_HEADER_SIZE};

pub const CIA_HEADER_SIZE: u32 = 0x2020;
pub const CIA_CERT_SIZE: u32 = 0xA00;
pub const CIA_TICKET_SIZE: u32 = 0x350;
pub const CIA_TMD_SIZE_MIN: u32 = TMD_HEADER_SIZE as u32;
pub const CIA_TMD_SIZE_MAX: u32 = tmd::tmd_size_for(CIA_MAX_CONTENTS) as u32;
/// Size of the content index bitmap, which has one bit for every possible content index.
pub const CONTENT_INDEX_SIZE: usize = 0x2000;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("CIA header section sizes are not valid")]
    InvalidLayout,
    #[error("TMD declares {declared} contents but contains {found} content chunks")]
    ChunkCountMismatch { declared: usize, found: usize },
    #[error("CIA header data is not in a valid format")]
    IO(#[from] std::io::Error),
}

/// A structure that represents the header of a CIA file.
#[derive(Debug, Clone, PartialEq)]
pub struct CiaHeader {
    pub header_size: u32,
    pub cia_type: u16,
    pub version: u16,
    pub cert_size: u32,
    pub ticket_size: u32,
    pub tmd_size: u32,
    pub meta_size: u32,
    pub content_size: u64,
    pub content_index: Box<[u8; CONTENT_INDEX_SIZE]>,
}

impl Default for CiaHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl CiaHeader {
    /// Creates a new CIA header with the fixed section sizes filled in. The TMD, content, and
    /// meta sizes are left at zero until a TMD has been built.
    pub fn new() -> Self {
        CiaHeader {
            header_size: CIA_HEADER_SIZE,
            cia_type: 0,
            version: 0,
            cert_size: CIA_CERT_SIZE,
            ticket_size: CIA_TICKET_SIZE,
            tmd_size: 0,
            meta_size: 0,
            content_size: 0,
            content_index: Box::new([0; CONTENT_INDEX_SIZE]),
        }
    }

    /// Creates a new CiaHeader instance from the first 0x2020 bytes of a CIA file. This does not
    /// validate the section sizes; use validate() for that.
    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        let mut buf = Cursor::new(data);
        let header_size = buf.read_u32::<LittleEndian>()?;
        let cia_type = buf.read_u16::<LittleEndian>()?;
        let version = buf.read_u16::<LittleEndian>()?;
        let cert_size = buf.read_u32::<LittleEndian>()?;
        let ticket_size = buf.read_u32::<LittleEndian>()?;
        let tmd_size = buf.read_u32::<LittleEndian>()?;
        let meta_size = buf.read_u32::<LittleEndian>()?;
        let content_size = buf.read_u64::<LittleEndian>()?;
        let mut content_index = Box::new([0u8; CONTENT_INDEX_SIZE]);
        buf.read_exact(content_index.as_mut_slice())?;
        Ok(CiaHeader {
            header_size,
            cia_type,
            version,
            cert_size,
            ticket_size,
            tmd_size,
            meta_size,
            content_size,
            content_index,
        })
    }

    /// Dumps the header back into binary data. The result is always 0x2020 bytes long.
    pub fn to_bytes(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut buf = Vec::with_capacity(CIA_HEADER_SIZE as usize);
        buf.write_u32::<LittleEndian>(self.header_size)?;
        buf.write_u16::<LittleEndian>(self.cia_type)?;
        buf.write_u16::<LittleEndian>(self.version)?;
        buf.write_u32::<LittleEndian>(self.cert_size)?;
        buf.write_u32::<LittleEndian>(self.ticket_size)?;
        buf.write_u32::<LittleEndian>(self.tmd_size)?;
        buf.write_u32::<LittleEndian>(self.meta_size)?;
        buf.write_u64::<LittleEndian>(self.content_size)?;
        buf.write_all(self.content_index.as_slice())?;
        Ok(buf)
    }

    /// Checks that the section sizes in the header describe a CIA that can actually exist.
    pub fn validate(&self) -> Result<(), HeaderError> {
        if self.header_size != CIA_HEADER_SIZE ||
            self.cert_size != CIA_CERT_SIZE ||
            self.ticket_size != CIA_TICKET_SIZE ||
            self.tmd_size < CIA_TMD_SIZE_MIN ||
            self.tmd_size > CIA_TMD_SIZE_MAX ||
            self.content_size == 0 ||
            (self.meta_size != 0 && self.meta_size != CIA_META_SIZE) {
            warn!("rejected CIA header: {:?}", self.sizes());
            return Err(HeaderError::InvalidLayout);
        }
        Ok(())
    }

    fn sizes(&self) -> [u64; 6] {
        [
            self.header_size as u64,
            self.cert_size as u64,
            self.ticket_size as u64,
            self.tmd_size as u64,
            self.content_size,
            self.meta_size as u64,
        ]
    }

    /// Updates the TMD size, content size, and content index bitmap so that they match the
    /// content chunks listed in the provided TMD.
    pub fn fix_for_tmd(&mut self, tmd: &tmd::TMD) -> Result<(), HeaderError> {
        let num_contents = tmd.num_contents as usize;
        if tmd.content_chunks.len() != num_contents {
            return Err(HeaderError::ChunkCountMismatch { declared: num_contents, found: tmd.content_chunks.len() });
        }
        self.tmd_size = tmd.size() as u32;
        self.content_size = 0;
        self.content_index.fill(0);
        for chunk in &tmd.content_chunks {
            self.content_size = self.content_size.saturating_add(chunk.content_size);
            self.set_content(chunk.index);
        }
        debug!("fixed CIA header for {} contents, content size {:#X}", num_contents, self.content_size);
        Ok(())
    }

    // Indices are 16-bit, and the bitmap has exactly one bit for each of them.
    fn set_content(&mut self, index: u16) {
        self.content_index[index as usize / 8] |= 1 << (7 - (index % 8));
    }

    /// Checks whether the content with the specified index is marked as present.
    pub fn has_content(&self, index: u16) -> bool {
        self.content_index[index as usize / 8] & (1 << (7 - (index % 8))) != 0
    }

    /// Gets the layout of the CIA file described by this header.
    pub fn info(&self) -> CiaInfo {
        CiaInfo::from_header(self)
    }
}

/// The offsets and sizes of every section of a CIA file, as derived from its header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CiaInfo {
    pub header_size: u32,
    pub cert_size: u32,
    pub ticket_size: u32,
    pub tmd_size: u32,
    pub meta_size: u32,
    pub content_size: u64,
    pub offset_cert: u64,
    pub offset_ticket: u64,
    pub offset_tmd: u64,
    pub offset_content: u64,
    /// Only set if the CIA has a meta section.
    pub offset_meta: Option<u64>,
    pub offset_content_list: u64,
    pub size_content_list: u64,
    pub size_cia: u64,
    pub max_contents: u64,
}

impl CiaInfo {
    /// Calculates the layout of a CIA file from its header. The header is not validated here, so
    /// validate it first when it comes from an untrusted file.
    pub fn from_header(header: &CiaHeader) -> Self {
        let offset_cert = align64(header.header_size as u64);
        let offset_ticket = offset_cert + align64(header.cert_size as u64);
        let offset_tmd = offset_ticket + align64(header.ticket_size as u64);
        let offset_content = offset_tmd + align64(header.tmd_size as u64);
        let offset_meta = if header.meta_size != 0 {
            Some(offset_content.saturating_add(align64(header.content_size)))
        } else {
            None
        };
        let size_content_list = (header.tmd_size as u64).saturating_sub(TMD_HEADER_SIZE as u64);
        let size_cia = match offset_meta {
            Some(offset) => offset.saturating_add(header.meta_size as u64),
            None => offset_content.saturating_add(header.content_size),
        };
        CiaInfo {
            header_size: header.header_size,
            cert_size: header.cert_size,
            ticket_size: header.ticket_size,
            tmd_size: header.tmd_size,
            meta_size: header.meta_size,
            content_size: header.content_size,
            offset_cert,
            offset_ticket,
            offset_tmd,
            offset_content,
            offset_meta,
            offset_content_list: offset_tmd + TMD_HEADER_SIZE as u64,
            size_content_list,
            size_cia,
            max_contents: size_content_list / CONTENT_CHUNK_SIZE as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::title::tmd::{ContentChunk, TMD};

    fn valid_header() -> CiaHeader {
        let mut header = CiaHeader::new();
        header.tmd_size = tmd::tmd_size_for(1) as u32;
        header.content_size = 0x1000;
        header
    }

    #[test]
    fn test_new_header() {
        let header = CiaHeader::new();
        assert_eq!(header.header_size, CIA_HEADER_SIZE);
        assert_eq!(header.cert_size, CIA_CERT_SIZE);
        assert_eq!(header.ticket_size, CIA_TICKET_SIZE);
        assert_eq!(header.tmd_size, 0);
        assert_eq!(header.content_size, 0);
        assert_eq!(header.meta_size, 0);
        // Nothing to install yet, so a fresh header isn't valid on its own.
        assert!(header.validate().is_err());
    }

    #[test]
    fn test_header_encoding() {
        let mut header = valid_header();
        header.meta_size = CIA_META_SIZE;
        header.content_size = 0x1_0000_0000;
        header.content_index[0] = 0x80;
        let data = header.to_bytes().unwrap();
        assert_eq!(data.len(), CIA_HEADER_SIZE as usize);
        assert_eq!(&data[0x00..0x04], &[0x20, 0x20, 0x00, 0x00]);
        assert_eq!(&data[0x08..0x0C], &[0x00, 0x0A, 0x00, 0x00]);
        assert_eq!(&data[0x0C..0x10], &[0x50, 0x03, 0x00, 0x00]);
        assert_eq!(&data[0x14..0x18], &[0xC0, 0x3A, 0x00, 0x00]);
        assert_eq!(&data[0x18..0x20], &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(data[0x20], 0x80);
        assert_eq!(CiaHeader::from_bytes(&data).unwrap(), header);
    }

    #[test]
    fn test_validate() {
        assert!(valid_header().validate().is_ok());
        let mut header = valid_header();
        header.meta_size = CIA_META_SIZE;
        assert!(header.validate().is_ok());
        header.tmd_size = CIA_TMD_SIZE_MIN;
        assert!(header.validate().is_ok());
        header.tmd_size = CIA_TMD_SIZE_MAX;
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_each_invariant() {
        let cases: Vec<fn(&mut CiaHeader)> = vec![
            |h: &mut CiaHeader| h.header_size = 0x2000,
            |h: &mut CiaHeader| h.cert_size = 0xA40,
            |h: &mut CiaHeader| h.ticket_size = 0x2C0,
            |h: &mut CiaHeader| h.tmd_size = CIA_TMD_SIZE_MIN - 1,
            |h: &mut CiaHeader| h.tmd_size = CIA_TMD_SIZE_MAX + 1,
            |h: &mut CiaHeader| h.content_size = 0,
            |h: &mut CiaHeader| h.meta_size = 0x200,
        ];
        for case in cases {
            let mut header = valid_header();
            case(&mut header);
            assert!(matches!(header.validate(), Err(HeaderError::InvalidLayout)));
        }
    }

    #[test]
    fn test_info_layout() {
        let header = valid_header();
        let info = header.info();
        assert_eq!(info.offset_cert, 0x2040);
        assert_eq!(info.offset_ticket, 0x2A40);
        assert_eq!(info.offset_tmd, 0x2DC0);
        assert_eq!(info.offset_content, 0x2DC0 + 0xB40);
        assert_eq!(info.offset_meta, None);
        assert_eq!(info.offset_content_list, 0x2DC0 + 0xB04);
        assert_eq!(info.size_content_list, 0x30);
        assert_eq!(info.max_contents, 1);
        assert_eq!(info.size_cia, 0x2DC0 + 0xB40 + 0x1000);
    }

    #[test]
    fn test_info_with_meta() {
        let mut header = valid_header();
        header.content_size = 0x1001;
        header.meta_size = CIA_META_SIZE;
        let info = header.info();
        let offset_meta = info.offset_meta.unwrap();
        assert_eq!(offset_meta, info.offset_content + 0x1040);
        assert_eq!(info.size_cia, offset_meta + CIA_META_SIZE as u64);
    }

    #[test]
    fn test_info_monotonic_and_aligned() {
        for num_contents in [0, 1, 7, CIA_MAX_CONTENTS] {
            for content_size in [1u64, 0x3F, 0x40, 0x12345, 0x1_0000_0001] {
                for meta_size in [0, CIA_META_SIZE] {
                    let mut header = CiaHeader::new();
                    header.tmd_size = tmd::tmd_size_for(num_contents) as u32;
                    header.content_size = content_size;
                    header.meta_size = meta_size;
                    header.validate().unwrap();
                    let info = header.info();
                    let mut offsets = vec![info.offset_cert, info.offset_ticket, info.offset_tmd, info.offset_content];
                    offsets.extend(info.offset_meta);
                    assert!(offsets.windows(2).all(|w| w[0] < w[1]));
                    assert!(offsets.iter().all(|o| o % 64 == 0));
                    assert_eq!(info.max_contents, num_contents as u64);
                }
            }
        }
    }

    #[test]
    fn test_info_unvalidated_header() {
        let mut header = CiaHeader::new();
        header.tmd_size = 0x10;
        let info = header.info();
        assert_eq!(info.size_content_list, 0);
        assert_eq!(info.max_contents, 0);
    }

    #[test]
    fn test_fix_for_tmd() {
        let mut tmd = TMD::new_fake([0x00, 0x04, 0x00, 0x00, 0x00, 0x13, 0x22, 0x01], 1).unwrap();
        tmd.content_chunks[0] = ContentChunk { content_size: 0x1000, ..Default::default() };
        tmd.fix_hashes().unwrap();
        let mut header = CiaHeader::new();
        header.fix_for_tmd(&tmd).unwrap();
        assert_eq!(header.content_size, 0x1000);
        assert_eq!(header.tmd_size, tmd::tmd_size_for(1) as u32);
        assert_eq!(header.content_index[0], 0x80);
        assert!(header.content_index[1..].iter().all(|&b| b == 0));
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_fix_for_tmd_bitmap() {
        let indices: [u16; 5] = [1, 8, 9, 15, 0xFFFF];
        let mut tmd = TMD::new_fake([0; 8], indices.len()).unwrap();
        for (chunk, index) in tmd.content_chunks.iter_mut().zip(indices) {
            chunk.index = index;
            chunk.content_size = 0x10;
        }
        let mut header = CiaHeader::new();
        // Stale bits from a previous TMD must be cleared.
        header.content_index[100] = 0xFF;
        header.fix_for_tmd(&tmd).unwrap();
        assert_eq!(header.content_size, 0x50);
        assert_eq!(header.content_index[0], 0b0100_0000);
        assert_eq!(header.content_index[1], 0b1100_0001);
        assert_eq!(header.content_index[100], 0);
        assert_eq!(header.content_index[CONTENT_INDEX_SIZE - 1], 0b0000_0001);
        for index in indices {
            assert!(header.has_content(index));
        }
        assert!(!header.has_content(2));
    }

    #[test]
    fn test_fix_for_tmd_chunk_count_mismatch() {
        let mut tmd = TMD::new_fake([0; 8], 2).unwrap();
        tmd.content_chunks.pop();
        let mut header = CiaHeader::new();
        assert!(matches!(header.fix_for_tmd(&tmd), Err(HeaderError::ChunkCountMismatch { declared: 2, found: 1 })));
        // Extra chunks the count doesn't cover are just as wrong.
        let mut tmd = TMD::new_fake([0; 8], 1).unwrap();
        tmd.content_chunks.push(ContentChunk { index: 1, content_size: 0x10, ..Default::default() });
        assert!(matches!(header.fix_for_tmd(&tmd), Err(HeaderError::ChunkCountMismatch { declared: 1, found: 2 })));
        assert_eq!(header, CiaHeader::new());
    }
}
