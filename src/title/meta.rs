// title/meta.rs from rustctr (c) 2025 NinjaCheetah & Contributors
// https://github.com/NinjaCheetah/rustctr
//
// Implements the optional meta section of a CIA, which holds the dependency list and the icon.

use std::io::{Cursor, Read, Write};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

pub const CIA_META_SIZE: u32 = 0x3AC0;
pub const META_CORE_VERSION: u32 = 2;
pub const DEPENDENCIES_SIZE: usize = 0x180;
/// Where the dependency list starts in an exheader.
pub const EXHEADER_DEPENDENCIES_OFFSET: usize = 0x40;
pub const SMDH_SIZE: usize = 0x36C0;

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("{source_name} data is too short (needed {needed} bytes, got {actual})")]
    SourceTooShort { source_name: &'static str, needed: usize, actual: usize },
    #[error("meta data must be exactly {size} bytes (was {0})", size = CIA_META_SIZE)]
    InvalidSize(usize),
    #[error("meta data is not in a valid format")]
    IO(#[from] std::io::Error),
}

/// A structure that represents the meta section of a CIA file.
#[derive(Debug, Clone, PartialEq)]
pub struct CiaMeta {
    pub dependencies: [u8; DEPENDENCIES_SIZE],
    reserved1: [u8; 0x180],
    pub core_version: u32,
    reserved2: [u8; 0xFC],
    pub smdh: Box<[u8; SMDH_SIZE]>,
}

impl CiaMeta {
    /// Creates a new meta section. The dependency list is copied out of the exheader and the icon
    /// out of the SMDH when they're provided; anything not provided is left zeroed.
    pub fn new(exheader: Option<&[u8]>, smdh: Option<&[u8]>) -> Result<Self, MetaError> {
        let mut meta = CiaMeta {
            dependencies: [0; DEPENDENCIES_SIZE],
            reserved1: [0; 0x180],
            core_version: META_CORE_VERSION,
            reserved2: [0; 0xFC],
            smdh: Box::new([0; SMDH_SIZE]),
        };
        if let Some(exheader) = exheader {
            let deps = exheader.get(EXHEADER_DEPENDENCIES_OFFSET..EXHEADER_DEPENDENCIES_OFFSET + DEPENDENCIES_SIZE)
                .ok_or(MetaError::SourceTooShort {
                    source_name: "exheader",
                    needed: EXHEADER_DEPENDENCIES_OFFSET + DEPENDENCIES_SIZE,
                    actual: exheader.len(),
                })?;
            meta.dependencies.copy_from_slice(deps);
        }
        if let Some(smdh) = smdh {
            let icon = smdh.get(..SMDH_SIZE).ok_or(MetaError::SourceTooShort {
                source_name: "SMDH",
                needed: SMDH_SIZE,
                actual: smdh.len(),
            })?;
            meta.smdh.copy_from_slice(icon);
        }
        Ok(meta)
    }

    /// Creates a new CiaMeta instance from the binary data of a CIA's meta section.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetaError> {
        if data.len() != CIA_META_SIZE as usize {
            return Err(MetaError::InvalidSize(data.len()));
        }
        let mut buf = Cursor::new(data);
        let mut dependencies = [0u8; DEPENDENCIES_SIZE];
        buf.read_exact(&mut dependencies)?;
        let mut reserved1 = [0u8; 0x180];
        buf.read_exact(&mut reserved1)?;
        let core_version = buf.read_u32::<LittleEndian>()?;
        let mut reserved2 = [0u8; 0xFC];
        buf.read_exact(&mut reserved2)?;
        let mut smdh = Box::new([0u8; SMDH_SIZE]);
        buf.read_exact(smdh.as_mut_slice())?;
        Ok(CiaMeta {
            dependencies,
            reserved1,
            core_version,
            reserved2,
            smdh,
        })
    }

    /// Dumps the meta section back into binary data. The result is always 0x3AC0 bytes long.
    pub fn to_bytes(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut buf = Vec::with_capacity(CIA_META_SIZE as usize);
        buf.write_all(&self.dependencies)?;
        buf.write_all(&self.reserved1)?;
        buf.write_u32::<LittleEndian>(self.core_version)?;
        buf.write_all(&self.reserved2)?;
        buf.write_all(self.smdh.as_slice())?;
        Ok(buf)
    }

    /// Gets the Title IDs listed in the dependency list, skipping empty slots.
    pub fn dependencies(&self) -> Vec<u64> {
        self.dependencies
            .chunks_exact(8)
            .map(LittleEndian::read_u64)
            .filter(|&tid| tid != 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_exheader() -> Vec<u8> {
        let mut exheader = vec![0xEEu8; 0x400];
        exheader[0x40..0x1C0].fill(0);
        exheader[0x40..0x48].copy_from_slice(&0x0004013000002C02u64.to_le_bytes());
        exheader[0x50..0x58].copy_from_slice(&0x0004013000003202u64.to_le_bytes());
        exheader
    }

    #[test]
    fn test_new_meta_empty() {
        let meta = CiaMeta::new(None, None).unwrap();
        let data = meta.to_bytes().unwrap();
        assert_eq!(data.len(), CIA_META_SIZE as usize);
        assert_eq!(&data[0x300..0x304], &[0x02, 0x00, 0x00, 0x00]);
        assert!(data[..0x300].iter().all(|&b| b == 0));
        assert!(data[0x304..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_new_meta() {
        let smdh: Vec<u8> = (0..SMDH_SIZE).map(|i| (i % 251) as u8).collect();
        let meta = CiaMeta::new(Some(&fake_exheader()), Some(&smdh)).unwrap();
        assert_eq!(meta.dependencies(), vec![0x0004013000002C02, 0x0004013000003202]);
        assert_eq!(meta.smdh.as_slice(), smdh.as_slice());
        let data = meta.to_bytes().unwrap();
        assert_eq!(&data[0x400..], smdh.as_slice());
        assert_eq!(CiaMeta::from_bytes(&data).unwrap(), meta);
    }

    #[test]
    fn test_new_meta_exheader_only() {
        let meta = CiaMeta::new(Some(&fake_exheader()), None).unwrap();
        assert_eq!(meta.dependencies().len(), 2);
        assert!(meta.smdh.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_new_meta_short_sources() {
        assert!(matches!(CiaMeta::new(Some(&[0u8; 0x100]), None),
            Err(MetaError::SourceTooShort { source_name: "exheader", needed: 0x1C0, actual: 0x100 })));
        assert!(matches!(CiaMeta::new(None, Some(&[0u8; 0x2000])),
            Err(MetaError::SourceTooShort { source_name: "SMDH", .. })));
    }

    #[test]
    fn test_meta_bad_size() {
        assert!(matches!(CiaMeta::from_bytes(&[0u8; 0x100]), Err(MetaError::InvalidSize(0x100))));
    }
}
