// title/cia.rs from rustctr (c) 2025 NinjaCheetah & Contributors
// https://github.com/NinjaCheetah/rustctr
//
// Implements the structures and methods required for CIA parsing and building.

use std::io::Write;
use log::debug;
use thiserror::Error;
use crate::title::content::{ContentError, ContentRegion};
use crate::title::header::{CiaHeader, CiaInfo, HeaderError, CIA_CERT_SIZE, CIA_TICKET_SIZE};
use crate::title::meta::{CiaMeta, MetaError, CIA_META_SIZE};
use crate::title::tmd::{TMDError, CIA_MAX_CONTENTS, TMD};
use crate::title::pad64;

#[derive(Debug, Error)]
pub enum CIAError {
    #[error("CIA data is too short (needed {needed} bytes, got {actual})")]
    Truncated { needed: u64, actual: u64 },
    #[error("CIA {section} must be {expected} bytes long (was {actual})")]
    InvalidSectionSize { section: &'static str, expected: u64, actual: u64 },
    #[error("an error occurred while processing the CIA header")]
    Header(#[from] HeaderError),
    #[error("an error occurred while processing TMD data")]
    TMD(#[from] TMDError),
    #[error("an error occurred while processing meta data")]
    Meta(#[from] MetaError),
    #[error("an error occurred while processing content data")]
    Content(#[from] ContentError),
    #[error("CIA data is not in a valid format")]
    IO(#[from] std::io::Error),
}

/// A structure that represents an entire CIA file.
#[derive(Debug, Clone)]
pub struct CIA {
    pub header: CiaHeader,
    cert_chain: Vec<u8>,
    ticket: Vec<u8>,
    pub tmd: TMD,
    content: Vec<u8>,
    pub meta: Option<CiaMeta>,
}

fn section(data: &[u8], offset: u64, size: u64) -> &[u8] {
    &data[offset as usize..(offset + size) as usize]
}

fn chunk_size_sum(tmd: &TMD) -> u64 {
    tmd.content_chunks.iter().fold(0u64, |sum, chunk| sum.saturating_add(chunk.content_size))
}

// Fixes a TMD and builds the header that matches it, without touching the CIA they came from.
fn fixed_parts(mut tmd: TMD, header: &CiaHeader) -> Result<(TMD, CiaHeader), CIAError> {
    tmd.fix_hashes()?;
    let mut header = header.clone();
    header.fix_for_tmd(&tmd)?;
    header.validate()?;
    Ok((tmd, header))
}

impl CIA {
    /// Creates a new CIA instance from the binary data of a CIA file. The header is validated
    /// before any other section is read.
    pub fn from_bytes(data: &[u8]) -> Result<CIA, CIAError> {
        let header = CiaHeader::from_bytes(data)?;
        header.validate()?;
        let info = header.info();
        if (data.len() as u64) < info.size_cia {
            return Err(CIAError::Truncated { needed: info.size_cia, actual: data.len() as u64 });
        }
        let cert_chain = section(data, info.offset_cert, info.cert_size as u64).to_vec();
        let ticket = section(data, info.offset_ticket, info.ticket_size as u64).to_vec();
        let tmd = TMD::from_bytes(section(data, info.offset_tmd, info.tmd_size as u64))?;
        // The header has to describe the TMD and content exactly, or they can't be written back.
        if tmd.size() as u64 != info.tmd_size as u64 {
            return Err(CIAError::InvalidSectionSize { section: "TMD", expected: tmd.size() as u64, actual: info.tmd_size as u64 });
        }
        let chunk_sizes = chunk_size_sum(&tmd);
        if chunk_sizes != info.content_size {
            return Err(CIAError::InvalidSectionSize { section: "content", expected: chunk_sizes, actual: info.content_size });
        }
        let content = section(data, info.offset_content, info.content_size).to_vec();
        let meta = match info.offset_meta {
            Some(offset) => Some(CiaMeta::from_bytes(section(data, offset, info.meta_size as u64))?),
            None => None,
        };
        debug!("loaded CIA for {} with {} contents", hex::encode(tmd.title_id), tmd.num_contents);
        Ok(CIA {
            header,
            cert_chain,
            ticket,
            tmd,
            content,
            meta,
        })
    }

    /// Creates a new CIA instance from its parts. The header is generated from the TMD, so the TMD
    /// should already have its hashes fixed, and it must have one chunk record per content.
    pub fn from_parts(cert_chain: &[u8], ticket: &[u8], tmd: &TMD, content: &ContentRegion,
                      meta: Option<CiaMeta>) -> Result<CIA, CIAError> {
        if cert_chain.len() != CIA_CERT_SIZE as usize {
            return Err(CIAError::InvalidSectionSize { section: "certificate chain", expected: CIA_CERT_SIZE as u64, actual: cert_chain.len() as u64 });
        }
        if ticket.len() != CIA_TICKET_SIZE as usize {
            return Err(CIAError::InvalidSectionSize { section: "ticket", expected: CIA_TICKET_SIZE as u64, actual: ticket.len() as u64 });
        }
        let mut header = CiaHeader::new();
        header.fix_for_tmd(tmd)?;
        header.meta_size = if meta.is_some() { CIA_META_SIZE } else { 0 };
        let content = content.to_bytes()?;
        if content.len() as u64 != header.content_size {
            return Err(CIAError::InvalidSectionSize { section: "content", expected: header.content_size, actual: content.len() as u64 });
        }
        header.validate()?;
        Ok(CIA {
            header,
            cert_chain: cert_chain.to_vec(),
            ticket: ticket.to_vec(),
            tmd: tmd.clone(),
            content,
            meta,
        })
    }

    /// Dumps the CIA back into binary data that can be written to a file. Fails if the header
    /// doesn't describe the sections being written; use fix() after editing the TMD directly.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CIAError> {
        let tmd = self.tmd.to_bytes()?;
        if tmd.len() as u64 != self.header.tmd_size as u64 {
            return Err(CIAError::InvalidSectionSize { section: "TMD", expected: self.header.tmd_size as u64, actual: tmd.len() as u64 });
        }
        if self.content.len() as u64 != self.header.content_size {
            return Err(CIAError::InvalidSectionSize { section: "content", expected: self.header.content_size, actual: self.content.len() as u64 });
        }
        let meta_size = if self.meta.is_some() { CIA_META_SIZE } else { 0 };
        if meta_size != self.header.meta_size {
            return Err(CIAError::InvalidSectionSize { section: "meta", expected: self.header.meta_size as u64, actual: meta_size as u64 });
        }
        let mut buf = Vec::with_capacity(self.info().size_cia as usize);
        buf.write_all(&self.header.to_bytes()?)?;
        // Every section starts on a multiple of 64, so pad after each one.
        pad64(&mut buf);
        buf.write_all(&self.cert_chain)?;
        pad64(&mut buf);
        buf.write_all(&self.ticket)?;
        pad64(&mut buf);
        buf.write_all(&tmd)?;
        pad64(&mut buf);
        buf.write_all(&self.content)?;
        if let Some(meta) = &self.meta {
            pad64(&mut buf);
            buf.write_all(&meta.to_bytes()?)?;
        }
        Ok(buf)
    }

    /// Gets the layout of this CIA.
    pub fn info(&self) -> CiaInfo {
        self.header.info()
    }

    /// Recalculates the TMD hash tree and the header fields that depend on the TMD. The CIA is
    /// left unchanged if the result wouldn't be a valid CIA.
    pub fn fix(&mut self) -> Result<(), CIAError> {
        let (tmd, header) = fixed_parts(self.tmd.clone(), &self.header)?;
        self.tmd = tmd;
        self.header = header;
        Ok(())
    }

    pub fn cert_chain(&self) -> Vec<u8> {
        self.cert_chain.clone()
    }

    pub fn set_cert_chain(&mut self, cert_chain: &[u8]) -> Result<(), CIAError> {
        if cert_chain.len() != CIA_CERT_SIZE as usize {
            return Err(CIAError::InvalidSectionSize { section: "certificate chain", expected: CIA_CERT_SIZE as u64, actual: cert_chain.len() as u64 });
        }
        self.cert_chain = cert_chain.to_vec();
        Ok(())
    }

    pub fn ticket(&self) -> Vec<u8> {
        self.ticket.clone()
    }

    pub fn set_ticket(&mut self, ticket: &[u8]) -> Result<(), CIAError> {
        if ticket.len() != CIA_TICKET_SIZE as usize {
            return Err(CIAError::InvalidSectionSize { section: "ticket", expected: CIA_TICKET_SIZE as u64, actual: ticket.len() as u64 });
        }
        self.ticket = ticket.to_vec();
        Ok(())
    }

    pub fn content(&self) -> Vec<u8> {
        self.content.clone()
    }

    /// Gets the content section split up into its individual contents.
    pub fn content_region(&self) -> Result<ContentRegion, CIAError> {
        Ok(ContentRegion::from_bytes(&self.content, self.tmd.content_chunks.clone())?)
    }

    /// Replaces the content section, taking the content chunk records from the ContentRegion. The
    /// TMD and header are fixed to match. Nothing is changed if the new contents don't make a
    /// valid CIA.
    pub fn set_content_region(&mut self, content: &ContentRegion) -> Result<(), CIAError> {
        let num_contents = content.content_chunks.len();
        if num_contents > CIA_MAX_CONTENTS {
            return Err(TMDError::TooManyContents(num_contents).into());
        }
        let data = content.to_bytes()?;
        let mut tmd = self.tmd.clone();
        // A single content info record covering every chunk has to keep covering every chunk.
        let single_info = tmd.content_infos[1..].iter().all(|info| info.chunk_count == 0);
        if single_info && tmd.content_infos[0].chunk_count == tmd.num_contents {
            tmd.content_infos[0].chunk_count = num_contents as u16;
        }
        tmd.content_chunks = content.content_chunks.clone();
        tmd.num_contents = num_contents as u16;
        let (tmd, header) = fixed_parts(tmd, &self.header)?;
        if data.len() as u64 != header.content_size {
            return Err(CIAError::InvalidSectionSize { section: "content", expected: header.content_size, actual: data.len() as u64 });
        }
        self.content = data;
        self.tmd = tmd;
        self.header = header;
        Ok(())
    }

    pub fn set_meta(&mut self, meta: Option<CiaMeta>) {
        self.header.meta_size = if meta.is_some() { CIA_META_SIZE } else { 0 };
        self.meta = meta;
    }
}
