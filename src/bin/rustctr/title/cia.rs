// title/cia.rs from rustctr (c) 2025 NinjaCheetah & Contributors
// https://github.com/NinjaCheetah/rustctr
//
// Code for CIA-related commands in the rustctr CLI.

use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use clap::Subcommand;
use rustctr::title::{cia, content, meta, tmd};
use crate::title::{parse_title_id, parse_title_key};

#[derive(Subcommand)]
#[command(arg_required_else_help = true)]
pub enum Commands {
    /// Build a CIA file out of decrypted contents
    Build {
        /// The paths to the decrypted contents, in index order
        #[arg(required = true)]
        contents: Vec<String>,
        /// The path to write the CIA to
        #[arg(short, long)]
        output: String,
        /// The Title ID of the title, as 16 hex digits
        #[arg(long)]
        tid: String,
        /// The decrypted title key to encrypt the contents with, as 32 hex digits
        #[arg(short, long)]
        key: String,
        /// The path to the CIA certificate chain
        #[arg(long)]
        cert: String,
        /// The path to the ticket
        #[arg(long)]
        ticket: String,
        /// An optional exheader to take the dependency list from
        #[arg(long)]
        exheader: Option<String>,
        /// An optional SMDH to use as the icon
        #[arg(long)]
        smdh: Option<String>,
    },
    /// Recalculate the TMD hashes and header of a CIA file
    Fix {
        /// The path to the CIA to fix
        input: String,
        /// An optional output path; defaults to overwriting input CIA file
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn read_optional(path: &Option<String>) -> Result<Option<Vec<u8>>> {
    match path {
        Some(path) => Ok(Some(fs::read(path).with_context(|| format!("Could not read \"{}\".", path))?)),
        None => Ok(None),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn cia_build(contents: &[String], output: &str, tid: &str, key: &str, cert: &str, ticket: &str,
                 exheader: &Option<String>, smdh: &Option<String>) -> Result<()> {
    let title_id = parse_title_id(tid)?;
    let title_key = parse_title_key(key)?;
    let cert_chain = fs::read(cert).with_context(|| format!("Could not read certificate chain \"{}\".", cert))?;
    let ticket = fs::read(ticket).with_context(|| format!("Could not read ticket \"{}\".", ticket))?;
    let mut tmd = tmd::TMD::new_fake(title_id, contents.len())?;
    for (i, chunk) in tmd.content_chunks.iter_mut().enumerate() {
        chunk.content_id = i as u32;
        chunk.index = i as u16;
        chunk.content_type = tmd::ContentFlag::Encrypted as u16;
    }
    let mut region = content::ContentRegion::new(tmd.content_chunks.clone());
    for (i, path) in contents.iter().enumerate() {
        if !Path::new(path).exists() {
            bail!("Content \"{}\" could not be found.", path);
        }
        let data = fs::read(path)?;
        region.load_content(&data, i, title_key)
            .with_context(|| format!("Content \"{}\" could not be loaded. Content must be a multiple of 16 bytes long.", path))?;
    }
    tmd.content_chunks = region.content_chunks.clone();
    tmd.fix_hashes()?;
    let exheader = read_optional(exheader)?;
    let smdh = read_optional(smdh)?;
    let meta = if exheader.is_some() || smdh.is_some() {
        Some(meta::CiaMeta::new(exheader.as_deref(), smdh.as_deref())?)
    } else {
        None
    };
    let cia = cia::CIA::from_parts(&cert_chain, &ticket, &tmd, &region, meta)
        .with_context(|| "A CIA could not be built from the provided files.")?;
    let out_path = PathBuf::from(output).with_extension("cia");
    fs::write(&out_path, cia.to_bytes()?).with_context(|| format!("Could not write CIA to \"{}\".", out_path.display()))?;
    println!("Successfully built CIA with {} contents!", contents.len());
    Ok(())
}

pub fn cia_fix(input: &str, output: &Option<String>) -> Result<()> {
    let in_path = Path::new(input);
    if !in_path.exists() {
        bail!("Source CIA \"{}\" could not be found.", in_path.display());
    }
    let out_path = match output {
        Some(output) => PathBuf::from(output).with_extension("cia"),
        None => in_path.to_path_buf(),
    };
    let mut cia = cia::CIA::from_bytes(&fs::read(in_path)?).with_context(|| "The provided CIA file could not be parsed, and is likely invalid.")?;
    cia.fix()?;
    fs::write(&out_path, cia.to_bytes()?).with_context(|| format!("Could not write CIA to \"{}\".", out_path.display()))?;
    println!("CIA fixed!");
    Ok(())
}
