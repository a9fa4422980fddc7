// title/content.rs from rustctr (c) 2025 NinjaCheetah & Contributors
// https://github.com/NinjaCheetah/rustctr
//
// Code for content-related commands in the rustctr CLI.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use anyhow::{bail, Context, Result};
use clap::Subcommand;
use rustctr::title::content;
use rustctr::title::crypto::{ContentCrypt, CryptDirection, SoftwareAes};
use crate::title::parse_title_key;

#[derive(Subcommand)]
#[command(arg_required_else_help = true)]
pub enum Commands {
    /// Decrypt a content file
    Decrypt {
        /// The path to the encrypted content
        input: String,
        /// The path to write the decrypted content to
        output: String,
        /// The decrypted title key, as 32 hex digits
        #[arg(short, long)]
        key: String,
        /// The index of the content, as listed in the TMD
        #[arg(short, long)]
        index: u16,
    },
    /// Encrypt a content file
    Encrypt {
        /// The path to the decrypted content
        input: String,
        /// The path to write the encrypted content to
        output: String,
        /// The decrypted title key, as 32 hex digits
        #[arg(short, long)]
        key: String,
        /// The index of the content, as listed in the TMD
        #[arg(short, long)]
        index: u16,
    },
}

fn transform(input: &str, output: &str, key: &str, index: u16, direction: CryptDirection) -> Result<[u8; 32]> {
    let in_path = Path::new(input);
    if !in_path.exists() {
        bail!("Source content \"{}\" could not be found.", in_path.display());
    }
    let title_key = parse_title_key(key)?;
    let length = in_path.metadata()?.len();
    let mut reader = BufReader::new(File::open(in_path)?);
    let mut writer = BufWriter::new(File::create(output).with_context(|| format!("Could not create output file \"{}\".", output))?);
    let mut engine = SoftwareAes::new();
    let mut crypt = ContentCrypt::new(&mut engine, direction, title_key, index)?;
    let hash = content::transform_stream(&mut reader, &mut writer, length, &mut crypt)
        .with_context(|| "The content could not be processed. Content must be a multiple of 16 bytes long.")?;
    writer.flush()?;
    Ok(hash)
}

pub fn decrypt(input: &str, output: &str, key: &str, index: u16) -> Result<()> {
    let hash = transform(input, output, key, index, CryptDirection::Decrypt)?;
    println!("Content decrypted! (SHA-256: {})", hex::encode(hash));
    Ok(())
}

pub fn encrypt(input: &str, output: &str, key: &str, index: u16) -> Result<()> {
    let hash = transform(input, output, key, index, CryptDirection::Encrypt)?;
    println!("Content encrypted! (SHA-256: {})", hex::encode(hash));
    Ok(())
}
