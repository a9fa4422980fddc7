// title/mod.rs from rustctr (c) 2025 NinjaCheetah & Contributors
// https://github.com/NinjaCheetah/rustctr
//
// Root for the title-related commands in the rustctr CLI, along with their shared helpers.

pub mod cert;
pub mod cia;
pub mod content;

use anyhow::{bail, Context, Result};
use hex::FromHex;

/// Parses a title key given as 32 hex digits.
pub fn parse_title_key(key: &str) -> Result<[u8; 16]> {
    <[u8; 16]>::from_hex(key.trim()).with_context(|| format!("\"{}\" is not a valid title key. Title keys must be 32 hex digits.", key))
}

/// Parses a Title ID given as 16 hex digits.
pub fn parse_title_id(tid: &str) -> Result<[u8; 8]> {
    let tid = tid.trim().trim_start_matches("0x");
    if tid.len() != 16 {
        bail!("\"{}\" is not a valid Title ID. Title IDs must be 16 hex digits.", tid);
    }
    <[u8; 8]>::from_hex(tid).with_context(|| format!("\"{}\" is not a valid Title ID.", tid))
}
