// title/mod.rs from rustctr (c) 2025 NinjaCheetah & Contributors
// https://github.com/NinjaCheetah/rustctr
//
// Root for all title-related modules, along with the alignment helpers shared between them.

pub mod cert;
pub mod cia;
pub mod content;
pub mod crypto;
pub mod header;
pub mod meta;
pub mod tmd;

/// Rounds a size up to the nearest multiple of 64, which is the alignment used for every section
/// of a CIA file.
pub fn align64(size: u64) -> u64 {
    size.div_ceil(64).saturating_mul(64)
}

/// Pads a buffer with zeroes until its length is a multiple of 64.
pub(crate) fn pad64(buf: &mut Vec<u8>) {
    buf.resize(align64(buf.len() as u64) as usize, 0);
}
