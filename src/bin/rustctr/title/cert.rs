// title/cert.rs from rustctr (c) 2025 NinjaCheetah & Contributors
// https://github.com/NinjaCheetah/rustctr
//
// Code for the cert command in the rustctr CLI.

use std::fs;
use std::path::Path;
use anyhow::{bail, Context, Result};
use rustctr::title::cert;

pub fn build_cert(nand: &str, output: &str) -> Result<()> {
    let nand_path = Path::new(nand);
    if !nand_path.is_dir() {
        bail!("NAND directory \"{}\" does not exist.", nand_path.display());
    }
    let cert_chain = cert::build_cia_cert(&cert::NandStore::new(nand_path))
        .with_context(|| "The CIA certificate chain could not be built from this NAND.")?;
    fs::write(output, cert_chain).with_context(|| format!("Could not write certificate chain to \"{}\".", output))?;
    println!("Certificate chain written to \"{}\"!", output);
    Ok(())
}
