// info.rs from rustctr (c) 2025 NinjaCheetah & Contributors
// https://github.com/NinjaCheetah/rustctr
//
// Code for the info command in the rustctr CLI.

use std::fs;
use std::path::Path;
use anyhow::{bail, Context, Result};
use rustctr::title::{cert, cia, header, meta, tmd};

fn print_layout_info(info: &header::CiaInfo) {
    println!("Layout");
    println!("  Certificate Chain: {:#X} ({:#X} bytes)", info.offset_cert, info.cert_size);
    println!("  Ticket: {:#X} ({:#X} bytes)", info.offset_ticket, info.ticket_size);
    println!("  TMD: {:#X} ({:#X} bytes)", info.offset_tmd, info.tmd_size);
    println!("  Content: {:#X} ({:#X} bytes)", info.offset_content, info.content_size);
    match info.offset_meta {
        Some(offset) => println!("  Meta: {:#X} ({:#X} bytes)", offset, info.meta_size),
        None => println!("  Meta: N/A"),
    }
    println!("  Total Size: {:#X} bytes", info.size_cia);
}

fn print_tmd_info(tmd: &tmd::TMD, header: &header::CiaHeader) {
    println!("Title Info");
    println!("  Title ID: {}", hex::encode(tmd.title_id).to_uppercase());
    println!("  Title Version: {}", tmd.title_version);
    println!("  TMD Version: {}", tmd.tmd_version);
    let signature_issuer = tmd.signature_issuer();
    if signature_issuer.contains("CP0000000b") {
        println!("  Certificate: CP0000000b (Retail)");
        println!("  Certificate Issuer: Root-CA00000003 (Retail)");
    } else if signature_issuer.contains("CP0000000a") {
        println!("  Certificate: CP0000000a (Development)");
        println!("  Certificate Issuer: Root-CA00000004 (Development)");
    } else {
        println!("  Certificate Info: {} (Unknown)", signature_issuer);
    }
    let hash_str = if tmd.verify_hashes() { "Valid" } else { "Invalid (Run fix to repair)" };
    println!("  Hash Tree: {}", hash_str);
    println!("\nContent Info");
    println!("  Total Contents: {}", tmd.num_contents);
    println!("  Boot Content Index: {}", tmd.boot_index);
    println!("  Content Records:");
    for content in &tmd.content_chunks {
        println!("    Content Index: {}", content.index);
        println!("      Content ID: {:08X}", content.content_id);
        let flags: Vec<String> = content.flags().iter().map(|f| f.to_string()).collect();
        if flags.is_empty() {
            println!("      Content Type: {:#06X}", content.content_type);
        } else {
            println!("      Content Type: {:#06X} ({})", content.content_type, flags.join(", "));
        }
        println!("      Content Size: {} bytes", content.content_size);
        println!("      Content Hash: {}", hex::encode(content.content_hash));
        if !header.has_content(content.index) {
            println!("      Not marked present in the CIA header!");
        }
    }
}

fn print_meta_info(meta: &meta::CiaMeta) {
    println!("Meta Info");
    println!("  Core Version: {}", meta.core_version);
    let dependencies = meta.dependencies();
    if dependencies.is_empty() {
        println!("  Dependencies: None");
    } else {
        println!("  Dependencies:");
        for tid in dependencies {
            println!("    {:016X}", tid);
        }
    }
    println!("  Has Icon: {}", meta.smdh.iter().any(|&b| b != 0));
}

pub fn info(input: &str) -> Result<()> {
    let in_path = Path::new(input);
    if !in_path.exists() {
        bail!("Input file \"{}\" does not exist.", in_path.display());
    }
    let data = fs::read(in_path)?;
    let cia = cia::CIA::from_bytes(&data).with_context(|| "Information cannot be displayed for this file, as it is not a valid CIA.")?;
    println!("CIA Info");
    println!("  Header: Valid");
    let cert_str = if cert::verify_cia_cert(&cia.cert_chain()) { "Retail" } else { "Unknown" };
    println!("  Certificate Chain: {}", cert_str);
    println!("  Has Meta: {}", cia.meta.is_some());
    println!();
    print_layout_info(&cia.info());
    println!();
    print_tmd_info(&cia.tmd, &cia.header);
    if let Some(meta) = &cia.meta {
        println!();
        print_meta_info(meta);
    }
    Ok(())
}
