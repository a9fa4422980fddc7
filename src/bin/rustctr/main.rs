// main.rs from rustctr (c) 2025 NinjaCheetah & Contributors
// https://github.com/NinjaCheetah/rustctr
//
// Base for the rustctr CLI that handles argument parsing and directs execution to the proper module.

mod info;
mod title;

use anyhow::Result;
use clap::{Subcommand, Parser};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
#[command(arg_required_else_help = true)]
enum Commands {
    /// Build or fix a CIA file
    Cia {
        #[command(subcommand)]
        command: title::cia::Commands,
    },
    /// Build the CIA certificate chain from a NAND's certificate database
    Cert {
        /// The path to the root of a mounted or dumped SysNAND
        nand: String,
        /// The path to write the certificate chain to
        output: String,
    },
    /// Encrypt/decrypt title content
    Content {
        #[command(subcommand)]
        command: title::content::Commands,
    },
    /// Get information about a CIA file
    Info {
        /// The path to a CIA
        input: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Cia { command }) => {
            match command {
                title::cia::Commands::Build { contents, output, tid, key, cert, ticket, exheader, smdh } => {
                    title::cia::cia_build(contents, output, tid, key, cert, ticket, exheader, smdh)?
                },
                title::cia::Commands::Fix { input, output } => {
                    title::cia::cia_fix(input, output)?
                },
            }
        },
        Some(Commands::Cert { nand, output }) => {
            title::cert::build_cert(nand, output)?
        },
        Some(Commands::Content { command }) => {
            match command {
                title::content::Commands::Decrypt { input, output, key, index } => {
                    title::content::decrypt(input, output, key, *index)?
                },
                title::content::Commands::Encrypt { input, output, key, index } => {
                    title::content::encrypt(input, output, key, *index)?
                },
            }
        },
        Some(Commands::Info { input }) => {
            info::info(input)?
        },
        None => { /* Clap handles no passed command by itself */}
    }
    Ok(())
}
