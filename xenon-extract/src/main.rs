//! Command-line XEX2 extractor.
//!
//! Decodes an Xbox 360 XEX2 container into the raw PE image it wraps and
//! prints the structural information discovered along the way. Fatal format
//! errors abort with a nonzero exit status before anything is written; the
//! output file only appears once the image has been fully decoded.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use xenon_pe::PeImage;
use xenon_xex::XexFile;

#[derive(Parser)]
#[command(
    name = "xenon-extract",
    version,
    about = "Extract and decrypt the PE image from an Xbox 360 XEX2 file"
)]
struct Cli {
    /// Input .xex file.
    input: PathBuf,
    /// Output path for the decoded PE image.
    output: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let data = fs::read(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let file_len = data.len();

    let xex = XexFile::open(data)
        .with_context(|| format!("failed to parse {}", cli.input.display()))?;

    let header = xex.header();
    let opt = xex.optional_headers();
    let security = xex.security();
    let ffi = xex.format_info();

    println!("XEX2 file: {file_len} bytes");
    println!("  Module flags: {:#010X}", header.module_flags);
    println!("  PE data offset: {:#X}", header.pe_data_offset);
    println!("  Security info: {:#X}", header.security_info_offset);
    println!("  Optional headers: {}", header.optional_header_count);
    println!("  Entry point: {:#010X}", opt.entry_point.unwrap_or(0));
    println!("  Image base: {:#010X}", opt.image_base.unwrap_or(0));
    println!("  Encryption: {}", ffi.encryption_str());
    println!("  Compression: {}", ffi.compression_str());
    println!(
        "  Image size: {:#X} ({} bytes)",
        security.image_size, security.image_size
    );
    println!("  Load address: {:#010X}", security.load_address);
    println!("  Encrypted file key: {}", hex::encode(security.file_key));

    if !ffi.blocks.is_empty() {
        println!("  {} compression blocks:", ffi.blocks.len());
        for (i, block) in ffi.blocks.iter().enumerate() {
            println!(
                "    Block[{i}]: data={} ({:#X}), zero={} ({:#X})",
                block.data_size, block.data_size, block.zero_size, block.zero_size
            );
        }
        println!("  Total image size from blocks: {:#X}", ffi.blocks_total());
    }

    let image = xex.decode()?;
    if let Some(key) = image.file_key {
        println!("  Decrypted file key: {}", hex::encode(key));
    }
    for warning in &image.warnings {
        println!("  Warning: {warning}");
    }

    print_pe_info(&image.bytes, opt.image_base.unwrap_or(0));

    fs::write(&cli.output, &image.bytes)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;
    println!("\nWrote {} bytes to {}", image.bytes.len(), cli.output.display());

    Ok(())
}

/// Print the embedded executable's header and section table, if they can be
/// located. Validation failures are warnings only; the image is still
/// written.
fn print_pe_info(image: &[u8], image_base: u32) {
    println!("\nValidating PE image ({} bytes)...", image.len());

    let pe = match PeImage::parse(image) {
        Ok(pe) => pe,
        Err(warning) => {
            println!("  Warning: {warning} — writing image unvalidated");
            return;
        }
    };

    if pe.has_dos_header {
        println!("  MZ header found, PE signature at {:#X}", pe.pe_offset);
    } else {
        println!("  PE signature at {:#X} (no MZ header)", pe.pe_offset);
    }

    let machine = match pe.coff.machine_enum() {
        Ok(machine) => machine.to_string(),
        Err(raw) => format!("Unknown({raw:#06X})"),
    };
    println!("  Machine: {:#06X} ({machine})", pe.coff.machine);
    println!("  Sections: {}", pe.coff.section_count);
    println!("  Optional header size: {}", pe.coff.optional_header_size);

    for section in &pe.sections {
        println!(
            "    {:8} VA={:#010X} VSize={:#08X} Raw={:#08X} @ {:#08X} [{}]",
            section.name_str(),
            image_base.wrapping_add(section.virtual_address),
            section.virtual_size,
            section.raw_size,
            section.raw_offset,
            section.flags_str(),
        );
    }
    for warning in &pe.warnings {
        println!("  Warning: {warning}");
    }
    println!("  Total data section size: {} bytes", pe.data_bytes_total());
}
