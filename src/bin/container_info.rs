use clap::Parser;
use std::fs;
use std::path::PathBuf;

use recompress::container::{self, Entries};
use recompress::io_utils::{human_bytes, io_cli_error, recompress_cli_error};

/// Print the entry table of a packed container.
#[derive(Parser)]
struct Args {
    /// Container file (raw, not compressed)
    input: PathBuf,
    /// Also print the SHA-256 of every entry
    #[arg(long)]
    hashes: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    use sha2::{Digest, Sha256};

    let args = Args::parse();
    let bytes =
        fs::read(&args.input).map_err(|e| io_cli_error("reading container", &args.input, e))?;
    println!("file:     {}", args.input.display());
    println!("size:     {}", human_bytes(bytes.len() as u64));
    println!("sniff:    {}", if container::sniff(&bytes) { "ok" } else { "rejected" });

    let entries = Entries::new(&bytes)
        .map_err(|e| recompress_cli_error("reading header", e.at_path(&args.input)))?;
    println!("declared: {}", entries.declared());
    for (i, entry) in entries.enumerate() {
        let entry = entry.map_err(|e| recompress_cli_error("reading entry", e.at_path(&args.input)))?;
        if args.hashes {
            println!(
                "{:>6}  {:>14}  {}  {}",
                i + 1,
                entry.data.len(),
                hex::encode(Sha256::digest(entry.data)),
                entry.name
            );
        } else {
            println!("{:>6}  {:>14}  {}", i + 1, entry.data.len(), entry.name);
        }
    }
    Ok(())
}
