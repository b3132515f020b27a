#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use gfs_build::{BuildParams, BuildSession, Layout};
use gfs_sparse::{RawImageSink, SparseImageSink};
use serde::Serialize;
use std::env;
use std::fs;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "make" => {
            let remaining: Vec<String> = args.collect();
            make_cmd(&remaining)
        }
        "plan" => {
            let remaining: Vec<String> = args.collect();
            plan_cmd(&remaining)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("gfs-cli\n");
    println!("USAGE:");
    println!("  gfs-cli make <output-path> --size <N[KMG]> [options]");
    println!("  gfs-cli plan --size <N[KMG]> [options] [--json]");
    println!();
    println!("OPTIONS:");
    println!("  --size <N[KMG]>        target image length (required)");
    println!("  --block-size <N>       block size in bytes (default 4096)");
    println!("  --inodes <N>           requested inode count");
    println!("  --label <S>            volume label (up to 16 bytes)");
    println!("  --uuid <HEX32>         filesystem UUID as 32 hex digits");
    println!("  --timestamp <N>        build timestamp in seconds (default 0)");
    println!("  --no-journal           skip the journal inode");
    println!("  --sparse               emit the sparse chunk container (make only)");
    println!("  --file <name>=<path>   pack a host file under / (make only, repeatable)");
}

/// Options shared by `make` and `plan`.
struct CommonOptions {
    params: BuildParams,
    files: Vec<(String, Vec<u8>)>,
    sparse: bool,
    json: bool,
}

fn parse_options(args: &[String]) -> Result<CommonOptions> {
    let mut size: Option<u64> = None;
    let mut block_size = 4096_u32;
    let mut inodes: Option<u32> = None;
    let mut label = String::new();
    let mut uuid = [0_u8; 16];
    let mut timestamp = 0_u32;
    let mut journal = true;
    let mut sparse = false;
    let mut json = false;
    let mut files = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--size" => size = Some(parse_size(next_value(&mut iter, "--size")?)?),
            "--block-size" => {
                block_size = next_value(&mut iter, "--block-size")?
                    .parse()
                    .context("--block-size expects an integer")?;
            }
            "--inodes" => {
                inodes = Some(
                    next_value(&mut iter, "--inodes")?
                        .parse()
                        .context("--inodes expects an integer")?,
                );
            }
            "--label" => label = next_value(&mut iter, "--label")?.clone(),
            "--uuid" => uuid = parse_uuid(next_value(&mut iter, "--uuid")?)?,
            "--timestamp" => {
                timestamp = next_value(&mut iter, "--timestamp")?
                    .parse()
                    .context("--timestamp expects an integer")?;
            }
            "--no-journal" => journal = false,
            "--sparse" => sparse = true,
            "--json" => json = true,
            "--file" => {
                let spec = next_value(&mut iter, "--file")?;
                let Some((name, path)) = spec.split_once('=') else {
                    bail!("--file expects <name>=<path>, got {spec:?}");
                };
                let data = fs::read(path)
                    .with_context(|| format!("failed to read {path}"))?;
                files.push((name.to_owned(), data));
            }
            other => bail!("unknown option: {other}"),
        }
    }

    let Some(size) = size else {
        bail!("--size is required");
    };

    let mut params = BuildParams::new(size, block_size)?;
    params.inode_count = inodes;
    params.label = label;
    params.uuid = uuid;
    params.timestamp = timestamp;
    params.journal = journal;

    Ok(CommonOptions {
        params,
        files,
        sparse,
        json,
    })
}

fn next_value<'a>(
    iter: &mut std::slice::Iter<'a, String>,
    name: &str,
) -> Result<&'a String> {
    iter.next()
        .ok_or_else(|| anyhow::anyhow!("{name} requires a value"))
}

/// Parse `N`, `NK`, `NM`, or `NG` into bytes.
fn parse_size(input: &str) -> Result<u64> {
    let (digits, shift) = match input.as_bytes().last() {
        Some(b'K' | b'k') => (&input[..input.len() - 1], 10),
        Some(b'M' | b'm') => (&input[..input.len() - 1], 20),
        Some(b'G' | b'g') => (&input[..input.len() - 1], 30),
        _ => (input, 0),
    };
    let base: u64 = digits
        .parse()
        .with_context(|| format!("invalid size {input:?}"))?;
    base.checked_shl(shift)
        .filter(|v| v >> shift == base)
        .ok_or_else(|| anyhow::anyhow!("size {input:?} overflows"))
}

/// Parse 32 hex digits (dashes allowed) into UUID bytes.
fn parse_uuid(input: &str) -> Result<[u8; 16]> {
    let hex: String = input.chars().filter(|c| *c != '-').collect();
    if hex.len() != 32 {
        bail!("--uuid expects 32 hex digits, got {} in {input:?}", hex.len());
    }
    let mut uuid = [0_u8; 16];
    for (i, byte) in uuid.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .with_context(|| format!("invalid hex in uuid {input:?}"))?;
    }
    Ok(uuid)
}

#[derive(Debug, Serialize)]
struct PlanOutput {
    block_size: u32,
    total_blocks: u32,
    block_groups: u32,
    blocks_per_group: u32,
    inodes_per_group: u32,
    total_inodes: u32,
    inode_table_blocks: u32,
    gdt_blocks: u32,
    reserved_gdt_blocks: u32,
    journal_blocks: u32,
    metadata_blocks: u64,
}

impl PlanOutput {
    fn from_layout(layout: &Layout, block_size: u32) -> Self {
        Self {
            block_size,
            total_blocks: layout.total_blocks,
            block_groups: layout.block_groups,
            blocks_per_group: layout.blocks_per_group,
            inodes_per_group: layout.inodes_per_group,
            total_inodes: layout.total_inodes,
            inode_table_blocks: layout.inode_table_blocks,
            gdt_blocks: layout.gdt_blocks,
            reserved_gdt_blocks: layout.reserved_gdt_blocks,
            journal_blocks: layout.journal_blocks,
            metadata_blocks: layout.metadata_blocks(),
        }
    }
}

fn plan_cmd(args: &[String]) -> Result<()> {
    let options = parse_options(args)?;
    let layout = Layout::compute(&options.params)
        .context("layout computation failed")?;
    let output = PlanOutput::from_layout(&layout, options.params.block_size.get());

    if options.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize plan")?
        );
    } else {
        println!("GenesisFS layout plan");
        println!("block_size: {}", output.block_size);
        println!("total_blocks: {}", output.total_blocks);
        println!("block_groups: {}", output.block_groups);
        println!("blocks_per_group: {}", output.blocks_per_group);
        println!("inodes_per_group: {}", output.inodes_per_group);
        println!("total_inodes: {}", output.total_inodes);
        println!("inode_table_blocks: {}", output.inode_table_blocks);
        println!("gdt_blocks: {}", output.gdt_blocks);
        println!("reserved_gdt_blocks: {}", output.reserved_gdt_blocks);
        println!("journal_blocks: {}", output.journal_blocks);
        println!("metadata_blocks: {}", output.metadata_blocks);
    }
    Ok(())
}

fn make_cmd(args: &[String]) -> Result<()> {
    let Some(output_path) = args.first() else {
        bail!("make requires <output-path>");
    };
    if output_path.starts_with("--") {
        bail!("make requires <output-path> before options");
    }
    let options = parse_options(&args[1..])?;

    let mut session = BuildSession::new(options.params.clone())
        .context("failed to start build session")?;
    for (name, data) in options.files {
        session
            .add_file(name.as_bytes(), data, 0o644, 0, 0)
            .with_context(|| format!("failed to queue {name}"))?;
    }
    let image = session.finish().context("image build failed")?;
    debug!(
        chunks = image.count_chunks().ok(),
        backed_blocks = image.backed_blocks(),
        "serializing"
    );

    let path = Path::new(output_path);
    if options.sparse {
        let file = fs::File::create(path)
            .with_context(|| format!("failed to create {output_path}"))?;
        let mut sink = SparseImageSink::new(BufWriter::new(file));
        image
            .write_to(&mut sink)
            .context("sparse serialization failed")?;
    } else {
        let mut sink = RawImageSink::create(path)
            .with_context(|| format!("failed to create {output_path}"))?;
        image
            .write_to(&mut sink)
            .context("raw serialization failed")?;
    }

    eprintln!(
        "wrote {} ({} bytes logical, {} of {} blocks backed, {} free)",
        output_path,
        image.geometry().total_bytes(),
        image.backed_blocks(),
        image.layout.total_blocks,
        image.superblock.free_blocks_count,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_suffixes() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("64K").unwrap(), 64 << 10);
        assert_eq!(parse_size("64M").unwrap(), 64 << 20);
        assert_eq!(parse_size("2g").unwrap(), 2 << 30);
        assert!(parse_size("abc").is_err());
        assert!(parse_size("99999999999999999999G").is_err());
    }

    #[test]
    fn uuid_parsing() {
        let uuid = parse_uuid("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        assert_eq!(uuid[0], 0x00);
        assert_eq!(uuid[3], 0x33);
        assert_eq!(uuid[15], 0xFF);
        assert!(parse_uuid("123").is_err());
        assert!(parse_uuid("zz112233445566778899aabbccddeeff").is_err());
    }

    #[test]
    fn options_require_size() {
        let args: Vec<String> = vec!["--label".into(), "x".into()];
        assert!(parse_options(&args).is_err());
    }

    #[test]
    fn options_parse_flags() {
        let args: Vec<String> = [
            "--size", "64M", "--block-size", "2048", "--inodes", "1000",
            "--label", "root", "--no-journal", "--sparse", "--timestamp", "42",
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
        let options = parse_options(&args).unwrap();
        assert_eq!(options.params.len_bytes, 64 << 20);
        assert_eq!(options.params.block_size.get(), 2048);
        assert_eq!(options.params.inode_count, Some(1000));
        assert_eq!(options.params.label, "root");
        assert_eq!(options.params.timestamp, 42);
        assert!(!options.params.journal);
        assert!(options.sparse);
        assert!(!options.json);
    }
}
