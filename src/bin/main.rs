// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use clap::{ArgGroup, Parser};
use efs2::{self, Partition};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "efs2tool",
    about = "Extracts files from a QEFS2 partition carved out of a raw NAND flash dump",
    group(ArgGroup::new("mode").required(true).args(["extract_partitions", "extract_efs2", "extract_all"]))
)]
struct Args {
    /// Input NAND dump.
    #[arg(short, long, value_name = "PATH")]
    input: PathBuf,

    /// Output directory.
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// Extract partitions from the NAND image, writing each one's raw
    /// bytes without walking it as a filesystem.
    #[arg(short = 'p', long)]
    extract_partitions: bool,

    /// Extract files from an EFS2 partition.
    #[arg(short = 'e', long)]
    extract_efs2: bool,

    /// Both: carve partitions, then walk every EFS2-prefixed one.
    #[arg(short = 'a', long)]
    extract_all: bool,

    /// Additionally package the output directory into a `.zip` next
    /// to it.
    #[arg(short, long)]
    zip: bool,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            let prefix = match record.level() {
                log::Level::Error => "[E]",
                log::Level::Warn => "[W]",
                log::Level::Info => "[I]",
                log::Level::Debug | log::Level::Trace => "[D]",
            };
            writeln!(buf, "{} {}", prefix, record.args())
        })
        .init();
}

fn dump_partitions(partitions: &[Partition], output: &Path) -> efs2::Result<()> {
    for partition in partitions {
        let dest = output.join(&partition.name);
        fs::create_dir_all(&dest)?;
        fs::write(dest.join("partition.bin"), &partition.data)?;
        info!("wrote partition {} ({} bytes)", partition.name, partition.data.len());
    }
    Ok(())
}

fn walk_efs2_partition(partition: &Partition, output: &Path) -> efs2::Result<usize> {
    let vol = efs2::VolumeReader::open(partition.data.clone())?;
    let entries = efs2::walk(&vol)?;
    let resolved = efs2::resolve_paths(&entries, vol.root_inode());

    let dest_root = output.join(&partition.name);
    let bar = ProgressBar::new(resolved.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{prefix} [{bar:40}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_prefix(partition.name.clone());

    for file in &resolved {
        let dest = dest_root.join(&file.path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, &file.data)?;
        bar.inc(1);
    }
    bar.finish_and_clear();
    info!("walked partition {}: {} files", partition.name, resolved.len());
    Ok(resolved.len())
}

fn zip_output(output: &Path) -> efs2::Result<()> {
    let zip_path = output.with_extension("zip");
    let file = fs::File::create(&zip_path)?;
    let mut writer = zip::ZipWriter::new(file);
    let options: zip::write::FileOptions<()> =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in walkdir_files(output) {
        let relative = entry.strip_prefix(output).unwrap_or(&entry);
        let name = relative.to_string_lossy().replace('\\', "/");
        if entry.is_dir() {
            writer.add_directory(format!("{}/", name), options)?;
        } else {
            writer.start_file(name, options)?;
            let contents = fs::read(&entry)?;
            writer.write_all(&contents)?;
        }
    }
    writer.finish()?;
    info!("packaged output into {}", zip_path.display());
    Ok(())
}

/// Non-recursive directory walk used only for zip packaging; the
/// output tree here is shallow and fully materialized on disk, so
/// there's no need for the crate's own cycle-safe walker.
fn walkdir_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(read_dir) = fs::read_dir(&dir) else { continue };
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.is_dir() {
                out.push(path.clone());
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}

fn run(args: Args) -> efs2::Result<()> {
    let raw = fs::read(&args.input)?;
    info!("read {} bytes from {}", raw.len(), args.input.display());

    let image = efs2::NandImage::deframe(&raw)?;
    info!("de-framed {} blocks", image.block_count());

    let partitions = efs2::carve_partitions(&image)?;
    info!("carved {} partitions", partitions.len());

    fs::create_dir_all(&args.output)?;

    if args.extract_partitions {
        dump_partitions(&partitions, &args.output)?;
    } else if args.extract_efs2 {
        for partition in &partitions {
            if partition.is_efs2() {
                walk_efs2_partition(partition, &args.output)?;
            }
        }
    } else if args.extract_all {
        dump_partitions(&partitions, &args.output)?;
        for partition in &partitions {
            if partition.is_efs2() {
                match walk_efs2_partition(partition, &args.output) {
                    Ok(_) => {}
                    Err(e) => warn!("skipping {}: {e}", partition.name),
                }
            }
        }
    }

    if args.zip {
        zip_output(&args.output)?;
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
