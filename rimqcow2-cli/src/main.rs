// SPDX-License-Identifier: MIT

#[macro_use]
mod utils;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;

use rimqcow2::prelude::*;

use crate::utils::LogLevel;

#[derive(Parser)]
#[command(name = "qcow2ctl", version, about = "QCOW2 image inspector and converter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cluster allocation map as JSON records
    Map {
        /// Path to the QCOW2 image
        path: PathBuf,

        #[arg(long, short, action = clap::ArgAction::Count)]
        verbose: u8,

        #[arg(long, short)]
        quiet: bool,
    },
    /// Materialize the image's logical contents to a flat raw file
    Convert {
        /// Path to the QCOW2 image
        path: PathBuf,

        /// Path to the raw output file
        output: PathBuf,

        #[arg(long, short, action = clap::ArgAction::Count)]
        verbose: u8,

        #[arg(long, short)]
        quiet: bool,
    },
}

/// JSON record shape mirroring `qemu-img map --output=json`.
#[derive(Serialize)]
struct MapRecord {
    start: u64,
    length: u64,
    depth: u32,
    present: bool,
    zero: bool,
    data: bool,
    compressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<u64>,
}

impl From<&Region> for MapRecord {
    fn from(r: &Region) -> Self {
        MapRecord {
            start: r.start,
            length: r.length,
            depth: r.depth,
            present: r.present,
            zero: r.zero,
            data: r.data,
            compressed: r.compressed,
            offset: r.host_offset,
        }
    }
}

fn apply_verbosity(verbose: u8, quiet: bool) {
    if quiet {
        crate::utils::set_log_level(LogLevel::Quiet);
    } else if verbose > 0 {
        crate::utils::set_log_level(LogLevel::Verbose);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Map {
            path,
            verbose,
            quiet,
        } => {
            apply_verbosity(verbose, quiet);
            run_map(&path)
        }
        Commands::Convert {
            path,
            output,
            verbose,
            quiet,
        } => {
            apply_verbosity(verbose, quiet);
            run_convert(&path, &output)
        }
    };

    if let Err(ref e) = result {
        eprintln!("{} {e}", "error:".red().bold());
    }
    result
}

fn run_map(path: &PathBuf) -> anyhow::Result<()> {
    crate::log_verbose!("opening {}", path.display());
    let mut file = File::open(path)?;
    let image = Qcow2Image::open(&mut file)?;
    crate::log_info!(
        "cluster_bits={} virtual_size={}",
        image.header().cluster_bits,
        image.header().virtual_size
    );

    let regions = image.build_map(&mut file)?;
    let records: Vec<MapRecord> = regions.iter().map(MapRecord::from).collect();
    let json = serde_json::to_string_pretty(&records)?;
    println!("{json}");
    crate::log_verbose!("{} regions", regions.len());
    Ok(())
}

fn run_convert(path: &PathBuf, output: &PathBuf) -> anyhow::Result<()> {
    crate::log_verbose!("opening {}", path.display());
    let mut file = File::open(path)?;
    let image = Qcow2Image::open(&mut file)?;

    crate::log_info!(
        "{} -> {}",
        path.display(),
        output.display().to_string().green()
    );

    let out_file = File::create(output)?;
    out_file.set_len(image.header().virtual_size)?;
    let mut sink = BufWriter::new(out_file);

    image.convert_to_raw(&mut file, &mut sink)?;
    crate::log_info!("{}", "done".green());
    Ok(())
}
