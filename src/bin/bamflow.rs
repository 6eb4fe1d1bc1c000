//! bamflow command line: print or convert SAM/BAM files.

use anyhow::{Context, Result};
use bamflow::io::bam::{copy_alignments, Format};
use bamflow::io::{DataSink, ReadOptions};
use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::{error, info};
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Sam,
    Bam,
}

impl From<OutputFormat> for Format {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Sam => Format::Sam,
            OutputFormat::Bam => Format::Bam,
        }
    }
}

/// Read a SAM or BAM file and write it back out as SAM or BAM.
///
/// The input format is detected from its content. Output goes to stdout as
/// SAM unless `--output` or `--output-format` say otherwise.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Input SAM or BAM file
    input: PathBuf,

    /// Output file; a `.bam` extension selects BAM
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format, overriding the output file extension
    #[arg(long, value_enum)]
    output_format: Option<OutputFormat>,

    /// Skip damaged records and accept a missing BGZF EOF marker
    #[arg(long)]
    lenient: bool,
}

fn run(args: Args) -> Result<()> {
    let sink = args
        .output
        .as_ref()
        .map_or_else(DataSink::stdout, DataSink::from_path);
    let format = args
        .output_format
        .map_or_else(|| Format::for_sink(&sink), Format::from);
    let options = if args.lenient {
        ReadOptions::lenient()
    } else {
        ReadOptions::strict()
    };

    info!("{} -> {} ({})", args.input.display(), sink, format);
    let out = sink
        .open()
        .with_context(|| format!("failed to open {}", sink))?;
    let written = copy_alignments(&args.input, BufWriter::new(out), format, options)
        .with_context(|| format!("failed to convert {}", args.input.display()))?;
    info!("wrote {} records", written);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
