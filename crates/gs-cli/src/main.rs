//! gguf-sort: rewrite a LLaMA GGUF model with its tensors in canonical
//! layer order, optionally changing the output precision.
//!
//! ```bash
//! gguf-sort models/7b/ggml-model-f16.gguf
//! gguf-sort --outtype q8_0 --outfile sorted.gguf models/7b/ggml-model-f16.gguf
//! RUST_LOG=debug gguf-sort --bigendian models/7b/ggml-model-f16.gguf
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use gs_model::{convert, ConvertOptions, DEFAULT_CONCURRENCY};
use gs_tensor::{ByteOrder, FileType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutType {
    F32,
    F16,
    #[value(name = "q8_0")]
    Q8_0,
}

impl From<OutType> for FileType {
    fn from(t: OutType) -> FileType {
        match t {
            OutType::F32 => FileType::AllF32,
            OutType::F16 => FileType::MostlyF16,
            OutType::Q8_0 => FileType::MostlyQ8_0,
        }
    }
}

/// Sort the tensors of a GGUF model into canonical layer order
#[derive(Parser, Debug)]
#[command(name = "gguf-sort")]
#[command(version)]
struct Args {
    /// Output format (q8_0 is only available on little-endian hosts);
    /// defaults to the input's file type
    #[arg(long, value_enum)]
    outtype: Option<OutType>,

    /// Path to write to; default: based on input
    #[arg(long)]
    outfile: Option<PathBuf>,

    /// Model file to read (.gguf)
    model: PathBuf,

    /// Override the model context length
    #[arg(long)]
    ctx: Option<u32>,

    /// Number of tensors to convert in parallel
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Write the model in big-endian byte order
    #[arg(long)]
    bigendian: bool,

    /// Pad the vocab size to a multiple of 32 (accepted for compatibility)
    #[arg(long)]
    padvocab: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut options = ConvertOptions::new(&args.model);
    options.outfile = args.outfile;
    options.out_type = args.outtype.map(FileType::from);
    options.ctx = args.ctx;
    options.concurrency = args.concurrency;
    options.pad_vocab = args.padvocab;
    if args.bigendian {
        options.byte_order = ByteOrder::Big;
    }

    let summary = convert(&options)
        .with_context(|| format!("Failed to convert {}", args.model.display()))?;

    tracing::info!("Conversion complete!");
    tracing::info!("  Tensors: {}", summary.n_tensors);
    tracing::info!("  File type: {}", summary.file_type);
    tracing::info!("  Bytes: {}", summary.bytes_written);
    tracing::info!("  Output: {}", summary.output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["gguf-sort", "model.gguf"]).unwrap();
        assert_eq!(args.model, PathBuf::from("model.gguf"));
        assert_eq!(args.outtype, None);
        assert_eq!(args.concurrency, 8);
        assert!(!args.bigendian);
        assert!(!args.padvocab);
    }

    #[test]
    fn test_args_outtype() {
        let args = Args::try_parse_from([
            "gguf-sort",
            "--outtype",
            "q8_0",
            "--outfile",
            "out.gguf",
            "--ctx",
            "4096",
            "--bigendian",
            "model.gguf",
        ])
        .unwrap();
        assert_eq!(args.outtype, Some(OutType::Q8_0));
        assert_eq!(FileType::from(OutType::Q8_0), FileType::MostlyQ8_0);
        assert_eq!(args.outfile, Some(PathBuf::from("out.gguf")));
        assert_eq!(args.ctx, Some(4096));
        assert!(args.bigendian);
    }

    #[test]
    fn test_args_rejects_unknown_outtype() {
        assert!(Args::try_parse_from(["gguf-sort", "--outtype", "q4_0", "model.gguf"]).is_err());
    }
}
