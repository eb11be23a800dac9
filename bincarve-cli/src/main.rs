use anyhow::{bail, Context};
use bincarve::processor::{SegmentContext, SegmentIter, SegmentStep};
use bincarve::{
    search, source, ByteSource, BytesSegment, CarveResult, Coordinator, InputSpec, Pipeline,
    PipelineStep, ReadMode, RunConfig, SegmentRecord,
};
use clap::Parser;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Carve structured segments out of binary file trees")]
struct Cli {
    /// Input files or directories (directories are walked recursively)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory (default: carved/ under the inputs' common ancestor)
    #[arg(short = 'o', long = "outdir")]
    outdir: Option<PathBuf>,

    /// Load each input fully into memory before processing
    #[arg(short = 'p', long)]
    preload: bool,

    /// Number of files processed concurrently (default: sequential)
    #[arg(short = 'm', long = "multithread")]
    multithread: Option<usize>,

    /// Configuration file (YAML); command-line flags take precedence
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Pipeline arguments: <hex-signature> [extension]
    #[arg(last = true)]
    pipeline_args: Vec<String>,
}

/// Splits the input at every occurrence of a byte signature and emits one
/// segment per region, each starting with the signature and running to the
/// next occurrence (or end of input).
struct SignatureCarver {
    signature: Vec<u8>,
    extension: String,
}

impl SegmentStep for SignatureCarver {
    fn run<'a>(
        &'a mut self,
        input: &'a mut dyn ByteSource,
        _cx: &SegmentContext,
    ) -> CarveResult<SegmentIter<'a>> {
        let end = match input.len() {
            Some(n) => n,
            None => input.seek(SeekFrom::End(0))?,
        };
        let hits = search::find_all(&mut *input, &self.signature, 0..end, None)?;
        let extension = self.extension.clone();
        let mut regions = hits
            .iter()
            .enumerate()
            .map(|(i, &start)| (start, hits.get(i + 1).copied().unwrap_or(end)))
            .collect::<Vec<_>>()
            .into_iter();

        Ok(Box::new(std::iter::from_fn(move || {
            let (start, stop) = regions.next()?;
            let mut bytes = vec![0u8; (stop - start) as usize];
            if let Err(e) = source::read_at(input, start, &mut bytes, ReadMode::Strict) {
                return Some(Err(e));
            }
            Some(Ok(Box::new(BytesSegment {
                bytes,
                extension: extension.clone(),
            }) as Box<dyn SegmentRecord>))
        })))
    }
}

fn parse_hex(text: &str) -> anyhow::Result<Vec<u8>> {
    if text.is_empty() || text.len() % 2 != 0 {
        bail!("signature must be a non-empty, even-length hex string: {:?}", text);
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte {:?} in signature", &text[i..i + 2]))
        })
        .collect()
}

/// Longest shared path prefix of the inputs; `.` when they share none.
fn common_ancestor(paths: &[PathBuf]) -> PathBuf {
    let mut iter = paths.iter().map(|p| {
        if p.is_dir() {
            p.as_path()
        } else {
            p.parent().unwrap_or_else(|| Path::new("."))
        }
    });
    let mut ancestor = match iter.next() {
        Some(first) => first.to_path_buf(),
        None => return PathBuf::from("."),
    };
    for path in iter {
        while !path.starts_with(&ancestor) {
            if !ancestor.pop() {
                return PathBuf::from(".");
            }
        }
    }
    if ancestor.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        ancestor
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let output_root = cli
        .outdir
        .clone()
        .unwrap_or_else(|| common_ancestor(&cli.inputs).join("carved"));

    let cli_config = RunConfig {
        inputs: cli.inputs.iter().map(InputSpec::from_path).collect(),
        output_root,
        parallelism: cli.multithread.unwrap_or(0),
        preload: cli.preload,
        pipeline_args: cli.pipeline_args.clone(),
        log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()),
    };

    let config = match &cli.config {
        Some(path) => RunConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?
            .merge_with_cli(cli_config),
        None => cli_config,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    for input in &config.inputs {
        if !input.path.exists() {
            bail!("input not found: {}", input.path.display());
        }
    }

    let mut args = config.pipeline_args.iter();
    let signature = match args.next() {
        Some(hex) => parse_hex(hex)?,
        None => bail!("missing pipeline arguments: expected -- <hex-signature> [extension]"),
    };
    let extension = args.next().cloned().unwrap_or_else(|| "bin".to_string());
    if args.next().is_some() {
        bail!("too many pipeline arguments: expected -- <hex-signature> [extension]");
    }

    let pipelines = vec![Pipeline::new("signature-carver", move || {
        PipelineStep::Segmented(Box::new(SignatureCarver {
            signature: signature.clone(),
            extension: extension.clone(),
        }))
    })];

    info!(
        "carving {} input(s) into {}",
        config.inputs.len(),
        config.output_root.display()
    );
    let summary = Coordinator::new(config, pipelines)?.run()?;

    println!(
        "Processed {} file(s): {} output(s) written, {} failure(s)",
        summary.files_processed, summary.outputs_written, summary.failures
    );
    if summary.failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("deadBEEF").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(parse_hex("").is_err());
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_common_ancestor() {
        let paths = vec![PathBuf::from("/a/b/c"), PathBuf::from("/a/b/d/e")];
        // Directories do not exist, so both are treated as files and
        // reduced to their parents first.
        assert_eq!(common_ancestor(&paths), PathBuf::from("/a/b"));

        let disjoint = vec![PathBuf::from("rel/x"), PathBuf::from("other/y")];
        assert_eq!(common_ancestor(&disjoint), PathBuf::from("."));
    }
}
