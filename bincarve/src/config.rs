use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One input to a run: a file or a directory, together with the root it was
/// given under. The root is carried through directory expansion so output
/// paths stay relative to what the caller named.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputSpec {
    pub is_file: bool,
    pub root: PathBuf,
    pub path: PathBuf,
}

impl InputSpec {
    /// Classifies `path` as a file or directory input rooted at its parent
    /// (for files) or itself (for directories).
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let is_file = path.is_file();
        let root = if is_file {
            path.parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            path.clone()
        };
        Self {
            is_file,
            root,
            path,
        }
    }
}

/// Configuration for a carving run.
///
/// Loadable from a YAML file via [`RunConfig::load_from`]; CLI arguments
/// take precedence through [`RunConfig::merge_with_cli`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Ordered inputs; directories are expanded lazily during the run.
    #[serde(default)]
    pub inputs: Vec<InputSpec>,

    /// Root directory outputs are written under, mirroring the input tree.
    pub output_root: PathBuf,

    /// Worker slots: 0 runs sequentially, `n >= 1` runs concurrently with
    /// at most `n` files in flight (capped by the host's core count).
    #[serde(default)]
    pub parallelism: usize,

    /// Load each input file fully into memory before processing, making
    /// reads zero-copy.
    #[serde(default)]
    pub preload: bool,

    /// Opaque extra arguments handed to every pipeline.
    #[serde(default)]
    pub pipeline_args: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl RunConfig {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            inputs: Vec::new(),
            output_root: output_root.into(),
            parallelism: 0,
            preload: false,
            pipeline_args: Vec::new(),
            log_level: default_log_level(),
        }
    }

    /// Loads configuration from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        ConfigBuilder::builder()
            .add_source(File::from(config_path))
            .build()?
            .try_deserialize()
    }

    /// Merges CLI arguments with configuration file values; CLI wins.
    pub fn merge_with_cli(mut self, cli: RunConfig) -> Self {
        if !cli.inputs.is_empty() {
            self.inputs = cli.inputs;
        }
        if cli.output_root != PathBuf::new() {
            self.output_root = cli.output_root;
        }
        if cli.parallelism != 0 {
            self.parallelism = cli.parallelism;
        }
        if cli.preload {
            self.preload = true;
        }
        if !cli.pipeline_args.is_empty() {
            self.pipeline_args = cli.pipeline_args;
        }
        if cli.log_level != default_log_level() {
            self.log_level = cli.log_level;
        }
        self
    }
}
