//! Conversion of CLI arguments into library configuration

use crate::cache::ModelCache;
use crate::cli::main_impl::Cli;
use crate::download::{is_model_url, RepositoryCredentials};
use crate::{
    config::RemovalConfig,
    models::ModelSpec,
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Suffix appended to the input stem when no output path is given
const DEFAULT_OUTPUT_SUFFIX: &str = "_no_bg";

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build a `RemovalConfig` from CLI arguments
    pub(crate) fn from_cli(cli: &Cli) -> Result<RemovalConfig> {
        let (backend_type, execution_provider) =
            ExecutionProviderManager::parse_provider_string(&cli.execution_provider)
                .context("Invalid execution provider format")?;

        RemovalConfig::builder()
            .backend_type(backend_type)
            .execution_provider(execution_provider)
            .max_dimension(cli.max_dimension)
            .intra_threads(cli.threads)
            .model_spec(Self::model_spec(cli.model.as_deref()))
            .build()
            .context("Invalid configuration")
    }

    /// Interpret `--model` as a URL, a local path or a cached model id
    ///
    /// Without `--model` the first cached model is used.
    pub(crate) fn model_spec(model_arg: Option<&str>) -> ModelSpec {
        match model_arg {
            None => ModelSpec::default(),
            Some(url) if is_model_url(url) => ModelSpec::downloaded(ModelCache::url_to_model_id(url)),
            Some(path) if Path::new(path).exists() => ModelSpec::external(path),
            Some(model_id) => ModelSpec::downloaded(model_id),
        }
    }

    /// Credentials from `--token`, attached only to model downloads
    pub(crate) fn credentials(cli: &Cli) -> Option<RepositoryCredentials> {
        cli.token
            .as_deref()
            .filter(|token| !token.is_empty())
            .map(RepositoryCredentials::bearer)
    }

    /// Open the model cache, honouring `--cache-dir`
    pub(crate) fn cache(cli: &Cli) -> Result<ModelCache> {
        match &cli.cache_dir {
            Some(dir) => ModelCache::with_dir(dir)
                .with_context(|| format!("Failed to open cache directory {}", dir.display())),
            None => ModelCache::new().context("Failed to open model cache"),
        }
    }

    /// Where the PNG goes: `--output`, or `<input stem>_no_bg.png` next to the input
    pub(crate) fn output_path(input: &str, output: Option<&str>) -> Option<PathBuf> {
        match output {
            Some("-") => None,
            Some(path) => Some(PathBuf::from(path)),
            None if input == "-" => None,
            None => {
                let input_path = Path::new(input);
                let stem = input_path
                    .file_stem()
                    .map_or_else(|| "output".into(), |s| s.to_string_lossy());
                Some(input_path.with_file_name(format!("{stem}{DEFAULT_OUTPUT_SUFFIX}.png")))
            },
        }
    }
}
