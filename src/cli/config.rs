//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, Command};
use crate::{
    config::{ExecutionProvider, PipelineConfig},
    error::SegmentationError,
    inference::BackendType,
};
use anyhow::{Context, Result};

/// Convert CLI arguments to a [`PipelineConfig`]
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Start from `--config` (or defaults), apply environment overrides, then
    /// command-line flags, which win over both.
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let mut config = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => PipelineConfig::default(),
        }
        .with_env_overrides();

        if let Some(provider) = &cli.execution_provider {
            let (backend, execution_provider) =
                parse_provider_string(provider).context("Invalid execution provider format")?;
            config.backend = backend;
            config.execution_provider = execution_provider;
        }
        if let Some(threads) = cli.threads {
            config.intra_threads = threads;
        }
        if let Some(cache_dir) = &cli.cache_dir {
            config.weights.cache_dir = Some(cache_dir.clone());
        }
        if let Some(ffmpeg) = &cli.ffmpeg {
            config.tools.ffmpeg_path = ffmpeg.clone();
        }
        if let Some(ffprobe) = &cli.ffprobe {
            config.tools.ffprobe_path = ffprobe.clone();
        }
        if let Some(timeout) = cli.tool_timeout {
            config.tools.timeout_secs = timeout;
        }
        if let Command::Segment { job, .. } | Command::AutoRemove { job } = &cli.command {
            if job.keep_work_dir {
                config.retain_workdir_on_failure = true;
            }
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// Parse `backend:provider` strings such as `onnx:auto` or `tract:cpu`.
/// A bare backend name picks that backend's default provider.
pub(crate) fn parse_provider_string(
    provider_str: &str,
) -> std::result::Result<(BackendType, ExecutionProvider), SegmentationError> {
    let Some((backend, provider)) = provider_str.split_once(':') else {
        return match provider_str {
            "onnx" => Ok((BackendType::Onnx, ExecutionProvider::Auto)),
            "tract" => Ok((BackendType::Tract, ExecutionProvider::Cpu)),
            _ => Err(SegmentationError::invalid_config(
                "Invalid provider format. Use backend:provider (e.g., onnx:auto, tract:cpu)",
            )),
        };
    };

    match backend {
        "onnx" => {
            let execution_provider = match provider {
                "auto" => ExecutionProvider::Auto,
                "cpu" => ExecutionProvider::Cpu,
                "cuda" => ExecutionProvider::Cuda,
                "coreml" => ExecutionProvider::CoreMl,
                _ => {
                    return Err(SegmentationError::invalid_config(format!(
                        "Unknown ONNX provider: {provider}. Supported: auto, cpu, cuda, coreml"
                    )))
                },
            };
            Ok((BackendType::Onnx, execution_provider))
        },
        "tract" if provider == "cpu" => Ok((BackendType::Tract, ExecutionProvider::Cpu)),
        "tract" => Err(SegmentationError::invalid_config(format!(
            "Unknown Tract provider: {provider}. Tract only supports 'cpu'"
        ))),
        _ => Err(SegmentationError::invalid_config(format!(
            "Unknown backend: {backend}. Supported backends: onnx, tract"
        ))),
    }
}
