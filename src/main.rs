use anyhow::{Context, Result};
use pa_aqi_pipeline::{export, Config, Pipeline, RunRequest};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// A job file: config keys at the top level plus a `run` section.
#[derive(Debug, Deserialize)]
struct Job {
    #[serde(flatten)]
    config: Config,
    run: RunRequest,
}

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,pa_aqi_pipeline=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

fn load_job(path: &Path) -> Result<Job> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading job file {}", path.display()))?;
    let mut job: Job = serde_json::from_str(&text)
        .with_context(|| format!("parsing job file {}", path.display()))?;
    job.config.apply_env();
    Ok(job)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: pa-aqi <job.json>")?;
    let job = load_job(&path)?;

    let pipeline = Pipeline::from_config(&job.config).context("building pipeline")?;
    let output = pipeline.run(&job.run).await.context("pipeline run failed")?;

    let data_dir = job.config.data_dir();
    for (channel, readings) in &output.results {
        let name = export::file_name(&job.run.label, job.run.start, job.run.end, *channel);
        export::write_readings(data_dir.join(name), readings)?;
    }

    info!(
        "Done: {} reading(s) across {} channel(s)",
        output.report.readings(),
        output.results.len()
    );
    Ok(())
}
