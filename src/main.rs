use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use toolrecall::{AppState, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting toolrecall evaluation");

    // Load configuration
    let config = Config::from_env()?;
    let report_path = config.report_path.clone();
    let metrics_path = config.metrics_path.clone();

    // Recorder only, no HTTP listener; the snapshot is written after the run
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    // Load catalog, queries, tokenizer and the optional scorer
    let start = std::time::Instant::now();
    let state = AppState::new(config).context("failed to initialize evaluation state")?;
    tracing::info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "State initialized",
    );

    let evaluator = state.evaluator()?;
    let report = evaluator
        .run(state.queries.clone())
        .await
        .context("evaluation failed")?;

    println!("{}", report);

    if let Some(path) = report_path {
        report
            .write_json(&path)
            .with_context(|| format!("failed to write report to '{}'", path.display()))?;
    }

    if let Some(path) = metrics_path {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
        std::fs::write(&path, prometheus_handle.render())
            .with_context(|| format!("failed to write metrics to '{}'", path.display()))?;
        tracing::info!(path = %path.display(), "Metrics snapshot written");
    }

    tracing::info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Evaluation run complete"
    );
    Ok(())
}

/// `LOG_FORMAT=json` switches to structured JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "toolrecall=info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
