//! Demo runner entry point.
//!
//! Prints the serialized run on stdout, then the rendered metrics. Exits
//! non-zero when the run does not end `done`.

use std::process::ExitCode;

use runner::{Config, LogFormat, RunnerError};
use saga::RunError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    // 2. Initialize tracing
    init_tracing(&config);

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Run the workflow
    let (run, code) = match runner::execute(&config).await {
        Ok(run) => {
            let code = if run.is_done() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            };
            (run, code)
        }
        Err(RunnerError::Run(RunError::Failed(run))) => (*run, ExitCode::FAILURE),
        Err(e) => {
            tracing::error!(error = %e, "workflow did not run");
            return ExitCode::from(2);
        }
    };
    tracing::info!(
        flow_id = %run.transaction().id(),
        state = %run.state(),
        errors = run.errors().len(),
        "workflow finished"
    );

    // 5. Report
    match serde_json::to_string_pretty(&run) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize run");
            return ExitCode::from(2);
        }
    }
    println!("{}", metrics_handle.render());

    code
}
