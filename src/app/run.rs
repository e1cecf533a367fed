use crate::app::report;
use crate::cli::app_config::Cli;
use clap::Parser;
use httptime::measure;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub async fn main_with_error() -> Result<ExitCode, anyhow::Error> {
    let cli: Cli = Cli::parse();

    do_request(cli).await
}

fn init_logging(verbosity: u8) -> Result<(), anyhow::Error> {
    let log_level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy()
        .add_directive("hyper_util=off".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .without_time()
        .with_level(true)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

async fn do_request(cli: Cli) -> Result<ExitCode, anyhow::Error> {
    init_logging(cli.verbosity)?;

    let descriptor = cli.descriptor();
    let measurement = measure(descriptor, cli.run_options()).await?;
    let write_failed = measurement
        .results()
        .iter()
        .any(|result| result.output_write_failed);

    if cli.average {
        let averaged = measurement.average()?;
        report::print_result(&averaged, cli.json)?;
    } else {
        report::print_measurement(&measurement, cli.json)?;
    }

    if write_failed {
        warn!("Measurement finished, but the output file could not be written");
        return Ok(ExitCode::from(23));
    }
    Ok(ExitCode::SUCCESS)
}
