//! Main entry point for the simfetch CLI app

use simfetch::FetchError;
use simfetch::cli::{self, Commands, FetchOpts};
use simfetch::normalize::{self, Bundle};
use simfetch::receiver::ReceiverConfig;
use simfetch::remote::ControlClient;
use simfetch::session::{self, upload_target};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    if let Err(e) = run_app().await {
        if e.downcast_ref::<clap::Error>().is_none() {
            eprintln!("Error: {}", e);
        }
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn run_app() -> Result<(), Box<dyn std::error::Error>> {
    let command = cli::run()?;

    match &command {
        Commands::Results { id, output, fetch } => {
            let archive = fetch_bundle(Action::Results, id, output, fetch).await?;
            post_process(&archive, fetch)?;
        }
        Commands::Diagnostics { id, output, fetch } => {
            let archive = fetch_bundle(Action::Diagnostics, id, output, fetch).await?;
            post_process(&archive, fetch)?;
        }
        Commands::Inspect {
            archive,
            output,
            force,
            verbose,
            mode,
        } => {
            normalize::normalize_bundle(archive, output, *mode, *force, *verbose)?;
        }
    }

    Ok(())
}

enum Action {
    Results,
    Diagnostics,
}

async fn fetch_bundle(
    action: Action,
    id: &str,
    output: &Path,
    opts: &FetchOpts,
) -> Result<PathBuf, FetchError> {
    let remote = ControlClient::new(opts.control.clone());
    let config = ReceiverConfig { port: opts.port };
    let target = upload_target(&opts.callback_host, opts.port);

    let received = match action {
        Action::Results => session::fetch_results(&remote, config, id, &target, output).await?,
        Action::Diagnostics => {
            session::fetch_diagnostics(&remote, config, id, &target, output).await?
        }
    };

    match received {
        Some(path) => {
            println!("received {}", path.display());
            Ok(path)
        }
        None => Err(FetchError::Transfer(format!(
            "no bundle received for simulation {id}"
        ))),
    }
}

fn post_process(archive: &Path, opts: &FetchOpts) -> Result<(), FetchError> {
    if let Some(dir) = &opts.inspect {
        normalize::normalize_bundle(archive, dir, opts.mode, opts.force, opts.verbose)?;
    } else if let Some(dir) = &opts.unpack {
        Bundle::open(archive)?.unpack_plain(dir)?;
    }
    Ok(())
}
