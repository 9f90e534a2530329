//! Hound - scriptable client for the Hound media server
//!
//! # Usage
//!
//! ```bash
//! hound continue
//! hound next tv tmdb-1399 --season 1
//! hound play tv tmdb-1399
//! hound streams movie tmdb-603 --json
//! ```

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hound_client::cli::{Cli, Command, ExitCode, Output};
use hound_client::commands::{self, Context};

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let output = Output::new(&cli);
            return output
                .error(format!("Failed to start runtime: {}", e), ExitCode::Error)
                .into();
        }
    };

    runtime.block_on(run_cli(cli)).into()
}

/// Logs go to stderr so JSON on stdout stays parseable
fn init_logging(verbose: bool) {
    let default = if verbose {
        "hound_client=debug"
    } else {
        "hound_client=warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

/// Run CLI command and return exit code
async fn run_cli(cli: Cli) -> ExitCode {
    let output = Output::new(&cli);
    let ctx = Context::load(cli.config.as_deref());

    let code = match cli.command {
        Command::Info(cmd) => commands::info_cmd(cmd, &ctx, &output).await,
        Command::Streams(cmd) => commands::streams_cmd(cmd, &ctx, &output).await,
        Command::Play(cmd) => commands::play_cmd(cmd, &ctx, &output).await,
        Command::Progress(cmd) => commands::progress_cmd(cmd, &ctx, &output).await,
        Command::Watched(cmd) => commands::watched_cmd(cmd, &ctx, &output).await,
        Command::Next(cmd) => commands::next_cmd(cmd, &ctx, &output).await,
        Command::History(cmd) => commands::history_cmd(cmd, &ctx, &output).await,
        Command::Rewatch(cmd) => commands::rewatch_cmd(cmd, &ctx, &output).await,
        Command::Continue(cmd) => commands::continue_cmd(cmd, &ctx, &output).await,
        Command::Forget(cmd) => commands::forget_cmd(cmd, &ctx, &output).await,
        Command::Unwatch(cmd) => commands::unwatch_cmd(cmd, &ctx, &output).await,
    };

    if ctx.session.is_expired() {
        output.info("Session expired. The cached session was cleared; log in again.");
    }
    code
}
