//! `hub`: the external CLI that drives a biomedical data-integration hub.
//! Mirrors the agent daemon's own bootstrap: build a tracing subscriber,
//! hand the parsed arguments to a multi-threaded tokio runtime, and
//! propagate the result as the process exit code.

mod cli;
mod config;
mod context;
mod plugins;

use clap::Parser;

fn main() -> Result<(), anyhow::Error> {
    let args = cli::Cli::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env();
    if args.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let task = runtime.spawn(async move { cli::run(args).await });
    let result = runtime.block_on(task);

    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    match result {
        Ok(inner) => inner,
        Err(join_err) => Err(anyhow::anyhow!(join_err)),
    }
}
