use anyhow::Result;
use clap::Parser;
use extraction_router::cli;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli::run(args).await {
        Ok(true) => Ok(()),
        // At least one stage did not answer 200.
        Ok(false) => std::process::exit(1),
        Err(e) => Err(e),
    }
}
