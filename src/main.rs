mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "promptlab=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    cli::dispatch(cli).await
}
