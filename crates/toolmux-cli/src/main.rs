//! CLI entry point.
//!
//! Wiring happens once in `bootstrap`; each command then runs against the
//! resulting `CliContext`.

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use toolmux_cli::error::exit_code_for;
use toolmux_cli::{Cli, CliConfig, Commands, bootstrap, handlers};

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let ctx = bootstrap(CliConfig {
        data_dir: cli.data_dir,
    })
    .await?;

    match command {
        Commands::Servers { command } => handlers::servers::execute(&ctx, command).await,
        Commands::Tools => handlers::tools::execute(&ctx).await,
        Commands::Call { name, args } => handlers::call::execute(&ctx, &name, args.as_deref()).await,
        Commands::Test { id } => handlers::test_connection::execute(&ctx, id).await,
        Commands::Doctor { command } => handlers::doctor::execute(&ctx, &command),
    }
}

#[tokio::main]
async fn main() {
    // Load .env before parsing so clap's `env` fallbacks see it
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:#}");
        std::process::exit(exit_code_for(&err));
    }
}
