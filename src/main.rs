use shipyard::cli::commands::{CliArgs, Commands};
use shipyard::cli::handlers::{handle_cache, handle_deploy, handle_plan, handle_verify};
use shipyard::util::{init_logging, resolve_level, LoggingConfig};
use shipyard::VERSION;

use clap::Parser;
use std::env;
use tracing::debug;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let fallback = env::var("SHIPYARD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let level = resolve_level(args.log_level.as_deref(), args.verbose, args.quiet, &fallback);
    init_logging(LoggingConfig::from_env(level));

    debug!("shipyard v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Deploy(deploy_args) => handle_deploy(deploy_args).await,
        Commands::Plan(plan_args) => handle_plan(plan_args).await,
        Commands::Verify(verify_args) => handle_verify(verify_args).await,
        Commands::Cache(cache_args) => handle_cache(cache_args).await,
    };

    std::process::exit(exit_code);
}
