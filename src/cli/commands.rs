use crate::orchestrator::StartupPolicy;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Target-aware deployment orchestrator for multi-service stacks
#[derive(Parser, Debug)]
#[command(
    name = "shipyard",
    about = "Target-aware deployment orchestrator for multi-service stacks",
    version,
    author,
    long_about = "shipyard verifies required build artifacts, invalidates build caches when \
                  contexts change, builds service images in dependency order, then starts \
                  services and polls them for readiness. Targets: local, docker-dev, \
                  docker-prod, kubernetes, cloud-vm."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(
        short = 'v',
        long,
        global = true,
        action = ArgAction::Count,
        help = "Increase verbosity (can be used multiple times)"
    )]
    pub verbose: u8,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Build, start and health-check the stack on a target",
        long_about = "Runs the full pipeline: resolve the target profile, verify required \
                      artifacts, decide cache reuse, build in dependency order, start services \
                      and poll them until ready.\n\n\
                      Examples:\n  \
                      shipyard deploy docker-dev\n  \
                      shipyard deploy docker-prod --registry registry.example.com/stack\n  \
                      shipyard deploy kubernetes --force-rebuild --env LOG_LEVEL=debug\n  \
                      shipyard deploy local --service backend --format json"
    )]
    Deploy(DeployArgs),

    #[command(
        about = "Show the resolved profile and build order without side effects",
        long_about = "Resolves the target and the service graph and prints the registry, \
                      image references, variables and build order. Nothing is built or started.\n\n\
                      Examples:\n  \
                      shipyard plan docker-prod\n  \
                      shipyard plan kubernetes --format yaml"
    )]
    Plan(PlanArgs),

    #[command(
        about = "Check required artifacts for a target",
        long_about = "Runs only artifact verification, deriving copyable artifacts when their \
                      source exists.\n\n\
                      Examples:\n  \
                      shipyard verify docker-dev"
    )]
    Verify(VerifyArgs),

    #[command(
        about = "Inspect or drop persisted build cache state",
        long_about = "Lists the fingerprint recorded for each service's last successful build, \
                      or clears records so the next deploy rebuilds without layer cache.\n\n\
                      Examples:\n  \
                      shipyard cache list\n  \
                      shipyard cache clear\n  \
                      shipyard cache clear frontend backend"
    )]
    Cache(CacheArgs),
}

/// Target selection shared by every command that resolves a profile
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    #[arg(value_name = "TARGET", help = "local, docker-dev, docker-prod, kubernetes or cloud-vm")]
    pub target: String,

    #[arg(
        short = 'm',
        long,
        value_name = "PATH",
        help = "Stack manifest (defaults to SHIPYARD_MANIFEST or ./shipyard.yaml)"
    )]
    pub manifest: Option<PathBuf>,

    #[arg(
        short = 's',
        long = "service",
        value_name = "NAME",
        help = "Limit to a service and its dependencies (repeatable)"
    )]
    pub services: Vec<String>,

    #[arg(
        short = 'e',
        long = "env",
        value_name = "KEY=VALUE",
        value_parser = parse_key_value,
        help = "Override a target variable (repeatable)"
    )]
    pub env: Vec<(String, String)>,

    #[arg(long, value_name = "URL", help = "Override the target's registry endpoint")]
    pub registry: Option<String>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(long, help = "Discard build caches even when contexts are unchanged")]
    pub force_rebuild: bool,

    #[arg(long, help = "Skip artifact verification (builds may fail later)")]
    pub skip_verification: bool,

    #[arg(long, help = "Stop after building; do not start services")]
    pub build_only: bool,

    #[arg(
        long,
        value_enum,
        default_value = "started",
        help = "Start services once dependencies are started, or only once they are healthy"
    )]
    pub startup_policy: StartupPolicy,
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,

    #[arg(
        short = 'm',
        long,
        global = true,
        value_name = "PATH",
        help = "Stack manifest whose state directory is used"
    )]
    pub manifest: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        global = true,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// List recorded build cache state
    List,

    /// Drop records for the named services, or all when none are named
    Clear {
        #[arg(value_name = "SERVICE")]
        services: Vec<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid variable '{}'. Expected KEY=VALUE", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Invalid variable '{}'. Name cannot be empty", s));
    }
    Ok((key.to_string(), value.to_string()))
}
