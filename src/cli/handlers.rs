//! Command handlers
//!
//! Each handler returns the process exit code. Errors are reported to stderr
//! here; library code below this layer never prints.

use super::commands::{CacheAction, CacheArgs, DeployArgs, PlanArgs, TargetArgs, VerifyArgs};
use super::output::{OutputFormat, OutputFormatter, Plan};
use crate::cache::BuildCacheStore;
use crate::config::{ConfigError, ShipyardConfig};
use crate::error::{ConfigurationError, FailureCategory, VerificationError};
use crate::graph::ServiceGraph;
use crate::manifest::StackManifest;
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::profile::{DeploymentProfile, ProfileOverrides, TargetResolver};
use crate::progress::LoggingHandler;
use crate::verify::{ArtifactRequirement, ArtifactVerifier};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub async fn handle_deploy(args: &DeployArgs) -> i32 {
    finish(run_deploy(args).await)
}

pub async fn handle_plan(args: &PlanArgs) -> i32 {
    finish(run_plan(args))
}

pub async fn handle_verify(args: &VerifyArgs) -> i32 {
    finish(run_verify(args))
}

pub async fn handle_cache(args: &CacheArgs) -> i32 {
    finish(run_cache(args))
}

async fn run_deploy(args: &DeployArgs) -> Result<i32> {
    let config = load_config()?;
    let manifest = load_manifest(args.target.manifest.as_ref(), &config)?;

    let options = RunOptions {
        target: args.target.target.clone(),
        overrides: overrides(&args.target),
        force_rebuild: args.force_rebuild,
        skip_verification: args.skip_verification,
        services: args.target.services.clone(),
        build_only: args.build_only,
        startup_policy: args.startup_policy,
    };

    let orchestrator = Orchestrator::new(config).with_progress(Arc::new(LoggingHandler));
    let cancel = orchestrator.cancellation();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            cancel.cancel();
        }
    });

    let report = orchestrator.run(&manifest, &options).await;
    signal.abort();

    let format: OutputFormat = args.target.format.into();
    println!("{}", OutputFormatter::new(format).format_report(&report)?);

    // Human output already includes the error
    if let (Some(err), false) = (&report.error, format == OutputFormat::Human) {
        eprintln!("Error: {}", err);
    }
    Ok(report.exit_code())
}

fn run_plan(args: &PlanArgs) -> Result<i32> {
    let config = load_config()?;
    let manifest = load_manifest(args.target.manifest.as_ref(), &config)?;
    let (profile, graph) = resolve(&manifest, &args.target)?;

    let formatter = OutputFormatter::new(args.target.format.into());
    println!("{}", formatter.format_plan(&Plan::new(&profile, &graph))?);
    Ok(0)
}

fn run_verify(args: &VerifyArgs) -> Result<i32> {
    let config = load_config()?;
    let manifest = load_manifest(args.target.manifest.as_ref(), &config)?;
    let (profile, graph) = resolve(&manifest, &args.target)?;

    let requirements = ArtifactRequirement::collect(&manifest, &profile, &graph);
    let report = ArtifactVerifier::new(requirements).verify();

    let formatter = OutputFormatter::new(args.target.format.into());
    println!("{}", formatter.format_verification(&report.results)?);

    match report.into_error() {
        Some(err) => Err(err.into()),
        None => {
            info!("All required artifacts present");
            Ok(0)
        }
    }
}

fn run_cache(args: &CacheArgs) -> Result<i32> {
    let config = load_config()?;
    let manifest = load_manifest(args.manifest.as_ref(), &config)?;
    let store = BuildCacheStore::new(config.cache_dir(&manifest.root));
    let format: OutputFormat = args.format.into();

    match &args.action {
        CacheAction::List => {
            let states = store
                .list()
                .with_context(|| format!("Failed to read {}", store.dir().display()))?;
            println!("{}", OutputFormatter::new(format).format_cache(&states)?);
        }
        CacheAction::Clear { services } if services.is_empty() => {
            let removed = store.clear()?;
            info!(removed, dir = %store.dir().display(), "Cleared build cache state");
        }
        CacheAction::Clear { services } => {
            for service in services {
                if store.remove(service)? {
                    info!(service = %service, "Cleared build cache state");
                } else {
                    warn!(service = %service, "No build cache state recorded");
                }
            }
        }
    }
    Ok(0)
}

fn load_config() -> Result<ShipyardConfig> {
    let config = ShipyardConfig::default();
    config.validate()?;
    debug!("{}", config);
    Ok(config)
}

fn load_manifest(path: Option<&PathBuf>, config: &ShipyardConfig) -> Result<StackManifest> {
    let path = path.unwrap_or(&config.manifest);
    Ok(StackManifest::load(path)?)
}

fn overrides(args: &TargetArgs) -> ProfileOverrides {
    ProfileOverrides {
        registry: args.registry.clone(),
        env: args.env.iter().cloned().collect(),
        inherit_process_env: true,
    }
}

fn resolve(
    manifest: &StackManifest,
    args: &TargetArgs,
) -> Result<(DeploymentProfile, ServiceGraph), ConfigurationError> {
    let profile = TargetResolver::new(manifest).resolve(&args.target, &overrides(args))?;
    let graph = manifest.service_graph()?;
    let graph = if args.services.is_empty() {
        graph
    } else {
        graph.closure(&args.services)?
    };
    Ok((profile, graph))
}

fn finish(result: Result<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            let code = exit_code_for(&e);
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            code
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigurationError>().is_some()
        || err.downcast_ref::<ConfigError>().is_some()
    {
        FailureCategory::Configuration.exit_code()
    } else if err.downcast_ref::<VerificationError>().is_some() {
        FailureCategory::Verification.exit_code()
    } else {
        FailureCategory::Internal.exit_code()
    }
}
