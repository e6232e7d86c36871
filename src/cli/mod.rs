pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{CacheAction, CacheArgs, CliArgs, Commands, DeployArgs, PlanArgs, VerifyArgs};
pub use handlers::{handle_cache, handle_deploy, handle_plan, handle_verify};
pub use output::{OutputFormat, OutputFormatter, Plan};
