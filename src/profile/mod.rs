//! Target resolution: turns a target name into an immutable deployment profile

pub mod resolver;
pub mod target;

pub use resolver::{DeploymentProfile, ProfileOverrides, TargetResolver};
pub use target::{LaunchMode, Target};
