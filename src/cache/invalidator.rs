use super::fingerprint::fingerprint_context_excluding;
use super::store::BuildCacheState;
use crate::error::CacheError;
use crate::graph::ServiceNode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    NoPriorState,
    Match,
    Forced,
    Mismatch,
    Unverifiable,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionReason::NoPriorState => "no prior build",
            DecisionReason::Match => "context unchanged",
            DecisionReason::Forced => "forced rebuild",
            DecisionReason::Mismatch => "context changed",
            DecisionReason::Unverifiable => "context could not be fingerprinted",
        };
        write!(f, "{}", s)
    }
}

/// Directive handed to the build driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDecision {
    pub use_cache: bool,

    /// Fresh fingerprint to persist after a successful build
    pub fingerprint: Option<String>,

    pub reason: DecisionReason,
}

/// The decision table, separated from fingerprinting so it can be checked directly.
pub fn decide(
    stored: Option<&BuildCacheState>,
    fresh: Result<String, CacheError>,
    force: bool,
) -> CacheDecision {
    let fresh = match fresh {
        Ok(fp) => fp,
        Err(e) => {
            warn!(error = %e, "Cannot verify build cache, building fresh");
            return CacheDecision {
                use_cache: false,
                fingerprint: None,
                reason: DecisionReason::Unverifiable,
            };
        }
    };

    let (use_cache, reason) = match stored {
        None => (false, DecisionReason::NoPriorState),
        Some(state) if state.fingerprint != fresh => (false, DecisionReason::Mismatch),
        Some(_) if force => (false, DecisionReason::Forced),
        Some(_) => (true, DecisionReason::Match),
    };

    CacheDecision {
        use_cache,
        fingerprint: Some(fresh),
        reason,
    }
}

pub struct CacheInvalidator {
    force: bool,
    excluded: Vec<PathBuf>,
}

impl CacheInvalidator {
    pub fn new(force: bool) -> Self {
        Self {
            force,
            excluded: Vec::new(),
        }
    }

    /// Leave `dir` out of every fingerprint when it sits inside a context.
    pub fn excluding(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded.push(dir.into());
        self
    }

    pub fn evaluate(
        &self,
        node: &ServiceNode,
        image: &str,
        stored: Option<&BuildCacheState>,
    ) -> CacheDecision {
        let fresh =
            fingerprint_context_excluding(&node.context, &node.build_args, image, &self.excluded);
        let decision = decide(stored, fresh, self.force);
        debug!(
            service = %node.id,
            use_cache = decision.use_cache,
            reason = %decision.reason,
            "Cache decision"
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use yare::parameterized;

    fn state(fingerprint: &str) -> BuildCacheState {
        BuildCacheState {
            service: "backend".to_string(),
            fingerprint: fingerprint.to_string(),
            last_built_at: Utc::now(),
        }
    }

    #[parameterized(
        absent_not_forced = { None, false, false, DecisionReason::NoPriorState },
        absent_forced = { None, true, false, DecisionReason::NoPriorState },
        match_not_forced = { Some("sha256:aa"), false, true, DecisionReason::Match },
        match_forced = { Some("sha256:aa"), true, false, DecisionReason::Forced },
        mismatch_not_forced = { Some("sha256:bb"), false, false, DecisionReason::Mismatch },
        mismatch_forced = { Some("sha256:bb"), true, false, DecisionReason::Mismatch },
    )]
    fn test_decision_table(
        stored: Option<&str>,
        force: bool,
        expect_cache: bool,
        expect_reason: DecisionReason,
    ) {
        let stored = stored.map(state);
        let decision = decide(stored.as_ref(), Ok("sha256:aa".to_string()), force);
        assert_eq!(decision.use_cache, expect_cache);
        assert_eq!(decision.reason, expect_reason);
        assert_eq!(decision.fingerprint.as_deref(), Some("sha256:aa"));
    }

    #[test]
    fn test_unverifiable_context_never_reuses_cache() {
        let stored = state("sha256:aa");
        let decision = decide(
            Some(&stored),
            Err(CacheError::UnreadableContext {
                path: PathBuf::from("/ctx"),
                message: "permission denied".to_string(),
            }),
            false,
        );
        assert!(!decision.use_cache);
        assert!(decision.fingerprint.is_none());
        assert_eq!(decision.reason, DecisionReason::Unverifiable);
    }

    #[test]
    fn test_evaluate_against_real_context() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM redis:7\n").unwrap();
        let node = ServiceNode::new("cache", dir.path(), &[]);
        let invalidator = CacheInvalidator::new(false);

        let first = invalidator.evaluate(&node, "cache:latest", None);
        assert!(!first.use_cache);

        let mut stored = state(first.fingerprint.as_deref().unwrap());
        stored.service = "cache".to_string();
        let second = invalidator.evaluate(&node, "cache:latest", Some(&stored));
        assert!(second.use_cache);

        fs::write(dir.path().join("Dockerfile"), "FROM redis:7.2\n").unwrap();
        let third = invalidator.evaluate(&node, "cache:latest", Some(&stored));
        assert!(!third.use_cache);
        assert_eq!(third.reason, DecisionReason::Mismatch);
    }

    #[test]
    fn test_state_written_inside_context_keeps_cache_valid() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();
        let state_dir = dir.path().join(".shipyard");
        let node = ServiceNode::new("app", dir.path(), &[]);
        let invalidator = CacheInvalidator::new(false).excluding(&state_dir);

        let first = invalidator.evaluate(&node, "app:latest", None);
        fs::create_dir_all(state_dir.join("cache")).unwrap();
        fs::write(state_dir.join("cache/app.json"), "{}").unwrap();

        let mut stored = state(first.fingerprint.as_deref().unwrap());
        stored.service = "app".to_string();
        let second = invalidator.evaluate(&node, "app:latest", Some(&stored));
        assert!(second.use_cache);
        assert_eq!(second.reason, DecisionReason::Match);
    }
}
