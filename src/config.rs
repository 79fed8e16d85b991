//! Engine configuration.
//!
//! Every empirically tuned constant lives here rather than inline at the call
//! site, so thresholds can be adjusted (or loaded from YAML) without touching
//! the mechanisms that read them.

use serde::Deserialize;

use crate::{Error, Result};

/// Tunable knobs for the resolution/execution/detection/discovery pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum confidence for a suggestion to be executed without
    /// clarification.
    pub min_confidence: f64,

    /// Built-in command matches at or above this confidence are prepended to
    /// the suggestion list regardless of catalog contents.
    pub command_confidence_floor: f64,

    /// Remote rankings above this confidence override the local score for the
    /// same element.
    pub remote_override_threshold: f64,

    /// Upper bound on the remote ranking call. On expiry the resolver keeps
    /// local scores only.
    pub remote_timeout_ms: u64,

    /// Maximum catalog entries sent to the remote ranker.
    pub max_rank_candidates: usize,

    /// Outer retry rounds in the executor cascade.
    pub max_outer_retries: u32,

    /// Primitive attempts allowed per outer round (direct try + selector
    /// variants + text search).
    pub attempts_per_round: u32,

    /// Base delay between outer retries; the delay grows linearly per round.
    pub retry_base_delay_ms: u64,

    /// Wait-for-presence budget for each selector variant.
    pub element_wait_ms: u64,

    /// Poll interval for the change detector.
    pub change_poll_interval_ms: u64,

    /// Change-detection window after a single action.
    pub change_wait_ms: u64,

    /// Change-detection window after a form submission.
    pub submit_change_wait_ms: u64,

    /// Relative markup-length delta that counts as DOM growth/shrinkage.
    pub dom_delta_ratio: f64,

    /// Absolute delta floor so very short pages don't classify on noise.
    pub dom_delta_floor: usize,

    /// Total markup-polling window for the discovery loop.
    pub discovery_window_ms: u64,

    /// Poll interval for the discovery loop.
    pub discovery_interval_ms: u64,

    /// Rolling conversation window, in turns.
    pub context_turns: usize,

    /// Rolling conversation window, in bytes.
    pub context_bytes: usize,

    /// Flat confidence assigned by the empty-instruction default ordering.
    pub default_confidence: f64,

    /// Confidence of the synthetic direct-navigation suggestion for bare
    /// URL-looking instructions.
    pub url_fallback_confidence: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            command_confidence_floor: 0.7,
            remote_override_threshold: 0.3,
            remote_timeout_ms: 800,
            max_rank_candidates: 30,
            max_outer_retries: 3,
            attempts_per_round: 5,
            retry_base_delay_ms: 150,
            element_wait_ms: 500,
            change_poll_interval_ms: 100,
            change_wait_ms: 2000,
            submit_change_wait_ms: 5000,
            dom_delta_ratio: 0.10,
            dom_delta_floor: 512,
            discovery_window_ms: 3000,
            discovery_interval_ms: 250,
            context_turns: 10,
            context_bytes: 4096,
            default_confidence: 0.8,
            url_fallback_confidence: 0.5,
        }
    }
}

impl EngineConfig {
    /// Parse a config from a YAML string. Missing fields take defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants between knobs.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::Config("min_confidence must be in [0, 1]".into()));
        }
        if !(0.0..=1.0).contains(&self.remote_override_threshold) {
            return Err(Error::Config(
                "remote_override_threshold must be in [0, 1]".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.dom_delta_ratio) {
            return Err(Error::Config("dom_delta_ratio must be in [0, 1)".into()));
        }
        if self.max_outer_retries == 0 {
            return Err(Error::Config("max_outer_retries must be at least 1".into()));
        }
        if self.attempts_per_round == 0 {
            return Err(Error::Config("attempts_per_round must be at least 1".into()));
        }
        if self.context_turns == 0 {
            return Err(Error::Config("context_turns must be at least 1".into()));
        }
        Ok(())
    }

    /// Hard ceiling on primitive attempts across the whole cascade.
    pub fn attempt_budget(&self) -> u32 {
        self.max_outer_retries * self.attempts_per_round
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.attempt_budget(), 15);
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = EngineConfig::from_yaml("min_confidence: 0.6\nremote_timeout_ms: 400\n").unwrap();
        assert_eq!(config.min_confidence, 0.6);
        assert_eq!(config.remote_timeout_ms, 400);
        // untouched fields keep defaults
        assert_eq!(config.max_outer_retries, 3);
    }

    #[test]
    fn test_from_yaml_rejects_bad_confidence() {
        let result = EngineConfig::from_yaml("min_confidence: 1.5\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_yaml_rejects_zero_retries() {
        let result = EngineConfig::from_yaml("max_outer_retries: 0\n");
        assert!(result.is_err());
    }
}
