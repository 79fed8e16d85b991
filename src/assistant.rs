//! AI collaborator seam.
//!
//! Every call here is optional: each engine component has defined behavior
//! when the assistant is absent or errors. Implementations talk to whatever
//! backend they like; the engine only sees these four operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::catalog::NavigableElement;
use crate::context::ConversationContext;
use crate::executor::Strategy;
use crate::Result;

/// How urgently a discovered action should be exercised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// An actionable thing the page analysis found.
///
/// Identity for de-duplication is `(selector, interaction_verb)`; two actions
/// with the same identity are the same action even if the wording differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredAction {
    /// Human-readable description ("click the Sign In button").
    pub description: String,
    /// Driver-addressable selector.
    pub selector: String,
    /// Interaction verb ("click", "type", "submit", ...).
    pub interaction_verb: String,
    #[serde(default)]
    pub priority: Priority,
    /// Whether a previous session already exercised this action.
    #[serde(default)]
    pub already_tested: bool,
    /// Optional executable snippet generated for this action.
    #[serde(default)]
    pub script: Option<String>,
    /// Free-text instruction that produced this action, if any.
    #[serde(default)]
    pub origin_instruction: Option<String>,
}

impl DiscoveredAction {
    /// De-duplication identity.
    pub fn identity(&self) -> (String, String) {
        (self.selector.clone(), self.interaction_verb.clone())
    }
}

/// One remote-ranked catalog candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedElement {
    pub text: String,
    pub selector: String,
    pub confidence: f64,
    #[serde(default)]
    pub strategy: Strategy,
}

/// Structured interpretation of a free-text instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpretedCommand {
    /// Verb class ("click", "navigate", "type", ...).
    pub command_type: String,
    /// Verb arguments ("target", "url", "text", ...).
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    pub confidence: f64,
    /// Follow-up phrasings the backend suggests offering to the user.
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Remote analysis operations consumed by the engine.
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Interpret an instruction against the currently known actions.
    async fn interpret_command(
        &self,
        text: &str,
        known_actions: &[DiscoveredAction],
        context: Option<&ConversationContext>,
    ) -> Result<InterpretedCommand>;

    /// Rank catalog candidates for an instruction, recommending a click
    /// strategy per candidate.
    async fn rank_elements(
        &self,
        text: &str,
        candidates: &[NavigableElement],
    ) -> Result<Vec<RankedElement>>;

    /// Analyze a full page snapshot into a list of actions.
    async fn analyze_initial_markup(&self, html: &str) -> Result<Vec<DiscoveredAction>>;

    /// Analyze newly added markup, given the actions already known.
    async fn analyze_incremental_markup(
        &self,
        delta: &str,
        known_actions: &[DiscoveredAction],
    ) -> Result<Vec<DiscoveredAction>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_wording() {
        let a = DiscoveredAction {
            description: "click the login button".into(),
            selector: "#login".into(),
            interaction_verb: "click".into(),
            priority: Priority::High,
            already_tested: false,
            script: None,
            origin_instruction: None,
        };
        let b = DiscoveredAction {
            description: "press Login".into(),
            ..a.clone()
        };
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_discovered_action_deserialize_defaults() {
        let json = r##"{"description":"d","selector":"#x","interaction_verb":"click"}"##;
        let action: DiscoveredAction = serde_json::from_str(json).unwrap();
        assert_eq!(action.priority, Priority::Medium);
        assert!(!action.already_tested);
        assert!(action.script.is_none());
    }

    #[test]
    fn test_priority_wire_format() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
        let p: Priority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(p, Priority::Low);
    }
}
