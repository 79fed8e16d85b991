//! Instruction resolution.
//!
//! Maps a free-text instruction to a ranked list of suggestions over the
//! current catalog. Scoring is local and deterministic; when an assistant is
//! configured, a bounded remote ranking call may override local scores and
//! recommend execution strategies. Remote failure never fails resolution.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::assistant::{Assistant, RankedElement};
use crate::catalog::{Catalog, NavigableElement};
use crate::config::EngineConfig;
use crate::context::ConversationContext;
use crate::executor::Strategy;

/// A verb the engine can run without any catalog element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinCommand {
    Back,
    Refresh,
    Home,
    GoTo(String),
    Click(String),
    Type { text: String, field: String },
}

impl std::fmt::Display for BuiltinCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuiltinCommand::Back => f.write_str("go back"),
            BuiltinCommand::Refresh => f.write_str("refresh"),
            BuiltinCommand::Home => f.write_str("go to home"),
            BuiltinCommand::GoTo(t) => write!(f, "go to {}", t),
            BuiltinCommand::Click(t) => write!(f, "click {}", t),
            BuiltinCommand::Type { text, field } => write!(f, "type \"{}\" in {}", text, field),
        }
    }
}

/// What a suggestion points at.
#[derive(Debug, Clone)]
pub enum SuggestionTarget {
    /// A snapshot of the catalog entry. The catalog is rebuilt wholesale and
    /// never mutated, so a clone is as fresh as the snapshot it came from.
    Element(NavigableElement),
    Command(BuiltinCommand),
}

/// A scored candidate for executing an instruction.
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub target: SuggestionTarget,
    pub confidence: f64,
    pub strategy: Strategy,
}

impl Suggestion {
    pub fn element(el: NavigableElement, confidence: f64) -> Self {
        Self {
            target: SuggestionTarget::Element(el),
            confidence,
            strategy: Strategy::Standard,
        }
    }

    pub fn command(cmd: BuiltinCommand, confidence: f64) -> Self {
        Self {
            target: SuggestionTarget::Command(cmd),
            confidence,
            strategy: Strategy::Standard,
        }
    }

    /// Short description for logs and clarification prompts.
    pub fn describe(&self) -> String {
        match &self.target {
            SuggestionTarget::Element(el) => el.to_string(),
            SuggestionTarget::Command(cmd) => cmd.to_string(),
        }
    }
}

/// Score an instruction against an element label.
///
/// The tiers are strictly ordered: exact (1.0) > prefix (0.9) > substring
/// (0.6..<0.8, blending position and relative length) > word overlap
/// (0.3..=0.6) > character overlap (<=0.2, typo tolerance). Zero means no
/// match.
pub fn score_match(instruction: &str, label: &str) -> f64 {
    let instr = instruction.trim().to_lowercase();
    let label = label.trim().to_lowercase();
    if instr.is_empty() || label.is_empty() {
        return 0.0;
    }
    if label == instr {
        return 1.0;
    }
    if label.starts_with(&instr) || instr.starts_with(&label) {
        return 0.9;
    }

    // Substring, either direction: earlier position and a longer needle
    // relative to the haystack both score higher, capped below 0.8.
    let (hay, needle) = if label.contains(&instr) {
        (&label, &instr)
    } else if instr.contains(&label) {
        (&instr, &label)
    } else {
        return score_word_overlap(&instr, &label);
    };
    if let Some(pos) = hay.find(needle.as_str()) {
        let pos_factor = 1.0 - pos as f64 / hay.len() as f64;
        let len_ratio = needle.len() as f64 / hay.len() as f64;
        let blend = 0.5 * pos_factor + 0.5 * len_ratio;
        return (0.6 + 0.19 * blend).min(0.799);
    }
    score_word_overlap(&instr, &label)
}

fn score_word_overlap(instr: &str, label: &str) -> f64 {
    let instr_words: Vec<&str> = instr.split_whitespace().collect();
    let label_words: Vec<&str> = label.split_whitespace().collect();
    if instr_words.is_empty() || label_words.is_empty() {
        return 0.0;
    }
    let matched = instr_words
        .iter()
        .filter(|w| {
            label_words
                .iter()
                .any(|lw| lw.starts_with(**w) || lw.contains(**w))
        })
        .count();
    if matched > 0 {
        let fraction = matched as f64 / instr_words.len() as f64;
        return 0.3 + 0.3 * fraction;
    }
    score_char_overlap(instr, label)
}

/// Typo tolerance of last resort: at least half the instruction's characters
/// must appear in the label.
fn score_char_overlap(instr: &str, label: &str) -> f64 {
    let chars: Vec<char> = instr.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.is_empty() {
        return 0.0;
    }
    let matched = chars.iter().filter(|c| label.contains(**c)).count();
    if matched * 2 >= chars.len() {
        (matched as f64 / chars.len() as f64) * 0.2
    } else {
        0.0
    }
}

/// Match built-in verbs. Returns the command plus a confidence.
pub fn match_builtin(instruction: &str) -> Option<(BuiltinCommand, f64)> {
    let instr = instruction.trim().to_lowercase();
    match instr.as_str() {
        "go back" | "back" => return Some((BuiltinCommand::Back, 1.0)),
        "refresh" | "reload" | "refresh the page" => return Some((BuiltinCommand::Refresh, 1.0)),
        "go home" | "go to home" | "home" => return Some((BuiltinCommand::Home, 1.0)),
        _ => {}
    }
    for prefix in ["go to ", "navigate to ", "open "] {
        if let Some(rest) = instr.strip_prefix(prefix) {
            let rest = rest.trim();
            if rest == "home" {
                return Some((BuiltinCommand::Home, 1.0));
            }
            if !rest.is_empty() {
                return Some((BuiltinCommand::GoTo(rest.to_string()), 0.9));
            }
        }
    }
    if let Some(rest) = instr.strip_prefix("click ") {
        let rest = rest
            .trim()
            .trim_start_matches("on ")
            .trim_start_matches("the ")
            .trim();
        if !rest.is_empty() {
            return Some((BuiltinCommand::Click(rest.to_string()), 0.8));
        }
    }
    if let Some(rest) = instr.strip_prefix("type ") {
        if let Some(cmd) = parse_type_command(rest) {
            return Some((cmd, 0.8));
        }
    }
    None
}

/// Parse `"<text>" in <field>` or `<text> in <field>`.
fn parse_type_command(rest: &str) -> Option<BuiltinCommand> {
    let rest = rest.trim();
    let (text, remainder) = if let Some(stripped) = rest.strip_prefix('"') {
        let end = stripped.find('"')?;
        (&stripped[..end], stripped[end + 1..].trim())
    } else {
        let split = rest.find(" in ")?;
        (&rest[..split], &rest[split..])
    };
    let field = remainder
        .strip_prefix("in ")
        .or_else(|| remainder.strip_prefix(" in "))
        .or_else(|| remainder.trim_start().strip_prefix("in "))?
        .trim_start_matches("the ")
        .trim();
    if text.is_empty() || field.is_empty() {
        return None;
    }
    Some(BuiltinCommand::Type {
        text: text.to_string(),
        field: field.to_string(),
    })
}

/// Recognize instructions that are really just a URL.
pub fn normalize_url_like(instruction: &str) -> Option<String> {
    let instr = instruction.trim();
    if instr.is_empty() || instr.contains(char::is_whitespace) {
        return None;
    }
    if instr.starts_with("http://") || instr.starts_with("https://") {
        return Some(instr.to_string());
    }
    if instr.contains('.') && !instr.ends_with('.') {
        return Some(format!("https://{}", instr));
    }
    None
}

/// Maps instructions to ranked suggestion lists.
pub struct Resolver {
    config: EngineConfig,
    assistant: Option<Arc<dyn Assistant>>,
}

impl Resolver {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            assistant: None,
        }
    }

    pub fn with_assistant(mut self, assistant: Arc<dyn Assistant>) -> Self {
        self.assistant = Some(assistant);
        self
    }

    /// Resolve an instruction, consulting the remote ranker when configured.
    /// Never fails: remote errors and timeouts degrade to local scores.
    pub async fn resolve(
        &self,
        instruction: &str,
        catalog: &Catalog,
        _context: Option<&ConversationContext>,
    ) -> Vec<Suggestion> {
        let instr = instruction.trim();
        if instr.is_empty() {
            return self.default_ordering(catalog);
        }
        let mut elements = self.scored_elements(instr, catalog);

        if let Some(ref assistant) = self.assistant {
            let candidates: Vec<NavigableElement> = catalog
                .elements()
                .iter()
                .take(self.config.max_rank_candidates)
                .cloned()
                .collect();
            let budget = Duration::from_millis(self.config.remote_timeout_ms);
            match timeout(budget, assistant.rank_elements(instr, &candidates)).await {
                Ok(Ok(ranked)) => {
                    debug!(count = ranked.len(), "merging remote ranking");
                    self.merge_remote(&mut elements, &ranked, catalog);
                }
                Ok(Err(e)) => warn!(error = %e, "remote ranking failed, keeping local scores"),
                Err(_) => warn!("remote ranking timed out, keeping local scores"),
            }
        }

        self.finish(instr, elements)
    }

    /// Local-only resolution. Deterministic for a fixed catalog.
    pub fn resolve_local(&self, instruction: &str, catalog: &Catalog) -> Vec<Suggestion> {
        let instr = instruction.trim();
        if instr.is_empty() {
            return self.default_ordering(catalog);
        }
        let elements = self.scored_elements(instr, catalog);
        self.finish(instr, elements)
    }

    fn scored_elements(&self, instr: &str, catalog: &Catalog) -> Vec<Suggestion> {
        catalog
            .elements()
            .iter()
            .filter_map(|el| {
                let score = score_match(instr, &el.label);
                if score > 0.0 {
                    Some(Suggestion::element(el.clone(), score))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Remote entries above the override threshold take precedence over local
    /// scores for the same element; unranked elements keep their local score.
    fn merge_remote(
        &self,
        elements: &mut Vec<Suggestion>,
        ranked: &[RankedElement],
        catalog: &Catalog,
    ) {
        for r in ranked {
            if r.confidence <= self.config.remote_override_threshold {
                continue;
            }
            let existing = elements.iter_mut().find(|s| {
                matches!(&s.target, SuggestionTarget::Element(el) if el.selector == r.selector)
            });
            match existing {
                Some(s) => {
                    s.confidence = r.confidence.clamp(0.0, 1.0);
                    s.strategy = r.strategy;
                }
                None => {
                    // The remote may rank an element the local scorer skipped.
                    if let Some(el) = catalog
                        .elements()
                        .iter()
                        .find(|el| el.selector == r.selector)
                    {
                        let mut s = Suggestion::element(el.clone(), r.confidence.clamp(0.0, 1.0));
                        s.strategy = r.strategy;
                        elements.push(s);
                    }
                }
            }
        }
    }

    fn finish(&self, instr: &str, mut suggestions: Vec<Suggestion>) -> Vec<Suggestion> {
        // Stable sort: ties keep catalog declaration order.
        suggestions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let best = suggestions.first().map(|s| s.confidence).unwrap_or(0.0);
        if best < self.config.min_confidence {
            if let Some(url) = normalize_url_like(instr) {
                suggestions.push(Suggestion::command(
                    BuiltinCommand::GoTo(url),
                    self.config.url_fallback_confidence,
                ));
                suggestions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            }
        }

        if let Some((cmd, confidence)) = match_builtin(instr) {
            if confidence >= self.config.command_confidence_floor {
                suggestions.insert(0, Suggestion::command(cmd, confidence));
            }
        }
        suggestions
    }

    /// Ordering for an empty prompt: built-in navigation commands first, then
    /// catalog elements grouped by kind priority, all at a flat confidence.
    fn default_ordering(&self, catalog: &Catalog) -> Vec<Suggestion> {
        let flat = self.config.default_confidence;
        let mut out = vec![
            Suggestion::command(BuiltinCommand::Back, flat),
            Suggestion::command(BuiltinCommand::Refresh, flat),
            Suggestion::command(BuiltinCommand::Home, flat),
        ];
        let mut elements: Vec<&NavigableElement> = catalog.elements().iter().collect();
        elements.sort_by_key(|el| el.kind.rank());
        out.extend(elements.into_iter().map(|el| Suggestion::element(el.clone(), flat)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ElementKind, Method};

    fn element(kind: ElementKind, label: &str, selector: &str) -> NavigableElement {
        let method = match kind {
            ElementKind::FormField => Method::TypeText,
            ElementKind::FormSubmit => Method::Submit,
            ElementKind::Link => Method::Navigate,
            _ => Method::Click,
        };
        NavigableElement {
            kind,
            label: label.into(),
            selector: selector.into(),
            target_url: if kind == ElementKind::Link {
                Some(format!("https://example.com/{}", selector.trim_start_matches('#')))
            } else {
                None
            },
            method,
            fingerprint: NavigableElement::compute_fingerprint("x", label, selector),
        }
    }

    fn catalog(elements: Vec<NavigableElement>) -> Catalog {
        Catalog::from_elements(elements, "https://example.com")
    }

    #[test]
    fn test_scoring_tiers_are_monotonic() {
        let exact = score_match("sign in", "Sign In");
        let prefix = score_match("sign", "Sign In");
        let substring = score_match("gn i", "Sign In");
        let word = score_match("sign out now", "Sign In");
        let chars = score_match("sgin", "Sign In");
        assert_eq!(exact, 1.0);
        assert_eq!(prefix, 0.9);
        assert!(substring >= 0.6 && substring < 0.8);
        assert!((0.3..=0.6).contains(&word));
        assert!(chars > 0.0 && chars <= 0.2);
        assert!(exact > prefix && prefix > substring && substring > word && word > chars);
    }

    #[test]
    fn test_scoring_is_case_insensitive() {
        assert_eq!(score_match("SIGN IN", "sign in"), 1.0);
    }

    #[test]
    fn test_substring_earlier_position_scores_higher() {
        let early = score_match("account", "my account settings page");
        let late = score_match("account", "open your profile account");
        assert!(early > late);
    }

    #[test]
    fn test_no_match_scores_zero() {
        assert_eq!(score_match("xyz", "qw"), 0.0);
        assert_eq!(score_match("", "Sign In"), 0.0);
        assert_eq!(score_match("sign in", ""), 0.0);
    }

    #[test]
    fn test_builtin_commands() {
        assert_eq!(match_builtin("go back"), Some((BuiltinCommand::Back, 1.0)));
        assert_eq!(match_builtin("Refresh"), Some((BuiltinCommand::Refresh, 1.0)));
        assert_eq!(match_builtin("go to home"), Some((BuiltinCommand::Home, 1.0)));
        assert_eq!(
            match_builtin("go to pricing"),
            Some((BuiltinCommand::GoTo("pricing".into()), 0.9))
        );
        assert_eq!(
            match_builtin("click the submit button"),
            Some((BuiltinCommand::Click("submit button".into()), 0.8))
        );
        assert_eq!(match_builtin("wiggle the page"), None);
    }

    #[test]
    fn test_builtin_type_command() {
        let (cmd, _) = match_builtin("type \"hello world\" in the search box").unwrap();
        assert_eq!(
            cmd,
            BuiltinCommand::Type {
                text: "hello world".into(),
                field: "search box".into()
            }
        );
    }

    #[test]
    fn test_url_like_instructions() {
        assert_eq!(
            normalize_url_like("example.com/pricing"),
            Some("https://example.com/pricing".into())
        );
        assert_eq!(
            normalize_url_like("http://localhost:3000"),
            Some("http://localhost:3000".into())
        );
        assert_eq!(normalize_url_like("click something"), None);
        assert_eq!(normalize_url_like("period."), None);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let resolver = Resolver::new(EngineConfig::default());
        let cat = catalog(vec![
            element(ElementKind::Button, "Sign In", "#signin"),
            element(ElementKind::Link, "Sign Up", "#signup"),
            element(ElementKind::Button, "Settings", "#settings"),
        ]);
        let first = resolver.resolve_local("sign", &cat);
        let second = resolver.resolve_local("sign", &cat);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.confidence, b.confidence);
            assert_eq!(a.describe(), b.describe());
        }
        // Tie between "Sign In" and "Sign Up" (both prefix) keeps catalog order.
        assert!(first[0].describe().contains("Sign In"));
        assert!(first[1].describe().contains("Sign Up"));
    }

    #[test]
    fn test_scenario_sign_in_button() {
        let resolver = Resolver::new(EngineConfig::default());
        let cat = catalog(vec![element(ElementKind::Button, "Sign In", "#signin")]);
        let suggestions = resolver.resolve_local("sign in", &cat);
        let top = &suggestions[0];
        assert!(top.confidence >= 0.9);
        match &top.target {
            SuggestionTarget::Element(el) => assert_eq!(el.kind, ElementKind::Button),
            other => panic!("expected element suggestion, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_catalog_returns_only_builtins() {
        let resolver = Resolver::new(EngineConfig::default());
        let suggestions = resolver.resolve_local("go back", &Catalog::empty());
        assert_eq!(suggestions.len(), 1);
        assert!(matches!(
            suggestions[0].target,
            SuggestionTarget::Command(BuiltinCommand::Back)
        ));
    }

    #[test]
    fn test_empty_instruction_default_ordering() {
        let resolver = Resolver::new(EngineConfig::default());
        let cat = catalog(vec![
            element(ElementKind::Link, "Docs", "#docs"),
            element(ElementKind::Button, "Save", "#save"),
            element(ElementKind::FormField, "Email", "#email"),
        ]);
        let suggestions = resolver.resolve_local("", &cat);
        // Built-ins first.
        assert!(matches!(
            suggestions[0].target,
            SuggestionTarget::Command(BuiltinCommand::Back)
        ));
        // Elements follow, grouped by kind priority: field, button, link.
        let element_labels: Vec<String> = suggestions
            .iter()
            .filter_map(|s| match &s.target {
                SuggestionTarget::Element(el) => Some(el.label.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(element_labels, vec!["Email", "Save", "Docs"]);
        assert!(suggestions.iter().all(|s| s.confidence == 0.8));
    }

    #[test]
    fn test_url_fallback_when_no_confident_match() {
        let resolver = Resolver::new(EngineConfig::default());
        let cat = catalog(vec![element(ElementKind::Button, "Save", "#save")]);
        let suggestions = resolver.resolve_local("example.com/docs", &cat);
        let top = &suggestions[0];
        assert!(matches!(
            &top.target,
            SuggestionTarget::Command(BuiltinCommand::GoTo(url)) if url == "https://example.com/docs"
        ));
        assert_eq!(top.confidence, 0.5);
    }

    #[test]
    fn test_builtin_prepended_over_catalog_match() {
        let resolver = Resolver::new(EngineConfig::default());
        let cat = catalog(vec![element(ElementKind::Button, "go back", "#back")]);
        let suggestions = resolver.resolve_local("go back", &cat);
        // Command first despite the exact catalog match.
        assert!(matches!(
            suggestions[0].target,
            SuggestionTarget::Command(BuiltinCommand::Back)
        ));
        assert!(matches!(suggestions[1].target, SuggestionTarget::Element(_)));
    }

    mod remote {
        use super::*;
        use crate::assistant::{DiscoveredAction, InterpretedCommand};
        use crate::{Error, Result};
        use async_trait::async_trait;

        struct ScriptedRanker {
            ranked: Vec<RankedElement>,
            fail: bool,
        }

        #[async_trait]
        impl Assistant for ScriptedRanker {
            async fn interpret_command(
                &self,
                _text: &str,
                _known: &[DiscoveredAction],
                _context: Option<&ConversationContext>,
            ) -> Result<InterpretedCommand> {
                Err(Error::RemoteAnalysisFailed("not scripted".into()))
            }

            async fn rank_elements(
                &self,
                _text: &str,
                _candidates: &[NavigableElement],
            ) -> Result<Vec<RankedElement>> {
                if self.fail {
                    Err(Error::RemoteAnalysisFailed("backend down".into()))
                } else {
                    Ok(self.ranked.clone())
                }
            }

            async fn analyze_initial_markup(&self, _html: &str) -> Result<Vec<DiscoveredAction>> {
                Ok(vec![])
            }

            async fn analyze_incremental_markup(
                &self,
                _delta: &str,
                _known: &[DiscoveredAction],
            ) -> Result<Vec<DiscoveredAction>> {
                Ok(vec![])
            }
        }

        #[tokio::test]
        async fn test_remote_override_takes_precedence() {
            let ranker = ScriptedRanker {
                ranked: vec![RankedElement {
                    text: "Sign Up".into(),
                    selector: "#signup".into(),
                    confidence: 0.95,
                    strategy: Strategy::ScriptClick,
                }],
                fail: false,
            };
            let resolver =
                Resolver::new(EngineConfig::default()).with_assistant(Arc::new(ranker));
            let cat = catalog(vec![
                element(ElementKind::Button, "Sign In", "#signin"),
                element(ElementKind::Link, "Sign Up", "#signup"),
            ]);
            let suggestions = resolver.resolve("sign", &cat, None).await;
            let top = &suggestions[0];
            assert!(top.describe().contains("Sign Up"));
            assert_eq!(top.confidence, 0.95);
            assert_eq!(top.strategy, Strategy::ScriptClick);
        }

        #[tokio::test]
        async fn test_remote_failure_keeps_local_scores() {
            let ranker = ScriptedRanker {
                ranked: vec![],
                fail: true,
            };
            let resolver =
                Resolver::new(EngineConfig::default()).with_assistant(Arc::new(ranker));
            let cat = catalog(vec![element(ElementKind::Button, "Sign In", "#signin")]);
            let suggestions = resolver.resolve("sign in", &cat, None).await;
            assert!(!suggestions.is_empty());
            assert!(suggestions[0].confidence >= 0.9);
        }

        #[tokio::test]
        async fn test_low_confidence_remote_is_ignored() {
            let ranker = ScriptedRanker {
                ranked: vec![RankedElement {
                    text: "Sign In".into(),
                    selector: "#signin".into(),
                    confidence: 0.2, // below the override threshold
                    strategy: Strategy::DispatchEvent,
                }],
                fail: false,
            };
            let resolver =
                Resolver::new(EngineConfig::default()).with_assistant(Arc::new(ranker));
            let cat = catalog(vec![element(ElementKind::Button, "Sign In", "#signin")]);
            let suggestions = resolver.resolve("sign in", &cat, None).await;
            assert!(suggestions[0].confidence >= 0.9);
            assert_eq!(suggestions[0].strategy, Strategy::Standard);
        }
    }
}
