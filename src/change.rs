//! Change detection.
//!
//! After an execution the engine polls page state for a bounded window and
//! classifies what happened. Classification is first-match-wins across a
//! fixed priority order — URL change, then semantic phrase rules, then DOM
//! length delta — never a weighted blend, so behavior is deterministic.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::driver::Driver;
use crate::Result;

/// Captured page state at one instant.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub url: String,
    pub title: String,
    pub markup_len: usize,
    pub markup: String,
}

impl Snapshot {
    pub async fn capture(driver: &dyn Driver) -> Result<Self> {
        let info = driver.page_info().await?;
        let markup = driver.page_html().await?;
        Ok(Self {
            url: info.url,
            title: info.title,
            markup_len: markup.len(),
            markup,
        })
    }

    pub fn new(url: impl Into<String>, title: impl Into<String>, markup: impl Into<String>) -> Self {
        let markup = markup.into();
        Self {
            url: url.into(),
            title: title.into(),
            markup_len: markup.len(),
            markup,
        }
    }
}

/// Recognized semantic page signals, in classification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    MagicLinkSent,
    SignedIn,
    Success,
    ModalOpened,
    ModalClosed,
    ErrorShown,
    LoadingStarted,
    LoadingFinished,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::MagicLinkSent => f.write_str("magic link sent"),
            SignalKind::SignedIn => f.write_str("signed in"),
            SignalKind::Success => f.write_str("success message"),
            SignalKind::ModalOpened => f.write_str("modal opened"),
            SignalKind::ModalClosed => f.write_str("modal closed"),
            SignalKind::ErrorShown => f.write_str("error message"),
            SignalKind::LoadingStarted => f.write_str("loading started"),
            SignalKind::LoadingFinished => f.write_str("loading finished"),
        }
    }
}

/// What happened to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Navigated,
    SemanticSignal(SignalKind),
    DomGrew,
    DomShrank,
    Unchanged,
}

/// Result of waiting for a change.
#[derive(Debug, Clone)]
pub struct ChangeReport {
    pub url_before: String,
    pub url_after: String,
    pub title_after: String,
    pub classification: Classification,
    pub summary: String,
}

impl ChangeReport {
    pub fn navigated(&self) -> bool {
        self.classification == Classification::Navigated
    }
}

/// Whether a rule fires on a phrase appearing or disappearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhraseTransition {
    Appeared,
    Disappeared,
}

/// One ordered semantic rule: the first rule whose transition holds for any
/// of its phrases wins.
#[derive(Debug, Clone)]
pub struct SignalRule {
    pub kind: SignalKind,
    pub transition: PhraseTransition,
    pub phrases: Vec<&'static str>,
}

/// The default ordered rule table. Order is load-bearing: magic-link beats
/// auth-success beats generic success, and so on.
pub fn default_rules() -> Vec<SignalRule> {
    vec![
        SignalRule {
            kind: SignalKind::MagicLinkSent,
            transition: PhraseTransition::Appeared,
            phrases: vec![
                "magic link",
                "check your email",
                "we sent you a link",
                "sign-in link sent",
                "link has been sent",
            ],
        },
        SignalRule {
            kind: SignalKind::SignedIn,
            transition: PhraseTransition::Appeared,
            phrases: vec!["signed in", "logged in", "welcome back", "sign out", "log out"],
        },
        SignalRule {
            kind: SignalKind::Success,
            transition: PhraseTransition::Appeared,
            phrases: vec!["successfully", "success", "thank you", "saved"],
        },
        SignalRule {
            kind: SignalKind::ModalOpened,
            transition: PhraseTransition::Appeared,
            phrases: vec!["aria-modal=\"true\"", "role=\"dialog\"", "modal-open"],
        },
        SignalRule {
            kind: SignalKind::ModalClosed,
            transition: PhraseTransition::Disappeared,
            phrases: vec!["aria-modal=\"true\"", "role=\"dialog\"", "modal-open"],
        },
        SignalRule {
            kind: SignalKind::ErrorShown,
            transition: PhraseTransition::Appeared,
            phrases: vec![
                "something went wrong",
                "invalid",
                "try again",
                "error",
                "failed",
            ],
        },
        SignalRule {
            kind: SignalKind::LoadingStarted,
            transition: PhraseTransition::Appeared,
            phrases: vec!["loading...", "please wait", "spinner"],
        },
        SignalRule {
            kind: SignalKind::LoadingFinished,
            transition: PhraseTransition::Disappeared,
            phrases: vec!["loading...", "please wait", "spinner"],
        },
    ]
}

/// Polls page state after an action and classifies the transition.
pub struct ChangeDetector {
    config: EngineConfig,
    rules: Vec<SignalRule>,
}

impl ChangeDetector {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            rules: default_rules(),
        }
    }

    /// Replace the semantic rule table (rules are checked in order).
    pub fn with_rules(mut self, rules: Vec<SignalRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Classify a before/after snapshot pair, or `None` when nothing
    /// classifiable has happened yet.
    pub fn classify(&self, before: &Snapshot, after: &Snapshot) -> Option<Classification> {
        // URL change is the strongest, fastest signal.
        if after.url != before.url {
            return Some(Classification::Navigated);
        }

        let before_markup = before.markup.to_lowercase();
        let after_markup = after.markup.to_lowercase();
        for rule in &self.rules {
            for phrase in &rule.phrases {
                let phrase = phrase.to_lowercase();
                let fired = match rule.transition {
                    PhraseTransition::Appeared => {
                        after_markup.contains(&phrase) && !before_markup.contains(&phrase)
                    }
                    PhraseTransition::Disappeared => {
                        !after_markup.contains(&phrase) && before_markup.contains(&phrase)
                    }
                };
                if fired {
                    return Some(Classification::SemanticSignal(rule.kind));
                }
            }
        }

        let delta = after.markup_len.abs_diff(before.markup_len);
        let threshold = (before.markup_len as f64 * self.config.dom_delta_ratio)
            .max(self.config.dom_delta_floor as f64);
        if delta as f64 > threshold {
            return Some(if after.markup_len > before.markup_len {
                Classification::DomGrew
            } else {
                Classification::DomShrank
            });
        }
        None
    }

    /// Poll until something classifiable happens, the window elapses, or the
    /// cancel flag is raised. Timeouts are a definite `Unchanged`, never an
    /// error; only a lost driver propagates.
    pub async fn wait_for_change(
        &self,
        driver: &dyn Driver,
        before: &Snapshot,
        max_wait_ms: u64,
        cancel: &AtomicBool,
    ) -> Result<ChangeReport> {
        let deadline = Instant::now() + Duration::from_millis(max_wait_ms);
        let interval = Duration::from_millis(self.config.change_poll_interval_ms);
        let mut last: Option<Snapshot> = None;

        loop {
            if cancel.load(Ordering::Relaxed) {
                debug!("change detection cancelled");
                break;
            }
            match Snapshot::capture(driver).await {
                Ok(after) => {
                    if let Some(classification) = self.classify(before, &after) {
                        return Ok(self.report(before, &after, classification));
                    }
                    last = Some(after);
                }
                Err(e) if e.is_fatal() => return Err(e),
                // Transient poll failure mid-transition (e.g. frame swap);
                // keep polling until the window closes.
                Err(e) => warn!(error = %e, "change poll failed"),
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(interval).await;
        }

        let after = last.unwrap_or_else(|| before.clone());
        Ok(self.report(before, &after, Classification::Unchanged))
    }

    fn report(
        &self,
        before: &Snapshot,
        after: &Snapshot,
        classification: Classification,
    ) -> ChangeReport {
        let summary = match &classification {
            Classification::Navigated => {
                format!("navigated: {} -> {}", before.url, after.url)
            }
            Classification::SemanticSignal(kind) => format!("page signal: {}", kind),
            Classification::DomGrew => format!(
                "page content grew ({} -> {} chars)",
                before.markup_len, after.markup_len
            ),
            Classification::DomShrank => format!(
                "page content shrank ({} -> {} chars)",
                before.markup_len, after.markup_len
            ),
            Classification::Unchanged => "no observable change".to_string(),
        };
        ChangeReport {
            url_before: before.url.clone(),
            url_after: after.url.clone(),
            title_after: after.title.clone(),
            classification,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> ChangeDetector {
        ChangeDetector::new(EngineConfig::default())
    }

    #[test]
    fn test_url_change_classifies_navigated() {
        let before = Snapshot::new("https://app.test/login", "Login", "<html>a</html>");
        let after = Snapshot::new("https://app.test/dashboard", "Dash", "<html>a</html>");
        assert_eq!(
            detector().classify(&before, &after),
            Some(Classification::Navigated)
        );
    }

    #[test]
    fn test_navigated_beats_dom_delta() {
        let before = Snapshot::new("https://app.test/login", "Login", "x".repeat(100));
        let after = Snapshot::new("https://app.test/dashboard", "Dash", "y".repeat(5000));
        assert_eq!(
            detector().classify(&before, &after),
            Some(Classification::Navigated)
        );
    }

    #[test]
    fn test_magic_link_signal_without_url_change() {
        let before = Snapshot::new("https://app.test/login", "Login", "<p>enter email</p>");
        let after = Snapshot::new(
            "https://app.test/login",
            "Login",
            "<p>A magic link was sent. Check your email.</p>",
        );
        assert_eq!(
            detector().classify(&before, &after),
            Some(Classification::SemanticSignal(SignalKind::MagicLinkSent))
        );
    }

    #[test]
    fn test_magic_link_beats_generic_success() {
        let before = Snapshot::new("u", "t", "<p>form</p>");
        let after = Snapshot::new("u", "t", "<p>Success! Check your email for a magic link.</p>");
        // Both categories newly appear; the earlier rule wins.
        assert_eq!(
            detector().classify(&before, &after),
            Some(Classification::SemanticSignal(SignalKind::MagicLinkSent))
        );
    }

    #[test]
    fn test_phrase_already_present_does_not_fire() {
        let before = Snapshot::new("u", "t", "<p>error: old problem</p>");
        let after = Snapshot::new("u", "t", "<p>error: old problem</p>");
        assert_eq!(detector().classify(&before, &after), None);
    }

    #[test]
    fn test_modal_closed_fires_on_disappearance() {
        let before = Snapshot::new("u", "t", r#"<div role="dialog" aria-modal="true">x</div>"#);
        let after = Snapshot::new("u", "t", "<div>page</div>");
        assert_eq!(
            detector().classify(&before, &after),
            Some(Classification::SemanticSignal(SignalKind::ModalClosed))
        );
    }

    #[test]
    fn test_dom_growth_over_threshold() {
        let before = Snapshot::new("u", "t", "x".repeat(10_000));
        let after = Snapshot::new("u", "t", "x".repeat(12_000));
        assert_eq!(
            detector().classify(&before, &after),
            Some(Classification::DomGrew)
        );
    }

    #[test]
    fn test_dom_shrink_over_threshold() {
        let before = Snapshot::new("u", "t", "x".repeat(10_000));
        let after = Snapshot::new("u", "t", "x".repeat(8_000));
        assert_eq!(
            detector().classify(&before, &after),
            Some(Classification::DomShrank)
        );
    }

    #[test]
    fn test_small_delta_on_short_page_is_noise() {
        // 10% of 100 chars is far below the absolute floor.
        let before = Snapshot::new("u", "t", "x".repeat(100));
        let after = Snapshot::new("u", "t", "x".repeat(160));
        assert_eq!(detector().classify(&before, &after), None);
    }

    #[test]
    fn test_summary_derivation() {
        let d = detector();
        let before = Snapshot::new("https://a/login", "Login", "x");
        let after = Snapshot::new("https://a/home", "Home", "x");
        let report = d.report(&before, &after, Classification::Navigated);
        assert_eq!(report.summary, "navigated: https://a/login -> https://a/home");
        assert!(report.navigated());
        assert_eq!(report.title_after, "Home");

        let report = d.report(
            &before,
            &before,
            Classification::SemanticSignal(SignalKind::SignedIn),
        );
        assert_eq!(report.summary, "page signal: signed in");
    }

    #[test]
    fn test_rule_table_is_pluggable() {
        let custom = vec![SignalRule {
            kind: SignalKind::Success,
            transition: PhraseTransition::Appeared,
            phrases: vec!["order confirmed"],
        }];
        let d = detector().with_rules(custom);
        let before = Snapshot::new("u", "t", "<p>cart</p>");
        let after = Snapshot::new("u", "t", "<p>Order confirmed! Check your email.</p>");
        // "check your email" no longer fires; only the custom rule exists.
        assert_eq!(
            d.classify(&before, &after),
            Some(Classification::SemanticSignal(SignalKind::Success))
        );
    }
}
