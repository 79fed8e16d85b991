//! Incremental action discovery.
//!
//! On page load the loop sends the initial markup for analysis, then keeps
//! polling for markup deltas for a bounded window, requesting incremental
//! analysis of each non-empty delta. Newly found actions stream out in
//! batches; an action already known by `(selector, verb)` identity is never
//! re-yielded. A failed analysis drops its delta and nothing else.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::assistant::{Assistant, DiscoveredAction, Priority};
use crate::catalog::{ElementKind, NavigableElement};
use crate::config::EngineConfig;
use crate::driver::Driver;
use crate::Result;

type AnalysisFuture = Pin<Box<dyn Future<Output = Result<Vec<DiscoveredAction>>> + Send>>;

/// One batch of newly discovered actions.
#[derive(Debug, Clone)]
pub struct ActionBatch {
    pub actions: Vec<DiscoveredAction>,
    /// Whether this is the initial full-page batch.
    pub initial: bool,
}

/// Running set of known actions, keyed by `(selector, verb)` identity.
#[derive(Debug, Default)]
pub struct KnownActions {
    identities: HashSet<(String, String)>,
    actions: Vec<DiscoveredAction>,
}

impl KnownActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch, returning only the actions not previously known.
    /// Merging the same batch twice yields nothing the second time.
    pub fn merge(&mut self, incoming: Vec<DiscoveredAction>) -> Vec<DiscoveredAction> {
        let mut fresh = Vec::new();
        for action in incoming {
            if self.identities.insert(action.identity()) {
                self.actions.push(action.clone());
                fresh.push(action);
            }
        }
        fresh
    }

    pub fn actions(&self) -> &[DiscoveredAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// The suffix of `current` that was appended since `previous`, clamped to a
/// char boundary. `None` when nothing new was appended.
pub fn markup_delta<'a>(previous: &str, current: &'a str) -> Option<&'a str> {
    if current.len() <= previous.len() {
        return None;
    }
    let common = previous
        .as_bytes()
        .iter()
        .zip(current.as_bytes())
        .take_while(|(a, b)| a == b)
        .count();
    let mut split = common;
    while split > 0 && !current.is_char_boundary(split) {
        split -= 1;
    }
    let delta = &current[split..];
    if delta.is_empty() {
        None
    } else {
        Some(delta)
    }
}

/// Handle to a running discovery task.
pub struct DiscoveryHandle {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl DiscoveryHandle {
    /// Cancel the loop. The in-flight initial analysis, if any, is owned by
    /// the loop's future, so aborting drops it and nothing stale is merged.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawns and runs the per-page discovery task.
pub struct DiscoveryLoop {
    config: EngineConfig,
    driver: Arc<dyn Driver>,
    assistant: Option<Arc<dyn Assistant>>,
}

impl DiscoveryLoop {
    pub fn new(
        config: EngineConfig,
        driver: Arc<dyn Driver>,
        assistant: Option<Arc<dyn Assistant>>,
    ) -> Self {
        Self {
            config,
            driver,
            assistant,
        }
    }

    /// Start discovery for a freshly loaded page. Batches arrive on `tx`;
    /// the loop stops when its window closes or the handle is cancelled.
    pub fn spawn(self, initial_markup: String, tx: mpsc::UnboundedSender<ActionBatch>) -> DiscoveryHandle {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let handle = tokio::spawn(async move {
            self.run(initial_markup, tx, flag).await;
        });
        DiscoveryHandle { cancel, handle }
    }

    async fn run(
        self,
        initial_markup: String,
        tx: mpsc::UnboundedSender<ActionBatch>,
        cancel: Arc<AtomicBool>,
    ) {
        let mut known = KnownActions::new();

        // The initial analysis is driven inside this future, concurrently
        // with delta polling, so cancelling the task drops it mid-flight and
        // its result is never merged.
        let mut initial: Option<AnalysisFuture> = match self.assistant.clone() {
            Some(assistant) => {
                let markup = initial_markup.clone();
                Some(Box::pin(async move {
                    assistant.analyze_initial_markup(&markup).await
                }))
            }
            None => {
                // No assistant: a single driver-only extraction of generic
                // interactive elements is the whole initial batch.
                let actions = self.fallback_actions().await.unwrap_or_default();
                let fresh = known.merge(actions);
                let _ = tx.send(ActionBatch {
                    actions: fresh,
                    initial: true,
                });
                None
            }
        };

        let deadline = Instant::now() + Duration::from_millis(self.config.discovery_window_ms);
        let interval = Duration::from_millis(self.config.discovery_interval_ms);
        let mut previous = initial_markup;

        while Instant::now() < deadline {
            if cancel.load(Ordering::Relaxed) {
                debug!("discovery loop cancelled");
                return;
            }
            let analysis_pending = initial.is_some();
            tokio::select! {
                result = next_analysis(&mut initial), if analysis_pending => {
                    initial = None;
                    match result {
                        Ok(actions) => {
                            let fresh = known.merge(actions);
                            debug!(count = fresh.len(), "initial analysis complete");
                            let _ = tx.send(ActionBatch {
                                actions: fresh,
                                initial: true,
                            });
                        }
                        Err(e) => warn!(error = %e, "initial analysis failed"),
                    }
                }
                _ = sleep(interval) => {
                    let current = match self.driver.page_html().await {
                        Ok(html) => html,
                        Err(e) => {
                            warn!(error = %e, "markup poll failed");
                            continue;
                        }
                    };
                    if let Some(ref assistant) = self.assistant {
                        if let Some(delta) = markup_delta(&previous, &current) {
                            debug!(bytes = delta.len(), "markup delta captured");
                            match assistant
                                .analyze_incremental_markup(delta, known.actions())
                                .await
                            {
                                Ok(actions) => {
                                    let fresh = known.merge(actions);
                                    if !fresh.is_empty() {
                                        let _ = tx.send(ActionBatch {
                                            actions: fresh,
                                            initial: false,
                                        });
                                    }
                                }
                                // One bad delta never aborts the loop.
                                Err(e) => warn!(error = %e, "incremental analysis failed, dropping delta"),
                            }
                        }
                    }
                    previous = current;
                }
            }
        }

        // Give a slow initial analysis a moment past the window.
        if let Some(fut) = initial {
            if let Ok(Ok(actions)) = tokio::time::timeout(interval * 2, fut).await {
                let fresh = known.merge(actions);
                if !fresh.is_empty() {
                    let _ = tx.send(ActionBatch {
                        actions: fresh,
                        initial: true,
                    });
                }
            }
        }
    }

    /// Driver-only extraction mapped into generic discovered actions.
    async fn fallback_actions(&self) -> Option<Vec<DiscoveredAction>> {
        let info = self.driver.page_info().await.ok()?;
        let base = url::Url::parse(&info.url).ok();
        let raw = self.driver.extract_interactive().await.ok()?;
        let actions = raw
            .iter()
            .filter_map(|r| NavigableElement::from_extracted(r, base.as_ref()))
            .map(|el| {
                let verb = match el.kind {
                    ElementKind::FormField => "type",
                    ElementKind::FormSubmit => "submit",
                    _ => "click",
                };
                DiscoveredAction {
                    description: if el.label.is_empty() {
                        format!("{} {}", verb, el.selector)
                    } else {
                        format!("{} \"{}\"", verb, el.label)
                    },
                    selector: el.selector,
                    interaction_verb: verb.to_string(),
                    priority: Priority::Medium,
                    already_tested: false,
                    script: None,
                    origin_instruction: None,
                }
            })
            .collect();
        Some(actions)
    }
}

/// Poll the pending initial analysis. The select guard keeps this branch
/// disabled once the slot is empty.
async fn next_analysis(slot: &mut Option<AnalysisFuture>) -> Result<Vec<DiscoveredAction>> {
    match slot.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}
