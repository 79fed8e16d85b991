//! The testing engine.
//!
//! Owns the catalog, the conversation window, and the component pipeline:
//! resolve an instruction, execute the top suggestion, classify the page
//! transition, then refresh the catalog and restart discovery if the page
//! navigated. One instruction runs at a time; a second submission while one
//! is in flight is rejected immediately with [`Error::Busy`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::assistant::{Assistant, DiscoveredAction, InterpretedCommand};
use crate::catalog::{Catalog, ElementKind, Method, NavigableElement};
use crate::change::{ChangeDetector, ChangeReport, Snapshot};
use crate::config::EngineConfig;
use crate::context::{ConversationContext, Role};
use crate::discovery::{DiscoveryHandle, DiscoveryLoop, KnownActions};
use crate::driver::Driver;
use crate::executor::{ExecutionOutcome, Executor, Strategy};
use crate::resolver::{normalize_url_like, BuiltinCommand, Resolver, Suggestion, SuggestionTarget};
use crate::{Error, Result};

/// Pipeline milestones, broadcast to any number of subscribers. Missing an
/// event (lagged receiver) never affects the pipeline itself.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Resolved {
        instruction: String,
        choice: String,
        confidence: f64,
    },
    Executed {
        strategy: Strategy,
        attempts: u32,
        succeeded: bool,
    },
    ChangeDetected {
        summary: String,
    },
    BatchDiscovered {
        actions: Vec<DiscoveredAction>,
        initial: bool,
    },
    Failed {
        message: String,
    },
}

/// Everything one instruction produced.
#[derive(Debug, Clone)]
pub struct InstructionReport {
    /// The suggestion that was executed.
    pub suggestion: Suggestion,
    pub outcome: ExecutionOutcome,
    pub change: ChangeReport,
}

/// Orchestrates resolution, execution, change detection and discovery over
/// one browser page.
pub struct Engine {
    driver: Arc<dyn Driver>,
    assistant: Option<Arc<dyn Assistant>>,
    config: EngineConfig,
    resolver: Resolver,
    executor: Executor,
    detector: ChangeDetector,
    catalog: RwLock<Catalog>,
    context: Mutex<ConversationContext>,
    known: Arc<Mutex<KnownActions>>,
    // One instruction at a time; try_lock failure maps to Error::Busy.
    busy: Mutex<()>,
    events: broadcast::Sender<EngineEvent>,
    discovery: Mutex<Option<DiscoveryHandle>>,
    cancel: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(driver: Arc<dyn Driver>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            resolver: Resolver::new(config.clone()),
            executor: Executor::new(config.clone()),
            detector: ChangeDetector::new(config.clone()),
            context: Mutex::new(ConversationContext::new(
                config.context_turns,
                config.context_bytes,
            )),
            driver,
            assistant: None,
            config,
            catalog: RwLock::new(Catalog::empty()),
            known: Arc::new(Mutex::new(KnownActions::new())),
            busy: Mutex::new(()),
            events,
            discovery: Mutex::new(None),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_assistant(mut self, assistant: Arc<dyn Assistant>) -> Self {
        self.resolver = Resolver::new(self.config.clone()).with_assistant(assistant.clone());
        self.assistant = Some(assistant);
        self
    }

    /// Subscribe to pipeline events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the current element catalog.
    pub async fn catalog(&self) -> Catalog {
        self.catalog.read().await.clone()
    }

    /// All actions discovered so far, across pages.
    pub async fn known_actions(&self) -> Vec<DiscoveredAction> {
        self.known.lock().await.actions().to_vec()
    }

    /// Open a URL and prime the catalog and discovery loop for the new page.
    pub async fn open(&self, url: &str) -> Result<()> {
        let _busy = self.busy.try_lock().map_err(|_| Error::Busy)?;
        info!(url, "opening page");
        self.driver.navigate(url).await?;
        self.refresh_page_state().await
    }

    /// Resolve an instruction without executing anything.
    pub async fn suggest(&self, instruction: &str) -> Vec<Suggestion> {
        let catalog = self.catalog.read().await.clone();
        let context = self.context.lock().await.clone();
        self.resolver
            .resolve(instruction, &catalog, Some(&context))
            .await
    }

    /// Run one instruction end to end.
    ///
    /// Rejected with [`Error::Busy`] while another instruction is in flight,
    /// and with [`Error::InstructionAmbiguous`] when no suggestion clears the
    /// confidence bar; the ambiguity error carries the candidates so a caller
    /// can ask the user to pick one.
    pub async fn submit_instruction(&self, instruction: &str) -> Result<InstructionReport> {
        let _busy = self.busy.try_lock().map_err(|_| Error::Busy)?;
        self.cancel.store(false, Ordering::Relaxed);

        self.context.lock().await.push(Role::User, instruction);

        let catalog = self.catalog.read().await.clone();
        let context = self.context.lock().await.clone();
        let suggestions = self
            .resolver
            .resolve(instruction, &catalog, Some(&context))
            .await;

        // An empty instruction is a request for options, never an execution.
        if instruction.trim().is_empty() {
            return Err(Error::InstructionAmbiguous { suggestions });
        }

        let top = match suggestions.first() {
            Some(s) if s.confidence >= self.config.min_confidence => s.clone(),
            _ => match self.interpret_fallback(instruction).await {
                Some(s) => s,
                None => return Err(Error::InstructionAmbiguous { suggestions }),
            },
        };
        debug!(choice = %top.describe(), confidence = top.confidence, "instruction resolved");
        let _ = self.events.send(EngineEvent::Resolved {
            instruction: instruction.to_string(),
            choice: top.describe(),
            confidence: top.confidence,
        });

        let before = Snapshot::capture(self.driver.as_ref()).await?;
        let (outcome, wait_ms) = self.perform(&top).await?;
        let _ = self.events.send(EngineEvent::Executed {
            strategy: outcome.strategy_used,
            attempts: outcome.attempts_made,
            succeeded: outcome.succeeded,
        });
        if !outcome.succeeded {
            if let Some(ref message) = outcome.error {
                let _ = self.events.send(EngineEvent::Failed {
                    message: message.clone(),
                });
            }
        }

        // A failed cascade may still have perturbed the page; one immediate
        // classification pass catches that without burning the full window.
        let window = if outcome.succeeded { wait_ms } else { 0 };
        let change = self
            .detector
            .wait_for_change(self.driver.as_ref(), &before, window, &self.cancel)
            .await?;

        if change.navigated() {
            self.refresh_page_state().await?;
        }
        let _ = self.events.send(EngineEvent::ChangeDetected {
            summary: change.summary.clone(),
        });
        self.context.lock().await.push(Role::Agent, &change.summary);

        Ok(InstructionReport {
            suggestion: top,
            outcome,
            change,
        })
    }

    /// Cooperatively cancel the in-flight change wait and discovery loop.
    pub async fn cancel_current(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.discovery.lock().await.take() {
            handle.cancel();
        }
    }

    /// Stop background work. The driver stays open; it belongs to the caller.
    pub async fn shutdown(&self) {
        self.cancel_current().await;
    }

    /// Execute a suggestion, returning the outcome and the change window to
    /// wait afterwards.
    async fn perform(&self, suggestion: &Suggestion) -> Result<(ExecutionOutcome, u64)> {
        match &suggestion.target {
            SuggestionTarget::Element(el) => {
                let wait = self.change_window(el.method);
                let outcome = self
                    .executor
                    .execute(self.driver.as_ref(), el, suggestion.strategy, None)
                    .await?;
                Ok((outcome, wait))
            }
            SuggestionTarget::Command(cmd) => self.run_builtin(cmd).await,
        }
    }

    fn change_window(&self, method: Method) -> u64 {
        if method == Method::Submit {
            self.config.submit_change_wait_ms
        } else {
            self.config.change_wait_ms
        }
    }

    async fn run_builtin(&self, cmd: &BuiltinCommand) -> Result<(ExecutionOutcome, u64)> {
        let wait = self.config.change_wait_ms;
        match cmd {
            BuiltinCommand::Back => {
                self.driver.execute_script("history.back()").await?;
                Ok((direct_outcome(), wait))
            }
            BuiltinCommand::Refresh => {
                self.driver.execute_script("location.reload()").await?;
                Ok((direct_outcome(), wait))
            }
            BuiltinCommand::Home => {
                let info = self.driver.page_info().await?;
                let origin = Url::parse(&info.url)
                    .ok()
                    .map(|u| u.origin().ascii_serialization())
                    .ok_or_else(|| {
                        Error::ActionFailed(format!("no origin to go home from: {}", info.url))
                    })?;
                self.driver.navigate(&origin).await?;
                Ok((direct_outcome(), wait))
            }
            BuiltinCommand::GoTo(target) => {
                if let Some(url) = normalize_url_like(target) {
                    self.driver.navigate(&url).await?;
                    return Ok((direct_outcome(), wait));
                }
                // Not a URL: treat the target as an element description.
                match self.top_element(target, None).await {
                    Some(el) => {
                        let wait = self.change_window(el.method);
                        let outcome = self
                            .executor
                            .execute(self.driver.as_ref(), &el, Strategy::Standard, None)
                            .await?;
                        Ok((outcome, wait))
                    }
                    None => Ok((
                        failed_outcome(format!("nothing on this page matches \"{}\"", target)),
                        0,
                    )),
                }
            }
            BuiltinCommand::Click(target) => match self.top_element(target, None).await {
                Some(el) => {
                    let outcome = self
                        .executor
                        .execute(self.driver.as_ref(), &el, Strategy::Standard, None)
                        .await?;
                    Ok((outcome, wait))
                }
                None => Ok((
                    failed_outcome(format!("nothing on this page matches \"{}\"", target)),
                    0,
                )),
            },
            BuiltinCommand::Type { text, field } => {
                match self.top_element(field, Some(ElementKind::FormField)).await {
                    Some(el) => {
                        let outcome = self
                            .executor
                            .execute(self.driver.as_ref(), &el, Strategy::Standard, Some(text))
                            .await?;
                        Ok((outcome, wait))
                    }
                    None => Ok((
                        failed_outcome(format!("no form field matches \"{}\"", field)),
                        0,
                    )),
                }
            }
        }
    }

    /// Best-matching catalog element for a description, optionally filtered
    /// by kind.
    async fn top_element(
        &self,
        description: &str,
        kind: Option<ElementKind>,
    ) -> Option<NavigableElement> {
        let catalog = self.catalog.read().await;
        self.resolver
            .resolve_local(description, &catalog)
            .into_iter()
            .find_map(|s| match s.target {
                SuggestionTarget::Element(el) if kind.is_none() || kind == Some(el.kind) => {
                    Some(el)
                }
                _ => None,
            })
    }

    /// Ask the assistant to interpret an instruction the local scorer could
    /// not place. Any failure degrades to ambiguity, never to an error.
    async fn interpret_fallback(&self, instruction: &str) -> Option<Suggestion> {
        let assistant = self.assistant.as_ref()?;
        let known = self.known.lock().await.actions().to_vec();
        let context = self.context.lock().await.clone();
        match assistant
            .interpret_command(instruction, &known, Some(&context))
            .await
        {
            Ok(cmd) if cmd.confidence >= self.config.min_confidence => {
                self.suggestion_from_interpretation(&cmd)
            }
            Ok(cmd) => {
                debug!(
                    confidence = cmd.confidence,
                    "interpretation below confidence bar"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "remote interpretation failed");
                None
            }
        }
    }

    fn suggestion_from_interpretation(&self, cmd: &InterpretedCommand) -> Option<Suggestion> {
        let param = |key: &str| cmd.parameters.get(key).cloned();
        let builtin = match cmd.command_type.as_str() {
            "back" => BuiltinCommand::Back,
            "refresh" | "reload" => BuiltinCommand::Refresh,
            "home" => BuiltinCommand::Home,
            "navigate" | "goto" | "open" => {
                BuiltinCommand::GoTo(param("url").or_else(|| param("target"))?)
            }
            "click" => BuiltinCommand::Click(param("target")?),
            "type" | "fill" => BuiltinCommand::Type {
                text: param("text")?,
                field: param("field").or_else(|| param("target"))?,
            },
            _ => return None,
        };
        Some(Suggestion::command(builtin, cmd.confidence))
    }

    /// Rebuild the catalog for the current page and restart the discovery
    /// loop. Runs after `open` and after every detected navigation, before
    /// the triggering instruction returns.
    async fn refresh_page_state(&self) -> Result<()> {
        let fresh = Catalog::refresh(self.driver.as_ref()).await?;
        {
            let mut catalog = self.catalog.write().await;
            let diff = fresh.diff(&catalog);
            info!(url = fresh.url(), %diff, "catalog refreshed");
            *catalog = fresh;
        }
        self.restart_discovery().await
    }

    async fn restart_discovery(&self) -> Result<()> {
        if let Some(previous) = self.discovery.lock().await.take() {
            previous.cancel();
        }
        let markup = self.driver.page_html().await?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let discovery = DiscoveryLoop::new(
            self.config.clone(),
            self.driver.clone(),
            self.assistant.clone(),
        );
        *self.discovery.lock().await = Some(discovery.spawn(markup, tx));

        // Forwarder: fold batches into the cross-page action set and publish
        // what was genuinely new. Ends when the discovery loop drops its tx.
        let known = self.known.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                let fresh = known.lock().await.merge(batch.actions);
                if !fresh.is_empty() || batch.initial {
                    let _ = events.send(EngineEvent::BatchDiscovered {
                        actions: fresh,
                        initial: batch.initial,
                    });
                }
            }
        });
        Ok(())
    }
}

fn direct_outcome() -> ExecutionOutcome {
    ExecutionOutcome {
        succeeded: true,
        strategy_used: Strategy::Standard,
        attempts_made: 1,
        error: None,
    }
}

fn failed_outcome(message: String) -> ExecutionOutcome {
    ExecutionOutcome {
        succeeded: false,
        strategy_used: Strategy::Standard,
        attempts_made: 0,
        error: Some(message),
    }
}
