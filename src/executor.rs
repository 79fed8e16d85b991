//! Execution cascade.
//!
//! A resolved (element, strategy) pair is turned into browser actions through
//! three stages: the direct method, derived selector variants, then a
//! script-based text search. Individual attempt failures are absorbed and
//! retried; only cascade exhaustion surfaces as a failed outcome. A lost
//! driver short-circuits everything.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::catalog::{ElementKind, Method, NavigableElement};
use crate::config::EngineConfig;
use crate::driver::Driver;
use crate::{Error, Result};

/// How to interact with the resolved element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Use the element's own method and selector.
    #[default]
    Standard,
    /// Click via injected script.
    ScriptClick,
    /// Synthesize a bubbling click event.
    DispatchEvent,
    /// Focus the element and press Enter.
    FocusEnter,
    /// Scan clickable elements for matching visible text.
    TextSearch,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Standard => f.write_str("standard"),
            Strategy::ScriptClick => f.write_str("script_click"),
            Strategy::DispatchEvent => f.write_str("dispatch_event"),
            Strategy::FocusEnter => f.write_str("focus_enter"),
            Strategy::TextSearch => f.write_str("text_search"),
        }
    }
}

/// What the cascade did.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub succeeded: bool,
    pub strategy_used: Strategy,
    /// Primitive driver attempts made. Callers may use a high count to lower
    /// future confidence in the selector.
    pub attempts_made: u32,
    pub error: Option<String>,
}

/// Runs the execution cascade against a driver.
pub struct Executor {
    config: EngineConfig,
}

impl Executor {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Execute an element with the given strategy.
    ///
    /// Returns `Err` only for [`Error::DriverUnavailable`]; every other
    /// failure is reported inside the outcome after the cascade is exhausted.
    pub async fn execute(
        &self,
        driver: &dyn Driver,
        element: &NavigableElement,
        strategy: Strategy,
        input: Option<&str>,
    ) -> Result<ExecutionOutcome> {
        let budget = self.config.attempt_budget();
        let mut attempts: u32 = 0;
        let mut last_error: Option<String> = None;

        for round in 1..=self.config.max_outer_retries {
            if round > 1 {
                let delay = self.config.retry_base_delay_ms * (round as u64 - 1);
                debug!(round, delay_ms = delay, "retrying cascade");
                sleep(Duration::from_millis(delay)).await;
            }
            let mut used_in_round: u32 = 0;

            // Stage 1: direct execution of the requested strategy.
            attempts += 1;
            used_in_round += 1;
            match self.direct(driver, element, strategy, input).await {
                Ok(()) => return Ok(success(strategy, attempts)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!(attempt = attempts, error = %e, "direct attempt failed");
                    last_error = Some(e.to_string());
                }
            }

            // Stage 2: derived selector variants, each preceded by a short
            // wait-for-presence. One attempt is reserved for stage 3.
            for variant in derive_variants(element) {
                if used_in_round + 1 >= self.config.attempts_per_round || attempts >= budget {
                    break;
                }
                attempts += 1;
                used_in_round += 1;
                match self.try_variant(driver, &variant).await {
                    Ok(()) => return Ok(success(Strategy::Standard, attempts)),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        debug!(attempt = attempts, variant = %variant, error = %e, "variant failed");
                        last_error = Some(e.to_string());
                    }
                }
            }

            // Stage 3: text-search fallback.
            if !element.label.trim().is_empty()
                && used_in_round < self.config.attempts_per_round
                && attempts < budget
            {
                attempts += 1;
                match self.text_search(driver, &element.label).await {
                    Ok(true) => return Ok(success(Strategy::TextSearch, attempts)),
                    Ok(false) => {
                        last_error = Some(format!(
                            "no clickable element with text \"{}\"",
                            element.label
                        ));
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => last_error = Some(e.to_string()),
                }
            }
        }

        Ok(ExecutionOutcome {
            succeeded: false,
            strategy_used: strategy,
            attempts_made: attempts,
            error: Some(
                last_error.unwrap_or_else(|| "execution cascade exhausted".into()),
            ),
        })
    }

    async fn direct(
        &self,
        driver: &dyn Driver,
        element: &NavigableElement,
        strategy: Strategy,
        input: Option<&str>,
    ) -> Result<()> {
        match strategy {
            Strategy::Standard => match element.method {
                Method::Navigate => match element.target_url.as_deref() {
                    Some(url) => driver.navigate(url).await,
                    None => driver.click(&element.selector).await,
                },
                Method::Click | Method::Submit => {
                    if element.selector.is_empty() {
                        match element.target_url.as_deref() {
                            Some(url) => driver.navigate(url).await,
                            None => Err(Error::ActionFailed("element has no selector".into())),
                        }
                    } else {
                        driver.click(&element.selector).await
                    }
                }
                Method::TypeText => {
                    let text = input.ok_or_else(|| {
                        Error::ActionFailed("no text provided for a form field".into())
                    })?;
                    driver.send_keys(&element.selector, text).await
                }
            },
            Strategy::ScriptClick => {
                self.run_bool_script(driver, &script_click(&element.selector), &element.selector)
                    .await
            }
            Strategy::DispatchEvent => {
                self.run_bool_script(
                    driver,
                    &script_dispatch_click(&element.selector),
                    &element.selector,
                )
                .await
            }
            Strategy::FocusEnter => {
                self.run_bool_script(
                    driver,
                    &script_focus_enter(&element.selector),
                    &element.selector,
                )
                .await
            }
            Strategy::TextSearch => match self.text_search(driver, &element.label).await? {
                true => Ok(()),
                false => Err(Error::ElementNotFound(format!(
                    "text \"{}\"",
                    element.label
                ))),
            },
        }
    }

    async fn run_bool_script(
        &self,
        driver: &dyn Driver,
        script: &str,
        selector: &str,
    ) -> Result<()> {
        let result = driver.execute_script(script).await?;
        if result.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(Error::ElementNotFound(selector.to_string()))
        }
    }

    async fn try_variant(&self, driver: &dyn Driver, variant: &str) -> Result<()> {
        driver
            .wait_for_element(variant, self.config.element_wait_ms)
            .await?;
        driver.click(variant).await
    }

    async fn text_search(&self, driver: &dyn Driver, text: &str) -> Result<bool> {
        let result = driver.execute_script(&script_text_search(text)).await?;
        Ok(result.as_bool() == Some(true))
    }
}

fn success(strategy: Strategy, attempts: u32) -> ExecutionOutcome {
    ExecutionOutcome {
        succeeded: true,
        strategy_used: strategy,
        attempts_made: attempts,
        error: None,
    }
}

/// Derive alternate locators from the element's selector and description.
/// Ordered most-specific first; the cascade caps how many get tried.
pub(crate) fn derive_variants(element: &NavigableElement) -> Vec<String> {
    let mut variants: Vec<String> = Vec::new();
    let label = element.label.trim();

    if !label.is_empty() {
        variants.push(format!("[aria-label={}]", css_string(label)));
        variants.push(format!("[title={}]", css_string(label)));
    }
    if matches!(element.kind, ElementKind::FormSubmit | ElementKind::Button) {
        variants.push("button[type=\"submit\"], input[type=\"submit\"]".into());
    }

    let lower = label.to_lowercase();
    if lower.contains("sign in") || lower.contains("log in") || lower.contains("login") {
        variants.push("a[href*=\"login\"], a[href*=\"signin\"]".into());
        variants.push("button[type=\"submit\"]".into());
    } else if lower.contains("submit") || lower.contains("start") || lower.contains("continue") {
        variants.push("button[type=\"submit\"]".into());
    }
    if let Some(ref url) = element.target_url {
        variants.push(format!("a[href={}]", css_string(url)));
    }

    variants.retain(|v| v != &element.selector);
    let mut seen = std::collections::HashSet::new();
    variants.retain(|v| seen.insert(v.clone()));
    variants
}

/// Quote a string for use inside a CSS attribute selector.
fn css_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn script_click(selector: &str) -> String {
    format!(
        r#"(() => {{ const el = document.querySelector({sel}); if (!el) return false; el.click(); return true; }})()"#,
        sel = json_arg(selector)
    )
}

fn script_dispatch_click(selector: &str) -> String {
    format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return false;
            el.dispatchEvent(new MouseEvent('click', {{ bubbles: true, cancelable: true, view: window }}));
            return true;
        }})()"#,
        sel = json_arg(selector)
    )
}

fn script_focus_enter(selector: &str) -> String {
    format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return false;
            el.focus();
            for (const type of ['keydown', 'keypress', 'keyup']) {{
                el.dispatchEvent(new KeyboardEvent(type, {{ key: 'Enter', code: 'Enter', bubbles: true }}));
            }}
            if (el.form) el.form.requestSubmit ? el.form.requestSubmit() : el.form.submit();
            return true;
        }})()"#,
        sel = json_arg(selector)
    )
}

/// Scan clickable-role elements for one whose visible text contains the
/// target, case-insensitively, and click the first match. The target text is
/// passed as a JSON string literal, never spliced raw.
fn script_text_search(text: &str) -> String {
    format!(
        r#"(() => {{
            const needle = {needle}.toLowerCase();
            const candidates = document.querySelectorAll(
                'a, button, input[type="submit"], input[type="button"], [role="button"], [role="link"], [onclick]');
            for (const el of candidates) {{
                const text = (el.textContent || el.value || '').trim().toLowerCase();
                if (text && text.includes(needle)) {{ el.click(); return true; }}
            }}
            return false;
        }})()"#,
        needle = json_arg(text)
    )
}

// String-to-JSON-literal serialization cannot fail.
fn json_arg(s: &str) -> String {
    serde_json::to_string(s).unwrap()
}
