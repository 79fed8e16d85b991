//! Browser driver seam.
//!
//! The engine consumes these operations and never manages driver lifecycle —
//! launching, connecting, and closing the browser belong to the caller. The
//! default implementation is [`crate::cdp::CdpDriver`]; tests supply mocks.

use async_trait::async_trait;
use serde::Deserialize;

use crate::Result;

/// URL and title of the active page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
}

/// One interactive element as enumerated by the driver.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedElement {
    /// Unique CSS selector for the element.
    pub selector: String,
    /// Visible text / accessible label.
    pub text: String,
    /// HTML tag name, lowercase.
    pub tag: String,
    /// Whether the element navigates (anchor with an href).
    #[serde(default)]
    pub is_navigation: bool,
    /// Whether the element behaves as a button (tag or ARIA role).
    #[serde(default)]
    pub is_button: bool,
    /// Resolved absolute URL for navigation elements.
    #[serde(default)]
    pub resolved_url: Option<String>,
    /// Input type for form elements ("text", "submit", "select", ...).
    #[serde(default)]
    pub input_type: Option<String>,
}

/// Remote-debugging operations the engine needs from a browser.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Navigate the active page to a URL.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Click the first element matching a CSS selector.
    async fn click(&self, selector: &str) -> Result<()>;

    /// Clear and type text into the element matching a selector.
    async fn send_keys(&self, selector: &str, text: &str) -> Result<()>;

    /// Evaluate JavaScript and return its JSON result.
    async fn execute_script(&self, script: &str) -> Result<serde_json::Value>;

    /// Wait until a selector matches something, up to `timeout_ms`.
    async fn wait_for_element(&self, selector: &str, timeout_ms: u64) -> Result<()>;

    /// Current URL and title.
    async fn page_info(&self) -> Result<PageInfo>;

    /// Full page markup.
    async fn page_html(&self) -> Result<String>;

    /// Enumerate interactive elements on the page.
    async fn extract_interactive(&self) -> Result<Vec<ExtractedElement>>;
}
