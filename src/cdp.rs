//! [`Driver`] implementation backed by an `eoka` page over CDP.

use eoka::Page;

use crate::driver::{Driver, ExtractedElement, PageInfo};
use crate::{Error, Result};

/// JavaScript that enumerates actionable elements. Returns a JSON array of
/// objects matching [`ExtractedElement`].
const EXTRACT_JS: &str = r#"
(() => {
    const ACTIONABLE = 'a[href], button, input, select, textarea, [role="button"], [role="link"], [onclick]';
    const results = [];
    const seen = new Set();

    function labelFor(el) {
        const aria = el.getAttribute('aria-label');
        if (aria) return aria.trim();
        const tag = el.tagName.toLowerCase();
        if (tag === 'input' || tag === 'select' || tag === 'textarea') {
            if (el.id) {
                const lbl = document.querySelector('label[for=' + JSON.stringify(el.id) + ']');
                if (lbl) return lbl.textContent.trim();
            }
            const wrap = el.closest('label');
            if (wrap) return wrap.textContent.trim();
            return (el.getAttribute('placeholder') || el.getAttribute('name') || '').trim();
        }
        let text = (el.textContent || el.value || '').trim().replace(/\s+/g, ' ');
        if (text.length > 80) text = text.slice(0, 77) + '...';
        return text;
    }

    function selectorFor(el) {
        if (el.id) return '#' + CSS.escape(el.id);
        const tag = el.tagName.toLowerCase();
        if (el.name) return tag + '[name=' + JSON.stringify(el.name) + ']';
        const aria = el.getAttribute('aria-label');
        if (aria) return tag + '[aria-label=' + JSON.stringify(aria) + ']';
        const testid = el.getAttribute('data-testid');
        if (testid) return '[data-testid=' + JSON.stringify(testid) + ']';
        const parts = [];
        let node = el;
        while (node && node !== document.body && parts.length < 4) {
            let s = node.tagName.toLowerCase();
            if (node.id) { parts.unshift('#' + CSS.escape(node.id)); break; }
            const parent = node.parentElement;
            if (parent) {
                const sibs = Array.from(parent.children).filter(c => c.tagName === node.tagName);
                if (sibs.length > 1) s += ':nth-of-type(' + (sibs.indexOf(node) + 1) + ')';
            }
            parts.unshift(s);
            node = parent;
        }
        return parts.join(' > ');
    }

    for (const el of document.querySelectorAll(ACTIONABLE)) {
        const rect = el.getBoundingClientRect();
        if (rect.width < 2 || rect.height < 2) continue;
        const style = getComputedStyle(el);
        if (style.display === 'none' || style.visibility === 'hidden') continue;

        const tag = el.tagName.toLowerCase();
        const selector = selectorFor(el);
        if (!selector || seen.has(selector)) continue;
        seen.add(selector);

        const role = el.getAttribute('role') || '';
        const isNav = tag === 'a' && !!el.href;
        results.push({
            selector,
            text: labelFor(el),
            tag,
            is_navigation: isNav,
            is_button: tag === 'button' || role === 'button',
            resolved_url: isNav ? el.href : null,
            input_type: tag === 'input' ? (el.getAttribute('type') || 'text')
                      : (tag === 'select' ? 'select' : (tag === 'textarea' ? 'textarea' : null)),
        });
    }
    return JSON.stringify(results);
})()
"#;

/// Adapts an `eoka::Page` to the engine's [`Driver`] seam. The page (and the
/// browser behind it) stays owned by the caller.
pub struct CdpDriver {
    page: Page,
}

impl CdpDriver {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }
}

/// A lost CDP session means the driver is gone for good; anything else is a
/// per-attempt failure the cascade may retry.
fn map_err(e: eoka::Error) -> Error {
    match e {
        eoka::Error::ElementNotFound(s) => Error::ElementNotFound(s),
        other => {
            let msg = other.to_string();
            let lower = msg.to_lowercase();
            if lower.contains("connect") || lower.contains("closed") || lower.contains("websocket")
            {
                Error::DriverUnavailable(msg)
            } else {
                Error::Driver(msg)
            }
        }
    }
}

#[async_trait::async_trait]
impl Driver for CdpDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.page.goto(url).await.map_err(map_err)
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.page.click(selector).await.map_err(map_err)
    }

    async fn send_keys(&self, selector: &str, text: &str) -> Result<()> {
        self.page.fill(selector, text).await.map_err(map_err)
    }

    async fn execute_script(&self, script: &str) -> Result<serde_json::Value> {
        let value: serde_json::Value = self.page.evaluate(script).await.map_err(map_err)?;
        Ok(value)
    }

    async fn wait_for_element(&self, selector: &str, timeout_ms: u64) -> Result<()> {
        self.page
            .wait_for(selector, timeout_ms)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn page_info(&self) -> Result<PageInfo> {
        let url = self.page.url().await.map_err(map_err)?;
        let title = self.page.title().await.map_err(map_err)?;
        Ok(PageInfo { url, title })
    }

    async fn page_html(&self) -> Result<String> {
        let html: String = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .map_err(map_err)?;
        Ok(html)
    }

    async fn extract_interactive(&self) -> Result<Vec<ExtractedElement>> {
        let json_str: String = self.page.evaluate(EXTRACT_JS).await.map_err(map_err)?;
        let elements: Vec<ExtractedElement> = serde_json::from_str(&json_str)
            .map_err(|e| Error::Driver(format!("extract parse error: {}", e)))?;
        Ok(elements)
    }
}
