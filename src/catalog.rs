//! Element catalog — the snapshot of currently actionable elements.
//!
//! The catalog is rebuilt wholesale after every navigation or click that
//! plausibly changed the page. Entries are never mutated in place; stale
//! references are discarded with the snapshot that produced them.

use std::collections::HashSet;
use std::fmt;

use url::Url;

use crate::driver::{Driver, ExtractedElement};
use crate::Result;

/// What kind of actionable thing an element is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Link,
    Button,
    FormField,
    FormSubmit,
    GenericAction,
}

impl ElementKind {
    /// Ordering used by the empty-instruction default suggestion list:
    /// form fields > submit > buttons > links > generic.
    pub fn rank(self) -> u8 {
        match self {
            ElementKind::FormField => 0,
            ElementKind::FormSubmit => 1,
            ElementKind::Button => 2,
            ElementKind::Link => 3,
            ElementKind::GenericAction => 4,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Link => f.write_str("link"),
            ElementKind::Button => f.write_str("button"),
            ElementKind::FormField => f.write_str("field"),
            ElementKind::FormSubmit => f.write_str("submit"),
            ElementKind::GenericAction => f.write_str("action"),
        }
    }
}

/// Intended interaction for an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Navigate,
    Click,
    TypeText,
    Submit,
}

impl Method {
    /// Whether a method is consistent with an element kind.
    pub fn consistent_with(self, kind: ElementKind) -> bool {
        match kind {
            ElementKind::FormField => self == Method::TypeText,
            ElementKind::FormSubmit => self == Method::Submit,
            ElementKind::Button | ElementKind::GenericAction => self == Method::Click,
            // Links navigate when a resolved URL exists, otherwise click.
            ElementKind::Link => matches!(self, Method::Navigate | Method::Click),
        }
    }
}

/// One actionable thing on the page.
#[derive(Debug, Clone)]
pub struct NavigableElement {
    pub kind: ElementKind,
    /// Visible text / accessible description.
    pub label: String,
    /// Driver-addressable locator.
    pub selector: String,
    /// Resolved absolute URL; present only for links.
    pub target_url: Option<String>,
    pub method: Method,
    /// Hash for stale-reference detection across refreshes.
    pub fingerprint: u64,
}

impl NavigableElement {
    /// Map a raw extracted element into a catalog entry. Returns `None` when
    /// the element carries neither a selector nor a target URL.
    pub fn from_extracted(raw: &ExtractedElement, base: Option<&Url>) -> Option<Self> {
        let target_url = raw.resolved_url.as_deref().and_then(|href| {
            if let Ok(abs) = Url::parse(href) {
                Some(abs.to_string())
            } else {
                base.and_then(|b| b.join(href).ok()).map(|u| u.to_string())
            }
        });

        if raw.selector.is_empty() && target_url.is_none() {
            return None;
        }

        let input_type = raw.input_type.as_deref().unwrap_or("");
        let kind = match raw.tag.as_str() {
            "a" => ElementKind::Link,
            "button" => {
                if input_type == "submit" {
                    ElementKind::FormSubmit
                } else {
                    ElementKind::Button
                }
            }
            "input" => match input_type {
                "submit" => ElementKind::FormSubmit,
                "button" => ElementKind::Button,
                _ => ElementKind::FormField,
            },
            "select" | "textarea" => ElementKind::FormField,
            _ if raw.is_navigation => ElementKind::Link,
            _ if raw.is_button => ElementKind::Button,
            _ => ElementKind::GenericAction,
        };

        let method = match kind {
            ElementKind::FormField => Method::TypeText,
            ElementKind::FormSubmit => Method::Submit,
            ElementKind::Link if target_url.is_some() => Method::Navigate,
            ElementKind::Link => Method::Click,
            _ => Method::Click,
        };

        let fingerprint = Self::compute_fingerprint(&raw.tag, &raw.text, &raw.selector);
        Some(Self {
            kind,
            label: raw.text.clone(),
            selector: raw.selector.clone(),
            target_url,
            method,
            fingerprint,
        })
    }

    /// Fingerprint from element properties, for stale detection. Includes the
    /// selector prefix so visually identical siblings stay distinct.
    pub fn compute_fingerprint(tag: &str, label: &str, selector: &str) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        tag.hash(&mut hasher);
        label.hash(&mut hasher);
        let prefix_len = selector
            .char_indices()
            .take(50)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        selector[..prefix_len].hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for NavigableElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if !self.label.is_empty() {
            write!(f, " \"{}\"", self.label)?;
        }
        if let Some(ref url) = self.target_url {
            write!(f, " -> {}", url)?;
        }
        Ok(())
    }
}

/// Snapshot of actionable elements for one page state.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    elements: Vec<NavigableElement>,
    /// URL the snapshot was taken at.
    url: String,
}

/// Difference between two catalog snapshots, in elements.
#[derive(Debug)]
pub struct CatalogDiff {
    pub added: usize,
    pub removed: usize,
    pub total: usize,
}

impl fmt::Display for CatalogDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.added == 0 && self.removed == 0 {
            write!(f, "no changes ({} elements)", self.total)
        } else {
            write!(
                f,
                "+{} added, -{} removed ({} total)",
                self.added, self.removed, self.total
            )
        }
    }
}

impl Catalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a fresh snapshot from the driver's element enumeration.
    pub async fn refresh(driver: &dyn Driver) -> Result<Self> {
        let info = driver.page_info().await?;
        let base = Url::parse(&info.url).ok();
        let raw = driver.extract_interactive().await?;
        let elements = raw
            .iter()
            .filter_map(|r| NavigableElement::from_extracted(r, base.as_ref()))
            .collect();
        Ok(Self {
            elements,
            url: info.url,
        })
    }

    pub fn from_elements(elements: Vec<NavigableElement>, url: impl Into<String>) -> Self {
        Self {
            elements,
            url: url.into(),
        }
    }

    pub fn elements(&self) -> &[NavigableElement] {
        &self.elements
    }

    pub fn get(&self, index: usize) -> Option<&NavigableElement> {
        self.elements.get(index)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Compare against the previous snapshot by fingerprint.
    pub fn diff(&self, previous: &Catalog) -> CatalogDiff {
        let old: HashSet<u64> = previous.elements.iter().map(|e| e.fingerprint).collect();
        let new: HashSet<u64> = self.elements.iter().map(|e| e.fingerprint).collect();
        CatalogDiff {
            added: new.difference(&old).count(),
            removed: old.difference(&new).count(),
            total: self.elements.len(),
        }
    }

    /// Compact one-line-per-element listing for prompt or UI consumption.
    pub fn listing(&self) -> String {
        let mut out = String::with_capacity(self.elements.len() * 40);
        for (i, el) in self.elements.iter().enumerate() {
            out.push_str(&format!("{}: {}\n", i, el));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(tag: &str, text: &str, selector: &str) -> ExtractedElement {
        ExtractedElement {
            selector: selector.into(),
            text: text.into(),
            tag: tag.into(),
            is_navigation: tag == "a",
            is_button: tag == "button",
            resolved_url: if tag == "a" {
                Some("https://example.com/next".into())
            } else {
                None
            },
            input_type: match tag {
                "input" => Some("text".into()),
                "select" => Some("select".into()),
                _ => None,
            },
        }
    }

    #[test]
    fn test_link_gets_navigate_method_and_url() {
        let el = NavigableElement::from_extracted(&raw("a", "Next", "#next"), None).unwrap();
        assert_eq!(el.kind, ElementKind::Link);
        assert_eq!(el.method, Method::Navigate);
        assert_eq!(el.target_url.as_deref(), Some("https://example.com/next"));
        assert!(el.method.consistent_with(el.kind));
    }

    #[test]
    fn test_relative_href_resolves_against_base() {
        let base = Url::parse("https://example.com/a/b").unwrap();
        let mut r = raw("a", "Docs", "#docs");
        r.resolved_url = Some("/docs".into());
        let el = NavigableElement::from_extracted(&r, Some(&base)).unwrap();
        assert_eq!(el.target_url.as_deref(), Some("https://example.com/docs"));
    }

    #[test]
    fn test_form_field_gets_type_text() {
        let el = NavigableElement::from_extracted(&raw("input", "Email", "#email"), None).unwrap();
        assert_eq!(el.kind, ElementKind::FormField);
        assert_eq!(el.method, Method::TypeText);
    }

    #[test]
    fn test_submit_input_gets_submit() {
        let mut r = raw("input", "Go", "#go");
        r.input_type = Some("submit".into());
        let el = NavigableElement::from_extracted(&r, None).unwrap();
        assert_eq!(el.kind, ElementKind::FormSubmit);
        assert_eq!(el.method, Method::Submit);
    }

    #[test]
    fn test_element_without_selector_or_url_is_dropped() {
        let mut r = raw("div", "mystery", "");
        r.is_navigation = false;
        r.is_button = false;
        r.resolved_url = None;
        assert!(NavigableElement::from_extracted(&r, None).is_none());
    }

    #[test]
    fn test_kind_rank_ordering() {
        assert!(ElementKind::FormField.rank() < ElementKind::FormSubmit.rank());
        assert!(ElementKind::FormSubmit.rank() < ElementKind::Button.rank());
        assert!(ElementKind::Button.rank() < ElementKind::Link.rank());
        assert!(ElementKind::Link.rank() < ElementKind::GenericAction.rank());
    }

    #[test]
    fn test_fingerprint_distinguishes_siblings() {
        let a = NavigableElement::compute_fingerprint("button", "OK", "div > button:nth-of-type(1)");
        let b = NavigableElement::compute_fingerprint("button", "OK", "div > button:nth-of-type(2)");
        assert_ne!(a, b);
    }

    #[test]
    fn test_diff_counts_by_fingerprint() {
        let old = Catalog::from_elements(
            vec![
                NavigableElement::from_extracted(&raw("button", "One", "#one"), None).unwrap(),
                NavigableElement::from_extracted(&raw("button", "Two", "#two"), None).unwrap(),
            ],
            "https://example.com",
        );
        let new = Catalog::from_elements(
            vec![
                NavigableElement::from_extracted(&raw("button", "Two", "#two"), None).unwrap(),
                NavigableElement::from_extracted(&raw("button", "Three", "#three"), None).unwrap(),
            ],
            "https://example.com",
        );
        let diff = new.diff(&old);
        assert_eq!(diff.added, 1);
        assert_eq!(diff.removed, 1);
        assert_eq!(diff.total, 2);
        assert_eq!(diff.to_string(), "+1 added, -1 removed (2 total)");
    }

    #[test]
    fn test_listing_format() {
        let catalog = Catalog::from_elements(
            vec![NavigableElement::from_extracted(&raw("button", "Sign In", "#signin"), None).unwrap()],
            "https://example.com",
        );
        assert_eq!(catalog.listing(), "0: [button] \"Sign In\"\n");
    }
}
