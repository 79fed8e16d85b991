//! # testpilot
//!
//! AI-assisted browser testing engine. Give it a browser driver and a
//! free-text instruction; it resolves the instruction against what is
//! actually on the page, executes the best match through a retrying
//! fallback cascade, classifies what the page did in response, and keeps
//! discovering new actions as the page mutates.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use testpilot::{CdpDriver, Engine, EngineConfig};
//!
//! # async fn run(page: eoka::Page) -> testpilot::Result<()> {
//! let driver = Arc::new(CdpDriver::new(page));
//! let engine = Engine::new(driver, EngineConfig::default());
//!
//! engine.open("https://example.com").await?;
//! let report = engine.submit_instruction("click sign in").await?;
//! println!("{}", report.change.summary);
//! # Ok(())
//! # }
//! ```
//!
//! An [`Assistant`] implementation is optional everywhere: without one the
//! engine runs on local heuristics alone.

pub mod assistant;
pub mod catalog;
pub mod cdp;
pub mod change;
pub mod config;
pub mod context;
pub mod discovery;
pub mod driver;
pub mod engine;
pub mod error;
pub mod executor;
pub mod resolver;

pub use assistant::{Assistant, DiscoveredAction, InterpretedCommand, Priority, RankedElement};
pub use catalog::{Catalog, CatalogDiff, ElementKind, Method, NavigableElement};
pub use cdp::CdpDriver;
pub use change::{ChangeDetector, ChangeReport, Classification, SignalKind, Snapshot};
pub use config::EngineConfig;
pub use context::{ConversationContext, Role};
pub use discovery::{ActionBatch, DiscoveryHandle, DiscoveryLoop, KnownActions};
pub use driver::{Driver, ExtractedElement, PageInfo};
pub use engine::{Engine, EngineEvent, InstructionReport};
pub use error::{Error, Result};
pub use executor::{ExecutionOutcome, Executor, Strategy};
pub use resolver::{BuiltinCommand, Resolver, Suggestion, SuggestionTarget};
