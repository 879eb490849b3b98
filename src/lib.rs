//! Fanarchive Core Library
//!
//! This library provides the core of an unofficial client for a fan-fiction
//! archive website: a rate-limited HTTP requester and a process-wide tag-graph
//! cache with merge/synonym redirection. Page-specific scraping of works,
//! series, users and search results is layered on top by callers; this crate
//! only fetches pages politely and keeps one canonical in-memory object per
//! tag name.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`request`] - Rate-limited HTTP requester with 429 backoff
//! - [`tag`] - Tag entities, the registry cache, and tag-page parsing
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fanarchive::{Requester, RequesterConfig, TagRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let requester = Arc::new(Requester::new(RequesterConfig::default()));
//! let registry = TagRegistry::new(requester, "https://archiveofourown.org");
//!
//! let fluff = registry.get_or_create("Fluff", true).await?;
//! for parent in registry.get_parents(&fluff, false)? {
//!     println!("parent: {}", parent.name());
//! }
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod request;
pub mod tag;
mod user_agent;

// Re-export commonly used types
pub use request::{RequestError, Requester, RequesterConfig, parse_retry_after};
pub use tag::{
    Tag, TagCategory, TagError, TagMetadata, TagRegistry, TagState, TagUpdate,
    name_from_url_component, url_component_from_name,
};
