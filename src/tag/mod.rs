//! Tag entities and the process-wide tag-graph cache.
//!
//! The archive organizes tags in a directed graph: parent/child, meta/sub,
//! synonym and merge relations. This module keeps exactly one live in-memory
//! [`Tag`] per name via the [`TagRegistry`], and redirects superseded names to
//! their canonical replacement when the archive merges tags.
//!
//! Relations are stored as plain names, never object references. Any stale
//! name is re-resolved through the registry at access time, which always
//! yields the live canonical object even when the merge happened after the
//! name was first linked.

mod entity;
mod error;
mod name;
mod parse;
mod registry;

pub use entity::{Tag, TagCategory, TagMetadata, TagState, TagUpdate};
pub use error::TagError;
pub use name::{name_from_url_component, url_component_from_name};
pub use parse::{CHILD_DISPLAY_LIMIT, ParsedTagPage, parse_tag_page};
pub use registry::TagRegistry;
