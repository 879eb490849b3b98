//! Error types for the tag module.
//!
//! Relation accessors never degrade to empty collections: a caller can always
//! distinguish "this tag has no parents" from "this tag's page could not be
//! read", because the latter is an error value.

use thiserror::Error;

use crate::request::RequestError;

/// Errors that can occur while loading or querying tags.
#[derive(Debug, Error)]
pub enum TagError {
    /// A relation or attribute was read before the tag was loaded.
    ///
    /// This is a caller-side sequencing error and is never retried.
    #[error("tag <{name}> is not loaded; load it before reading {what}")]
    Unloaded {
        /// The tag whose state was read too early.
        name: String,
        /// The attribute or relation that was requested.
        what: &'static str,
    },

    /// The tag's page resolved to an error state (404, access denied, flash
    /// error). Recorded permanently on the entity; every relation accessor
    /// fails with this until the tag is reloaded successfully.
    #[error("tag <{name}> query failed with error {code}; cannot read {what}")]
    Query {
        /// The tag whose page errored.
        name: String,
        /// Page-level error code (404 not found, 303 flash error).
        code: u16,
        /// The attribute or relation that was requested.
        what: &'static str,
    },

    /// The name does not correspond to any resolvable tag page.
    #[error("no tag page found for <{name}>")]
    InvalidId {
        /// The unresolvable name.
        name: String,
    },

    /// Following merge targets revisited a name already on the chain.
    ///
    /// The archive is not supposed to produce merge cycles; when one shows up
    /// anyway the tags on the loop are marked query-errored instead of
    /// recursing forever.
    #[error("merge cycle detected while resolving <{name}>: {chain:?}")]
    MergeCycle {
        /// The tag whose load discovered the cycle.
        name: String,
        /// The names visited along the merge chain, in order.
        chain: Vec<String>,
    },

    /// Transport-level failure fetching the tag's page.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Cache dump or restore failed to (de)serialize.
    #[error("cache persistence failed: {source}")]
    Persist {
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl TagError {
    /// Creates an unloaded-access error.
    pub fn unloaded(name: impl Into<String>, what: &'static str) -> Self {
        Self::Unloaded {
            name: name.into(),
            what,
        }
    }

    /// Creates a query-error access failure.
    pub fn query(name: impl Into<String>, code: u16, what: &'static str) -> Self {
        Self::Query {
            name: name.into(),
            code,
            what,
        }
    }

    /// Creates an invalid-id error.
    pub fn invalid_id(name: impl Into<String>) -> Self {
        Self::InvalidId { name: name.into() }
    }
}
