//! The tag entity: one named node of the archive's tag graph.
//!
//! A [`Tag`] is identified by its display name for its whole lifetime; every
//! other field is filled in by loading the tag's page through the registry.
//! Relation fields hold plain names, not references - resolving a name back
//! to an entity always goes through the registry so merged names land on the
//! canonical object.
//!
//! Accessors are strict about load state: reading a relation off an unloaded
//! tag is a sequencing error, and reading one off a tag whose page errored
//! reports that error instead of pretending the relation is empty.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::TagError;

/// The archive's fixed tag categories.
///
/// The site's old "Freeform" category was renamed to "Additional Tags"; both
/// labels parse to [`TagCategory::AdditionalTags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TagCategory {
    Fandom,
    Character,
    Relationship,
    AdditionalTags,
    ArchiveWarning,
    Category,
    Rating,
    /// The page named a category this client does not know.
    Unknown,
}

impl TagCategory {
    /// Canonical label for the category.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fandom => "Fandom",
            Self::Character => "Character",
            Self::Relationship => "Relationship",
            Self::AdditionalTags => "Additional Tags",
            Self::ArchiveWarning => "ArchiveWarning",
            Self::Category => "Category",
            Self::Rating => "Rating",
            Self::Unknown => "Unknown",
        }
    }

    /// Parses the label as it appears on the site (tag pages, search banners,
    /// child-listbox class names).
    #[must_use]
    pub fn from_site_label(label: &str) -> Self {
        match label.trim() {
            "Fandom" | "Fandoms" => Self::Fandom,
            "Character" | "Characters" => Self::Character,
            "Relationship" | "Relationships" => Self::Relationship,
            "Freeform" | "Freeforms" | "Additional Tags" => Self::AdditionalTags,
            "ArchiveWarning" | "Archive Warning" | "Warnings" => Self::ArchiveWarning,
            "Category" | "Categories" => Self::Category,
            "Rating" | "Ratings" => Self::Rating,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for TagCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagCategory {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_site_label(s))
    }
}

/// Observable load state of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    /// Created as a placeholder; no page fetched yet.
    Unloaded,
    /// The page was fetched but resolved to an error (404 not found, 303
    /// flash error, 508 merge loop). Counts as loaded for caching purposes.
    Errored(u16),
    /// The page was fetched and parsed.
    Loaded,
}

/// Scalar fields parsed from a loaded tag page.
///
/// Only re-derivable scalars are kept; the raw page is never retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TagRecord {
    pub(crate) category: TagCategory,
    pub(crate) canonical: bool,
    /// Name this tag was merged into, when the page carries a merger notice.
    pub(crate) merged_into: Option<String>,
    pub(crate) synonym_names: Vec<String>,
    pub(crate) parent_names: Vec<String>,
    pub(crate) immediate_parent_names: Vec<String>,
    pub(crate) metatag_names: Vec<String>,
    pub(crate) immediate_metatag_names: Vec<String>,
    pub(crate) subtag_names: Vec<String>,
    pub(crate) immediate_subtag_names: Vec<String>,
    /// Child tag names grouped by category label. The site truncates each
    /// group at 300 entries.
    pub(crate) children_names: BTreeMap<String, Vec<String>>,
    pub(crate) date_queried: DateTime<Utc>,
}

/// Partial update a collaborator may apply to a tag it discovered elsewhere
/// (e.g. a search-result banner), without touching load state.
///
/// Only these fields may be seeded; a loaded tag ignores updates entirely
/// because its page is the authoritative source.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TagUpdate {
    /// Whether the banner marked the tag canonical.
    pub canonical: Option<bool>,
    /// Category shown next to the tag.
    pub category: Option<TagCategory>,
    /// Number of works using the tag.
    pub uses: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
enum State {
    Unloaded,
    Errored(u16),
    Loaded(TagRecord),
}

#[derive(Debug, Serialize, Deserialize)]
struct Inner {
    state: State,
    seed: TagUpdate,
}

/// One named tag node. Equality and hashing use the name only.
#[derive(Debug)]
pub struct Tag {
    name: String,
    inner: RwLock<Inner>,
}

/// Serialized form of a tag for cache dumps.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TagSnapshot {
    name: String,
    inner: Inner,
}

impl Tag {
    /// Creates a fresh unloaded tag. Construction never consults the cache;
    /// identity de-duplication is the registry's job.
    #[must_use]
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner {
                state: State::Unloaded,
                seed: TagUpdate::default(),
            }),
        }
    }

    /// The tag's display name (immutable identity).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current load state.
    #[must_use]
    pub fn state(&self) -> TagState {
        match self.read().state {
            State::Unloaded => TagState::Unloaded,
            State::Errored(code) => TagState::Errored(code),
            State::Loaded(_) => TagState::Loaded,
        }
    }

    /// Whether a page was fetched for this tag. Error pages count as loaded;
    /// their relation accessors fail with the recorded query error.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        !matches!(self.read().state, State::Unloaded)
    }

    /// Page-level error recorded for this tag, if any.
    #[must_use]
    pub fn query_error(&self) -> Option<u16> {
        match self.read().state {
            State::Errored(code) => Some(code),
            _ => None,
        }
    }

    /// Whether the tag is canonical.
    ///
    /// Available once loaded, or earlier when a collaborator seeded it via
    /// [`Tag::apply_update`].
    ///
    /// # Errors
    ///
    /// [`TagError::Unloaded`] before load without a seed, [`TagError::Query`]
    /// when the page errored.
    pub fn canonical(&self) -> Result<bool, TagError> {
        let inner = self.read();
        match &inner.state {
            State::Loaded(record) => Ok(record.canonical),
            State::Errored(code) => Err(TagError::query(&self.name, *code, "canonical")),
            State::Unloaded => inner
                .seed
                .canonical
                .ok_or_else(|| TagError::unloaded(&self.name, "canonical")),
        }
    }

    /// The tag's category, loaded or seeded.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Tag::canonical`].
    pub fn category(&self) -> Result<TagCategory, TagError> {
        let inner = self.read();
        match &inner.state {
            State::Loaded(record) => Ok(record.category),
            State::Errored(code) => Err(TagError::query(&self.name, *code, "category")),
            State::Unloaded => inner
                .seed
                .category
                .ok_or_else(|| TagError::unloaded(&self.name, "category")),
        }
    }

    /// Number of works using this tag, when a search result seeded it.
    /// Tag pages themselves do not carry the count.
    #[must_use]
    pub fn uses(&self) -> Option<u64> {
        self.read().seed.uses
    }

    /// Name this tag was merged into, if the page carried a merger notice.
    ///
    /// # Errors
    ///
    /// Fails on unloaded or query-errored tags like every relation accessor.
    pub fn merged_into(&self) -> Result<Option<String>, TagError> {
        self.with_record("merged_into", |record| record.merged_into.clone())
    }

    /// Names of tags made synonymous to this one.
    ///
    /// # Errors
    ///
    /// Fails on unloaded or query-errored tags.
    pub fn synonym_names(&self) -> Result<Vec<String>, TagError> {
        self.with_record("synonym_names", |record| record.synonym_names.clone())
    }

    /// Names of all parent tags listed on the page.
    ///
    /// # Errors
    ///
    /// Fails on unloaded or query-errored tags.
    pub fn parent_names(&self) -> Result<Vec<String>, TagError> {
        self.with_record("parent_names", |record| record.parent_names.clone())
    }

    /// Names of the parent tags immediately above this tag.
    ///
    /// # Errors
    ///
    /// Fails on unloaded or query-errored tags.
    pub fn immediate_parent_names(&self) -> Result<Vec<String>, TagError> {
        self.with_record("immediate_parent_names", |record| {
            record.immediate_parent_names.clone()
        })
    }

    /// Names of all metatags (transitive).
    ///
    /// # Errors
    ///
    /// Fails on unloaded or query-errored tags.
    pub fn metatag_names(&self) -> Result<Vec<String>, TagError> {
        self.with_record("metatag_names", |record| record.metatag_names.clone())
    }

    /// Names of the metatags immediately above this tag.
    ///
    /// # Errors
    ///
    /// Fails on unloaded or query-errored tags.
    pub fn immediate_metatag_names(&self) -> Result<Vec<String>, TagError> {
        self.with_record("immediate_metatag_names", |record| {
            record.immediate_metatag_names.clone()
        })
    }

    /// Names of all subtags (transitive).
    ///
    /// # Errors
    ///
    /// Fails on unloaded or query-errored tags.
    pub fn subtag_names(&self) -> Result<Vec<String>, TagError> {
        self.with_record("subtag_names", |record| record.subtag_names.clone())
    }

    /// Names of the subtags immediately below this tag.
    ///
    /// # Errors
    ///
    /// Fails on unloaded or query-errored tags.
    pub fn immediate_subtag_names(&self) -> Result<Vec<String>, TagError> {
        self.with_record("immediate_subtag_names", |record| {
            record.immediate_subtag_names.clone()
        })
    }

    /// Child tag names grouped by category label.
    ///
    /// # Errors
    ///
    /// Fails on unloaded or query-errored tags.
    pub fn children_names(&self) -> Result<BTreeMap<String, Vec<String>>, TagError> {
        self.with_record("children_names", |record| record.children_names.clone())
    }

    /// When this tag's page was last queried.
    #[must_use]
    pub fn date_queried(&self) -> Option<DateTime<Utc>> {
        match &self.read().state {
            State::Loaded(record) => Some(record.date_queried),
            _ => None,
        }
    }

    /// Applies a partial update from a collaborator. Returns whether anything
    /// was applied; loaded tags ignore updates because the page is
    /// authoritative.
    pub fn apply_update(&self, update: TagUpdate) -> bool {
        let mut inner = self.write();
        if matches!(inner.state, State::Loaded(_)) {
            return false;
        }
        if let Some(canonical) = update.canonical {
            inner.seed.canonical = Some(canonical);
        }
        if let Some(category) = update.category {
            inner.seed.category = Some(category);
        }
        if let Some(uses) = update.uses {
            inner.seed.uses = Some(uses);
        }
        true
    }

    /// Serializable scalar snapshot of everything known about the tag,
    /// reduced to name and state when the tag is unloaded or errored.
    #[must_use]
    pub fn metadata(&self) -> TagMetadata {
        let inner = self.read();
        match &inner.state {
            State::Loaded(record) => TagMetadata {
                name: self.name.clone(),
                loaded: true,
                query_error: None,
                canonical: Some(record.canonical),
                category: Some(record.category),
                uses: inner.seed.uses,
                date_queried: Some(record.date_queried),
                parent_names: Some(record.parent_names.clone()),
                metatag_names: Some(record.metatag_names.clone()),
                subtag_names: Some(record.subtag_names.clone()),
                immediate_metatag_names: Some(record.immediate_metatag_names.clone()),
                immediate_subtag_names: Some(record.immediate_subtag_names.clone()),
                synonym_names: Some(record.synonym_names.clone()),
                children: Some(record.children_names.clone()),
            },
            State::Errored(code) => TagMetadata {
                name: self.name.clone(),
                loaded: true,
                query_error: Some(*code),
                ..TagMetadata::bare(&self.name)
            },
            State::Unloaded => TagMetadata::bare(&self.name),
        }
    }

    pub(crate) fn set_loaded(&self, record: TagRecord) {
        self.write().state = State::Loaded(record);
    }

    pub(crate) fn set_errored(&self, code: u16) {
        self.write().state = State::Errored(code);
    }

    /// Appends a name to the loaded synonym list if absent. Used during merge
    /// resolution: the canonical tag's own page occasionally omits a synonym.
    pub(crate) fn push_synonym(&self, name: &str) {
        if let State::Loaded(record) = &mut self.write().state {
            if !record.synonym_names.iter().any(|n| n == name) {
                record.synonym_names.push(name.to_string());
            }
        }
    }

    pub(crate) fn snapshot(&self) -> TagSnapshot {
        let inner = self.read();
        TagSnapshot {
            name: self.name.clone(),
            inner: Inner {
                state: match &inner.state {
                    State::Unloaded => State::Unloaded,
                    State::Errored(code) => State::Errored(*code),
                    State::Loaded(record) => State::Loaded(record.clone()),
                },
                seed: inner.seed,
            },
        }
    }

    pub(crate) fn from_snapshot(snapshot: TagSnapshot) -> Self {
        Self {
            name: snapshot.name,
            inner: RwLock::new(snapshot.inner),
        }
    }

    // Lock poisoning can only follow a panic in another accessor; the state
    // transitions here are single-assignment, so the inner value stays usable.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn with_record<T>(
        &self,
        what: &'static str,
        f: impl FnOnce(&TagRecord) -> T,
    ) -> Result<T, TagError> {
        match &self.read().state {
            State::Loaded(record) => Ok(f(record)),
            State::Errored(code) => Err(TagError::query(&self.name, *code, what)),
            State::Unloaded => Err(TagError::unloaded(&self.name, what)),
        }
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for Tag {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tag {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Tag [{}]>", self.name)
    }
}

/// Serializable scalar view of a tag, mirroring what the original exposes for
/// export: full fields for successfully loaded tags, name and error state
/// otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagMetadata {
    pub name: String,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_error: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<TagCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uses: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_queried: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metatag_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtag_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immediate_metatag_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immediate_subtag_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synonym_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<BTreeMap<String, Vec<String>>>,
}

impl TagMetadata {
    fn bare(name: &str) -> Self {
        Self {
            name: name.to_string(),
            loaded: false,
            query_error: None,
            canonical: None,
            category: None,
            uses: None,
            date_queried: None,
            parent_names: None,
            metatag_names: None,
            subtag_names: None,
            immediate_metatag_names: None,
            immediate_subtag_names: None,
            synonym_names: None,
            children: None,
        }
    }
}
