//! The process-wide tag registry: one canonical in-memory tag per name.
//!
//! The registry is an explicitly constructed object passed by reference into
//! every component that resolves tags; there is no hidden singleton. It owns
//! the name-to-entity slot map, the cache-hit counter, and the merge
//! redirection logic that keeps superseded names pointing at their canonical
//! replacement.
//!
//! # Locking
//!
//! The slot map sits behind a `std::sync::Mutex` held only for the
//! check-then-insert sequence, never across a network await. A freshly
//! inserted placeholder is published before its page load starts, so
//! concurrent lookups for the same name observe the in-progress entity
//! instead of creating a duplicate.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::entity::{Tag, TagSnapshot};
use super::error::TagError;
use super::name::url_component_from_name;
use super::parse::parse_tag_page;
use crate::request::Requester;

/// Query-error code recorded on a tag whose merge chain loops back on itself.
const MERGE_LOOP_DETECTED: u16 = 508;

/// Serialized cache contents: entities keyed by their own name, plus the
/// slot table mapping every cached lookup key to an entity name. Keeping the
/// two apart lets several keys share one entity after restore, exactly as
/// they did before the dump.
#[derive(Debug, Serialize, Deserialize)]
struct CacheDump {
    entities: BTreeMap<String, TagSnapshot>,
    slots: BTreeMap<String, String>,
}

/// Process-wide de-duplicating cache of [`Tag`] entities.
#[derive(Debug)]
pub struct TagRegistry {
    requester: Arc<Requester>,
    base_url: String,
    slots: Mutex<HashMap<String, Arc<Tag>>>,
    /// Count of lookups that found an already-cached entity.
    hits: AtomicU64,
}

impl TagRegistry {
    /// Creates a registry resolving tag pages under `base_url`
    /// (`{base_url}/tags/{escaped name}`).
    #[must_use]
    pub fn new(requester: Arc<Requester>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            requester,
            base_url,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
        }
    }

    /// Returns the cached entity for `name`, or creates an unloaded
    /// placeholder, and loads it when `load_immediately` is set and the
    /// entity has no page yet.
    ///
    /// The check-then-insert is atomic: two callers racing on the same name
    /// always end up with the same `Arc`. After a load that discovered a
    /// merge, the returned entity is the canonical one the slot now points
    /// at.
    ///
    /// # Errors
    ///
    /// Propagates load failures: transport errors leave the entity unloaded,
    /// page errors mark it query-errored and surface as
    /// [`TagError::InvalidId`], merge loops as [`TagError::MergeCycle`].
    #[instrument(skip(self), fields(name = %name))]
    pub async fn get_or_create(
        &self,
        name: &str,
        load_immediately: bool,
    ) -> Result<Arc<Tag>, TagError> {
        let tag = self.slot_or_insert(name);
        if load_immediately && !tag.is_loaded() {
            self.load(&tag).await?;
            // The load may have redirected this name to its canonical entity.
            return Ok(self.cached(name).unwrap_or(tag));
        }
        Ok(tag)
    }

    /// Returns the cached entity for `name` without creating or loading.
    #[must_use]
    pub fn cached(&self, name: &str) -> Option<Arc<Tag>> {
        self.lock_slots().get(name).map(Arc::clone)
    }

    /// Whether `name` currently has a cache slot.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.lock_slots().contains_key(name)
    }

    /// Fetches and parses the tag's page, then applies merge or synonym
    /// redirection to the slot map.
    ///
    /// # Errors
    ///
    /// - Transport failure: the tag stays unloaded, [`TagError::Request`].
    /// - Page error (404 / flash error): the tag is marked query-errored and
    ///   [`TagError::InvalidId`] is returned; the entity stays cached.
    /// - Merge loop: the tag is marked query-errored (code 508) and
    ///   [`TagError::MergeCycle`] is returned.
    #[instrument(skip(self, tag), fields(name = %tag.name()))]
    pub async fn load(&self, tag: &Arc<Tag>) -> Result<(), TagError> {
        let mut visited = vec![tag.name().to_string()];
        self.load_inner(tag, &mut visited).await
    }

    fn load_inner<'a>(
        &'a self,
        tag: &'a Arc<Tag>,
        visited: &'a mut Vec<String>,
    ) -> Pin<Box<dyn Future<Output = Result<(), TagError>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.tag_url(tag.name());
            let response = self.requester.fetch("GET", &url, None).await?;
            let body = response
                .text()
                .await
                .map_err(|e| crate::request::RequestError::network(&url, e))?;

            let page = parse_tag_page(&body);
            if let Some(code) = page.query_error {
                debug!(code, "tag page resolved to an error state");
                tag.set_errored(code);
                return Err(TagError::invalid_id(tag.name()));
            }

            let merged_into = page.merged_into.clone();
            let has_synonyms = !page.synonym_names.is_empty();
            tag.set_loaded(page.into_record());

            if let Some(target) = merged_into {
                if visited.iter().any(|seen| *seen == target) {
                    let mut chain = visited.clone();
                    chain.push(target);
                    warn!(?chain, "merge chain loops, abandoning resolution");
                    tag.set_errored(MERGE_LOOP_DETECTED);
                    return Err(TagError::MergeCycle {
                        name: tag.name().to_string(),
                        chain,
                    });
                }
                visited.push(target.clone());

                info!(from = %tag.name(), to = %target, "tag was merged, redirecting cache");
                let canonical = self.slot_or_insert(&target);
                if !canonical.is_loaded() {
                    self.load_inner(&canonical, visited).await?;
                }
                // The target itself may have been merged onward; its slot
                // points at the end of the chain by now.
                let canonical = self.cached(&target).unwrap_or(canonical);

                // The canonical page's synonym list is occasionally missing
                // this tag; patch it so the relation reads both ways.
                canonical.push_synonym(tag.name());
                self.lock_slots()
                    .insert(tag.name().to_string(), Arc::clone(&canonical));
            } else if has_synonyms {
                self.alias_synonyms(tag);
            }

            Ok(())
        })
    }

    /// Resolves the tag's parent names into cached entities.
    ///
    /// # Errors
    ///
    /// Fails when the tag is unloaded or query-errored.
    pub fn get_parents(&self, tag: &Arc<Tag>, immediate: bool) -> Result<Vec<Arc<Tag>>, TagError> {
        let names = if immediate {
            tag.immediate_parent_names()?
        } else {
            tag.parent_names()?
        };
        Ok(self.resolve_names(&names))
    }

    /// Resolves the tag's metatag names into cached entities.
    ///
    /// # Errors
    ///
    /// Fails when the tag is unloaded or query-errored.
    pub fn get_metatags(&self, tag: &Arc<Tag>, immediate: bool) -> Result<Vec<Arc<Tag>>, TagError> {
        let names = if immediate {
            tag.immediate_metatag_names()?
        } else {
            tag.metatag_names()?
        };
        Ok(self.resolve_names(&names))
    }

    /// Resolves the tag's subtag names into cached entities.
    ///
    /// # Errors
    ///
    /// Fails when the tag is unloaded or query-errored.
    pub fn get_subtags(&self, tag: &Arc<Tag>, immediate: bool) -> Result<Vec<Arc<Tag>>, TagError> {
        let names = if immediate {
            tag.immediate_subtag_names()?
        } else {
            tag.subtag_names()?
        };
        Ok(self.resolve_names(&names))
    }

    /// Resolves the tag's children (all categories flattened) into cached
    /// entities.
    ///
    /// # Errors
    ///
    /// Fails when the tag is unloaded or query-errored.
    pub fn get_children(&self, tag: &Arc<Tag>) -> Result<Vec<Arc<Tag>>, TagError> {
        let names: Vec<String> = tag
            .children_names()?
            .into_values()
            .flatten()
            .collect();
        Ok(self.resolve_names(&names))
    }

    /// Serializes the whole cache for persistence across runs.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::Persist`] if serialization fails.
    pub fn dump(&self) -> Result<Vec<u8>, TagError> {
        let dump = {
            let slots = self.lock_slots();
            let mut entities = BTreeMap::new();
            let mut slot_names = BTreeMap::new();
            for (key, tag) in slots.iter() {
                entities
                    .entry(tag.name().to_string())
                    .or_insert_with(|| tag.snapshot());
                slot_names.insert(key.clone(), tag.name().to_string());
            }
            CacheDump {
                entities,
                slots: slot_names,
            }
        };
        serde_json::to_vec(&dump).map_err(|source| TagError::Persist { source })
    }

    /// Replaces the cache contents with a previously dumped snapshot,
    /// reconstructing entity identity: keys that shared an entity before the
    /// dump share one `Arc` again.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::Persist`] if the snapshot cannot be deserialized.
    pub fn restore(&self, bytes: &[u8]) -> Result<(), TagError> {
        let dump: CacheDump =
            serde_json::from_slice(bytes).map_err(|source| TagError::Persist { source })?;

        let entities: HashMap<String, Arc<Tag>> = dump
            .entities
            .into_iter()
            .map(|(name, snapshot)| (name, Arc::new(Tag::from_snapshot(snapshot))))
            .collect();

        let mut slots = self.lock_slots();
        slots.clear();
        for (key, entity_name) in dump.slots {
            match entities.get(&entity_name) {
                Some(tag) => {
                    slots.insert(key, Arc::clone(tag));
                }
                None => warn!(%key, %entity_name, "dropping dangling slot from cache dump"),
            }
        }
        info!(entries = slots.len(), "cache restored");
        Ok(())
    }

    /// Number of lookups that hit an already-cached entity.
    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// The requester this registry fetches through.
    #[must_use]
    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    /// Number of cache slots (aliases included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_slots().is_empty()
    }

    /// Sorted names of the distinct entities currently cached. Superseded
    /// names whose slot was redirected do not appear; their canonical
    /// replacement does.
    #[must_use]
    pub fn cached_names(&self) -> Vec<String> {
        let slots = self.lock_slots();
        let mut names: Vec<String> = slots
            .values()
            .map(|tag| tag.name().to_string())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        names
    }

    /// Drops every cached entity.
    pub fn clear(&self) {
        self.lock_slots().clear();
    }

    fn tag_url(&self, name: &str) -> String {
        format!("{}/tags/{}", self.base_url, url_component_from_name(name))
    }

    /// Atomic lookup-or-insert; counts a cache hit when the slot existed.
    fn slot_or_insert(&self, name: &str) -> Arc<Tag> {
        let mut slots = self.lock_slots();
        if let Some(tag) = slots.get(name) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(tag);
        }
        debug!(name, "inserting unloaded tag placeholder");
        let tag = Arc::new(Tag::new(name));
        slots.insert(name.to_string(), Arc::clone(&tag));
        tag
    }

    /// Points every synonym name's slot at the given entity.
    fn alias_synonyms(&self, tag: &Arc<Tag>) {
        let Ok(synonyms) = tag.synonym_names() else {
            return;
        };
        if synonyms.is_empty() {
            return;
        }
        let mut slots = self.lock_slots();
        for name in synonyms {
            slots.insert(name, Arc::clone(tag));
        }
    }

    /// De-duplicates names and resolves each through the cache without
    /// loading, so merged names land on their canonical entity.
    fn resolve_names(&self, names: &[String]) -> Vec<Arc<Tag>> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for name in names {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let tag = self.slot_or_insert(name);
            if !resolved.iter().any(|existing| Arc::ptr_eq(existing, &tag)) {
                resolved.push(tag);
            }
        }
        resolved
    }

    // Slot operations never panic while holding the lock; recover the map if
    // a poisoned guard ever shows up anyway.
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, Arc<Tag>>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::request::RequesterConfig;

    fn test_registry() -> TagRegistry {
        let requester = Arc::new(Requester::new(RequesterConfig::default()));
        TagRegistry::new(requester, "https://archive.example/")
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let registry = test_registry();
        assert_eq!(
            registry.tag_url("Hurt/Comfort"),
            "https://archive.example/tags/Hurt*s*Comfort"
        );
    }

    #[tokio::test]
    async fn test_get_or_create_without_load_is_placeholder() {
        let registry = test_registry();
        let tag = registry.get_or_create("Fluff", false).await.unwrap();
        assert!(!tag.is_loaded());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.access_count(), 0);
    }

    #[tokio::test]
    async fn test_repeat_lookup_counts_hit_and_shares_entity() {
        let registry = test_registry();
        let first = registry.get_or_create("Fluff", false).await.unwrap();
        let second = registry.get_or_create("Fluff", false).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.access_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_names_deduplicates() {
        let registry = test_registry();
        let names = vec![
            "No Fandom".to_string(),
            "Emotions".to_string(),
            "No Fandom".to_string(),
        ];
        let resolved = registry.resolve_names(&names);
        assert_eq!(resolved.len(), 2);
    }

    #[tokio::test]
    async fn test_cached_names_deduplicates_aliases() {
        let registry = test_registry();
        let tag = registry.get_or_create("Fluff", false).await.unwrap();
        registry
            .lock_slots()
            .insert("Fluffy".to_string(), Arc::clone(&tag));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.cached_names(), vec!["Fluff".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_empties_cache() {
        let registry = test_registry();
        registry.get_or_create("Fluff", false).await.unwrap();
        assert!(!registry.is_empty());
        registry.clear();
        assert!(registry.is_empty());
    }
}
