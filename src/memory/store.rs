//! In-memory entity store: CRUD and optimistic versioning for memories.
//!
//! The store knows nothing about relationships or the search index. Cascades
//! and index synchronization are coordinated by [`GraphState`](crate::engine::GraphState).

use chrono::{DateTime, Utc};
use im::OrdMap;

use crate::error::{Error, Result};
use crate::memory::types::*;

/// Memory records keyed by id. Iteration order is id ascending.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    memories: OrdMap<MemoryId, Memory>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    pub fn contains(&self, id: &MemoryId) -> bool {
        self.memories.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Memory> {
        self.memories.values()
    }

    /// Create a memory with version 1.
    pub fn create(&mut self, new: NewMemory, now: DateTime<Utc>) -> Result<Memory> {
        let content = validate_content(&new.content)?;
        let title = match new.title {
            Some(ref t) => validate_title(t)?,
            None => None,
        };
        let importance = validate_importance(new.importance.unwrap_or(0.5))?;

        let memory = Memory {
            id: MemoryId::new(),
            kind: new.kind,
            title,
            content,
            observations: Vec::new(),
            context: new.context,
            tags: normalize_tags(&new.tags),
            importance,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.memories.insert(memory.id, memory.clone());
        Ok(memory)
    }

    /// Get a memory by id.
    pub fn get(&self, id: &MemoryId) -> Result<&Memory> {
        self.memories
            .get(id)
            .ok_or_else(|| Error::memory_not_found(id))
    }

    /// Apply a patch if `expected_version` matches the stored version.
    pub fn update(
        &mut self,
        id: &MemoryId,
        expected_version: u64,
        patch: MemoryPatch,
        now: DateTime<Utc>,
    ) -> Result<Memory> {
        let current = self.get(id)?;
        if current.version != expected_version {
            return Err(Error::conflict(id, expected_version, current.version));
        }

        // Validate everything before touching the record.
        let content = patch.content.as_deref().map(validate_content).transpose()?;
        let title = match patch.title {
            Some(ref t) => Some(validate_title(t)?),
            None => None,
        };
        let importance = patch.importance.map(validate_importance).transpose()?;

        let memory = self.get_mut(id)?;
        if let Some(content) = content {
            memory.content = content;
        }
        if let Some(title) = title {
            memory.title = title;
        }
        if let Some(importance) = importance {
            memory.importance = importance;
        }
        if let Some(context) = patch.context {
            memory.context = context;
        }
        if let Some(ref tags) = patch.tags {
            memory.tags = normalize_tags(tags);
        }
        touch(memory, now);
        Ok(memory.clone())
    }

    /// Append one observation.
    pub fn append_observation(
        &mut self,
        id: &MemoryId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Memory> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::validation("observation must not be empty"));
        }
        let memory = self.get_mut(id)?;
        memory.observations.push(text.to_string());
        touch(memory, now);
        Ok(memory.clone())
    }

    /// Append every observation not already present, in order. Bumps the
    /// version once, and only if something was appended.
    pub fn absorb_observations(
        &mut self,
        id: &MemoryId,
        observations: &[String],
        now: DateTime<Utc>,
    ) -> Result<Memory> {
        let memory = self.get_mut(id)?;
        let mut changed = false;
        for obs in observations {
            if !memory.observations.contains(obs) {
                memory.observations.push(obs.clone());
                changed = true;
            }
        }
        if changed {
            touch(memory, now);
        }
        Ok(memory.clone())
    }

    /// Remove a memory, returning it.
    pub fn remove(&mut self, id: &MemoryId) -> Result<Memory> {
        self.memories
            .remove(id)
            .ok_or_else(|| Error::memory_not_found(id))
    }

    /// Insert a fully formed record (snapshot import).
    pub fn insert_existing(&mut self, memory: Memory) -> Result<()> {
        validate_content(&memory.content)?;
        validate_importance(memory.importance)?;
        if memory.version == 0 {
            return Err(Error::validation(format!(
                "memory {} has version 0",
                memory.id
            )));
        }
        if self.memories.contains_key(&memory.id) {
            return Err(Error::consistency(format!(
                "duplicate memory id {}",
                memory.id
            )));
        }
        self.memories.insert(memory.id, memory);
        Ok(())
    }

    /// List memories matching a query, most recently updated first.
    pub fn list(&self, query: &MemoryQuery) -> Vec<Memory> {
        let mut matched: Vec<&Memory> = self.iter().filter(|m| query.matches(m)).collect();
        matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        matched
            .into_iter()
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Newest `updated_at` in the store.
    pub fn latest_update(&self) -> Option<DateTime<Utc>> {
        self.iter().map(|m| m.updated_at).max()
    }

    fn get_mut(&mut self, id: &MemoryId) -> Result<&mut Memory> {
        self.memories
            .get_mut(id)
            .ok_or_else(|| Error::memory_not_found(id))
    }
}

fn touch(memory: &mut Memory, now: DateTime<Utc>) {
    memory.version += 1;
    memory.updated_at = now.max(memory.updated_at);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(kind: MemoryKind, content: &str) -> (EntityStore, Memory) {
        let mut store = EntityStore::new();
        let memory = store.create(NewMemory::new(kind, content), Utc::now()).unwrap();
        (store, memory)
    }

    #[test]
    fn test_create_and_get() {
        let (store, memory) = store_with(MemoryKind::Problem, "  build fails on missing dep ");
        let got = store.get(&memory.id).unwrap();
        assert_eq!(got.content, "build fails on missing dep");
        assert_eq!(got.version, 1);
        assert_eq!(got.importance, 0.5);
    }

    #[test]
    fn test_empty_content_rejected() {
        let mut store = EntityStore::new();
        let err = store
            .create(NewMemory::new(MemoryKind::Task, "   "), Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_bumps_version() {
        let (mut store, memory) = store_with(MemoryKind::Solution, "pin dependency version");
        let updated = store
            .update(
                &memory.id,
                1,
                MemoryPatch::new().content("pin the lockfile").importance(0.9),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.content, "pin the lockfile");
        assert_eq!(updated.kind, MemoryKind::Solution);
    }

    #[test]
    fn test_stale_version_conflicts() {
        let (mut store, memory) = store_with(MemoryKind::Solution, "pin dependency version");
        store
            .update(&memory.id, 1, MemoryPatch::new().importance(0.7), Utc::now())
            .unwrap();
        let err = store
            .update(&memory.id, 1, MemoryPatch::new().importance(0.1), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        assert_eq!(store.get(&memory.id).unwrap().importance, 0.7);
    }

    #[test]
    fn test_invalid_patch_leaves_record_untouched() {
        let (mut store, memory) = store_with(MemoryKind::Task, "write docs");
        let err = store
            .update(
                &memory.id,
                1,
                MemoryPatch::new().content("new content").importance(2.0),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let got = store.get(&memory.id).unwrap();
        assert_eq!(got.content, "write docs");
        assert_eq!(got.version, 1);
    }

    #[test]
    fn test_append_observation() {
        let (mut store, memory) = store_with(MemoryKind::Task, "write docs");
        let updated = store
            .append_observation(&memory.id, "reviewer asked for examples", Utc::now())
            .unwrap();
        assert_eq!(updated.observations, vec!["reviewer asked for examples"]);
        assert_eq!(updated.version, 2);
        assert!(store.append_observation(&memory.id, " ", Utc::now()).is_err());
    }

    #[test]
    fn test_absorb_observations_is_idempotent() {
        let (mut store, memory) = store_with(MemoryKind::Task, "write docs");
        let obs = vec!["a".to_string(), "b".to_string()];
        let first = store.absorb_observations(&memory.id, &obs, Utc::now()).unwrap();
        let second = store.absorb_observations(&memory.id, &obs, Utc::now()).unwrap();
        assert_eq!(first.observations, obs);
        assert_eq!(first.version, 2);
        assert_eq!(second.version, 2);
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let mut store = EntityStore::new();
        let err = store.remove(&MemoryId::new()).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_list_filters() {
        let mut store = EntityStore::new();
        let now = Utc::now();
        store
            .create(
                NewMemory::new(MemoryKind::Problem, "p1")
                    .with_context(MemoryContext::new().with_project("api"))
                    .with_importance(0.9),
                now,
            )
            .unwrap();
        store
            .create(NewMemory::new(MemoryKind::Problem, "p2").with_tag("CI"), now)
            .unwrap();
        store
            .create(NewMemory::new(MemoryKind::Solution, "s1"), now)
            .unwrap();

        let problems = store.list(&MemoryQuery::new().kinds(vec![MemoryKind::Problem]));
        assert_eq!(problems.len(), 2);

        let api = store.list(&MemoryQuery::new().project("API"));
        assert_eq!(api.len(), 1);
        assert_eq!(api[0].content, "p1");

        let tagged = store.list(&MemoryQuery::new().tags(vec!["ci".to_string()]));
        assert_eq!(tagged.len(), 1);

        let important = store.list(&MemoryQuery::new().min_importance(0.8));
        assert_eq!(important.len(), 1);

        assert_eq!(store.list(&MemoryQuery::new().limit(2)).len(), 2);
    }
}
