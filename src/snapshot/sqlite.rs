//! SQLite-backed snapshot store.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::{Evidence, EvidencePolarity, Relationship, RelationshipId, RelationshipType};
use crate::memory::{Memory, MemoryId, MemoryKind};
use crate::snapshot::schema::{initialize_schema, is_initialized};
use crate::snapshot::{GraphSnapshot, SnapshotStore};

/// Stores a full graph snapshot in a SQLite database.
///
/// Each `save` replaces the previous contents inside one transaction.
pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotStore {
    /// Open or create a snapshot store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Storage(e.to_string()))?;

        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::Storage(e.to_string()))
    }

    /// When the last snapshot was saved, if any.
    pub fn saved_at(&self) -> Result<Option<DateTime<Utc>>> {
        let raw = self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM snapshot_meta WHERE key = 'saved_at'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()
        })?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| Error::Storage(format!("invalid saved_at '{}': {}", s, e)))
        })
        .transpose()
    }

    fn insert_memory(conn: &Connection, memory: &Memory) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO memories (
                id, kind, title, content, observations, context, tags,
                importance, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                memory.id.to_string(),
                memory.kind.as_str(),
                memory.title,
                memory.content,
                to_json(&memory.observations)?,
                to_json(&memory.context)?,
                to_json(&memory.tags)?,
                memory.importance,
                memory.version as i64,
                memory.created_at.to_rfc3339(),
                memory.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn insert_relationship(conn: &Connection, rel: &Relationship) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO relationships (
                id, source_id, target_id, rel_type, strength, confidence,
                evidence_count, counter_evidence_count, context_note, version,
                created_at, updated_at, last_validated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                rel.id.to_string(),
                rel.source_id.to_string(),
                rel.target_id.to_string(),
                rel.rel_type.as_str(),
                rel.strength,
                rel.confidence,
                rel.evidence_count as i64,
                rel.counter_evidence_count as i64,
                rel.context_note,
                rel.version as i64,
                rel.created_at.to_rfc3339(),
                rel.updated_at.to_rfc3339(),
                rel.last_validated.to_rfc3339(),
            ],
        )?;

        let mut stmt = conn.prepare_cached(
            "INSERT INTO evidence (
                relationship_id, position, polarity, strength, confidence, observed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (position, evidence) in rel.evidence.iter().enumerate() {
            let polarity = match evidence.polarity {
                EvidencePolarity::Supporting => "supporting",
                EvidencePolarity::Contradicting => "contradicting",
            };
            stmt.execute(params![
                rel.id.to_string(),
                position as i64,
                polarity,
                evidence.strength,
                evidence.confidence,
                evidence.observed_at.to_rfc3339(),
            ])?;
        }
        Ok(())
    }

    fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
        let id_str: String = row.get(0)?;
        let kind_str: String = row.get(1)?;

        Ok(Memory {
            id: MemoryId::parse(&id_str).map_err(|e| conversion(0, e))?,
            kind: kind_str.parse::<MemoryKind>().map_err(|e| conversion(1, e))?,
            title: row.get(2)?,
            content: row.get(3)?,
            observations: from_json(4, &row.get::<_, String>(4)?)?,
            context: from_json(5, &row.get::<_, String>(5)?)?,
            tags: from_json(6, &row.get::<_, String>(6)?)?,
            importance: row.get(7)?,
            version: row.get::<_, i64>(8)? as u64,
            created_at: parse_datetime(9, &row.get::<_, String>(9)?)?,
            updated_at: parse_datetime(10, &row.get::<_, String>(10)?)?,
        })
    }

    fn row_to_relationship(row: &rusqlite::Row) -> rusqlite::Result<Relationship> {
        let id_str: String = row.get(0)?;
        let source_str: String = row.get(1)?;
        let target_str: String = row.get(2)?;
        let type_str: String = row.get(3)?;

        Ok(Relationship {
            id: RelationshipId::parse(&id_str).map_err(|e| conversion(0, e))?,
            source_id: MemoryId::parse(&source_str).map_err(|e| conversion(1, e))?,
            target_id: MemoryId::parse(&target_str).map_err(|e| conversion(2, e))?,
            rel_type: type_str
                .parse::<RelationshipType>()
                .map_err(|e| conversion(3, e))?,
            strength: row.get(4)?,
            confidence: row.get(5)?,
            evidence_count: row.get::<_, i64>(6)? as u64,
            counter_evidence_count: row.get::<_, i64>(7)? as u64,
            context_note: row.get(8)?,
            version: row.get::<_, i64>(9)? as u64,
            evidence: Vec::new(),
            created_at: parse_datetime(10, &row.get::<_, String>(10)?)?,
            updated_at: parse_datetime(11, &row.get::<_, String>(11)?)?,
            last_validated: parse_datetime(12, &row.get::<_, String>(12)?)?,
        })
    }

    fn row_to_evidence(row: &rusqlite::Row) -> rusqlite::Result<Evidence> {
        let polarity = match row.get::<_, String>(0)?.as_str() {
            "supporting" => EvidencePolarity::Supporting,
            "contradicting" => EvidencePolarity::Contradicting,
            other => {
                return Err(conversion(
                    0,
                    Error::validation(format!("unknown evidence polarity '{}'", other)),
                ))
            }
        };
        Ok(Evidence {
            polarity,
            strength: row.get(1)?,
            confidence: row.get(2)?,
            observed_at: parse_datetime(3, &row.get::<_, String>(3)?)?,
        })
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn save(&self, snapshot: &GraphSnapshot) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM evidence", [])?;
            tx.execute("DELETE FROM relationships", [])?;
            tx.execute("DELETE FROM memories", [])?;
            for memory in &snapshot.memories {
                Self::insert_memory(&tx, memory)?;
            }
            for rel in &snapshot.relationships {
                Self::insert_relationship(&tx, rel)?;
            }
            tx.execute(
                "INSERT INTO snapshot_meta (key, value) VALUES ('saved_at', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![Utc::now().to_rfc3339()],
            )?;
            tx.commit()
        })?;
        debug!(
            memories = snapshot.memories.len(),
            relationships = snapshot.relationships.len(),
            "Saved snapshot to SQLite"
        );
        Ok(())
    }

    fn load(&self) -> Result<GraphSnapshot> {
        let mut snapshot = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, title, content, observations, context, tags,
                        importance, version, created_at, updated_at
                 FROM memories ORDER BY id",
            )?;
            let memories = stmt
                .query_map([], |row| Self::row_to_memory(row))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut stmt = conn.prepare(
                "SELECT id, source_id, target_id, rel_type, strength, confidence,
                        evidence_count, counter_evidence_count, context_note, version,
                        created_at, updated_at, last_validated
                 FROM relationships ORDER BY id",
            )?;
            let mut relationships = stmt
                .query_map([], |row| Self::row_to_relationship(row))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut stmt = conn.prepare(
                "SELECT polarity, strength, confidence, observed_at
                 FROM evidence WHERE relationship_id = ?1 ORDER BY position",
            )?;
            for rel in &mut relationships {
                rel.evidence = stmt
                    .query_map(params![rel.id.to_string()], |row| Self::row_to_evidence(row))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
            }

            Ok(GraphSnapshot {
                memories,
                relationships,
            })
        })?;
        snapshot.sort();
        Ok(snapshot)
    }
}

fn conversion<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn from_json<T: serde::de::DeserializeOwned>(index: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| conversion(index, e))
}

fn parse_datetime(index: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(index, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::KnowledgeGraph;
    use crate::graph::NewRelationship;
    use crate::memory::{MemoryContext, NewMemory};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample_graph() -> KnowledgeGraph {
        let kg = KnowledgeGraph::new();
        let problem = kg
            .create_memory(
                NewMemory::new(MemoryKind::Problem, "build fails on missing dep")
                    .with_title("Missing dependency")
                    .with_context(MemoryContext::new().with_project("atlas").with_technology("cargo"))
                    .with_tag("build"),
            )
            .unwrap();
        let solution = kg
            .create_memory(NewMemory::new(MemoryKind::Solution, "pin dependency version"))
            .unwrap();
        kg.append_observation(&problem.id, "only on clean checkouts")
            .unwrap();
        kg.create_relationship(
            NewRelationship::new(solution.id, problem.id, RelationshipType::Solves)
                .with_strength(0.8)
                .with_note("confirmed in CI"),
        )
        .unwrap();
        kg.create_relationship(
            NewRelationship::new(solution.id, problem.id, RelationshipType::Solves)
                .with_strength(0.4)
                .contradicting(),
        )
        .unwrap();
        kg
    }

    #[test]
    fn test_round_trip_in_memory() {
        let store = SqliteSnapshotStore::in_memory().unwrap();
        let exported = sample_graph().export().unwrap();

        store.save(&exported).unwrap();
        assert_eq!(store.load().unwrap(), exported);
        assert!(store.saved_at().unwrap().is_some());
    }

    #[test]
    fn test_save_replaces_previous_contents() {
        let store = SqliteSnapshotStore::in_memory().unwrap();
        store.save(&sample_graph().export().unwrap()).unwrap();
        let second = sample_graph().export().unwrap();
        store.save(&second).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.memories.len(), 2);
        assert_eq!(loaded, second);
    }

    #[test]
    fn test_reopen_file_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.db");
        let exported = sample_graph().export().unwrap();
        {
            let store = SqliteSnapshotStore::open(&path).unwrap();
            store.save(&exported).unwrap();
        }
        let store = SqliteSnapshotStore::open(&path).unwrap();
        let restored = KnowledgeGraph::load_from(&store, Default::default()).unwrap();
        assert_eq!(restored.export().unwrap(), exported);
    }

    #[test]
    fn test_empty_store_loads_empty_snapshot() {
        let store = SqliteSnapshotStore::in_memory().unwrap();
        assert!(store.load().unwrap().is_empty());
        assert!(store.saved_at().unwrap().is_none());
    }
}
