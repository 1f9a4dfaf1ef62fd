//! External entity sources
//!
//! The entity catalogue is maintained outside this engine. Sources only
//! read it; the resolver decides when.

use crate::error::{SignalError, SignalResult};
use crate::types::{EntityType, KnownEntity};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Read access to the external entity catalogue
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Load the full current catalogue
    async fn load_entities(&self) -> SignalResult<Vec<KnownEntity>>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Fixed in-memory catalogue
#[derive(Debug, Clone, Default)]
pub struct StaticEntitySource {
    entities: Vec<KnownEntity>,
}

impl StaticEntitySource {
    pub fn new(entities: Vec<KnownEntity>) -> Self {
        Self { entities }
    }
}

#[async_trait]
impl EntitySource for StaticEntitySource {
    async fn load_entities(&self) -> SignalResult<Vec<KnownEntity>> {
        Ok(self.entities.clone())
    }

    fn describe(&self) -> String {
        format!("static ({} entities)", self.entities.len())
    }
}

/// JSON array of `KnownEntity` records on disk
#[derive(Debug, Clone)]
pub struct JsonFileEntitySource {
    path: PathBuf,
}

impl JsonFileEntitySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EntitySource for JsonFileEntitySource {
    async fn load_entities(&self) -> SignalResult<Vec<KnownEntity>> {
        let json = tokio::fs::read_to_string(&self.path).await?;
        let entities: Vec<KnownEntity> = serde_json::from_str(&json)?;
        Ok(entities)
    }

    fn describe(&self) -> String {
        format!("json file {}", self.path.display())
    }
}

/// Catalogue stored in the `known_entities` / `entity_addresses` tables
///
/// Each load queries the database directly, so catalogue edits show up on
/// the next refresh without a restart.
#[derive(Debug, Clone)]
pub struct SqliteEntitySource {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl SqliteEntitySource {
    pub fn new(db_path: &str) -> SignalResult<Self> {
        let conn = Connection::open(db_path)?;

        let table_exists: bool = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name='known_entities'",
                [],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        if !table_exists {
            return Err(SignalError::EntityResolverStale(
                "known_entities table not found in database".to_string(),
            ));
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_string(),
        })
    }
}

#[async_trait]
impl EntitySource for SqliteEntitySource {
    async fn load_entities(&self) -> SignalResult<Vec<KnownEntity>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let mut addresses: HashMap<String, Vec<String>> = HashMap::new();
        {
            let mut stmt = conn.prepare_cached(
                "SELECT entity_id, address FROM entity_addresses ORDER BY entity_id, address",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (entity_id, address) = row?;
                addresses.entry(entity_id).or_default().push(address);
            }
        }

        let mut stmt = conn.prepare_cached(
            "SELECT entity_id, entity_type, name, metadata_json FROM known_entities ORDER BY entity_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut entities = Vec::new();
        for row in rows {
            let (entity_id, type_str, name, metadata_json) = row?;

            let Some(entity_type) = EntityType::from_str(&type_str) else {
                log::warn!("⚠️  Skipping entity {} with unknown type '{}'", entity_id, type_str);
                continue;
            };

            let metadata: BTreeMap<String, String> = match metadata_json {
                Some(json) => serde_json::from_str(&json)?,
                None => BTreeMap::new(),
            };

            entities.push(KnownEntity {
                addresses: addresses.remove(&entity_id).unwrap_or_default(),
                entity_id,
                entity_type,
                name,
                metadata,
            });
        }

        Ok(entities)
    }

    fn describe(&self) -> String {
        format!("sqlite {}", self.db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_sqlite_source_loads_entities_with_addresses() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();

        let mut conn = Connection::open(db_path).unwrap();
        crate::pipeline::db::run_schema_migrations(&mut conn, "sql").unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO known_entities (entity_id, entity_type, name, metadata_json)
                VALUES ('binance', 'exchange', 'Binance', '{"region":"global"}');
            INSERT INTO known_entities (entity_id, entity_type, name, metadata_json)
                VALUES ('foundry', 'mining_pool', 'Foundry USA', NULL);
            INSERT INTO known_entities (entity_id, entity_type, name, metadata_json)
                VALUES ('mystery', 'casino', 'Unknown Kind', NULL);
            INSERT INTO entity_addresses (address, entity_id) VALUES ('bc1-bin-1', 'binance');
            INSERT INTO entity_addresses (address, entity_id) VALUES ('bc1-bin-2', 'binance');
            INSERT INTO entity_addresses (address, entity_id) VALUES ('bc1-fdy-1', 'foundry');
            "#,
        )
        .unwrap();
        drop(conn);

        let source = SqliteEntitySource::new(db_path).unwrap();
        let entities = source.load_entities().await.unwrap();

        assert_eq!(entities.len(), 2, "unknown entity types are skipped");
        let binance = entities.iter().find(|e| e.entity_id == "binance").unwrap();
        assert_eq!(binance.entity_type, EntityType::Exchange);
        assert_eq!(binance.addresses, vec!["bc1-bin-1".to_string(), "bc1-bin-2".to_string()]);
        assert_eq!(binance.metadata.get("region"), Some(&"global".to_string()));
    }

    #[test]
    fn test_sqlite_source_requires_table() {
        let temp_file = NamedTempFile::new().unwrap();
        let result = SqliteEntitySource::new(temp_file.path().to_str().unwrap());
        assert!(matches!(result, Err(SignalError::EntityResolverStale(_))));
    }

    #[tokio::test]
    async fn test_json_source_reads_file() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(
            temp_file.path(),
            r#"[{"entity_id":"kraken","entity_type":"exchange","name":"Kraken","addresses":["k1"]}]"#,
        )
        .unwrap();

        let source = JsonFileEntitySource::new(temp_file.path());
        let entities = source.load_entities().await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "Kraken");
        assert!(entities[0].metadata.is_empty());
    }

    #[tokio::test]
    async fn test_json_source_missing_file_is_error() {
        let source = JsonFileEntitySource::new("/nonexistent/entities.json");
        assert!(source.load_entities().await.is_err());
    }
}
