use std::fs;
use std::io::{Read as _, Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::graph::{Entity, KnowledgeGraph, ObservationInput, ObservationResult, Relation};

/// Transport to a knowledge-graph memory store.
///
/// The client never assumes anything about where the graph lives; any store that
/// answers these five operations can sit behind it.
pub trait MemoryBackend: Send + Sync {
    fn search_nodes(&self, query: &str) -> Result<KnowledgeGraph, MemoryError>;

    fn open_nodes(&self, names: &[String]) -> Result<KnowledgeGraph, MemoryError>;

    fn read_graph(&self) -> Result<KnowledgeGraph, MemoryError>;

    /// Returns the entities that were actually created (existing names are skipped).
    fn create_entities(&self, entities: &[Entity]) -> Result<Vec<Entity>, MemoryError>;

    fn add_observations(
        &self,
        observations: &[ObservationInput],
    ) -> Result<Vec<ObservationResult>, MemoryError>;
}

/// One line of the graph file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum GraphRecord {
    Entity(Entity),
    Relation(Relation),
}

/// Knowledge graph persisted as JSON lines, one entity or relation per line.
#[derive(Debug, Clone)]
pub struct JsonlGraphBackend {
    path: PathBuf,
}

impl JsonlGraphBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the whole graph under a shared lock. A missing file is an empty graph.
    fn load(&self) -> Result<KnowledgeGraph, MemoryError> {
        let file = match fs::OpenOptions::new().read(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(KnowledgeGraph::default())
            }
            Err(e) => return Err(e.into()),
        };
        fs2::FileExt::lock_shared(&file)?;
        let mut data = String::new();
        let read = (&file).read_to_string(&mut data);
        fs2::FileExt::unlock(&file)?;
        read?;
        parse_graph(&data)
    }

    /// Read-modify-write the graph while holding an exclusive lock.
    fn modify<T>(
        &self,
        f: impl FnOnce(&mut KnowledgeGraph) -> Result<T, MemoryError>,
    ) -> Result<T, MemoryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        fs2::FileExt::lock_exclusive(&file)?;

        let result = rewrite_locked(&file, f);
        fs2::FileExt::unlock(&file)?;
        result
    }
}

/// Body of [`JsonlGraphBackend::modify`]; the caller owns the lock.
fn rewrite_locked<T>(
    file: &fs::File,
    f: impl FnOnce(&mut KnowledgeGraph) -> Result<T, MemoryError>,
) -> Result<T, MemoryError> {
    let mut data = String::new();
    let mut reader = file;
    reader.read_to_string(&mut data)?;
    let mut graph = parse_graph(&data)?;
    let out = f(&mut graph)?;

    let serialized = serialize_graph(&graph)?;
    file.set_len(0)?;
    let mut writer = file;
    writer.seek(SeekFrom::Start(0))?;
    writer.write_all(serialized.as_bytes())?;
    Ok(out)
}

fn parse_graph(data: &str) -> Result<KnowledgeGraph, MemoryError> {
    let mut graph = KnowledgeGraph::default();
    for (idx, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: GraphRecord =
            serde_json::from_str(line).map_err(|e| MemoryError::Parse {
                line: idx + 1,
                message: e.to_string(),
            })?;
        match record {
            GraphRecord::Entity(e) => graph.entities.push(e),
            GraphRecord::Relation(r) => graph.relations.push(r),
        }
    }
    Ok(graph)
}

fn serialize_graph(graph: &KnowledgeGraph) -> Result<String, MemoryError> {
    let mut out = String::new();
    for entity in &graph.entities {
        out.push_str(&serde_json::to_string(&GraphRecord::Entity(entity.clone()))?);
        out.push('\n');
    }
    for relation in &graph.relations {
        out.push_str(&serde_json::to_string(&GraphRecord::Relation(
            relation.clone(),
        ))?);
        out.push('\n');
    }
    Ok(out)
}

/// Case-insensitive match against name, type and observations.
/// `a OR b` matches when either alternative does.
fn entity_matches(entity: &Entity, alternatives: &[String]) -> bool {
    alternatives.iter().any(|needle| {
        entity.name.to_lowercase().contains(needle)
            || entity.entity_type.to_lowercase().contains(needle)
            || entity
                .observations
                .iter()
                .any(|o| o.to_lowercase().contains(needle))
    })
}

impl MemoryBackend for JsonlGraphBackend {
    fn search_nodes(&self, query: &str) -> Result<KnowledgeGraph, MemoryError> {
        let graph = self.load()?;
        let alternatives: Vec<String> = query
            .split(" OR ")
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty())
            .collect();
        if alternatives.is_empty() {
            return Ok(KnowledgeGraph::default());
        }

        let selected = KnowledgeGraph {
            entities: graph
                .entities
                .iter()
                .filter(|e| entity_matches(e, &alternatives))
                .cloned()
                .collect(),
            relations: Vec::new(),
        };
        Ok(selected.with_relations_from(&graph.relations))
    }

    fn open_nodes(&self, names: &[String]) -> Result<KnowledgeGraph, MemoryError> {
        let graph = self.load()?;
        let selected = KnowledgeGraph {
            entities: graph
                .entities
                .iter()
                .filter(|e| names.contains(&e.name))
                .cloned()
                .collect(),
            relations: Vec::new(),
        };
        Ok(selected.with_relations_from(&graph.relations))
    }

    fn read_graph(&self) -> Result<KnowledgeGraph, MemoryError> {
        self.load()
    }

    fn create_entities(&self, entities: &[Entity]) -> Result<Vec<Entity>, MemoryError> {
        self.modify(|graph| {
            let mut created = Vec::new();
            for entity in entities {
                if graph.entities.iter().any(|e| e.name == entity.name) {
                    continue;
                }
                graph.entities.push(entity.clone());
                created.push(entity.clone());
            }
            Ok(created)
        })
    }

    fn add_observations(
        &self,
        observations: &[ObservationInput],
    ) -> Result<Vec<ObservationResult>, MemoryError> {
        self.modify(|graph| {
            let mut results = Vec::new();
            for input in observations {
                let entity = graph
                    .entities
                    .iter_mut()
                    .find(|e| e.name == input.entity_name)
                    .ok_or_else(|| MemoryError::EntityNotFound {
                        name: input.entity_name.clone(),
                    })?;
                let mut added = Vec::new();
                for content in &input.contents {
                    if !entity.observations.contains(content) {
                        entity.observations.push(content.clone());
                        added.push(content.clone());
                    }
                }
                results.push(ObservationResult {
                    entity_name: input.entity_name.clone(),
                    added_observations: added,
                });
            }
            Ok(results)
        })
    }
}
