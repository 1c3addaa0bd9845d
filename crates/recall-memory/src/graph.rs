use serde::{Deserialize, Serialize};

/// A named node in the knowledge graph with free-text observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<String>,
}

impl Entity {
    pub fn new(name: &str, entity_type: &str, observations: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            observations: observations.iter().map(|o| o.to_string()).collect(),
        }
    }
}

/// A directed, typed edge between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub from: String,
    pub to: String,
    #[serde(rename = "relationType")]
    pub relation_type: String,
}

/// Result shape shared by every read operation: `{entities, relations}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl KnowledgeGraph {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Keep only relations whose endpoints are both present in `entities`.
    pub(crate) fn with_relations_from(mut self, relations: &[Relation]) -> Self {
        self.relations = relations
            .iter()
            .filter(|r| {
                self.entities.iter().any(|e| e.name == r.from)
                    && self.entities.iter().any(|e| e.name == r.to)
            })
            .cloned()
            .collect();
        self
    }
}

/// Observations to append to an existing entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationInput {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    pub contents: Vec<String>,
}

/// What was actually appended for one entity (duplicates are dropped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationResult {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    #[serde(rename = "addedObservations")]
    pub added_observations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_wire_names() {
        let entity = Entity::new("jwt-decision", "decision", &["Use RS256"]);
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["entityType"], "decision");
        assert_eq!(json["observations"][0], "Use RS256");
        assert!(json.get("entity_type").is_none());
    }

    #[test]
    fn test_graph_missing_sections_default() {
        let graph: KnowledgeGraph = serde_json::from_str("{}").unwrap();
        assert!(graph.is_empty());
        assert!(graph.relations.is_empty());
    }

    #[test]
    fn test_relations_filtered_to_selected_entities() {
        let graph = KnowledgeGraph {
            entities: vec![
                Entity::new("a", "module", &[]),
                Entity::new("b", "module", &[]),
            ],
            relations: Vec::new(),
        };
        let all = vec![
            Relation {
                from: "a".into(),
                to: "b".into(),
                relation_type: "depends_on".into(),
            },
            Relation {
                from: "a".into(),
                to: "c".into(),
                relation_type: "depends_on".into(),
            },
        ];
        let graph = graph.with_relations_from(&all);
        assert_eq!(graph.relations.len(), 1);
        assert_eq!(graph.relations[0].to, "b");
    }
}
