//! Graph structures carried by PackStream.
//!
//! Node and Relationship map one-to-one onto their wire structures. A Path
//! travels in a compressed form (unique nodes, unique unbound relationships
//! and an index sequence); [`Path::to_wire`] and [`Path::from_wire`] convert
//! between the two shapes.

use std::collections::HashMap;

use super::types::PackStreamValue;
use super::PackStreamError;

/// A graph node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node identity
    pub id: i64,
    /// Node labels
    pub labels: Vec<String>,
    /// Node properties
    pub properties: HashMap<String, PackStreamValue>,
}

impl Node {
    /// Create a new node.
    pub fn new(id: i64, labels: Vec<String>, properties: HashMap<String, PackStreamValue>) -> Self {
        Self {
            id,
            labels,
            properties,
        }
    }

    /// Check whether the node carries a label.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Get a property.
    pub fn get(&self, key: &str) -> Option<&PackStreamValue> {
        self.properties.get(key)
    }
}

/// A graph relationship with both endpoint identities.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    /// Relationship identity
    pub id: i64,
    /// Start node identity
    pub start_node_id: i64,
    /// End node identity
    pub end_node_id: i64,
    /// Relationship type
    pub rel_type: String,
    /// Relationship properties
    pub properties: HashMap<String, PackStreamValue>,
}

impl Relationship {
    /// Create a new relationship.
    pub fn new(
        id: i64,
        start_node_id: i64,
        end_node_id: i64,
        rel_type: impl Into<String>,
        properties: HashMap<String, PackStreamValue>,
    ) -> Self {
        Self {
            id,
            start_node_id,
            end_node_id,
            rel_type: rel_type.into(),
            properties,
        }
    }

    /// Get a property.
    pub fn get(&self, key: &str) -> Option<&PackStreamValue> {
        self.properties.get(key)
    }

    fn connects(&self, a: i64, b: i64) -> bool {
        (self.start_node_id == a && self.end_node_id == b)
            || (self.start_node_id == b && self.end_node_id == a)
    }
}

/// A relationship without endpoints, only found inside a path on the wire.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UnboundRelationship {
    pub id: i64,
    pub rel_type: String,
    pub properties: HashMap<String, PackStreamValue>,
}

impl UnboundRelationship {
    fn bind(&self, start_node_id: i64, end_node_id: i64) -> Relationship {
        Relationship::new(
            self.id,
            start_node_id,
            end_node_id,
            self.rel_type.clone(),
            self.properties.clone(),
        )
    }
}

impl From<&Relationship> for UnboundRelationship {
    fn from(rel: &Relationship) -> Self {
        Self {
            id: rel.id,
            rel_type: rel.rel_type.clone(),
            properties: rel.properties.clone(),
        }
    }
}

/// Wire shape of a path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PathParts {
    pub nodes: Vec<Node>,
    pub relationships: Vec<UnboundRelationship>,
    pub indices: Vec<i64>,
}

/// An alternating sequence of nodes and relationships.
///
/// `relationships[i]` always connects `nodes[i]` and `nodes[i + 1]`, in
/// either direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    nodes: Vec<Node>,
    relationships: Vec<Relationship>,
}

impl Path {
    /// Build a path, checking that every relationship joins its neighbours.
    pub fn new(nodes: Vec<Node>, relationships: Vec<Relationship>) -> Result<Self, PackStreamError> {
        if nodes.is_empty() {
            return Err(PackStreamError::InvalidStructure(
                "Path requires at least one node".into(),
            ));
        }
        if relationships.len() + 1 != nodes.len() {
            return Err(PackStreamError::InvalidStructure(format!(
                "Path with {} nodes must have {} relationships, got {}",
                nodes.len(),
                nodes.len() - 1,
                relationships.len()
            )));
        }
        for (i, rel) in relationships.iter().enumerate() {
            if !rel.connects(nodes[i].id, nodes[i + 1].id) {
                return Err(PackStreamError::InvalidStructure(format!(
                    "Relationship {} does not connect nodes {} and {}",
                    rel.id,
                    nodes[i].id,
                    nodes[i + 1].id
                )));
            }
        }
        Ok(Self {
            nodes,
            relationships,
        })
    }

    /// A path of a single node.
    pub fn single(node: Node) -> Self {
        Self {
            nodes: vec![node],
            relationships: Vec::new(),
        }
    }

    /// Nodes in traversal order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Relationships in traversal order.
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// First node.
    pub fn start(&self) -> &Node {
        &self.nodes[0]
    }

    /// Last node.
    pub fn end(&self) -> &Node {
        &self.nodes[self.nodes.len() - 1]
    }

    /// Number of relationships.
    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    /// True for a single-node path.
    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    pub(crate) fn to_wire(&self) -> PathParts {
        let mut nodes: Vec<Node> = Vec::new();
        let mut relationships: Vec<UnboundRelationship> = Vec::new();
        let mut indices = Vec::with_capacity(self.relationships.len() * 2);

        fn index_of<T>(items: &[T], pred: impl Fn(&T) -> bool) -> Option<usize> {
            items.iter().position(pred)
        }

        for node in &self.nodes {
            if index_of(&nodes, |n| n.id == node.id).is_none() {
                nodes.push(node.clone());
            }
        }

        for (i, rel) in self.relationships.iter().enumerate() {
            let position = match index_of(&relationships, |r| r.id == rel.id) {
                Some(idx) => idx,
                None => {
                    relationships.push(UnboundRelationship::from(rel));
                    relationships.len() - 1
                }
            };
            let rel_index = position as i64 + 1;
            let prev = &self.nodes[i];
            let next = &self.nodes[i + 1];
            let forward = rel.start_node_id == prev.id && rel.end_node_id == next.id;
            indices.push(if forward { rel_index } else { -rel_index });
            // Nodes were collected above, so the lookup cannot miss.
            let node_index = index_of(&nodes, |n| n.id == next.id).unwrap_or(0);
            indices.push(node_index as i64);
        }

        PathParts {
            nodes,
            relationships,
            indices,
        }
    }

    pub(crate) fn from_wire(parts: PathParts) -> Result<Self, PackStreamError> {
        let PathParts {
            nodes: unique_nodes,
            relationships: unique_rels,
            indices,
        } = parts;

        let first = unique_nodes.first().cloned().ok_or_else(|| {
            PackStreamError::InvalidStructure("Path has no nodes".into())
        })?;
        if indices.len() % 2 != 0 {
            return Err(PackStreamError::InvalidStructure(format!(
                "Path index sequence must have even length, got {}",
                indices.len()
            )));
        }

        let mut nodes = Vec::with_capacity(indices.len() / 2 + 1);
        let mut relationships = Vec::with_capacity(indices.len() / 2);
        nodes.push(first);

        for pair in indices.chunks_exact(2) {
            let (rel_index, node_index) = (pair[0], pair[1]);
            let unbound = usize::try_from(rel_index.unsigned_abs())
                .ok()
                .filter(|i| *i >= 1)
                .and_then(|i| unique_rels.get(i - 1))
                .ok_or_else(|| {
                    PackStreamError::InvalidStructure(format!(
                        "Path relationship index {} out of range",
                        rel_index
                    ))
                })?;
            let next = usize::try_from(node_index)
                .ok()
                .and_then(|i| unique_nodes.get(i))
                .ok_or_else(|| {
                    PackStreamError::InvalidStructure(format!(
                        "Path node index {} out of range",
                        node_index
                    ))
                })?;
            let prev_id = nodes[nodes.len() - 1].id;
            let rel = if rel_index > 0 {
                unbound.bind(prev_id, next.id)
            } else {
                unbound.bind(next.id, prev_id)
            };
            relationships.push(rel);
            nodes.push(next.clone());
        }

        Ok(Self {
            nodes,
            relationships,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64) -> Node {
        Node::new(id, vec!["N".into()], HashMap::new())
    }

    fn rel(id: i64, start: i64, end: i64) -> Relationship {
        Relationship::new(id, start, end, "KNOWS", HashMap::new())
    }

    #[test]
    fn test_path_rejects_disconnected_relationship() {
        let err = Path::new(vec![node(1), node(2)], vec![rel(10, 1, 3)]).unwrap_err();
        assert!(matches!(err, PackStreamError::InvalidStructure(_)));
    }

    #[test]
    fn test_path_rejects_wrong_relationship_count() {
        assert!(Path::new(vec![node(1)], vec![rel(10, 1, 2)]).is_err());
        assert!(Path::new(Vec::new(), Vec::new()).is_err());
    }

    #[test]
    fn test_to_wire_indices() {
        // (1)-[10]->(2)<-[11]-(3)
        let path = Path::new(
            vec![node(1), node(2), node(3)],
            vec![rel(10, 1, 2), rel(11, 3, 2)],
        )
        .unwrap();
        let parts = path.to_wire();
        assert_eq!(parts.nodes.len(), 3);
        assert_eq!(parts.relationships.len(), 2);
        assert_eq!(parts.indices, vec![1, 1, -2, 2]);
    }

    #[test]
    fn test_to_wire_dedups_repeated_elements() {
        // (1)-[10]->(2)<-[10]-(1): same relationship walked back
        let path = Path::new(
            vec![node(1), node(2), node(1)],
            vec![rel(10, 1, 2), rel(10, 1, 2)],
        )
        .unwrap();
        let parts = path.to_wire();
        assert_eq!(parts.nodes.len(), 2);
        assert_eq!(parts.relationships.len(), 1);
        assert_eq!(parts.indices, vec![1, 1, -1, 0]);
        assert_eq!(Path::from_wire(parts).unwrap(), path);
    }

    #[test]
    fn test_from_wire_binds_directions() {
        let path = Path::new(
            vec![node(1), node(2), node(3)],
            vec![rel(10, 1, 2), rel(11, 3, 2)],
        )
        .unwrap();
        let rebuilt = Path::from_wire(path.to_wire()).unwrap();
        assert_eq!(rebuilt.relationships()[1].start_node_id, 3);
        assert_eq!(rebuilt.relationships()[1].end_node_id, 2);
        assert_eq!(rebuilt, path);
        assert_eq!(rebuilt.start().id, 1);
        assert_eq!(rebuilt.end().id, 3);
        assert_eq!(rebuilt.len(), 2);
    }

    #[test]
    fn test_from_wire_rejects_bad_indices() {
        let parts = PathParts {
            nodes: vec![node(1)],
            relationships: Vec::new(),
            indices: vec![1, 0],
        };
        assert!(Path::from_wire(parts).is_err());

        let parts = PathParts {
            nodes: vec![node(1)],
            relationships: Vec::new(),
            indices: vec![0],
        };
        assert!(Path::from_wire(parts).is_err());
    }

    #[test]
    fn test_single_node_path() {
        let path = Path::single(node(5));
        assert!(path.is_empty());
        let parts = path.to_wire();
        assert!(parts.indices.is_empty());
        assert_eq!(Path::from_wire(parts).unwrap(), path);
    }
}
