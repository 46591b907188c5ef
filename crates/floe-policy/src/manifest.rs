//! The compiled manifest the policy engine evaluates (§4.4).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single node in the compiled manifest's dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub resource_type: String,
    pub name: String,
    pub depends_on: DependsOn,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub columns: serde_json::Map<String, serde_json::Value>,
}

impl Node {
    pub fn is_model(&self) -> bool {
        self.resource_type == "model"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DependsOn {
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// A source table declaration. Only presence matters for resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Source {
    #[serde(default)]
    pub name: String,
}

/// The full compiled manifest: node-id -> node, plus a sources map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Manifest {
    pub nodes: BTreeMap<String, Node>,
    #[serde(default)]
    pub sources: BTreeMap<String, Source>,
    #[serde(default = "default_manifest_version")]
    pub manifest_version: String,
}

fn default_manifest_version() -> String {
    "1".to_string()
}

impl Manifest {
    pub fn models(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.nodes.iter().filter(|(_, n)| n.is_model())
    }
}

/// Splits a `source.<project>.<source_name>.<table_name>` unique id into its
/// `(source_name, table_name)` pair, per the original's
/// `_extract_source_info`: 4th and 3rd-from-last segments. Returns `None` if
/// the id has fewer than 4 dotted segments.
pub fn extract_source_info(unique_id: &str) -> Option<(&str, &str)> {
    let segments: Vec<&str> = unique_id.split('.').collect();
    if segments.len() < 4 {
        return None;
    }
    let table_name = segments[segments.len() - 1];
    let source_name = segments[segments.len() - 2];
    Some((source_name, table_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_source_info_splits_dotted_id() {
        assert_eq!(
            extract_source_info("source.my_project.raw.orders"),
            Some(("raw", "orders"))
        );
    }

    #[test]
    fn extract_source_info_rejects_short_ids() {
        assert_eq!(extract_source_info("source.raw"), None);
    }

    #[test]
    fn manifest_models_skips_non_model_nodes() {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "model.p.a".to_string(),
            Node {
                resource_type: "model".into(),
                name: "a".into(),
                depends_on: DependsOn::default(),
                meta: Default::default(),
                tags: vec![],
                columns: Default::default(),
            },
        );
        nodes.insert(
            "test.p.a_not_null".to_string(),
            Node {
                resource_type: "test".into(),
                name: "a_not_null".into(),
                depends_on: DependsOn::default(),
                meta: Default::default(),
                tags: vec![],
                columns: Default::default(),
            },
        );
        let manifest = Manifest { nodes, sources: BTreeMap::new(), manifest_version: "1".into() };
        assert_eq!(manifest.models().count(), 1);
    }
}
