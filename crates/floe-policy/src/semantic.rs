//! Semantic validator: ref/source resolution and cycle detection
//! (§4.4 "Semantic validator"), grounded directly on the original's
//! `enforcement/validators/semantic.py`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use floe_types::{Severity, Violation};

use crate::manifest::{extract_source_info, Manifest};

const DOCS_BASE: &str = "https://floe.dev/docs/enforcement/semantic";

/// Run all three semantic checks and log a summary event (§1B).
pub fn validate(manifest: &Manifest) -> Vec<Violation> {
    let mut violations = validate_refs(manifest);
    violations.extend(validate_sources(manifest));
    violations.extend(detect_circular_deps(manifest));

    if violations.is_empty() {
        tracing::debug!("semantic_validation_passed");
    } else {
        let e301 = violations.iter().filter(|v| v.error_code == "FLOE-E301").count();
        let e302 = violations.iter().filter(|v| v.error_code == "FLOE-E302").count();
        let e303 = violations.iter().filter(|v| v.error_code == "FLOE-E303").count();
        tracing::info!(count = violations.len(), e301, e302, e303, "semantic_violations_found");
    }

    violations
}

fn extract_model_name(unique_id: &str) -> &str {
    unique_id.rsplit('.').next().unwrap_or(unique_id)
}

/// FLOE-E301: every non-source dependency id must resolve to a node.
pub fn validate_refs(manifest: &Manifest) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (_, node) in manifest.models() {
        for dep_id in &node.depends_on.nodes {
            if dep_id.starts_with("source.") {
                continue;
            }
            if !manifest.nodes.contains_key(dep_id) {
                violations.push(missing_ref_violation(&node.name, extract_model_name(dep_id), dep_id));
            }
        }
    }
    violations
}

/// FLOE-E303: every `source.`-prefixed dependency id must resolve to a
/// declared source.
pub fn validate_sources(manifest: &Manifest) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (_, node) in manifest.models() {
        for dep_id in &node.depends_on.nodes {
            let Some(rest) = dep_id.strip_prefix("source.") else { continue };
            let _ = rest;
            if !manifest.sources.contains_key(dep_id) {
                let (source_name, table_name) = extract_source_info(dep_id).unwrap_or(("unknown", "unknown"));
                violations.push(missing_source_violation(&node.name, source_name, table_name, dep_id));
            }
        }
    }
    violations
}

/// FLOE-E302: detect a cycle among model-to-model dependencies via Kahn's
/// algorithm, then extract one concrete cycle path via deterministic DFS.
pub fn detect_circular_deps(manifest: &Manifest) -> Vec<Violation> {
    let model_ids: BTreeSet<&String> = manifest.models().map(|(id, _)| id).collect();

    let mut graph: BTreeMap<&str, Vec<&str>> = model_ids.iter().map(|id| (id.as_str(), Vec::new())).collect();
    let mut in_degree: BTreeMap<&str, u32> = model_ids.iter().map(|id| (id.as_str(), 0)).collect();

    for id in &model_ids {
        let node = &manifest.nodes[*id];
        for dep_id in &node.depends_on.nodes {
            if model_ids.contains(dep_id) {
                graph.get_mut(dep_id.as_str()).unwrap().push(id.as_str());
                *in_degree.get_mut(id.as_str()).unwrap() += 1;
            }
        }
    }
    for adj in graph.values_mut() {
        adj.sort_unstable();
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| *id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut sorted_count = 0usize;
    while let Some(current) = queue.pop_front() {
        sorted_count += 1;
        for &neighbor in &graph[current] {
            let degree = in_degree.get_mut(neighbor).unwrap();
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(neighbor);
            }
        }
    }

    if sorted_count >= model_ids.len() {
        return Vec::new();
    }

    let cycle_nodes: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg > 0)
        .map(|(id, _)| *id)
        .collect();

    if cycle_nodes.is_empty() {
        return Vec::new();
    }

    let cycle_path = find_cycle_path(&cycle_nodes, manifest);
    vec![circular_dep_violation(&cycle_path)]
}

/// Deterministic DFS over the cycle-candidate set, reproducing the
/// original's per-start-node retry + fixed fallback. `cycle_nodes` and the
/// reverse-edge scan below are iterated in sorted order so the result is a
/// byte-exact function of the input (P4), independent of map iteration
/// order.
fn find_cycle_path(cycle_nodes: &[&str], manifest: &Manifest) -> Vec<String> {
    let cycle_set: BTreeSet<&str> = cycle_nodes.iter().copied().collect();

    for &start in cycle_nodes {
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut path: Vec<&str> = Vec::new();
        if let Some(cycle) = dfs(start, &cycle_set, manifest, &mut visited, &mut path) {
            return cycle
                .into_iter()
                .map(|id| manifest.nodes.get(id).map(|n| n.name.clone()).unwrap_or_else(|| extract_model_name(id).to_string()))
                .collect();
        }
    }

    cycle_nodes
        .iter()
        .take(5)
        .map(|id| manifest.nodes.get(*id).map(|n| n.name.clone()).unwrap_or_else(|| extract_model_name(id).to_string()))
        .collect()
}

fn dfs<'a>(
    node_id: &'a str,
    cycle_set: &BTreeSet<&'a str>,
    manifest: &'a Manifest,
    visited: &mut BTreeSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<&'a str>> {
    if visited.contains(node_id) {
        if let Some(cycle_start) = path.iter().position(|&n| n == node_id) {
            let mut cycle = path[cycle_start..].to_vec();
            cycle.push(node_id);
            return Some(cycle);
        }
        return None;
    }

    visited.insert(node_id);
    path.push(node_id);

    // Reverse edge: does `other` depend on `node_id`?
    for &other in cycle_set {
        let Some(node) = manifest.nodes.get(other) else { continue };
        if node.depends_on.nodes.iter().any(|d| d == node_id) && cycle_set.contains(other) {
            if let Some(found) = dfs(other, cycle_set, manifest, visited, path) {
                return Some(found);
            }
        }
    }

    path.pop();
    None
}

fn missing_ref_violation(model_name: &str, missing_ref: &str, missing_id: &str) -> Violation {
    Violation {
        error_code: "FLOE-E301".into(),
        severity: Severity::Error,
        policy_type: "semantic".into(),
        model_name: model_name.into(),
        message: format!("model \"{model_name}\" references non-existent model \"{missing_ref}\""),
        expected: format!("model \"{missing_ref}\" should exist in the manifest"),
        actual: format!("ref(\"{missing_ref}\") resolves to nothing (id: {missing_id})"),
        suggestion: format!(
            "create the model \"{missing_ref}\" or update the ref() call in \"{model_name}\" to reference an existing model"
        ),
        documentation_url: format!("{DOCS_BASE}#missing-ref"),
    }
}

fn missing_source_violation(model_name: &str, source_name: &str, table_name: &str, source_id: &str) -> Violation {
    Violation {
        error_code: "FLOE-E303".into(),
        severity: Severity::Error,
        policy_type: "semantic".into(),
        model_name: model_name.into(),
        message: format!("model \"{model_name}\" references undefined source \"{source_name}.{table_name}\""),
        expected: format!("source \"{source_name}.{table_name}\" should be defined in a sources file"),
        actual: format!("source(\"{source_name}\", \"{table_name}\") resolves to nothing (id: {source_id})"),
        suggestion: format!(
            "define the source:\n  sources:\n    - name: {source_name}\n      tables:\n        - name: {table_name}"
        ),
        documentation_url: format!("{DOCS_BASE}#missing-source"),
    }
}

fn circular_dep_violation(cycle_path: &[String]) -> Violation {
    let cycle_str = cycle_path.join(" -> ");
    let first_model = cycle_path.first().cloned().unwrap_or_else(|| "unknown".into());
    Violation {
        error_code: "FLOE-E302".into(),
        severity: Severity::Error,
        policy_type: "semantic".into(),
        model_name: first_model,
        message: format!("circular dependency detected: {cycle_str}"),
        expected: "model dependencies should form a directed acyclic graph".into(),
        actual: format!("cycle found involving models: {}", cycle_path.join(", ")),
        suggestion: "break the circular dependency by removing the ref() that creates the cycle, or introduce an intermediate model".into(),
        documentation_url: format!("{DOCS_BASE}#circular-dependency"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DependsOn, Node, Source};

    fn model(name: &str, deps: &[&str]) -> Node {
        Node {
            resource_type: "model".into(),
            name: name.into(),
            depends_on: DependsOn { nodes: deps.iter().map(|s| s.to_string()).collect() },
            meta: Default::default(),
            tags: vec![],
            columns: Default::default(),
        }
    }

    #[test]
    fn validate_refs_flags_missing_model() {
        let mut nodes = BTreeMap::new();
        nodes.insert("model.p.orders".to_string(), model("orders", &["model.p.customers"]));
        let manifest = Manifest { nodes, sources: BTreeMap::new(), manifest_version: "1".into() };
        let violations = validate_refs(&manifest);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].error_code, "FLOE-E301");
    }

    #[test]
    fn validate_refs_allows_resolved_ref() {
        let mut nodes = BTreeMap::new();
        nodes.insert("model.p.customers".to_string(), model("customers", &[]));
        nodes.insert("model.p.orders".to_string(), model("orders", &["model.p.customers"]));
        let manifest = Manifest { nodes, sources: BTreeMap::new(), manifest_version: "1".into() };
        assert!(validate_refs(&manifest).is_empty());
    }

    #[test]
    fn validate_sources_flags_undeclared_source() {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "model.p.orders".to_string(),
            model("orders", &["source.p.raw.orders"]),
        );
        let manifest = Manifest { nodes, sources: BTreeMap::new(), manifest_version: "1".into() };
        let violations = validate_sources(&manifest);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].error_code, "FLOE-E303");
        assert!(violations[0].message.contains("raw.orders"));
    }

    #[test]
    fn validate_sources_allows_declared_source() {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "model.p.orders".to_string(),
            model("orders", &["source.p.raw.orders"]),
        );
        let mut sources = BTreeMap::new();
        sources.insert("source.p.raw.orders".to_string(), Source { name: "orders".into() });
        let manifest = Manifest { nodes, sources, manifest_version: "1".into() };
        assert!(validate_sources(&manifest).is_empty());
    }

    #[test]
    fn detect_circular_deps_finds_two_node_cycle() {
        let mut nodes = BTreeMap::new();
        nodes.insert("model.p.a".to_string(), model("a", &["model.p.b"]));
        nodes.insert("model.p.b".to_string(), model("b", &["model.p.a"]));
        let manifest = Manifest { nodes, sources: BTreeMap::new(), manifest_version: "1".into() };
        let violations = detect_circular_deps(&manifest);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].error_code, "FLOE-E302");
        assert!(violations[0].message.contains('a'));
        assert!(violations[0].message.contains('b'));
    }

    #[test]
    fn detect_circular_deps_clean_dag_has_no_violation() {
        let mut nodes = BTreeMap::new();
        nodes.insert("model.p.a".to_string(), model("a", &[]));
        nodes.insert("model.p.b".to_string(), model("b", &["model.p.a"]));
        nodes.insert("model.p.c".to_string(), model("c", &["model.p.b"]));
        let manifest = Manifest { nodes, sources: BTreeMap::new(), manifest_version: "1".into() };
        assert!(detect_circular_deps(&manifest).is_empty());
    }

    #[test]
    fn detect_circular_deps_is_deterministic_across_insertion_orders() {
        let mut nodes_a = BTreeMap::new();
        nodes_a.insert("model.p.a".to_string(), model("a", &["model.p.b"]));
        nodes_a.insert("model.p.b".to_string(), model("b", &["model.p.c"]));
        nodes_a.insert("model.p.c".to_string(), model("c", &["model.p.a"]));
        let manifest_a = Manifest { nodes: nodes_a, sources: BTreeMap::new(), manifest_version: "1".into() };

        let mut nodes_b = BTreeMap::new();
        nodes_b.insert("model.p.c".to_string(), model("c", &["model.p.a"]));
        nodes_b.insert("model.p.a".to_string(), model("a", &["model.p.b"]));
        nodes_b.insert("model.p.b".to_string(), model("b", &["model.p.c"]));
        let manifest_b = Manifest { nodes: nodes_b, sources: BTreeMap::new(), manifest_version: "1".into() };

        let violations_a = detect_circular_deps(&manifest_a);
        let violations_b = detect_circular_deps(&manifest_b);
        assert_eq!(violations_a, violations_b);
    }

    #[test]
    fn validate_runs_all_three_checks() {
        let mut nodes = BTreeMap::new();
        nodes.insert("model.p.a".to_string(), model("a", &["model.p.missing"]));
        let manifest = Manifest { nodes, sources: BTreeMap::new(), manifest_version: "1".into() };
        let violations = validate(&manifest);
        assert_eq!(violations.len(), 1);
    }
}
