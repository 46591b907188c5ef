#![no_main]

use std::collections::BTreeMap;

use floe_policy::manifest::{DependsOn, Manifest, Node};
use floe_policy::semantic::detect_circular_deps;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|edges: Vec<(u8, u8)>| {
    // Build a random DAG-or-not over a small fixed set of model ids, using
    // each byte pair as a directed edge `from -> to`.
    const NODE_COUNT: u8 = 12;
    let ids: Vec<String> = (0..NODE_COUNT).map(|i| format!("model.proj.n{i}")).collect();

    let mut nodes: BTreeMap<String, Node> = ids
        .iter()
        .map(|id| {
            (
                id.clone(),
                Node {
                    resource_type: "model".to_string(),
                    name: id.clone(),
                    depends_on: DependsOn::default(),
                    meta: Default::default(),
                    tags: Vec::new(),
                    columns: Default::default(),
                },
            )
        })
        .collect();

    for (from, to) in edges {
        let from_id = &ids[(from % NODE_COUNT) as usize];
        let to_id = &ids[(to % NODE_COUNT) as usize];
        if from_id == to_id {
            continue;
        }
        nodes.get_mut(from_id).unwrap().depends_on.nodes.push(to_id.clone());
    }

    let manifest = Manifest { nodes, sources: BTreeMap::new(), manifest_version: "1".into() };

    // Invariant: running cycle detection twice on the same manifest always
    // agrees, regardless of how pathological the injected edge set is.
    let first = detect_circular_deps(&manifest);
    let second = detect_circular_deps(&manifest);
    assert_eq!(first.is_empty(), second.is_empty());
});
