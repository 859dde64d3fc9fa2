use super::Formation;
use crate::output::UserOutput;
use bay::dependency::{boot_orders, Node};
use std::collections::BTreeSet;

/// Print the formation as groups that can boot side by side.
pub fn run_graph(formation: &Formation, out: &dyn UserOutput) -> anyhow::Result<()> {
    let nodes: BTreeSet<Node> = formation.graph.nodes().clone();
    let groups = formation.graph.parallel_groups(&nodes, boot_orders)?;

    for (i, group) in groups.iter().enumerate() {
        out.status(&format!("Group {}:", i + 1));
        for node in group {
            let deps: Vec<String> = formation
                .graph
                .edges_from(node)
                .map(|e| format!("{} ({:?})", e.to, e.kind))
                .collect();
            let marker = match node.as_container() {
                Some(name) if formation.spec.is_system(name) => " [system]",
                Some(name) if formation.config.is_provider(name) => " [provider]",
                _ => "",
            };
            if deps.is_empty() {
                out.status(&format!("  {}{}", node, marker));
            } else {
                out.status(&format!("  {}{} -> {}", node, marker, deps.join(", ")));
            }
        }
    }
    Ok(())
}
