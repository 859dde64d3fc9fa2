use super::{DependencyGraph, EdgeKind, Node};
use crate::diagnostics::{Checked, Warning};
use crate::error::{Error, Result};
use crate::profile::FormationSpec;

/// Builds the [`DependencyGraph`] for a resolved formation.
///
/// Construction fails before any side effect on a missing required link or
/// a cycle over hard edges. Cycles that run through an optional link are
/// broken by disabling that link and reported as warnings.
pub struct GraphBuilder<'a> {
    spec: &'a FormationSpec,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(spec: &'a FormationSpec) -> Self {
        Self { spec }
    }

    pub fn build(&self) -> Result<Checked<DependencyGraph>> {
        let config = self.spec.config();
        let mut graph = DependencyGraph::new();
        let mut checked_warnings = Vec::new();

        for name in self.spec.container_names() {
            graph.add_node(Node::container(name));
        }
        for volume in config.volume_names() {
            graph.add_node(Node::volume(volume));
        }

        for name in self.spec.container_names() {
            let def = config.container(name)?;
            let from = Node::container(name);

            for (link, required) in def.link_targets() {
                if !self.spec.contains(&link.target) {
                    if required {
                        return Err(Error::UnresolvedLink {
                            container: name.to_string(),
                            target: link.target.clone(),
                        });
                    }
                    checked_warnings.push(Warning::validation(format!(
                        "Container '{}' has an optional link to '{}', which is not defined; ignoring it",
                        name, link.target
                    )));
                    continue;
                }
                let kind = if required {
                    EdgeKind::RequiredLink
                } else {
                    EdgeKind::OptionalLink
                };
                graph.add_edge(from.clone(), Node::container(&link.target), kind);
            }

            for volume in def.volumes.keys() {
                graph.add_edge(from.clone(), Node::volume(volume), EdgeKind::Mount);
            }

            if let Some(parent) = &def.from {
                graph.add_edge(from.clone(), Node::container(parent), EdgeKind::BuildParent);
            }
        }

        for volume in config.volume_names() {
            if let Some(provider) = config.provider_of(&volume) {
                graph.add_edge(
                    Node::volume(&volume),
                    Node::container(provider),
                    EdgeKind::Provider,
                );
            }
        }

        if let Some(cycle) = graph.find_cycle(|k| k.is_hard()) {
            return Err(Error::DependencyCycle(
                cycle.iter().map(Node::to_string).collect(),
            ));
        }

        while let Some(cycle) = graph.find_cycle(|_| true) {
            let optional = cycle
                .windows(2)
                .rev()
                .find(|pair| graph.edge_kind(&pair[0], &pair[1]) == Some(EdgeKind::OptionalLink))
                .map(|pair| (pair[0].clone(), pair[1].clone()));

            let Some((from, to)) = optional else {
                // Hard cycles were rejected above.
                return Err(Error::DependencyCycle(
                    cycle.iter().map(Node::to_string).collect(),
                ));
            };

            let path: Vec<String> = cycle.iter().map(Node::to_string).collect();
            checked_warnings.push(Warning::dependency(format!(
                "Optional link {} -> {} closes the cycle {}; it will not be used for ordering",
                from,
                to,
                path.join(" -> ")
            )));
            graph.disable_edge(&from, &to);
        }

        tracing::debug!(
            "Built dependency graph with {} nodes",
            graph.nodes().len()
        );
        Ok(Checked::with_warnings(graph, checked_warnings))
    }
}
