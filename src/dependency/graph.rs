use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// A node in the formation graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Node {
    Container(String),
    Volume(String),
}

impl Node {
    pub fn container(name: impl Into<String>) -> Self {
        Node::Container(name.into())
    }

    pub fn volume(name: impl Into<String>) -> Self {
        Node::Volume(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Node::Container(name) | Node::Volume(name) => name,
        }
    }

    pub fn as_container(&self) -> Option<&str> {
        match self {
            Node::Container(name) => Some(name),
            Node::Volume(_) => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Container(name) => write!(f, "{}", name),
            Node::Volume(name) => write!(f, "volume:{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EdgeKind {
    /// container → linked container
    RequiredLink,
    /// container → linked container, droppable
    OptionalLink,
    /// container → mounted volume
    Mount,
    /// volume → container that populates it
    Provider,
    /// container → container it is built `FROM`
    BuildParent,
}

impl EdgeKind {
    pub fn is_hard(&self) -> bool {
        !matches!(self, EdgeKind::OptionalLink)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub to: Node,
    pub kind: EdgeKind,
}

/// Directed graph over containers and volumes.
///
/// `edges[A]` lists what A depends on; `reverse[B]` lists who depends on B.
/// Optional edges can be disabled to break cycles; disabled edges are
/// invisible to every traversal.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<Node>,
    edges: BTreeMap<Node, Vec<Edge>>,
    reverse: BTreeMap<Node, Vec<Edge>>,
    disabled: BTreeSet<(Node, Node)>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.clone());
        self.edges.entry(node.clone()).or_default();
        self.reverse.entry(node).or_default();
    }

    /// Add a dependency edge (`from` depends on `to`).
    pub fn add_edge(&mut self, from: Node, to: Node, kind: EdgeKind) {
        self.add_node(from.clone());
        self.add_node(to.clone());

        let forward = self.edges.entry(from.clone()).or_default();
        if forward.iter().any(|e| e.to == to && e.kind == kind) {
            return;
        }
        forward.push(Edge {
            to: to.clone(),
            kind,
        });
        self.reverse
            .entry(to)
            .or_default()
            .push(Edge { to: from, kind });
    }

    /// Exclude an optional edge from scheduling.
    pub fn disable_edge(&mut self, from: &Node, to: &Node) {
        self.disabled.insert((from.clone(), to.clone()));
    }

    pub fn is_disabled(&self, from: &Node, to: &Node) -> bool {
        self.disabled.contains(&(from.clone(), to.clone()))
    }

    pub fn nodes(&self) -> &BTreeSet<Node> {
        &self.nodes
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.nodes.contains(node)
    }

    /// Active outgoing edges of `node`.
    pub fn edges_from<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges
            .get(node)
            .into_iter()
            .flatten()
            .filter(move |e| !self.is_disabled(node, &e.to))
    }

    /// Active incoming edges of `node`; `Edge::to` is the dependent.
    pub fn edges_into<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = &'a Edge> + 'a {
        self.reverse
            .get(node)
            .into_iter()
            .flatten()
            .filter(move |e| !self.is_disabled(&e.to, node))
    }

    /// Direct dependencies along edges accepted by `follow`.
    pub fn dependencies(&self, node: &Node, follow: impl Fn(EdgeKind) -> bool) -> Vec<Node> {
        self.edges_from(node)
            .filter(|e| follow(e.kind))
            .map(|e| e.to.clone())
            .collect()
    }

    /// Direct dependents along edges accepted by `follow`.
    pub fn dependents(&self, node: &Node, follow: impl Fn(EdgeKind) -> bool) -> Vec<Node> {
        self.edges_into(node)
            .filter(|e| follow(e.kind))
            .map(|e| e.to.clone())
            .collect()
    }

    /// `targets` plus everything they transitively depend on.
    pub fn closure<'a>(
        &self,
        targets: impl IntoIterator<Item = &'a Node>,
        follow: impl Fn(EdgeKind) -> bool,
    ) -> BTreeSet<Node> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<Node> = targets.into_iter().cloned().collect();
        while let Some(node) = stack.pop() {
            if !seen.insert(node.clone()) {
                continue;
            }
            stack.extend(self.dependencies(&node, &follow));
        }
        seen
    }

    /// Every node that transitively depends on `node` (excluding itself).
    pub fn ancestors(&self, node: &Node, follow: impl Fn(EdgeKind) -> bool) -> BTreeSet<Node> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<Node> = self.dependents(node, &follow).into();
        while let Some(current) = queue.pop_front() {
            if current == *node || !seen.insert(current.clone()) {
                continue;
            }
            queue.extend(self.dependents(&current, &follow));
        }
        seen
    }

    /// Order `subset` so every node comes after its dependencies within it.
    ///
    /// Ties break by node order, so the result is deterministic.
    pub fn topological_sort(
        &self,
        subset: &BTreeSet<Node>,
        follow: impl Fn(EdgeKind) -> bool,
    ) -> Result<Vec<Node>> {
        let mut in_degree: BTreeMap<&Node, usize> = BTreeMap::new();
        for node in subset {
            let degree = self
                .dependencies(node, &follow)
                .iter()
                .filter(|dep| subset.contains(*dep))
                .count();
            in_degree.insert(node, degree);
        }

        let mut ready: BTreeSet<&Node> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(node, _)| *node)
            .collect();

        let mut result = Vec::with_capacity(subset.len());
        while let Some(node) = ready.pop_first() {
            result.push(node.clone());
            for edge in self.edges_into(node).filter(|e| follow(e.kind)) {
                if let Some(degree) = in_degree.get_mut(&edge.to) {
                    *degree -= 1;
                    if *degree == 0 {
                        if let Some((key, _)) = in_degree.get_key_value(&edge.to) {
                            ready.insert(*key);
                        }
                    }
                }
            }
        }

        if result.len() != subset.len() {
            let cycle = self
                .find_cycle(&follow)
                .map(|c| c.iter().map(Node::to_string).collect())
                .unwrap_or_else(|| {
                    subset
                        .iter()
                        .filter(|n| !result.contains(n))
                        .map(Node::to_string)
                        .collect()
                });
            return Err(Error::DependencyCycle(cycle));
        }

        Ok(result)
    }

    /// Tri-color DFS over edges accepted by `follow`.
    ///
    /// Returns the cycle as a path that starts and ends at the same node.
    pub fn find_cycle(&self, follow: impl Fn(EdgeKind) -> bool) -> Option<Vec<Node>> {
        let mut visited = BTreeSet::new();
        let mut on_stack = BTreeSet::new();
        let mut path = Vec::new();

        for node in &self.nodes {
            if !visited.contains(node) {
                if let Some(cycle) =
                    self.find_cycle_dfs(node, &follow, &mut visited, &mut on_stack, &mut path)
                {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn find_cycle_dfs(
        &self,
        node: &Node,
        follow: &impl Fn(EdgeKind) -> bool,
        visited: &mut BTreeSet<Node>,
        on_stack: &mut BTreeSet<Node>,
        path: &mut Vec<Node>,
    ) -> Option<Vec<Node>> {
        visited.insert(node.clone());
        on_stack.insert(node.clone());
        path.push(node.clone());

        for dep in self.dependencies(node, follow) {
            if !visited.contains(&dep) {
                if let Some(cycle) = self.find_cycle_dfs(&dep, follow, visited, on_stack, path) {
                    return Some(cycle);
                }
            } else if on_stack.contains(&dep) {
                let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
        }

        on_stack.remove(node);
        path.pop();
        None
    }

    /// Kind of the active edge `from → to`, preferring hard kinds.
    pub fn edge_kind(&self, from: &Node, to: &Node) -> Option<EdgeKind> {
        self.edges_from(from)
            .filter(|e| e.to == *to)
            .map(|e| e.kind)
            .min_by_key(|k| !k.is_hard())
    }

    /// Groups of `subset` that can run side by side, dependencies first.
    pub fn parallel_groups(
        &self,
        subset: &BTreeSet<Node>,
        follow: impl Fn(EdgeKind) -> bool,
    ) -> Result<Vec<Vec<Node>>> {
        self.topological_sort(subset, &follow)?;

        let mut done: BTreeSet<Node> = BTreeSet::new();
        let mut groups = Vec::new();
        while done.len() < subset.len() {
            let group: Vec<Node> = subset
                .iter()
                .filter(|n| !done.contains(*n))
                .filter(|n| {
                    self.dependencies(n, &follow)
                        .iter()
                        .all(|d| !subset.contains(d) || done.contains(d))
                })
                .cloned()
                .collect();
            if group.is_empty() {
                return Err(Error::Config(
                    "Unable to determine parallel groups".to_string(),
                ));
            }
            done.extend(group.iter().cloned());
            groups.push(group);
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(name: &str) -> Node {
        Node::container(name)
    }

    fn all(_: EdgeKind) -> bool {
        true
    }

    fn hard(kind: EdgeKind) -> bool {
        kind.is_hard()
    }

    #[test]
    fn test_topological_sort() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(c("a"), c("b"), EdgeKind::RequiredLink);
        graph.add_edge(c("b"), c("c"), EdgeKind::RequiredLink);

        let sorted = graph.topological_sort(graph.nodes(), all).unwrap();
        assert_eq!(sorted, vec![c("c"), c("b"), c("a")]);
    }

    #[test]
    fn test_cycle_path_closes() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(c("a"), c("b"), EdgeKind::RequiredLink);
        graph.add_edge(c("b"), c("a"), EdgeKind::RequiredLink);

        let cycle = graph.find_cycle(hard).unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 3);
        assert!(graph.topological_sort(graph.nodes(), all).is_err());
    }

    #[test]
    fn test_disabled_edge_is_invisible() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(c("a"), c("b"), EdgeKind::RequiredLink);
        graph.add_edge(c("b"), c("a"), EdgeKind::OptionalLink);
        assert!(graph.find_cycle(all).is_some());
        assert!(graph.find_cycle(hard).is_none());

        graph.disable_edge(&c("b"), &c("a"));
        assert!(graph.find_cycle(all).is_none());
    }

    #[test]
    fn test_ancestors_and_closure() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(c("web"), c("api"), EdgeKind::RequiredLink);
        graph.add_edge(c("api"), c("base"), EdgeKind::BuildParent);
        graph.add_node(c("other"));

        let ancestors = graph.ancestors(&c("base"), hard);
        assert_eq!(ancestors, BTreeSet::from([c("api"), c("web")]));

        let closure = graph.closure([&c("web")], hard);
        assert_eq!(closure, BTreeSet::from([c("base"), c("api"), c("web")]));
    }

    #[test]
    fn test_parallel_groups() {
        let mut graph = DependencyGraph::new();
        graph.add_node(c("a"));
        graph.add_node(c("b"));
        graph.add_edge(c("c"), c("a"), EdgeKind::RequiredLink);
        graph.add_edge(c("c"), c("b"), EdgeKind::RequiredLink);

        let groups = graph.parallel_groups(graph.nodes(), all).unwrap();
        assert_eq!(groups, vec![vec![c("a"), c("b")], vec![c("c")]]);
    }

    #[test]
    fn test_volume_display() {
        assert_eq!(Node::volume("assets").to_string(), "volume:assets");
    }
}
