//! Formation dependency graph: construction, cycle handling, ordering.

mod builder;
mod graph;

pub use builder::*;
pub use graph::*;

/// Edges that pull nodes into a build pass and order it.
pub fn build_edges(kind: EdgeKind) -> bool {
    kind.is_hard()
}

/// Edges that pull nodes into a boot pass.
///
/// Providers and build parents matter only for building; the volume node
/// itself takes care of populating from its provider.
pub fn boot_expands(kind: EdgeKind) -> bool {
    matches!(kind, EdgeKind::RequiredLink | EdgeKind::Mount)
}

/// Edges that order a boot pass. Optional links order but never pull in.
pub fn boot_orders(kind: EdgeKind) -> bool {
    matches!(
        kind,
        EdgeKind::RequiredLink | EdgeKind::OptionalLink | EdgeKind::Mount
    )
}
