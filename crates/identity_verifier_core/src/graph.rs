//! Build-time resource ordering.
//!
//! Resources are referenced through [`ResourceHandle`] values minted by the
//! graph that owns them. Dependencies are declared between handles, so a
//! dependent resource is wired to the exact node it waits on rather than to a
//! name that has to be looked up later.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::VerifierError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceHandle(usize);

impl ResourceHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    EmailIdentity,
    DkimRecord,
    VerificationWaiter,
    UserPool,
    UserPoolClient,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub logical_id: String,
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub downstream: ResourceHandle,
    pub upstream: ResourceHandle,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
    edges: Vec<DependencyEdge>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource(
        &mut self,
        logical_id: impl Into<String>,
        kind: ResourceKind,
    ) -> ResourceHandle {
        self.nodes.push(ResourceNode {
            logical_id: logical_id.into(),
            kind,
        });
        ResourceHandle(self.nodes.len() - 1)
    }

    pub fn node(&self, handle: ResourceHandle) -> Option<&ResourceNode> {
        self.nodes.get(handle.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Orders `downstream` strictly after `upstream`.
    ///
    /// Rejects handles from another graph and any edge that would close a
    /// cycle. Declaring the same edge twice is a no-op.
    pub fn add_dependency(
        &mut self,
        downstream: ResourceHandle,
        upstream: ResourceHandle,
    ) -> Result<(), VerifierError> {
        self.ensure_known(downstream)?;
        self.ensure_known(upstream)?;

        if downstream == upstream || self.depends_on(upstream, downstream) {
            return Err(VerifierError::configuration(format!(
                "dependency {} -> {} would create a cycle",
                self.nodes[downstream.0].logical_id, self.nodes[upstream.0].logical_id
            )));
        }

        let edge = DependencyEdge {
            downstream,
            upstream,
        };
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
        Ok(())
    }

    /// True when `downstream` transitively waits on `upstream`.
    pub fn depends_on(&self, downstream: ResourceHandle, upstream: ResourceHandle) -> bool {
        let mut visited = BTreeSet::new();
        let mut pending = vec![downstream];
        while let Some(current) = pending.pop() {
            for edge in self.edges.iter().filter(|edge| edge.downstream == current) {
                if edge.upstream == upstream {
                    return true;
                }
                if visited.insert(edge.upstream) {
                    pending.push(edge.upstream);
                }
            }
        }
        false
    }

    /// Topological order in which the provisioning system may materialize
    /// resources. Ties are broken by insertion order.
    pub fn materialization_order(&self) -> Vec<ResourceHandle> {
        let mut remaining_upstreams = vec![0usize; self.nodes.len()];
        for edge in &self.edges {
            remaining_upstreams[edge.downstream.0] += 1;
        }

        let mut ready: BTreeSet<usize> = remaining_upstreams
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(index, _)| index)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(index) = ready.pop_first() {
            order.push(ResourceHandle(index));
            for edge in self.edges.iter().filter(|edge| edge.upstream.0 == index) {
                let count = &mut remaining_upstreams[edge.downstream.0];
                *count -= 1;
                if *count == 0 {
                    ready.insert(edge.downstream.0);
                }
            }
        }

        order
    }

    pub fn logical_ids(&self, handles: &[ResourceHandle]) -> Vec<&str> {
        handles
            .iter()
            .filter_map(|handle| self.node(*handle))
            .map(|node| node.logical_id.as_str())
            .collect()
    }

    fn ensure_known(&self, handle: ResourceHandle) -> Result<(), VerifierError> {
        if handle.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(VerifierError::configuration(format!(
                "resource handle {} does not belong to this graph",
                handle.0
            )))
        }
    }
}
