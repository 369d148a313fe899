//! Circuit compiler (spec §4.6 / §9): a board contract file compiles into
//! an arena of nodes plus a separate edge list, topologically sorted, with
//! no owning back-pointers between nodes (Design Notes §9, "cyclic
//! references between board nodes and edges").

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tsi_types::error::{CoreError, SemanticError};
use tsi_types::hash::content_hash_hex;

/// The fixed port vocabulary a node may expose (spec §4.3's port list:
/// `payload:tensor`, `step`, `loss:tensor`, `info`, `warn`, `meta:str`).
/// Two ports are edge-compatible when their [`PortKind`]s are equal; `step`
/// is always `Tensor`, since it is the inbound port every non-source node
/// consumes propagated tensors on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Tensor,
    Text,
}

pub fn port_kind(name: &str) -> Option<PortKind> {
    match name {
        "payload" | "loss" | "step" => Some(PortKind::Tensor),
        "info" | "warn" | "meta" => Some(PortKind::Text),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub canonical_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeSpec {
    pub src: String,
    pub src_port: String,
    pub dst: String,
    pub dst_port: String,
}

/// The JSON body of a board contract file (spec §4.4's `contracts: (id,
/// file)` table points at one of these). `source_node` names the arena's
/// single source; `dataloader_init_id` is the configured dataloader this
/// binding pulls batches from (spec §4.6: "a reference to a configured
/// dataloader init id").
#[derive(Debug, Clone, Deserialize)]
pub struct ContractSpec {
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeSpec>,
    pub source_node: String,
    pub dataloader_init_id: String,
}

impl ContractSpec {
    pub fn load(path: impl AsRef<Path>) -> Result<(Self, String), CoreError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|_| CoreError::IoMissing(path.display().to_string()))?;
        let spec: Self = serde_json::from_slice(&bytes).map_err(|e| CoreError::IoCorrupt(format!("{}: {e}", path.display())))?;
        Ok((spec, content_hash_hex(&bytes)))
    }
}

/// An edge referencing nodes by arena index rather than by name, once
/// compiled.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub src: u32,
    pub src_port: &'static str,
    pub dst: u32,
    pub dst_port: &'static str,
}

fn canonical_port_name(name: &str) -> &'static str {
    match name {
        "payload" => "payload",
        "loss" => "loss",
        "step" => "step",
        "info" => "info",
        "warn" => "warn",
        "meta" => "meta",
        _ => unreachable!("validated by port_kind before this is called"),
    }
}

#[derive(Debug, Clone)]
pub struct CompiledNode {
    pub id: String,
    pub canonical_type: String,
}

/// A compiled circuit: an arena of nodes indexed by `u32`, a topological
/// order over those indices, and per-node inbound/outbound edge lists
/// (spec §4.6 (a)/(b)).
pub struct Circuit {
    pub nodes: Vec<CompiledNode>,
    pub topo_order: Vec<u32>,
    pub inbound: Vec<Vec<Edge>>,
    pub outbound: Vec<Vec<Edge>>,
    pub source_idx: u32,
    pub dataloader_init_id: String,
}

impl Circuit {
    /// Compiles a [`ContractSpec`] into a [`Circuit`], validating port
    /// compatibility, the inbound-step invariant on every non-source node,
    /// and acyclicity (spec §4.3 invariants).
    pub fn compile(spec: &ContractSpec) -> Result<Self, CoreError> {
        let mut index_of: HashMap<&str, u32> = HashMap::new();
        for (i, n) in spec.nodes.iter().enumerate() {
            if index_of.insert(&n.id, i as u32).is_some() {
                return Err(CoreError::Semantic(SemanticError(format!("duplicate node id {}", n.id))));
            }
        }
        let source_idx = *index_of
            .get(spec.source_node.as_str())
            .ok_or_else(|| CoreError::Reference(tsi_types::error::ReferenceError(format!("unknown source_node {}", spec.source_node))))?;

        let n = spec.nodes.len();
        let mut inbound: Vec<Vec<Edge>> = (0..n).map(|_| Vec::new()).collect();
        let mut outbound: Vec<Vec<Edge>> = (0..n).map(|_| Vec::new()).collect();
        let mut adjacency: Vec<Vec<u32>> = (0..n).map(|_| Vec::new()).collect();

        for e in &spec.edges {
            let src = *index_of
                .get(e.src.as_str())
                .ok_or_else(|| CoreError::Reference(tsi_types::error::ReferenceError(format!("edge references unknown node {}", e.src))))?;
            let dst = *index_of
                .get(e.dst.as_str())
                .ok_or_else(|| CoreError::Reference(tsi_types::error::ReferenceError(format!("edge references unknown node {}", e.dst))))?;
            let src_kind = port_kind(&e.src_port)
                .ok_or_else(|| CoreError::Semantic(SemanticError(format!("unknown port name {}", e.src_port))))?;
            let dst_kind = port_kind(&e.dst_port)
                .ok_or_else(|| CoreError::Semantic(SemanticError(format!("unknown port name {}", e.dst_port))))?;
            if src_kind != dst_kind {
                return Err(CoreError::Semantic(SemanticError(format!(
                    "incompatible port types on edge {}@{} -> {}@{}",
                    e.src, e.src_port, e.dst, e.dst_port
                ))));
            }
            let _ = src_kind;
            let edge = Edge {
                src,
                src_port: canonical_port_name(&e.src_port),
                dst,
                dst_port: canonical_port_name(&e.dst_port),
            };
            outbound[src as usize].push(edge);
            inbound[dst as usize].push(edge);
            adjacency[src as usize].push(dst);
        }

        for (i, node) in spec.nodes.iter().enumerate() {
            let i = i as u32;
            if i != source_idx && !inbound[i as usize].iter().any(|e| e.dst_port == "step") {
                return Err(CoreError::Semantic(SemanticError(format!(
                    "non-source node {} has no inbound edge on its step port",
                    node.id
                ))));
            }
        }

        let topo_order = topological_sort(n, &adjacency)?;

        Ok(Self {
            nodes: spec.nodes.iter().map(|n| CompiledNode { id: n.id.clone(), canonical_type: n.canonical_type.clone() }).collect(),
            topo_order,
            inbound,
            outbound,
            source_idx,
            dataloader_init_id: spec.dataloader_init_id.clone(),
        })
    }
}

/// Kahn's algorithm; `Err` on a cycle. Ties (nodes with no remaining
/// dependency) are broken by ascending arena index, which is why the
/// "unspecified but deterministic" ordering guarantee in spec §4.6 holds.
fn topological_sort(n: usize, adjacency: &[Vec<u32>]) -> Result<Vec<u32>, CoreError> {
    let mut indegree = vec![0u32; n];
    for edges in adjacency {
        for &dst in edges {
            indegree[dst as usize] += 1;
        }
    }
    let mut ready: std::collections::BinaryHeap<std::cmp::Reverse<u32>> =
        (0..n as u32).filter(|&i| indegree[i as usize] == 0).map(std::cmp::Reverse).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(std::cmp::Reverse(i)) = ready.pop() {
        order.push(i);
        for &dst in &adjacency[i as usize] {
            indegree[dst as usize] -= 1;
            if indegree[dst as usize] == 0 {
                ready.push(std::cmp::Reverse(dst));
            }
        }
    }
    if order.len() != n {
        return Err(CoreError::Semantic(SemanticError("circuit contains a cycle".into())));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(nodes: &[(&str, &str)], edges: &[(&str, &str, &str, &str)], source: &str) -> ContractSpec {
        ContractSpec {
            nodes: nodes.iter().map(|(id, ct)| NodeSpec { id: id.to_string(), canonical_type: ct.to_string() }).collect(),
            edges: edges
                .iter()
                .map(|(s, sp, d, dp)| EdgeSpec { src: s.to_string(), src_port: sp.to_string(), dst: d.to_string(), dst_port: dp.to_string() })
                .collect(),
            source_node: source.to_string(),
            dataloader_init_id: "main".into(),
        }
    }

    #[test]
    fn compiles_a_linear_three_node_circuit() {
        let spec = spec(
            &[("src", "tsi.source.dataloader"), ("rep", "tsi.wikimyei.representation.vicreg"), ("sink", "tsi.sink.null")],
            &[("src", "payload", "rep", "step"), ("rep", "payload", "sink", "step")],
            "src",
        );
        let circuit = Circuit::compile(&spec).unwrap();
        assert_eq!(circuit.topo_order, vec![0, 1, 2]);
        assert_eq!(circuit.source_idx, 0);
    }

    #[test]
    fn rejects_a_cycle() {
        let spec = spec(&[("a", "t"), ("b", "t")], &[("a", "payload", "b", "step"), ("b", "payload", "a", "step")], "a");
        let err = Circuit::compile(&spec).unwrap_err();
        assert_eq!(tsi_types::error::ErrorCode::code(&err), "SEMANTIC");
    }

    #[test]
    fn rejects_incompatible_port_kinds() {
        let spec = spec(&[("a", "t"), ("b", "t")], &[("a", "meta", "b", "step")], "a");
        let err = Circuit::compile(&spec).unwrap_err();
        assert_eq!(tsi_types::error::ErrorCode::code(&err), "SEMANTIC");
    }

    #[test]
    fn rejects_non_source_node_without_inbound_step_edge() {
        let spec = spec(&[("src", "t"), ("orphan", "t")], &[], "src");
        let err = Circuit::compile(&spec).unwrap_err();
        assert_eq!(tsi_types::error::ErrorCode::code(&err), "SEMANTIC");
    }
}
