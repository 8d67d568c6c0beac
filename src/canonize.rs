//! Canonical hashes for molecular graphs.
//!
//! Uses Weisfeiler-Lehman iterative neighborhood refinement: each node label
//! starts as its element symbol and is refined for a fixed number of rounds
//! by digesting the sorted multiset of its neighbors' labels. The multiset
//! of labels from every round is folded into one final digest. Isomorphic
//! graphs always receive equal hashes; non-isomorphic graphs sharing a hash
//! is a known, accepted approximation.
//!
//! Applied to whole bonding graphs, covalent-only graphs, and the radius-1
//! ego graph around each non-metal atom (the "star" hash).

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::LazyLock,
};

use petgraph::{graph::NodeIndex, visit::EdgeRef};
use sha2::{Digest, Sha256};

use crate::molecule::{Atom, Element, Index, MGraph};

/// Number of label refinement rounds. Enough to separate local structure at
/// the molecule sizes seen in electrolyte networks.
const REFINEMENT_ROUNDS: usize = 3;

/// Canonical hash of the isolated hydrogen atom, used to recognize trivial
/// hydrogen hops in fragment matching.
pub static HYDROGEN_HASH: LazyLock<String> = LazyLock::new(|| {
    let mut g = MGraph::default();
    g.add_node(Atom::new(Element::Hydrogen, 0));
    graph_hash(&g)
});

fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let out = hasher.finalize();
    // 16 bytes of digest keeps hashes short enough to juggle in multisets.
    out[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Canonical hash of an entire molecular graph.
///
/// Parallel edges contribute their multiplicity to the neighbor multiset, so
/// a double coordination counts twice.
pub fn graph_hash(g: &MGraph) -> String {
    let mut labels: HashMap<NodeIndex<Index>, String> = g
        .node_indices()
        .map(|n| (n, g[n].element().to_string()))
        .collect();

    let mut rounds: Vec<(String, usize)> = Vec::new();
    for _ in 0..REFINEMENT_ROUNDS {
        let mut refined = HashMap::with_capacity(labels.len());
        for n in g.node_indices() {
            let mut neighbor_labels: Vec<&str> =
                g.neighbors(n).map(|m| labels[&m].as_str()).collect();
            neighbor_labels.sort_unstable();
            let combined = format!("{}|{}", labels[&n], neighbor_labels.concat());
            refined.insert(n, digest(&combined));
        }
        labels = refined;

        let mut counter: BTreeMap<&String, usize> = BTreeMap::new();
        for label in labels.values() {
            *counter.entry(label).or_insert(0) += 1;
        }
        rounds.extend(counter.into_iter().map(|(l, c)| (l.clone(), c)));
    }

    let mut aggregate = String::new();
    for (label, count) in rounds {
        aggregate.push_str(&label);
        aggregate.push(':');
        aggregate.push_str(&count.to_string());
        aggregate.push(',');
    }
    digest(&aggregate)
}

/// Canonical hash of the radius-1 ego graph around `center`: the induced
/// subgraph on the center and its immediate neighbors, including any edges
/// among the neighbors themselves.
pub fn star_hash(g: &MGraph, center: NodeIndex<Index>) -> String {
    let mut nodes: BTreeSet<NodeIndex<Index>> = g.neighbors(center).collect();
    nodes.insert(center);
    graph_hash(&induced_subgraph(g, &nodes))
}

/// Induced subgraph on `nodes`, preserving atom weights and parallel edges.
pub fn induced_subgraph(g: &MGraph, nodes: &BTreeSet<NodeIndex<Index>>) -> MGraph {
    let mut h = MGraph::with_capacity(nodes.len(), nodes.len());
    let mut map = HashMap::with_capacity(nodes.len());
    for &n in nodes {
        map.insert(n, h.add_node(g[n]));
    }
    for e in g.edge_references() {
        if let (Some(&hu), Some(&hv)) = (map.get(&e.source()), map.get(&e.target())) {
            h.add_edge(hu, hv, ());
        }
    }
    h
}
