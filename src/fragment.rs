//! Enumerate single-bond-removal fragmentations of a covalent graph.
//!
//! Every molecule gets the trivial fragmentation (whole graph, no bonds
//! broken) plus one fragmentation per covalent edge: remove the edge, find
//! the connected components of what remains, and hash each component. A
//! bridge edge yields two fragments, a cycle edge one. Bare-metal species
//! are never fragmented this way.

use std::collections::{BTreeSet, VecDeque};

use petgraph::{graph::NodeIndex, visit::EdgeRef};

use crate::{
    canonize::{graph_hash, induced_subgraph},
    molecule::{FragmentComplex, Index, MGraph},
};

/// Connected components of `g` as node sets.
fn connected_component_sets(g: &MGraph) -> Vec<BTreeSet<NodeIndex<Index>>> {
    let mut components = Vec::new();
    let mut seen: BTreeSet<NodeIndex<Index>> = BTreeSet::new();

    for start in g.node_indices() {
        if seen.contains(&start) {
            continue;
        }
        let mut component = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(n) = queue.pop_front() {
            if !component.insert(n) {
                continue;
            }
            seen.insert(n);
            queue.extend(g.neighbors(n).filter(|m| !component.contains(m)));
        }
        components.push(component);
    }

    components
}

/// The trivial fragmentation: the whole covalent graph, zero bonds broken.
/// `covalent_hash` is the cached hash of that graph.
pub fn unbroken_fragment(covalent_hash: String) -> FragmentComplex {
    FragmentComplex {
        number_of_fragments: 1,
        number_of_bonds_broken: 0,
        bonds_broken: Vec::new(),
        fragment_hashes: vec![covalent_hash],
    }
}

/// One fragmentation per edge of the covalent graph. Operates on clones;
/// the input graph is left untouched.
pub fn single_bond_fragments(covalent: &MGraph) -> Vec<FragmentComplex> {
    let mut complexes = Vec::with_capacity(covalent.edge_count());

    for e in covalent.edge_references() {
        let bond = (covalent[e.source()].atom(), covalent[e.target()].atom());

        // Clones preserve edge indices, so the id addresses the same edge
        // in `h`.
        let mut h = covalent.clone();
        h.remove_edge(e.id());

        let fragment_hashes: Vec<String> = connected_component_sets(&h)
            .iter()
            .map(|component| graph_hash(&induced_subgraph(&h, component)))
            .collect();

        complexes.push(FragmentComplex {
            number_of_fragments: fragment_hashes.len(),
            number_of_bonds_broken: 1,
            bonds_broken: vec![bond],
            fragment_hashes,
        });
    }

    complexes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::molecule::test_record;

    #[test]
    fn trivial_fragment_shape() {
        let complex = unbroken_fragment("abc".to_string());
        assert_eq!(complex.number_of_fragments, 1);
        assert_eq!(complex.number_of_bonds_broken, 0);
        assert!(complex.bonds_broken.is_empty());
    }

    #[test]
    fn bridge_edge_yields_two_fragments() {
        // H3C-OH: every bond is a bridge.
        let mol = test_record(
            &["C", "O", "H", "H", "H", "H"],
            &[[0.0; 3]; 6],
            0,
            0.0,
            &[(0, 1), (0, 2), (0, 3), (0, 4), (1, 5)],
        );
        let complexes = single_bond_fragments(&mol.covalent_graph);
        assert_eq!(complexes.len(), 5);
        for complex in &complexes {
            assert_eq!(complex.number_of_fragments, 2);
            assert_eq!(complex.number_of_bonds_broken, 1);
        }
    }

    #[test]
    fn cycle_edge_yields_one_fragment() {
        // C3 ring plus one pendant O.
        let mol = test_record(
            &["C", "C", "C", "O"],
            &[[0.0; 3]; 4],
            0,
            0.0,
            &[(0, 1), (1, 2), (2, 0), (0, 3)],
        );
        let complexes = single_bond_fragments(&mol.covalent_graph);
        let ring: Vec<_> = complexes
            .iter()
            .filter(|c| c.number_of_fragments == 1)
            .collect();
        let bridge: Vec<_> = complexes
            .iter()
            .filter(|c| c.number_of_fragments == 2)
            .collect();
        assert_eq!(ring.len(), 3);
        assert_eq!(bridge.len(), 1);
        assert_eq!(bridge[0].bonds_broken, vec![(0, 3)]);
    }

    #[test]
    fn ring_open_matches_chain_hash() {
        // Opening a C4 ring at any edge gives the same single fragment as a
        // C4 chain's trivial fragmentation.
        let ring = test_record(
            &["C", "C", "C", "C"],
            &[[0.0; 3]; 4],
            0,
            0.0,
            &[(0, 1), (1, 2), (2, 3), (3, 0)],
        );
        let chain = test_record(
            &["C", "C", "C", "C"],
            &[[0.0; 3]; 4],
            0,
            0.0,
            &[(0, 1), (1, 2), (2, 3)],
        );
        let chain_hash = graph_hash(&chain.covalent_graph);
        for complex in single_bond_fragments(&ring.covalent_graph) {
            assert_eq!(complex.fragment_hashes, vec![chain_hash.clone()]);
        }
    }
}
