//! Graph-theoretic representation of a candidate species.
//!
//! A [`MoleculeRecord`] carries the quantum-chemistry-derived properties of
//! one candidate molecule together with two undirected bonding graphs: the
//! full graph (covalent plus metal coordination bonds) and the covalent-only
//! graph, which drops metal centers entirely. Species filtering mutates the
//! graphs in a documented order (hydrogen-bond fixup, solvation correction,
//! hash computation, fragment enumeration); after filtering the record is
//! frozen and indexed for reaction filtering.

use std::{collections::HashMap, fmt::Display, str::FromStr};

use petgraph::{
    graph::{Graph, NodeIndex},
    Undirected,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants;

pub(crate) type Index = u32;

/// Undirected molecular graph; parallel edges are permitted.
pub type MGraph = Graph<Atom, (), Undirected, Index>;

/// Thrown by [`Element::from_str`] if the string does not represent a valid
/// chemical element.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ParseElementError;

macro_rules! periodic_table {
    ( $(($element:ident, $name:literal),)* ) => {
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        /// Represents a chemical element.
        pub enum Element {
            $( $element, )*
        }

        impl Display for Element {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match &self {
                    $( Element::$element => write!(f, "{}", $name), )*
                }
            }
        }

        impl FromStr for Element {
            type Err = ParseElementError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $name => Ok(Element::$element), )*
                    _ => Err(ParseElementError),
                }
            }
        }
    };
}

// Elements seen in electrolyte chemistries. Extend as needed.
periodic_table!(
    (Hydrogen, "H"),
    (Helium, "He"),
    (Lithium, "Li"),
    (Beryllium, "Be"),
    (Boron, "B"),
    (Carbon, "C"),
    (Nitrogen, "N"),
    (Oxygen, "O"),
    (Fluorine, "F"),
    (Neon, "Ne"),
    (Sodium, "Na"),
    (Magnesium, "Mg"),
    (Aluminum, "Al"),
    (Silicon, "Si"),
    (Phosphorus, "P"),
    (Sulfur, "S"),
    (Chlorine, "Cl"),
    (Argon, "Ar"),
    (Potassium, "K"),
    (Calcium, "Ca"),
    (Iron, "Fe"),
    (Cobalt, "Co"),
    (Nickel, "Ni"),
    (Copper, "Cu"),
    (Zinc, "Zn"),
    (Bromine, "Br"),
    (Iodine, "I"),
);

impl Element {
    /// Return `true` iff this element is a metal center. Bonds incident to
    /// metal centers are coordination bonds, not covalent bonds.
    pub fn is_metal(&self) -> bool {
        matches!(
            self,
            Element::Lithium | Element::Magnesium | Element::Calcium | Element::Zinc
        )
    }
}

/// The nodes of a molecular graph.
///
/// Atoms remember their position in the owning record's atom arrays so that
/// graph mutations and fragment bookkeeping can be reported in the original
/// atom numbering.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Atom {
    element: Element,
    atom: usize,
}

impl Atom {
    /// Construct an [`Atom`] of type `element` at atom index `atom`.
    pub fn new(element: Element, atom: usize) -> Self {
        Self { element, atom }
    }

    /// Return this [`Atom`]'s element.
    pub fn element(&self) -> Element {
        self.element
    }

    /// Return this [`Atom`]'s index in the owning record's atom arrays.
    pub fn atom(&self) -> usize {
        self.atom
    }
}

/// Thrown when a molecule record cannot be built from raw entry data.
#[derive(Debug, Error)]
pub enum MoleculeError {
    #[error("molecule {molecule_id} has no atoms")]
    Empty { molecule_id: String },

    #[error("molecule {molecule_id}: unknown element `{symbol}`")]
    UnknownElement { molecule_id: String, symbol: String },

    #[error("molecule {molecule_id}: bond ({i}, {j}) out of range for {atoms} atoms")]
    BondOutOfRange {
        molecule_id: String,
        i: usize,
        j: usize,
        atoms: usize,
    },

    #[error("molecule {molecule_id}: per-atom array has length {got}, expected {expected}")]
    MismatchedArray {
        molecule_id: String,
        got: usize,
        expected: usize,
    },
}

/// One way of breaking a molecule into fragments by removing zero or one
/// covalent bond.
///
/// Exactly one complex per molecule has zero bonds broken (the trivial
/// fragmentation); all others have exactly one. Removing a bridge edge
/// yields two fragments, removing a cycle edge yields one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentComplex {
    pub number_of_fragments: usize,
    pub number_of_bonds_broken: usize,
    /// Broken bond endpoints in the record's atom numbering.
    pub bonds_broken: Vec<(usize, usize)>,
    /// One canonical hash per fragment.
    pub fragment_hashes: Vec<String>,
}

/// One chemical species candidate.
#[derive(Debug, Clone)]
pub struct MoleculeRecord {
    pub molecule_id: String,
    pub formula: String,
    pub charge: i64,
    pub spin_multiplicity: u32,
    /// Raw free energy in eV.
    pub free_energy: f64,
    /// Solvation-corrected free energy; written by the solvation predicate.
    pub solvation_free_energy: Option<f64>,
    pub species: Vec<Element>,
    /// Atom positions in Angstroms.
    pub positions: Vec<[f64; 3]>,
    pub partial_charges_resp: Option<Vec<f64>>,
    pub partial_charges_mulliken: Option<Vec<f64>>,
    pub partial_charges_nbo: Option<Vec<f64>>,
    pub ionization_energy: Option<f64>,
    pub electron_affinity: Option<f64>,
    /// Full bonding graph: covalent bonds plus metal coordination bonds.
    pub graph: MGraph,
    /// Covalent-only graph; metal centers and their bonds are absent.
    pub covalent_graph: MGraph,
    /// Atom index to covalent graph node; `None` for metal centers.
    covalent_nodes: Vec<Option<NodeIndex<Index>>>,
    /// Indices of metal atoms within the record.
    pub metal_indices: Vec<usize>,
    /// Number of detected metal coordination bonds; written by the solvation
    /// predicate.
    pub coordination_bond_count: usize,
    /// Radius-1 neighborhood hash per non-metal atom.
    pub star_hashes: HashMap<usize, String>,
    /// Canonical hash of the full bonding graph; written once.
    pub total_hash: Option<String>,
    /// Canonical hash of the covalent-only graph; written once.
    pub covalent_hash: Option<String>,
    pub fragment_data: Vec<FragmentComplex>,
}

impl MoleculeRecord {
    /// Build a record from raw entry data. The bond list covers the full
    /// bonding graph; bonds with a metal endpoint are taken as coordination
    /// bonds and excluded from the covalent graph.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        molecule_id: String,
        symbols: &[String],
        positions: Vec<[f64; 3]>,
        charge: i64,
        spin_multiplicity: u32,
        free_energy: f64,
        bonds: &[(usize, usize)],
        partial_charges_resp: Option<Vec<f64>>,
        partial_charges_mulliken: Option<Vec<f64>>,
        partial_charges_nbo: Option<Vec<f64>>,
        ionization_energy: Option<f64>,
        electron_affinity: Option<f64>,
    ) -> Result<Self, MoleculeError> {
        if symbols.is_empty() {
            return Err(MoleculeError::Empty { molecule_id });
        }

        let mut species = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let element =
                Element::from_str(symbol).map_err(|_| MoleculeError::UnknownElement {
                    molecule_id: molecule_id.clone(),
                    symbol: symbol.clone(),
                })?;
            species.push(element);
        }

        let n = species.len();
        for len in [
            Some(positions.len()),
            partial_charges_resp.as_ref().map(Vec::len),
            partial_charges_mulliken.as_ref().map(Vec::len),
            partial_charges_nbo.as_ref().map(Vec::len),
        ]
        .into_iter()
        .flatten()
        {
            if len != n {
                return Err(MoleculeError::MismatchedArray {
                    molecule_id,
                    got: len,
                    expected: n,
                });
            }
        }

        let metal_indices: Vec<usize> = species
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_metal())
            .map(|(i, _)| i)
            .collect();

        let mut graph = MGraph::default();
        let mut covalent_graph = MGraph::default();
        let mut nodes = Vec::with_capacity(n);
        let mut covalent_nodes = Vec::with_capacity(n);
        for (i, element) in species.iter().enumerate() {
            nodes.push(graph.add_node(Atom::new(*element, i)));
            covalent_nodes.push(if element.is_metal() {
                None
            } else {
                Some(covalent_graph.add_node(Atom::new(*element, i)))
            });
        }

        for &(i, j) in bonds {
            if i >= n || j >= n {
                return Err(MoleculeError::BondOutOfRange {
                    molecule_id,
                    i,
                    j,
                    atoms: n,
                });
            }
            graph.add_edge(nodes[i], nodes[j], ());
            if let (Some(ci), Some(cj)) = (covalent_nodes[i], covalent_nodes[j]) {
                covalent_graph.add_edge(ci, cj, ());
            }
        }

        Ok(Self {
            molecule_id,
            formula: formula_of(&species),
            charge,
            spin_multiplicity,
            free_energy,
            solvation_free_energy: None,
            species,
            positions,
            partial_charges_resp,
            partial_charges_mulliken,
            partial_charges_nbo,
            ionization_energy,
            electron_affinity,
            graph,
            covalent_graph,
            covalent_nodes,
            metal_indices,
            coordination_bond_count: 0,
            star_hashes: HashMap::new(),
            total_hash: None,
            covalent_hash: None,
            fragment_data: Vec::new(),
        })
    }

    /// Number of atoms in this record.
    pub fn atom_count(&self) -> usize {
        self.species.len()
    }

    /// Return `true` iff this record's formula is a bare metal ion/atom.
    pub fn is_bare_metal(&self) -> bool {
        constants::is_bare_metal(&self.formula)
    }

    /// Covalent graph node for atom `i`, if `i` is not a metal center.
    pub fn covalent_node(&self, i: usize) -> Option<NodeIndex<Index>> {
        self.covalent_nodes[i]
    }

    /// Squared Euclidean distance between atoms `i` and `j` in Angstroms.
    pub fn distance_sq(&self, i: usize, j: usize) -> f64 {
        let a = self.positions[i];
        let b = self.positions[j];
        (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
    }

    /// Atoms bonded to atom `i` in the full bonding graph, one entry per
    /// parallel edge.
    pub fn bonded_neighbors(&self, i: usize) -> Vec<usize> {
        self.graph
            .neighbors(NodeIndex::new(i))
            .map(|n| self.graph[n].atom())
            .collect()
    }

    /// Return `true` iff atoms `i` and `j` share an edge in the full graph.
    pub fn has_bond(&self, i: usize, j: usize) -> bool {
        self.graph
            .find_edge(NodeIndex::new(i), NodeIndex::new(j))
            .is_some()
    }

    /// Add a bond between atoms `i` and `j` to the full graph.
    pub fn add_bond(&mut self, i: usize, j: usize) {
        self.graph
            .add_edge(NodeIndex::new(i), NodeIndex::new(j), ());
    }

    /// Remove all edges between atoms `i` and `j` from the full graph.
    pub fn remove_bond(&mut self, i: usize, j: usize) {
        let (u, v) = (NodeIndex::new(i), NodeIndex::new(j));
        while let Some(e) = self.graph.find_edge(u, v) {
            self.graph.remove_edge(e);
        }
    }

    /// Remove all edges between atoms `i` and `j` from the covalent graph,
    /// if both atoms are present in it.
    pub fn remove_covalent_bond(&mut self, i: usize, j: usize) {
        if let (Some(u), Some(v)) = (self.covalent_nodes[i], self.covalent_nodes[j]) {
            while let Some(e) = self.covalent_graph.find_edge(u, v) {
                self.covalent_graph.remove_edge(e);
            }
        }
    }

    /// Return `true` iff the full bonding graph is connected.
    pub fn is_connected(&self) -> bool {
        petgraph::algo::connected_components(&self.graph) == 1
    }

    /// Return `true` iff the covalent-only graph is connected. An empty
    /// covalent graph (all atoms are metal centers) is not connected.
    pub fn covalent_is_connected(&self) -> bool {
        self.covalent_graph.node_count() > 0
            && petgraph::algo::connected_components(&self.covalent_graph) == 1
    }
}

/// Alphabetized element-count formula, e.g. "C3 H4 O3" or "Li1".
fn formula_of(species: &[Element]) -> String {
    let mut counts = std::collections::BTreeMap::new();
    for element in species {
        *counts.entry(element.to_string()).or_insert(0usize) += 1;
    }
    counts
        .into_iter()
        .map(|(symbol, count)| format!("{symbol}{count}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
pub(crate) fn test_record(
    symbols: &[&str],
    positions: &[[f64; 3]],
    charge: i64,
    free_energy: f64,
    bonds: &[(usize, usize)],
) -> MoleculeRecord {
    MoleculeRecord::from_parts(
        "test".to_string(),
        &symbols.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        positions.to_vec(),
        charge,
        1,
        free_energy,
        bonds,
        None,
        None,
        None,
        None,
        None,
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_round_trip() {
        assert_eq!(Element::Lithium.to_string(), "Li");
        assert_eq!(str::parse("Li"), Ok(Element::Lithium));
        assert!(str::parse::<Element>("Foo").is_err());
    }

    #[test]
    fn formula_is_alphabetized() {
        let mol = test_record(
            &["O", "C", "H", "H", "C"],
            &[[0.0; 3]; 5],
            0,
            0.0,
            &[(0, 1), (1, 2), (1, 3), (0, 4)],
        );
        assert_eq!(mol.formula, "C2 H2 O1");
    }

    #[test]
    fn metal_bonds_are_coordination_only() {
        // Li coordinated to O of a C-O unit: covalent graph keeps only C-O.
        let mol = test_record(
            &["Li", "O", "C"],
            &[[0.0; 3], [2.0, 0.0, 0.0], [3.2, 0.0, 0.0]],
            1,
            0.0,
            &[(0, 1), (1, 2)],
        );
        assert_eq!(mol.metal_indices, vec![0]);
        assert_eq!(mol.graph.edge_count(), 2);
        assert_eq!(mol.covalent_graph.edge_count(), 1);
        assert_eq!(mol.covalent_graph.node_count(), 2);
        assert!(mol.covalent_node(0).is_none());
    }

    #[test]
    fn empty_molecule_fails_loudly() {
        let err = MoleculeRecord::from_parts(
            "empty".to_string(),
            &[],
            vec![],
            0,
            1,
            0.0,
            &[],
            None,
            None,
            None,
            None,
            None,
        );
        assert!(matches!(err, Err(MoleculeError::Empty { .. })));
    }
}
