//! Species predicate library and species decision trees.
//!
//! Each predicate answers a yes/no question about one molecule record and
//! may mutate the record as a side effect (pruning spurious hydrogen bonds,
//! attaching solvation corrections, caching graph hashes and fragment data).
//! Predicates that mutate bonding topology must be ordered before any
//! predicate that depends on connectivity, hashes, or fragments; the preset
//! trees encode that order.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{
    canonize::{graph_hash, star_hash},
    error::FilterError,
    fragment::{single_bond_fragments, unbroken_fragment},
    molecule::{Element, MoleculeRecord},
    tree::{run_decision_tree, DecisionTree, Verdict},
};

/// Solvation shell parameters for one metal species (or one metal species at
/// one effective charge, e.g. "Mg_2").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvationShell {
    /// Correction per missing coordination bond, in eV.
    pub solvation_correction: f64,
    /// Search radius for coordination partners, in Angstroms.
    pub coordination_radius: f64,
    /// Coordination bonds a fully solvated metal center would have.
    pub max_coordination_bonds: usize,
}

/// A solvation environment: shell parameters per metal species, plus the two
/// behavioral switches that distinguish the chemistries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvationEnv {
    pub shells: BTreeMap<String, SolvationShell>,
    /// Key shells by species plus effective charge ("Mg_1"/"Mg_2") instead
    /// of species alone.
    pub charge_resolved: bool,
    /// Add missing coordination edges to the bonding graph while counting.
    pub extend_graph: bool,
}

impl SolvationEnv {
    /// Lithium in ethylene carbonate.
    pub fn li_ec() -> Self {
        Self {
            shells: BTreeMap::from([(
                "Li".to_string(),
                SolvationShell {
                    solvation_correction: -0.68,
                    coordination_radius: 2.4,
                    max_coordination_bonds: 4,
                },
            )]),
            charge_resolved: false,
            extend_graph: true,
        }
    }

    /// Magnesium in diglyme.
    pub fn mg_g2() -> Self {
        Self {
            shells: BTreeMap::from([
                (
                    "Mg_1".to_string(),
                    SolvationShell {
                        solvation_correction: -0.56,
                        coordination_radius: 2.4,
                        max_coordination_bonds: 5,
                    },
                ),
                (
                    "Mg_2".to_string(),
                    SolvationShell {
                        solvation_correction: -1.49,
                        coordination_radius: 2.4,
                        max_coordination_bonds: 6,
                    },
                ),
            ]),
            charge_resolved: true,
            extend_graph: false,
        }
    }

    /// Magnesium in tetrahydrofuran.
    pub fn mg_thf() -> Self {
        Self {
            shells: BTreeMap::from([
                (
                    "Mg_1".to_string(),
                    SolvationShell {
                        solvation_correction: -0.70,
                        coordination_radius: 2.4,
                        max_coordination_bonds: 5,
                    },
                ),
                (
                    "Mg_2".to_string(),
                    SolvationShell {
                        solvation_correction: -1.91,
                        coordination_radius: 2.4,
                        max_coordination_bonds: 6,
                    },
                ),
            ]),
            charge_resolved: true,
            extend_graph: false,
        }
    }
}

/// Hydrogen-bond reassignment strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HydrogenFixup {
    /// A hydrogen bonded to several atoms keeps only its nearest neighbor.
    Nearest,
    /// Any hydrogen bond longer than `max_dist` (Angstroms) is removed,
    /// independent of nearest-neighbor status.
    Cutoff { max_dist: f64 },
}

/// A named, parameterized predicate over one molecule record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpeciesFilter {
    /// Discard bare metals that are not positively charged.
    MetalIonFilter,
    /// Discard molecules whose full bonding graph is disconnected.
    MolNotConnected,
    /// Discard non-metal molecules held together only by coordination bonds.
    MetalComplex,
    /// Discard metal-bearing molecules with no detected coordination bonds.
    BadMetalCoordination,
    /// Discard molecules with |charge| > 1.
    ChargeTooBig,
    /// Discard effectively neutral lithium centers (NBO charge below 0.1).
    /// Molecules without NBO data pass.
    Li0Filter,
    /// Discard all bare metals.
    NoBareMetal,
    /// Cache whole-graph and covalent-graph canonical hashes. Never discards.
    ComputeGraphHashes,
    /// Cache the radius-1 neighborhood hash of every non-metal atom. Never
    /// discards.
    AddStarHashes,
    /// Append the trivial fragmentation. Never discards; skipped for bare
    /// metals.
    AddUnbrokenFragment,
    /// Append one fragmentation per covalent bond. Never discards; skipped
    /// for bare metals.
    AddSingleBondFragments,
    /// Prune spurious hydrogen bonds. Never discards.
    FixHydrogenBonding(HydrogenFixup),
    /// Detect coordination partners around each metal center and set the
    /// solvation-corrected free energy. Never discards.
    SetSolvationFreeEnergy(SolvationEnv),
    DefaultTrue,
}

impl Display for SpeciesFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SpeciesFilter::MetalIonFilter => "metal ion filter",
            SpeciesFilter::MolNotConnected => "molecule not connected",
            SpeciesFilter::MetalComplex => "metal-centric complex",
            SpeciesFilter::BadMetalCoordination => "bad metal coordination",
            SpeciesFilter::ChargeTooBig => "charge too big",
            SpeciesFilter::Li0Filter => "Li0 filter",
            SpeciesFilter::NoBareMetal => "no bare metal",
            SpeciesFilter::ComputeGraphHashes => "compute graph hashes",
            SpeciesFilter::AddStarHashes => "add star hashes",
            SpeciesFilter::AddUnbrokenFragment => "add unbroken fragment",
            SpeciesFilter::AddSingleBondFragments => "add single bond fragments",
            SpeciesFilter::FixHydrogenBonding(HydrogenFixup::Nearest) => {
                "fix hydrogen bonding (nearest)"
            }
            SpeciesFilter::FixHydrogenBonding(HydrogenFixup::Cutoff { .. }) => {
                "fix hydrogen bonding (cutoff)"
            }
            SpeciesFilter::SetSolvationFreeEnergy(_) => "set solvation free energy",
            SpeciesFilter::DefaultTrue => "default true",
        };
        write!(f, "{name}")
    }
}

impl SpeciesFilter {
    /// Answer this predicate for `mol`, mutating the record where the
    /// predicate's contract says so.
    pub fn evaluate(&self, mol: &mut MoleculeRecord) -> Result<bool, FilterError> {
        match self {
            SpeciesFilter::MetalIonFilter => Ok(mol.is_bare_metal() && mol.charge <= 0),

            SpeciesFilter::MolNotConnected => Ok(!mol.is_connected()),

            SpeciesFilter::MetalComplex => {
                // A bare metal is not a metal complex.
                if mol.is_bare_metal() {
                    return Ok(false);
                }
                Ok(!mol.covalent_is_connected())
            }

            SpeciesFilter::BadMetalCoordination => Ok(!mol.is_bare_metal()
                && !mol.metal_indices.is_empty()
                && mol.coordination_bond_count == 0),

            SpeciesFilter::ChargeTooBig => Ok(mol.charge.abs() > 1),

            SpeciesFilter::Li0Filter => {
                // Some molecules have no NBO data; that is expected.
                let Some(nbo) = &mol.partial_charges_nbo else {
                    return Ok(false);
                };
                Ok(mol
                    .metal_indices
                    .iter()
                    .any(|&i| mol.species[i] == Element::Lithium && nbo[i] < 0.1))
            }

            SpeciesFilter::NoBareMetal => Ok(mol.is_bare_metal()),

            SpeciesFilter::ComputeGraphHashes => {
                mol.total_hash = Some(graph_hash(&mol.graph));
                mol.covalent_hash = Some(graph_hash(&mol.covalent_graph));
                Ok(false)
            }

            SpeciesFilter::AddStarHashes => {
                for i in 0..mol.atom_count() {
                    if let Some(node) = mol.covalent_node(i) {
                        mol.star_hashes
                            .insert(i, star_hash(&mol.covalent_graph, node));
                    }
                }
                Ok(false)
            }

            SpeciesFilter::AddUnbrokenFragment => {
                if mol.is_bare_metal() {
                    return Ok(false);
                }
                let covalent_hash = mol
                    .covalent_hash
                    .clone()
                    .ok_or(FilterError::MissingAnnotation("covalent_hash"))?;
                mol.fragment_data.push(unbroken_fragment(covalent_hash));
                Ok(false)
            }

            SpeciesFilter::AddSingleBondFragments => {
                if mol.is_bare_metal() {
                    return Ok(false);
                }
                let complexes = single_bond_fragments(&mol.covalent_graph);
                mol.fragment_data.extend(complexes);
                Ok(false)
            }

            SpeciesFilter::FixHydrogenBonding(fixup) => {
                fix_hydrogen_bonding(mol, fixup);
                Ok(false)
            }

            SpeciesFilter::SetSolvationFreeEnergy(env) => set_solvation_free_energy(mol, env),

            SpeciesFilter::DefaultTrue => Ok(true),
        }
    }
}

fn fix_hydrogen_bonding(mol: &mut MoleculeRecord, fixup: &HydrogenFixup) {
    if mol.atom_count() < 2 {
        return;
    }

    for i in 0..mol.atom_count() {
        if mol.species[i] != Element::Hydrogen {
            continue;
        }

        let adjacent: Vec<(usize, f64)> = mol
            .bonded_neighbors(i)
            .into_iter()
            .map(|j| (j, mol.distance_sq(i, j)))
            .collect();

        match fixup {
            HydrogenFixup::Nearest => {
                if adjacent.len() < 2 {
                    continue;
                }
                let closest = adjacent
                    .iter()
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(j, _)| *j)
                    .unwrap_or(adjacent[0].0);
                for &(j, _) in &adjacent {
                    if j != closest {
                        mol.remove_bond(i, j);
                        mol.remove_covalent_bond(i, j);
                    }
                }
            }
            HydrogenFixup::Cutoff { max_dist } => {
                for &(j, dist_sq) in &adjacent {
                    if dist_sq > max_dist * max_dist {
                        mol.remove_bond(i, j);
                        mol.remove_covalent_bond(i, j);
                    }
                }
            }
        }
    }
}

/// Return `true` iff any available estimator assigns atom `j` a negative
/// partial charge. At least one estimator must be present.
fn has_negative_partial_charge(mol: &MoleculeRecord, j: usize) -> Result<bool, FilterError> {
    let resp = mol.partial_charges_resp.as_ref().map(|v| v[j]);
    let mulliken = mol.partial_charges_mulliken.as_ref().map(|v| v[j]);
    if resp.is_none() && mulliken.is_none() {
        return Err(FilterError::MissingPartialCharges {
            molecule: mol.molecule_id.clone(),
        });
    }
    Ok(resp.is_some_and(|q| q < 0.0) || mulliken.is_some_and(|q| q < 0.0))
}

fn set_solvation_free_energy(
    mol: &mut MoleculeRecord,
    env: &SolvationEnv,
) -> Result<bool, FilterError> {
    mol.coordination_bond_count = 0;
    let mut correction = 0.0;

    for i in mol.metal_indices.clone() {
        let species = mol.species[i].to_string();
        let key = if env.charge_resolved {
            let resp = mol.partial_charges_resp.as_ref().map(|v| v[i]);
            let mulliken = mol.partial_charges_mulliken.as_ref().map(|v| v[i]);
            let partial_charge = match (resp, mulliken) {
                (Some(a), Some(b)) => a.max(b),
                (Some(a), None) => a,
                (None, Some(b)) => b,
                (None, None) => {
                    return Err(FilterError::MissingPartialCharges {
                        molecule: mol.molecule_id.clone(),
                    })
                }
            };
            let effective_charge = if partial_charge < 1.2 { "_1" } else { "_2" };
            format!("{species}{effective_charge}")
        } else {
            species
        };

        let shell = env
            .shells
            .get(&key)
            .ok_or_else(|| FilterError::MissingSolvationShell { key: key.clone() })?
            .clone();

        let mut coordination_partners = 0usize;
        let radius_sq = shell.coordination_radius * shell.coordination_radius;
        for j in 0..mol.atom_count() {
            if j == i {
                continue;
            }
            if mol.distance_sq(i, j) < radius_sq && has_negative_partial_charge(mol, j)? {
                if env.extend_graph && !mol.has_bond(i, j) {
                    mol.add_bond(i, j);
                }
                coordination_partners += 1;
            }
        }

        mol.coordination_bond_count += coordination_partners;
        correction += shell.solvation_correction
            * (shell.max_coordination_bonds as f64 - coordination_partners as f64);
    }

    mol.solvation_free_energy = Some(correction + mol.free_energy);
    Ok(false)
}

/// Run one molecule through a species decision tree.
pub fn decide_species(
    mol: &mut MoleculeRecord,
    tree: &DecisionTree<SpeciesFilter>,
    pathway: Option<&mut Vec<String>>,
) -> Result<Verdict, FilterError> {
    run_decision_tree(tree, |question| question.evaluate(mol), pathway)
}

/// Species decision tree for the Li / ethylene carbonate chemistry.
///
/// Bonding mutations (hydrogen fixup, coordination edge extension) come
/// before connectivity checks, which come before hash and fragment caching.
pub fn li_ec_species_tree() -> DecisionTree<SpeciesFilter> {
    DecisionTree::Node(vec![
        (
            SpeciesFilter::FixHydrogenBonding(HydrogenFixup::Nearest),
            DecisionTree::keep(),
        ),
        (
            SpeciesFilter::SetSolvationFreeEnergy(SolvationEnv::li_ec()),
            DecisionTree::keep(),
        ),
        (SpeciesFilter::ChargeTooBig, DecisionTree::discard()),
        (SpeciesFilter::Li0Filter, DecisionTree::discard()),
        (SpeciesFilter::ComputeGraphHashes, DecisionTree::keep()),
        (SpeciesFilter::MetalIonFilter, DecisionTree::discard()),
        (SpeciesFilter::BadMetalCoordination, DecisionTree::discard()),
        (SpeciesFilter::MolNotConnected, DecisionTree::discard()),
        (SpeciesFilter::MetalComplex, DecisionTree::discard()),
        (SpeciesFilter::AddStarHashes, DecisionTree::keep()),
        (SpeciesFilter::AddUnbrokenFragment, DecisionTree::keep()),
        (SpeciesFilter::AddSingleBondFragments, DecisionTree::keep()),
        (SpeciesFilter::DefaultTrue, DecisionTree::keep()),
    ])
}

fn mg_species_tree(env: SolvationEnv) -> DecisionTree<SpeciesFilter> {
    DecisionTree::Node(vec![
        (
            SpeciesFilter::SetSolvationFreeEnergy(env),
            DecisionTree::keep(),
        ),
        (SpeciesFilter::NoBareMetal, DecisionTree::discard()),
        (
            SpeciesFilter::FixHydrogenBonding(HydrogenFixup::Cutoff { max_dist: 1.5 }),
            DecisionTree::keep(),
        ),
        (SpeciesFilter::ComputeGraphHashes, DecisionTree::keep()),
        (SpeciesFilter::MetalIonFilter, DecisionTree::discard()),
        (SpeciesFilter::BadMetalCoordination, DecisionTree::discard()),
        (SpeciesFilter::MolNotConnected, DecisionTree::discard()),
        (SpeciesFilter::MetalComplex, DecisionTree::discard()),
        (SpeciesFilter::AddStarHashes, DecisionTree::keep()),
        (SpeciesFilter::AddUnbrokenFragment, DecisionTree::keep()),
        (SpeciesFilter::AddSingleBondFragments, DecisionTree::keep()),
        (SpeciesFilter::DefaultTrue, DecisionTree::keep()),
    ])
}

/// Species decision tree for the Mg / diglyme chemistry.
pub fn mg_g2_species_tree() -> DecisionTree<SpeciesFilter> {
    mg_species_tree(SolvationEnv::mg_g2())
}

/// Species decision tree for the Mg / tetrahydrofuran chemistry.
pub fn mg_thf_species_tree() -> DecisionTree<SpeciesFilter> {
    mg_species_tree(SolvationEnv::mg_thf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::molecule::{test_record, MoleculeRecord};
    use approx::assert_relative_eq;

    fn with_charges(mut mol: MoleculeRecord, resp: &[f64]) -> MoleculeRecord {
        mol.partial_charges_resp = Some(resp.to_vec());
        mol.partial_charges_mulliken = Some(resp.to_vec());
        mol
    }

    #[test]
    fn metal_ion_filter_discards_reduced_metals() {
        let mut li_plus = test_record(&["Li"], &[[0.0; 3]], 1, 0.0, &[]);
        let mut li_neutral = test_record(&["Li"], &[[0.0; 3]], 0, 0.0, &[]);
        assert!(!SpeciesFilter::MetalIonFilter
            .evaluate(&mut li_plus)
            .unwrap());
        assert!(SpeciesFilter::MetalIonFilter
            .evaluate(&mut li_neutral)
            .unwrap());
    }

    #[test]
    fn charge_bounds() {
        let mut ok = test_record(&["C"], &[[0.0; 3]], -1, 0.0, &[]);
        let mut bad = test_record(&["C"], &[[0.0; 3]], 2, 0.0, &[]);
        assert!(!SpeciesFilter::ChargeTooBig.evaluate(&mut ok).unwrap());
        assert!(SpeciesFilter::ChargeTooBig.evaluate(&mut bad).unwrap());
    }

    #[test]
    fn disconnected_molecule_detected() {
        let mut mol = test_record(
            &["C", "O", "C"],
            &[[0.0; 3], [1.4, 0.0, 0.0], [9.0, 0.0, 0.0]],
            0,
            0.0,
            &[(0, 1)],
        );
        assert!(SpeciesFilter::MolNotConnected.evaluate(&mut mol).unwrap());
    }

    #[test]
    fn metal_complex_detected() {
        // Two covalent units joined only through Li coordination.
        let mut mol = test_record(
            &["C", "O", "Li", "O", "C"],
            &[
                [0.0; 3],
                [1.4, 0.0, 0.0],
                [3.0, 0.0, 0.0],
                [4.6, 0.0, 0.0],
                [6.0, 0.0, 0.0],
            ],
            1,
            0.0,
            &[(0, 1), (1, 2), (2, 3), (3, 4)],
        );
        assert!(SpeciesFilter::MetalComplex.evaluate(&mut mol).unwrap());
    }

    #[test]
    fn nearest_fixup_keeps_closest_neighbor() {
        // H bonded to two oxygens; the closer one survives.
        let mut mol = test_record(
            &["O", "H", "O"],
            &[[0.0; 3], [1.0, 0.0, 0.0], [2.5, 0.0, 0.0]],
            0,
            0.0,
            &[(0, 1), (1, 2)],
        );
        SpeciesFilter::FixHydrogenBonding(HydrogenFixup::Nearest)
            .evaluate(&mut mol)
            .unwrap();
        assert!(mol.has_bond(0, 1));
        assert!(!mol.has_bond(1, 2));
        assert_eq!(mol.covalent_graph.edge_count(), 1);
    }

    #[test]
    fn cutoff_fixup_drops_long_bonds() {
        let mut mol = test_record(
            &["O", "H", "O"],
            &[[0.0; 3], [1.0, 0.0, 0.0], [2.8, 0.0, 0.0]],
            0,
            0.0,
            &[(0, 1), (1, 2)],
        );
        SpeciesFilter::FixHydrogenBonding(HydrogenFixup::Cutoff { max_dist: 1.5 })
            .evaluate(&mut mol)
            .unwrap();
        assert!(mol.has_bond(0, 1));
        assert!(!mol.has_bond(1, 2));
    }

    #[test]
    fn solvation_correction_counts_partners_and_extends_graph() {
        // Li with one O within the 2.4 A radius and one beyond it.
        let mol = test_record(
            &["Li", "O", "O"],
            &[[0.0; 3], [2.0, 0.0, 0.0], [5.0, 0.0, 0.0]],
            1,
            -10.0,
            &[],
        );
        let mut mol = with_charges(mol, &[0.9, -0.8, -0.8]);
        let env = SolvationEnv::li_ec();
        SpeciesFilter::SetSolvationFreeEnergy(env)
            .evaluate(&mut mol)
            .unwrap();
        assert_eq!(mol.coordination_bond_count, 1);
        assert!(mol.has_bond(0, 1));
        assert!(!mol.has_bond(0, 2));
        // correction = -0.68 * (4 - 1) = -2.04
        assert_relative_eq!(mol.solvation_free_energy.unwrap(), -12.04, epsilon = 1e-12);
    }

    #[test]
    fn mg_solvation_resolves_effective_charge() {
        let mol = test_record(
            &["Mg", "O"],
            &[[0.0; 3], [2.0, 0.0, 0.0]],
            1,
            0.0,
            &[],
        );
        let mut mol = with_charges(mol, &[1.5, -0.9]);
        SpeciesFilter::SetSolvationFreeEnergy(SolvationEnv::mg_g2())
            .evaluate(&mut mol)
            .unwrap();
        // Mg_2 shell: -1.49 * (6 - 1) = -7.45; graph not extended.
        assert_eq!(mol.coordination_bond_count, 1);
        assert!(!mol.has_bond(0, 1));
        assert_relative_eq!(mol.solvation_free_energy.unwrap(), -7.45, epsilon = 1e-12);
    }

    #[test]
    fn missing_partial_charges_is_an_error() {
        let mut mol = test_record(
            &["Li", "O"],
            &[[0.0; 3], [2.0, 0.0, 0.0]],
            1,
            0.0,
            &[],
        );
        let err = SpeciesFilter::SetSolvationFreeEnergy(SolvationEnv::li_ec())
            .evaluate(&mut mol);
        assert!(matches!(
            err,
            Err(FilterError::MissingPartialCharges { .. })
        ));
    }

    #[test]
    fn li0_filter_skips_without_nbo() {
        let mut mol = test_record(&["Li"], &[[0.0; 3]], 1, 0.0, &[]);
        assert!(!SpeciesFilter::Li0Filter.evaluate(&mut mol).unwrap());
        mol.partial_charges_nbo = Some(vec![0.05]);
        assert!(SpeciesFilter::Li0Filter.evaluate(&mut mol).unwrap());
    }

    #[test]
    fn li_ec_tree_keeps_and_annotates_organic_molecule() {
        // Methanol-like fragment with well-separated atoms.
        let mol = test_record(
            &["C", "O", "H", "H"],
            &[
                [0.0; 3],
                [1.4, 0.0, 0.0],
                [-0.6, 0.9, 0.0],
                [2.0, 0.8, 0.0],
            ],
            0,
            -5.0,
            &[(0, 1), (0, 2), (1, 3)],
        );
        let mut mol = with_charges(mol, &[0.1, -0.5, 0.2, 0.2]);
        let mut pathway = Vec::new();
        let verdict = decide_species(&mut mol, &li_ec_species_tree(), Some(&mut pathway)).unwrap();
        assert_eq!(verdict, Verdict::Keep);
        assert!(mol.total_hash.is_some());
        assert!(mol.covalent_hash.is_some());
        assert_eq!(mol.star_hashes.len(), 4);
        // Trivial fragmentation plus one per covalent bond.
        assert_eq!(mol.fragment_data.len(), 4);
        assert_eq!(mol.fragment_data[0].number_of_bonds_broken, 0);
        assert_eq!(pathway.last().unwrap(), "keep");
    }

    #[test]
    fn mg_tree_discards_bare_metal() {
        let mol = test_record(&["Mg"], &[[0.0; 3]], 1, 0.0, &[]);
        let mut mol = with_charges(mol, &[1.0]);
        let verdict = decide_species(&mut mol, &mg_g2_species_tree(), None).unwrap();
        assert_eq!(verdict, Verdict::Discard);
    }
}
