//! Reaction predicate library and reaction decision trees.
//!
//! Each predicate answers a yes/no question about one candidate reaction
//! given the finalized molecule table and the simulation parameters, and may
//! annotate the reaction with derived quantities (dG, barrier, rate, redox
//! flag, matched fragment data). Annotations are write-once within a
//! traversal; a predicate that reads an annotation must sit below the
//! predicate that writes it in the tree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    canonize::HYDROGEN_HASH,
    constants::{KB, PLANCK, ROOM_TEMP},
    error::FilterError,
    molecule::MoleculeRecord,
    tree::{run_decision_tree, DecisionTree, Verdict},
};

/// Global simulation parameters supplied at tree construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionParams {
    /// Temperature in K.
    pub temperature: f64,
    /// Free energy offset per unit of net charge transferred, in eV.
    pub electron_free_energy: f64,
}

impl Default for ReactionParams {
    fn default() -> Self {
        Self {
            temperature: ROOM_TEMP,
            electron_free_energy: -1.4,
        }
    }
}

/// Which free energy a thermodynamic predicate reads.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeEnergyType {
    FreeEnergy,
    SolvationFreeEnergy,
}

impl FreeEnergyType {
    fn value(&self, mol: &MoleculeRecord) -> Result<f64, FilterError> {
        match self {
            FreeEnergyType::FreeEnergy => Ok(mol.free_energy),
            FreeEnergyType::SolvationFreeEnergy => mol
                .solvation_free_energy
                .ok_or(FilterError::MissingAnnotation("solvation_free_energy")),
        }
    }
}

impl Display for FreeEnergyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FreeEnergyType::FreeEnergy => write!(f, "free_energy"),
            FreeEnergyType::SolvationFreeEnergy => write!(f, "solvation_free_energy"),
        }
    }
}

impl FromStr for FreeEnergyType {
    type Err = FilterError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free_energy" => Ok(FreeEnergyType::FreeEnergy),
            "solvation_free_energy" => Ok(FreeEnergyType::SolvationFreeEnergy),
            other => Err(FilterError::UnknownFreeEnergyType(other.to_string())),
        }
    }
}

/// One broken bond in a matched fragmentation: two endpoints, each written
/// as (position of the molecule on its side, atom index in that molecule).
pub type BrokenBond = [(usize, usize); 2];

/// Derived quantities written by predicates during tree traversal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReactionAnnotations {
    pub is_redox: Option<bool>,
    pub dg: Option<f64>,
    pub dg_barrier: Option<f64>,
    pub rate: Option<f64>,
    pub marcus_barrier: Option<f64>,
    pub reactant_bonds_broken: Option<Vec<BrokenBond>>,
    pub product_bonds_broken: Option<Vec<BrokenBond>>,
    /// Multiset of matched fragment hashes, shared by both sides.
    pub fragment_hashes: Option<BTreeMap<String, usize>>,
    pub reactant_fragment_count: Option<usize>,
    pub product_fragment_count: Option<usize>,
}

/// One candidate transformation: indices into the finalized molecule table,
/// one or two per side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionRecord {
    pub reactants: Vec<usize>,
    pub products: Vec<usize>,
    #[serde(default)]
    pub annotations: ReactionAnnotations,
}

impl ReactionRecord {
    pub fn new(reactants: Vec<usize>, products: Vec<usize>) -> Self {
        Self {
            reactants,
            products,
            annotations: ReactionAnnotations::default(),
        }
    }

    /// Net charge change, products minus reactants. Positive means
    /// electrons are lost.
    fn dcharge(&self, mols: &[MoleculeRecord]) -> i64 {
        let products: i64 = self.products.iter().map(|&i| mols[i].charge).sum();
        let reactants: i64 = self.reactants.iter().map(|&i| mols[i].charge).sum();
        products - reactants
    }
}

/// A named, parameterized predicate over one reaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReactionFilter {
    /// Any net charge change marks a redox reaction; the flag is recorded
    /// either way.
    IsRedoxReaction,
    /// Discard anything that is not single reactant, single product.
    TooManyReactantsOrProducts,
    /// Discard net charge changes beyond one electron.
    DchargeTooLarge,
    /// Single reactant / single product whose covalent hashes differ.
    ReactantAndProductNotIsomorphic,
    /// Thermodynamic gate: discard above `threshold`, otherwise record dG,
    /// barrier, and an Arrhenius-style rate.
    DgAboveThreshold {
        threshold: f64,
        free_energy_type: FreeEnergyType,
        constant_barrier: f64,
    },
    /// Marcus-theory barrier for single-electron transfers. Annotates, never
    /// discards.
    MarcusBarrier,
    /// Bound on how much bond rearrangement one elementary step may carry.
    StarCountDiffAboveThreshold { threshold: usize },
    /// Two-to-two reactions sharing a covalent hash across sides are two
    /// independent reactions bundled together.
    ReactionIsCovalentDecomposable,
    /// Keep reactions involving a bare metal without rearrangement analysis.
    MetalCoordinationPassthrough,
    ConcertedMetalCoordination,
    ConcertedMetalCoordinationOneProduct,
    ConcertedMetalCoordinationOneReactant,
    /// The central combinatorial matching over fragmentation choices.
    FragmentMatchingFound,
    /// Refine a found match: discard single-molecule rearrangements that are
    /// not a trivial hydrogen hop.
    SingleReactantSingleProductNotHydrogenTransfer,
    /// Refine a found match: discard ring-closing dissociations, which are
    /// generated separately.
    SingleReactantDoubleProductRingClose,
    DefaultTrue,
}

impl Display for ReactionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReactionFilter::IsRedoxReaction => write!(f, "is redox reaction"),
            ReactionFilter::TooManyReactantsOrProducts => {
                write!(f, "too many reactants or products")
            }
            ReactionFilter::DchargeTooLarge => write!(f, "change in charge is too large"),
            ReactionFilter::ReactantAndProductNotIsomorphic => {
                write!(f, "reactants and products are not covalent isomorphic")
            }
            ReactionFilter::DgAboveThreshold {
                threshold,
                free_energy_type,
                ..
            } => write!(f, "{free_energy_type} dG is above threshold={threshold}"),
            ReactionFilter::MarcusBarrier => write!(f, "marcus barrier"),
            ReactionFilter::StarCountDiffAboveThreshold { threshold } => {
                write!(f, "star count diff above threshold={threshold}")
            }
            ReactionFilter::ReactionIsCovalentDecomposable => {
                write!(f, "reaction is covalent decomposable")
            }
            ReactionFilter::MetalCoordinationPassthrough => {
                write!(f, "metal coordination passthrough")
            }
            ReactionFilter::ConcertedMetalCoordination => {
                write!(f, "concerted metal coordination")
            }
            ReactionFilter::ConcertedMetalCoordinationOneProduct => {
                write!(f, "concerted metal coordination one product")
            }
            ReactionFilter::ConcertedMetalCoordinationOneReactant => {
                write!(f, "concerted metal coordination one reactant")
            }
            ReactionFilter::FragmentMatchingFound => write!(f, "fragment matching found"),
            ReactionFilter::SingleReactantSingleProductNotHydrogenTransfer => {
                write!(f, "not hydrogen transfer")
            }
            ReactionFilter::SingleReactantDoubleProductRingClose => write!(f, "ring close"),
            ReactionFilter::DefaultTrue => write!(f, "default true"),
        }
    }
}

fn covalent_hash_of(mol: &MoleculeRecord) -> Result<&String, FilterError> {
    mol.covalent_hash
        .as_ref()
        .ok_or(FilterError::MissingAnnotation("covalent_hash"))
}

impl ReactionFilter {
    /// Answer this predicate for `rxn` against the finalized molecule table.
    pub fn evaluate(
        &self,
        rxn: &mut ReactionRecord,
        mols: &[MoleculeRecord],
        params: &ReactionParams,
    ) -> Result<bool, FilterError> {
        match self {
            ReactionFilter::IsRedoxReaction => {
                let redox = rxn.dcharge(mols) != 0;
                rxn.annotations.is_redox = Some(redox);
                Ok(redox)
            }

            ReactionFilter::TooManyReactantsOrProducts => {
                Ok(rxn.reactants.len() != 1 || rxn.products.len() != 1)
            }

            ReactionFilter::DchargeTooLarge => Ok(rxn.dcharge(mols).abs() > 1),

            ReactionFilter::ReactantAndProductNotIsomorphic => {
                let reactant = &mols[rxn.reactants[0]];
                let product = &mols[rxn.products[0]];
                Ok(covalent_hash_of(reactant)? != covalent_hash_of(product)?)
            }

            ReactionFilter::DgAboveThreshold {
                threshold,
                free_energy_type,
                constant_barrier,
            } => {
                let mut dg = 0.0;
                for &i in &rxn.reactants {
                    dg -= free_energy_type.value(&mols[i])?;
                }
                for &j in &rxn.products {
                    dg += free_energy_type.value(&mols[j])?;
                }
                dg += rxn.dcharge(mols) as f64 * params.electron_free_energy;

                if dg > *threshold {
                    return Ok(true);
                }
                let barrier = if dg < 0.0 {
                    *constant_barrier
                } else {
                    dg + constant_barrier
                };
                rxn.annotations.dg = Some(dg);
                rxn.annotations.dg_barrier = Some(barrier);
                rxn.annotations.rate = Some(default_rate(barrier, params));
                Ok(false)
            }

            ReactionFilter::MarcusBarrier => marcus_barrier(rxn, mols, params),

            ReactionFilter::StarCountDiffAboveThreshold { threshold } => {
                let mut reactant_stars: BTreeMap<&String, usize> = BTreeMap::new();
                let mut product_stars: BTreeMap<&String, usize> = BTreeMap::new();
                let mut tags: BTreeSet<&String> = BTreeSet::new();

                for &i in &rxn.reactants {
                    for h in mols[i].star_hashes.values() {
                        tags.insert(h);
                        *reactant_stars.entry(h).or_insert(0) += 1;
                    }
                }
                for &j in &rxn.products {
                    for h in mols[j].star_hashes.values() {
                        tags.insert(h);
                        *product_stars.entry(h).or_insert(0) += 1;
                    }
                }

                let count: usize = tags
                    .iter()
                    .map(|tag| {
                        let r = reactant_stars.get(tag).copied().unwrap_or(0);
                        let p = product_stars.get(tag).copied().unwrap_or(0);
                        r.abs_diff(p)
                    })
                    .sum();
                Ok(count > *threshold)
            }

            ReactionFilter::ReactionIsCovalentDecomposable => {
                if rxn.reactants.len() != 2 || rxn.products.len() != 2 {
                    return Ok(false);
                }
                let mut reactant_hashes = BTreeSet::new();
                for &i in &rxn.reactants {
                    reactant_hashes.insert(covalent_hash_of(&mols[i])?);
                }
                let mut product_hashes = BTreeSet::new();
                for &j in &rxn.products {
                    product_hashes.insert(covalent_hash_of(&mols[j])?);
                }
                Ok(reactant_hashes.intersection(&product_hashes).count() > 0)
            }

            ReactionFilter::MetalCoordinationPassthrough => Ok(rxn
                .reactants
                .iter()
                .chain(&rxn.products)
                .any(|&i| mols[i].is_bare_metal())),

            ReactionFilter::ConcertedMetalCoordination => {
                if rxn.reactants.len() != 2 || rxn.products.len() != 2 {
                    return Ok(false);
                }
                Ok(rxn
                    .reactants
                    .iter()
                    .chain(&rxn.products)
                    .any(|&i| mols[i].is_bare_metal()))
            }

            ReactionFilter::ConcertedMetalCoordinationOneProduct => {
                if rxn.reactants.len() != 2 || rxn.products.len() != 1 {
                    return Ok(false);
                }
                let product_hash = covalent_hash_of(&mols[rxn.products[0]])?;
                let mut reactant_hashes = BTreeSet::new();
                for &i in &rxn.reactants {
                    reactant_hashes.insert(covalent_hash_of(&mols[i])?);
                }
                Ok(rxn.reactants.iter().any(|&i| mols[i].is_bare_metal())
                    && !reactant_hashes.contains(product_hash))
            }

            ReactionFilter::ConcertedMetalCoordinationOneReactant => {
                if rxn.reactants.len() != 1 || rxn.products.len() != 2 {
                    return Ok(false);
                }
                let reactant_hash = covalent_hash_of(&mols[rxn.reactants[0]])?;
                let mut product_hashes = BTreeSet::new();
                for &j in &rxn.products {
                    product_hashes.insert(covalent_hash_of(&mols[j])?);
                }
                Ok(rxn.products.iter().any(|&j| mols[j].is_bare_metal())
                    && !product_hashes.contains(reactant_hash))
            }

            ReactionFilter::FragmentMatchingFound => fragment_matching_found(rxn, mols),

            ReactionFilter::SingleReactantSingleProductNotHydrogenTransfer => {
                let reactant_bonds = rxn
                    .annotations
                    .reactant_bonds_broken
                    .as_ref()
                    .ok_or(FilterError::MissingAnnotation("reactant_bonds_broken"))?;
                let product_bonds = rxn
                    .annotations
                    .product_bonds_broken
                    .as_ref()
                    .ok_or(FilterError::MissingAnnotation("product_bonds_broken"))?;
                let hashes = rxn
                    .annotations
                    .fragment_hashes
                    .as_ref()
                    .ok_or(FilterError::MissingAnnotation("fragment_hashes"))?;
                Ok(rxn.reactants.len() == 1
                    && rxn.products.len() == 1
                    && reactant_bonds.len() == 1
                    && product_bonds.len() == 1
                    && !hashes.contains_key(&*HYDROGEN_HASH))
            }

            ReactionFilter::SingleReactantDoubleProductRingClose => {
                let reactant_bonds = rxn
                    .annotations
                    .reactant_bonds_broken
                    .as_ref()
                    .ok_or(FilterError::MissingAnnotation("reactant_bonds_broken"))?;
                let product_bonds = rxn
                    .annotations
                    .product_bonds_broken
                    .as_ref()
                    .ok_or(FilterError::MissingAnnotation("product_bonds_broken"))?;
                let product_fragment_count = rxn
                    .annotations
                    .product_fragment_count
                    .ok_or(FilterError::MissingAnnotation("product_fragment_count"))?;
                Ok(rxn.reactants.len() == 1
                    && rxn.products.len() == 2
                    && reactant_bonds.len() == 1
                    && product_bonds.len() == 1
                    && product_fragment_count == 2)
            }

            ReactionFilter::DefaultTrue => Ok(true),
        }
    }
}

/// Arrhenius-style rate from a barrier: (k_B T / h) exp(-barrier / k_B T).
fn default_rate(dg_barrier: f64, params: &ReactionParams) -> f64 {
    let kt = KB * params.temperature;
    let max_rate = kt / PLANCK;
    max_rate * (-dg_barrier / kt).exp()
}

/// Marcus-theory barrier for a single-electron transfer between one
/// reactant and one product.
///
/// The outer (solvent) reorganization energy comes from a closed-form
/// electrostatic expression with a first-solvation-shell radius of 6 A, an
/// electrode distance of 7.5 A (factor of 2 from the image-charge
/// convention), refractive index 1.415, and dielectric constant 18.5. The
/// inner term averages the ionization energy / electron affinity pair that
/// matches the sign of the charge change, floored at zero.
fn marcus_barrier(
    rxn: &mut ReactionRecord,
    mols: &[MoleculeRecord],
    params: &ReactionParams,
) -> Result<bool, FilterError> {
    if rxn.reactants.len() != 1 || rxn.products.len() != 1 {
        return Ok(false);
    }
    let reactant = &mols[rxn.reactants[0]];
    let product = &mols[rxn.products[0]];
    let dcharge = product.charge - reactant.charge;

    let n: f64 = 1.415; // refractive index of the solvent
    let eps: f64 = 18.5; // relative dielectric of the solvent
    let r: f64 = 6.0; // first solvation shell radius, A
    let big_r: f64 = 7.5; // distance to the electrode, A
    let eps_0: f64 = 8.85419e-12; // vacuum permittivity
    let e: f64 = 1.602e-19; // fundamental charge

    let mut l_outer = e / (8.0 * std::f64::consts::PI * eps_0);
    l_outer *= (1.0 / r - 1.0 / (2.0 * big_r)) * 1e10;
    l_outer *= 1.0 / (n * n) - 1.0 / eps;

    let vals = match dcharge {
        -1 => [reactant.electron_affinity, product.ionization_energy],
        1 => [reactant.ionization_energy, product.electron_affinity],
        other => return Err(FilterError::UnsupportedChargeTransfer(other)),
    };
    let filtered: Vec<f64> = vals.into_iter().flatten().collect();
    if filtered.is_empty() {
        return Err(FilterError::EmptyReorganizationSet);
    }
    let mut l_inner = filtered.iter().sum::<f64>() / filtered.len() as f64;
    if l_inner < 0.0 {
        l_inner = 0.0;
    }
    let l = l_inner + l_outer;

    let dg = product.free_energy - reactant.free_energy
        + dcharge as f64 * params.electron_free_energy;
    rxn.annotations.marcus_barrier = Some(l / 4.0 * (1.0 + dg / l).powi(2));
    Ok(false)
}

/// Per-molecule fragmentation choices for one side of a reaction: each
/// choice picks one fragment complex per molecule, with at most one broken
/// bond across the side.
fn side_choices(side: &[usize], mols: &[MoleculeRecord]) -> Vec<Vec<usize>> {
    match side {
        [single] => (0..mols[*single].fragment_data.len())
            .map(|i| vec![i])
            .collect(),
        [first, second] => {
            let mut choices = Vec::new();
            for i in 0..mols[*first].fragment_data.len() {
                for j in 0..mols[*second].fragment_data.len() {
                    let broken = mols[*first].fragment_data[i].number_of_bonds_broken
                        + mols[*second].fragment_data[j].number_of_bonds_broken;
                    if broken <= 1 {
                        choices.push(vec![i, j]);
                    }
                }
            }
            choices
        }
        _ => Vec::new(),
    }
}

/// Accumulate fragment count, broken bonds, and the fragment hash multiset
/// for one fragmentation choice on one side.
fn collect_side(
    side: &[usize],
    choice: &[usize],
    mols: &[MoleculeRecord],
) -> (usize, Vec<BrokenBond>, BTreeMap<String, usize>) {
    let mut count = 0;
    let mut bonds: Vec<BrokenBond> = Vec::new();
    let mut hashes: BTreeMap<String, usize> = BTreeMap::new();

    for (position, &complex_index) in choice.iter().enumerate() {
        let complex = &mols[side[position]].fragment_data[complex_index];
        for &(u, v) in &complex.bonds_broken {
            bonds.push([(position, u), (position, v)]);
        }
        count += complex.number_of_fragments;
        for hash in &complex.fragment_hashes {
            *hashes.entry(hash.clone()).or_insert(0) += 1;
        }
    }

    (count, bonds, hashes)
}

/// Search all consistent pairings of reactant and product fragmentation
/// choices for one with equal fragment hash multisets.
///
/// Combinations that would open a ring on one side while closing one on the
/// other (two-to-two reaction, two fragments and one broken bond on each
/// side) are excluded by explicit policy; that rule is deliberately not
/// generalized to other fragment counts.
fn fragment_matching_found(
    rxn: &mut ReactionRecord,
    mols: &[MoleculeRecord],
) -> Result<bool, FilterError> {
    let reactant_choices = side_choices(&rxn.reactants, mols);
    let product_choices = side_choices(&rxn.products, mols);

    for reactant_choice in &reactant_choices {
        for product_choice in &product_choices {
            let (reactant_count, reactant_bonds, reactant_hashes) =
                collect_side(&rxn.reactants, reactant_choice, mols);
            let (product_count, product_bonds, product_hashes) =
                collect_side(&rxn.products, product_choice, mols);

            if rxn.reactants.len() == 2
                && rxn.products.len() == 2
                && reactant_count == 2
                && product_count == 2
                && reactant_bonds.len() == 1
                && product_bonds.len() == 1
            {
                continue;
            }

            if reactant_hashes == product_hashes {
                rxn.annotations.reactant_bonds_broken = Some(reactant_bonds);
                rxn.annotations.product_bonds_broken = Some(product_bonds);
                rxn.annotations.fragment_hashes = Some(reactant_hashes);
                rxn.annotations.reactant_fragment_count = Some(reactant_count);
                rxn.annotations.product_fragment_count = Some(product_count);
                return Ok(true);
            }
        }
    }

    Ok(false)
}

/// Run one reaction through a reaction decision tree.
///
/// Every molecule index is checked against the table up front, so a
/// malformed candidate becomes a per-record error instead of a panic deep
/// inside a predicate.
pub fn decide_reaction(
    rxn: &mut ReactionRecord,
    mols: &[MoleculeRecord],
    params: &ReactionParams,
    tree: &DecisionTree<ReactionFilter>,
    pathway: Option<&mut Vec<String>>,
) -> Result<Verdict, FilterError> {
    for &i in rxn.reactants.iter().chain(&rxn.products) {
        if i >= mols.len() {
            return Err(FilterError::MoleculeIndexOutOfRange {
                index: i,
                table_len: mols.len(),
            });
        }
    }
    run_decision_tree(tree, |question| question.evaluate(rxn, mols, params), pathway)
}

/// Common trunk of the reaction trees after the redox branch.
fn rearrangement_trunk(
    star_threshold: usize,
    match_subtree: DecisionTree<ReactionFilter>,
) -> Vec<(ReactionFilter, DecisionTree<ReactionFilter>)> {
    vec![
        (
            ReactionFilter::StarCountDiffAboveThreshold {
                threshold: star_threshold,
            },
            DecisionTree::discard(),
        ),
        (
            ReactionFilter::ReactionIsCovalentDecomposable,
            DecisionTree::discard(),
        ),
        (
            ReactionFilter::ConcertedMetalCoordination,
            DecisionTree::discard(),
        ),
        (
            ReactionFilter::ConcertedMetalCoordinationOneProduct,
            DecisionTree::discard(),
        ),
        (
            ReactionFilter::ConcertedMetalCoordinationOneReactant,
            DecisionTree::discard(),
        ),
        (
            ReactionFilter::MetalCoordinationPassthrough,
            DecisionTree::keep(),
        ),
        (ReactionFilter::FragmentMatchingFound, match_subtree),
        (ReactionFilter::DefaultTrue, DecisionTree::discard()),
    ]
}

/// Reaction decision tree for the Li / ethylene carbonate chemistry.
pub fn li_ec_reaction_tree() -> DecisionTree<ReactionFilter> {
    let redox_branch = DecisionTree::Node(vec![
        (
            ReactionFilter::TooManyReactantsOrProducts,
            DecisionTree::discard(),
        ),
        (ReactionFilter::DchargeTooLarge, DecisionTree::discard()),
        (
            ReactionFilter::ReactantAndProductNotIsomorphic,
            DecisionTree::discard(),
        ),
        (
            ReactionFilter::DgAboveThreshold {
                threshold: 0.0,
                free_energy_type: FreeEnergyType::FreeEnergy,
                constant_barrier: 0.0,
            },
            DecisionTree::discard(),
        ),
        (ReactionFilter::DefaultTrue, DecisionTree::keep()),
    ]);

    let match_subtree = DecisionTree::Node(vec![
        (
            ReactionFilter::SingleReactantSingleProductNotHydrogenTransfer,
            DecisionTree::discard(),
        ),
        (
            ReactionFilter::SingleReactantDoubleProductRingClose,
            DecisionTree::discard(),
        ),
        (ReactionFilter::DefaultTrue, DecisionTree::keep()),
    ]);

    let mut branches = vec![
        (ReactionFilter::IsRedoxReaction, redox_branch),
        (
            ReactionFilter::DgAboveThreshold {
                threshold: 0.0,
                free_energy_type: FreeEnergyType::SolvationFreeEnergy,
                constant_barrier: 0.0,
            },
            DecisionTree::discard(),
        ),
    ];
    branches.extend(rearrangement_trunk(6, match_subtree));
    DecisionTree::Node(branches)
}

fn mg_reaction_tree(threshold: f64, star_threshold: usize) -> DecisionTree<ReactionFilter> {
    let redox_branch = DecisionTree::Node(vec![
        (
            ReactionFilter::DgAboveThreshold {
                threshold,
                free_energy_type: FreeEnergyType::FreeEnergy,
                constant_barrier: 0.0,
            },
            DecisionTree::discard(),
        ),
        (
            ReactionFilter::TooManyReactantsOrProducts,
            DecisionTree::discard(),
        ),
        (ReactionFilter::DchargeTooLarge, DecisionTree::discard()),
        (
            ReactionFilter::ReactantAndProductNotIsomorphic,
            DecisionTree::discard(),
        ),
        (ReactionFilter::DefaultTrue, DecisionTree::keep()),
    ]);

    let match_subtree = DecisionTree::Node(vec![
        (
            ReactionFilter::SingleReactantSingleProductNotHydrogenTransfer,
            DecisionTree::discard(),
        ),
        (ReactionFilter::DefaultTrue, DecisionTree::keep()),
    ]);

    let mut branches = vec![
        (ReactionFilter::IsRedoxReaction, redox_branch),
        (
            ReactionFilter::DgAboveThreshold {
                threshold,
                free_energy_type: FreeEnergyType::SolvationFreeEnergy,
                constant_barrier: 0.0,
            },
            DecisionTree::discard(),
        ),
    ];
    branches.extend(rearrangement_trunk(star_threshold, match_subtree));
    DecisionTree::Node(branches)
}

/// Reaction decision tree for the Mg / diglyme chemistry.
pub fn mg_g2_reaction_tree() -> DecisionTree<ReactionFilter> {
    mg_reaction_tree(0.5, 4)
}

/// Reaction decision tree for the Mg / tetrahydrofuran chemistry.
pub fn mg_thf_reaction_tree() -> DecisionTree<ReactionFilter> {
    mg_reaction_tree(0.5, 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::molecule::{test_record, FragmentComplex, MoleculeRecord};
    use crate::species::{decide_species, li_ec_species_tree};
    use approx::assert_relative_eq;

    fn filtered(mut mol: MoleculeRecord) -> MoleculeRecord {
        decide_species(&mut mol, &li_ec_species_tree(), None).unwrap();
        mol
    }

    fn carbon_chain(n: usize, charge: i64, free_energy: f64) -> MoleculeRecord {
        let symbols: Vec<&str> = vec!["C"; n];
        let positions: Vec<[f64; 3]> = (0..n).map(|i| [1.5 * i as f64, 0.0, 0.0]).collect();
        let bonds: Vec<(usize, usize)> = (0..n - 1).map(|i| (i, i + 1)).collect();
        filtered(test_record(&symbols, &positions, charge, free_energy, &bonds))
    }

    fn carbon_ring(n: usize, charge: i64, free_energy: f64) -> MoleculeRecord {
        let symbols: Vec<&str> = vec!["C"; n];
        let positions: Vec<[f64; 3]> = (0..n).map(|i| [1.5 * i as f64, 0.0, 0.0]).collect();
        let mut bonds: Vec<(usize, usize)> = (0..n - 1).map(|i| (i, i + 1)).collect();
        bonds.push((n - 1, 0));
        filtered(test_record(&symbols, &positions, charge, free_energy, &bonds))
    }

    #[test]
    fn redox_flag_recorded_either_way() {
        let mols = vec![carbon_chain(2, 0, 0.0), carbon_chain(2, 0, 0.0)];
        let mut rxn = ReactionRecord::new(vec![0], vec![1]);
        let fired = ReactionFilter::IsRedoxReaction
            .evaluate(&mut rxn, &mols, &ReactionParams::default())
            .unwrap();
        assert!(!fired);
        assert_eq!(rxn.annotations.is_redox, Some(false));

        let mols = vec![carbon_chain(2, 0, 0.0), carbon_chain(2, -1, 0.0)];
        let mut rxn = ReactionRecord::new(vec![0], vec![1]);
        let fired = ReactionFilter::IsRedoxReaction
            .evaluate(&mut rxn, &mols, &ReactionParams::default())
            .unwrap();
        assert!(fired);
        assert_eq!(rxn.annotations.is_redox, Some(true));
    }

    #[test]
    fn dg_below_threshold_records_rate() {
        let mols = vec![carbon_chain(2, 0, 5.0), carbon_chain(2, 0, 3.0)];
        let mut rxn = ReactionRecord::new(vec![0], vec![1]);
        let params = ReactionParams::default();
        let question = ReactionFilter::DgAboveThreshold {
            threshold: 0.0,
            free_energy_type: FreeEnergyType::FreeEnergy,
            constant_barrier: 0.25,
        };
        assert!(!question.evaluate(&mut rxn, &mols, &params).unwrap());
        assert_relative_eq!(rxn.annotations.dg.unwrap(), -2.0, epsilon = 1e-12);
        assert_relative_eq!(rxn.annotations.dg_barrier.unwrap(), 0.25, epsilon = 1e-12);
        assert!(rxn.annotations.rate.unwrap() > 0.0);
    }

    #[test]
    fn dg_above_threshold_discards_without_annotating() {
        let mols = vec![carbon_chain(2, 0, 3.0), carbon_chain(2, 0, 5.0)];
        let mut rxn = ReactionRecord::new(vec![0], vec![1]);
        let question = ReactionFilter::DgAboveThreshold {
            threshold: 0.0,
            free_energy_type: FreeEnergyType::FreeEnergy,
            constant_barrier: 0.0,
        };
        assert!(question
            .evaluate(&mut rxn, &mols, &ReactionParams::default())
            .unwrap());
        assert!(rxn.annotations.dg.is_none());
    }

    #[test]
    fn star_count_zero_for_identical_sides() {
        let mols = vec![carbon_chain(3, 0, 0.0), carbon_chain(3, 0, 0.0)];
        let mut rxn = ReactionRecord::new(vec![0], vec![1]);
        let question = ReactionFilter::StarCountDiffAboveThreshold { threshold: 6 };
        assert!(!question
            .evaluate(&mut rxn, &mols, &ReactionParams::default())
            .unwrap());
    }

    #[test]
    fn covalent_decomposable_detects_spectator() {
        let a = carbon_chain(2, 0, 0.0);
        let b = carbon_chain(3, 0, 0.0);
        let c = carbon_chain(2, 0, 0.0);
        let d = carbon_ring(3, 0, 0.0);
        let mols = vec![a, b, c, d];
        let mut rxn = ReactionRecord::new(vec![0, 1], vec![2, 3]);
        assert!(ReactionFilter::ReactionIsCovalentDecomposable
            .evaluate(&mut rxn, &mols, &ReactionParams::default())
            .unwrap());
    }

    #[test]
    fn fragment_matching_finds_isomerization() {
        // Ring opening: C4 ring -> C4 chain. The ring's single-bond
        // fragmentation equals the chain's trivial fragmentation.
        let mols = vec![carbon_ring(4, 0, 0.0), carbon_chain(4, 0, 0.0)];
        let mut rxn = ReactionRecord::new(vec![0], vec![1]);
        assert!(ReactionFilter::FragmentMatchingFound
            .evaluate(&mut rxn, &mols, &ReactionParams::default())
            .unwrap());
        assert_eq!(rxn.annotations.reactant_bonds_broken.as_ref().unwrap().len(), 1);
        assert_eq!(rxn.annotations.product_bonds_broken.as_ref().unwrap().len(), 0);
        assert_eq!(rxn.annotations.reactant_fragment_count, Some(1));
        assert_eq!(rxn.annotations.product_fragment_count, Some(1));
    }

    #[test]
    fn fragment_matching_excludes_ring_open_ring_close() {
        // Synthetic fragment data: two-to-two reaction whose only equal
        // multiset needs one broken bond and two fragments on each side.
        fn synthetic(hashes: &[&str], bonds_broken: usize) -> FragmentComplex {
            FragmentComplex {
                number_of_fragments: hashes.len(),
                number_of_bonds_broken: bonds_broken,
                bonds_broken: vec![(0, 1); bonds_broken],
                fragment_hashes: hashes.iter().map(|s| s.to_string()).collect(),
            }
        }
        let mut m0 = carbon_chain(2, 0, 0.0);
        let mut m1 = carbon_chain(2, 0, 0.0);
        let mut p0 = carbon_chain(2, 0, 0.0);
        let mut p1 = carbon_chain(2, 0, 0.0);
        m0.fragment_data = vec![synthetic(&["a"], 1)];
        m1.fragment_data = vec![synthetic(&["b"], 0)];
        p0.fragment_data = vec![synthetic(&["a"], 1)];
        p1.fragment_data = vec![synthetic(&["b"], 0)];
        let mols = vec![m0, m1, p0, p1];
        let mut rxn = ReactionRecord::new(vec![0, 1], vec![2, 3]);
        assert!(!ReactionFilter::FragmentMatchingFound
            .evaluate(&mut rxn, &mols, &ReactionParams::default())
            .unwrap());
    }

    #[test]
    fn ring_close_flags_single_reactant_double_product() {
        // C4 chain -> C3 ring + C: matching breaks one chain bond on the
        // reactant side and opens the ring on the product side, leaving two
        // product fragments. That is exactly the dissociation the ring-close
        // refinement discards.
        let mols = vec![
            carbon_chain(4, 0, 0.0),
            carbon_ring(3, 0, 0.0),
            carbon_chain(1, 0, 0.0),
        ];
        let mut rxn = ReactionRecord::new(vec![0], vec![1, 2]);
        let params = ReactionParams::default();
        assert!(ReactionFilter::FragmentMatchingFound
            .evaluate(&mut rxn, &mols, &params)
            .unwrap());
        assert_eq!(rxn.annotations.reactant_bonds_broken.as_ref().unwrap().len(), 1);
        assert_eq!(rxn.annotations.product_bonds_broken.as_ref().unwrap().len(), 1);
        assert_eq!(rxn.annotations.product_fragment_count, Some(2));
        assert!(ReactionFilter::SingleReactantDoubleProductRingClose
            .evaluate(&mut rxn, &mols, &params)
            .unwrap());
    }

    #[test]
    fn concerted_metal_coordination_detects_bare_metal() {
        let mols = vec![
            filtered(test_record(&["Li"], &[[0.0; 3]], 1, 0.0, &[])),
            carbon_chain(2, 0, 0.0),
            carbon_chain(3, 0, 0.0),
            carbon_chain(2, 0, 0.0),
        ];
        let params = ReactionParams::default();

        // Two-to-two with a bare metal on either side fires; without one it
        // does not.
        let mut with_metal = ReactionRecord::new(vec![0, 1], vec![2, 3]);
        assert!(ReactionFilter::ConcertedMetalCoordination
            .evaluate(&mut with_metal, &mols, &params)
            .unwrap());
        let mut organic_only = ReactionRecord::new(vec![1, 2], vec![2, 3]);
        assert!(!ReactionFilter::ConcertedMetalCoordination
            .evaluate(&mut organic_only, &mols, &params)
            .unwrap());
    }

    #[test]
    fn concerted_one_product_requires_new_covalent_structure() {
        let mols = vec![
            filtered(test_record(&["Li"], &[[0.0; 3]], 1, 0.0, &[])),
            carbon_chain(2, 0, 0.0),
            carbon_chain(3, 0, 0.0),
            carbon_chain(2, 0, 0.0),
        ];
        let params = ReactionParams::default();

        // Metal + chain -> a covalently different product: concerted.
        let mut concerted = ReactionRecord::new(vec![0, 1], vec![2]);
        assert!(ReactionFilter::ConcertedMetalCoordinationOneProduct
            .evaluate(&mut concerted, &mols, &params)
            .unwrap());
        // Metal + chain -> the same chain is plain coordination.
        let mut coordination = ReactionRecord::new(vec![0, 1], vec![3]);
        assert!(!ReactionFilter::ConcertedMetalCoordinationOneProduct
            .evaluate(&mut coordination, &mols, &params)
            .unwrap());
    }

    #[test]
    fn concerted_one_reactant_requires_new_covalent_structure() {
        let mols = vec![
            filtered(test_record(&["Li"], &[[0.0; 3]], 1, 0.0, &[])),
            carbon_chain(2, 0, 0.0),
            carbon_chain(3, 0, 0.0),
        ];
        let params = ReactionParams::default();

        let mut concerted = ReactionRecord::new(vec![2], vec![0, 1]);
        assert!(ReactionFilter::ConcertedMetalCoordinationOneReactant
            .evaluate(&mut concerted, &mols, &params)
            .unwrap());
        let mut decoordination = ReactionRecord::new(vec![1], vec![0, 1]);
        assert!(!ReactionFilter::ConcertedMetalCoordinationOneReactant
            .evaluate(&mut decoordination, &mols, &params)
            .unwrap());
    }

    #[test]
    fn hydrogen_transfer_is_not_flagged() {
        // Move one H between two carbons: C2H -> C2 + H hop within one
        // molecule. Fragment multisets contain the hydrogen hash, so the
        // refinement predicate answers false (do not discard).
        let reactant = filtered(test_record(
            &["C", "C", "H"],
            &[[0.0; 3], [1.5, 0.0, 0.0], [2.5, 0.0, 0.0]],
            0,
            0.0,
            &[(0, 1), (1, 2)],
        ));
        let product = filtered(test_record(
            &["C", "C", "H"],
            &[[0.0; 3], [1.5, 0.0, 0.0], [-1.0, 0.0, 0.0]],
            0,
            0.0,
            &[(0, 1), (0, 2)],
        ));
        let mols = vec![reactant, product];
        let mut rxn = ReactionRecord::new(vec![0], vec![1]);
        let params = ReactionParams::default();
        assert!(ReactionFilter::FragmentMatchingFound
            .evaluate(&mut rxn, &mols, &params)
            .unwrap());
        assert!(!ReactionFilter::SingleReactantSingleProductNotHydrogenTransfer
            .evaluate(&mut rxn, &mols, &params)
            .unwrap());
    }

    #[test]
    fn marcus_barrier_annotates_single_electron_transfer() {
        let mut reactant = carbon_chain(2, 0, -5.0);
        reactant.electron_affinity = Some(1.2);
        let mut product = carbon_chain(2, -1, -6.4);
        product.ionization_energy = Some(2.0);
        let mols = vec![reactant, product];
        let mut rxn = ReactionRecord::new(vec![0], vec![1]);
        assert!(!ReactionFilter::MarcusBarrier
            .evaluate(&mut rxn, &mols, &ReactionParams::default())
            .unwrap());
        let barrier = rxn.annotations.marcus_barrier.unwrap();
        assert!(barrier.is_finite() && barrier >= 0.0);
    }

    #[test]
    fn marcus_requires_reorganization_data() {
        let reactant = carbon_chain(2, 0, -5.0);
        let product = carbon_chain(2, -1, -6.4);
        let mols = vec![reactant, product];
        let mut rxn = ReactionRecord::new(vec![0], vec![1]);
        assert!(matches!(
            ReactionFilter::MarcusBarrier.evaluate(&mut rxn, &mols, &ReactionParams::default()),
            Err(FilterError::EmptyReorganizationSet)
        ));
    }

    #[test]
    fn annotation_read_before_write_is_an_error() {
        let mols = vec![carbon_chain(2, 0, 0.0), carbon_chain(2, 0, 0.0)];
        let mut rxn = ReactionRecord::new(vec![0], vec![1]);
        assert!(matches!(
            ReactionFilter::SingleReactantSingleProductNotHydrogenTransfer.evaluate(
                &mut rxn,
                &mols,
                &ReactionParams::default()
            ),
            Err(FilterError::MissingAnnotation("reactant_bonds_broken"))
        ));
    }

    #[test]
    fn free_energy_type_parses() {
        assert_eq!(
            "solvation_free_energy".parse::<FreeEnergyType>().unwrap(),
            FreeEnergyType::SolvationFreeEnergy
        );
        assert!(matches!(
            "gibbs".parse::<FreeEnergyType>(),
            Err(FilterError::UnknownFreeEnergyType(_))
        ));
    }
}
