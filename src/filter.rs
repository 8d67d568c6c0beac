//! Parallel drivers that run every record through a decision tree.
//!
//! Records are independent, so both passes fan out over a rayon pool. The
//! species pass mutates its records (annotations are written during
//! traversal) and compacts the survivors into a new table; the reaction
//! pass borrows the finalized molecule table immutably from every worker.

use log::{debug, info};
use rayon::prelude::*;

use crate::{
    error::FilterError,
    molecule::MoleculeRecord,
    reaction::{decide_reaction, ReactionFilter, ReactionParams, ReactionRecord},
    species::{decide_species, SpeciesFilter},
    tree::{DecisionTree, Verdict},
};

/// Outcome of a filtering pass: the surviving records plus every record
/// that failed with a hard error, reported alongside its input index.
pub struct FilterOutcome<T> {
    pub kept: Vec<T>,
    pub errors: Vec<(usize, FilterError)>,
}

impl<T> FilterOutcome<T> {
    fn partition(results: Vec<(usize, Result<Option<T>, FilterError>)>) -> Self {
        let mut kept = Vec::new();
        let mut errors = Vec::new();
        for (index, result) in results {
            match result {
                Ok(Some(record)) => kept.push(record),
                Ok(None) => {}
                Err(err) => errors.push((index, err)),
            }
        }
        Self { kept, errors }
    }
}

/// Run every molecule through the species tree, in parallel. Survivors come
/// back annotated (hashes, fragments, solvation) in their original relative
/// order; hard per-record errors are collected rather than aborting the
/// pass.
pub fn filter_species(
    molecules: Vec<MoleculeRecord>,
    tree: &DecisionTree<SpeciesFilter>,
) -> FilterOutcome<MoleculeRecord> {
    let total = molecules.len();
    let results: Vec<_> = molecules
        .into_par_iter()
        .enumerate()
        .map(|(index, mut mol)| {
            let verdict = decide_species(&mut mol, tree, None);
            if let Err(ref err) = verdict {
                debug!("molecule {} failed: {err}", mol.molecule_id);
            }
            (
                index,
                verdict.map(|v| match v {
                    Verdict::Keep => Some(mol),
                    Verdict::Discard => None,
                }),
            )
        })
        .collect();

    let outcome = FilterOutcome::partition(results);
    info!(
        "species pass: kept {} of {} molecules ({} errors)",
        outcome.kept.len(),
        total,
        outcome.errors.len()
    );
    outcome
}

/// Run every candidate reaction through the reaction tree, in parallel.
/// Kept reactions come back annotated with their derived quantities.
pub fn filter_reactions(
    reactions: Vec<ReactionRecord>,
    molecules: &[MoleculeRecord],
    params: &ReactionParams,
    tree: &DecisionTree<ReactionFilter>,
) -> FilterOutcome<ReactionRecord> {
    let total = reactions.len();
    let results: Vec<_> = reactions
        .into_par_iter()
        .enumerate()
        .map(|(index, mut rxn)| {
            let verdict = decide_reaction(&mut rxn, molecules, params, tree, None);
            if let Err(ref err) = verdict {
                debug!("reaction {index} failed: {err}");
            }
            (
                index,
                verdict.map(|v| match v {
                    Verdict::Keep => Some(rxn),
                    Verdict::Discard => None,
                }),
            )
        })
        .collect();

    let outcome = FilterOutcome::partition(results);
    info!(
        "reaction pass: kept {} of {} candidates ({} errors)",
        outcome.kept.len(),
        total,
        outcome.errors.len()
    );
    outcome
}
