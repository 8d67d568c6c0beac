//! Data IO: JSON molecule entries in, filtered tables out.
//!
//! The input file holds an array of molecule entries straight from a
//! quantum chemistry pipeline. Entries are validated and turned into
//! [`MoleculeRecord`]s eagerly so that malformed data fails at load time,
//! not in the middle of a filtering pass. Candidate reactions reference
//! molecules by index into the *filtered* molecule table.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    molecule::{FragmentComplex, MoleculeError, MoleculeRecord},
    reaction::ReactionRecord,
};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Molecule(#[from] MoleculeError),
}

/// One molecule entry as it appears on disk. Everything past the geometry
/// and bonding data is optional; predicates that need a missing field fail
/// per-record during filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoleculeEntry {
    pub molecule_id: String,
    pub charge: i64,
    #[serde(default = "default_spin")]
    pub spin_multiplicity: u32,
    pub free_energy: f64,
    /// Element symbols, one per atom.
    pub species: Vec<String>,
    /// Atom positions in Angstroms.
    pub positions: Vec<[f64; 3]>,
    /// Full bonding graph as atom index pairs.
    pub bonds: Vec<(usize, usize)>,
    #[serde(default)]
    pub partial_charges_resp: Option<Vec<f64>>,
    #[serde(default)]
    pub partial_charges_mulliken: Option<Vec<f64>>,
    #[serde(default)]
    pub partial_charges_nbo: Option<Vec<f64>>,
    #[serde(default)]
    pub ionization_energy: Option<f64>,
    #[serde(default)]
    pub electron_affinity: Option<f64>,
}

fn default_spin() -> u32 {
    1
}

impl MoleculeEntry {
    pub fn into_record(self) -> Result<MoleculeRecord, MoleculeError> {
        MoleculeRecord::from_parts(
            self.molecule_id,
            &self.species,
            self.positions,
            self.charge,
            self.spin_multiplicity,
            self.free_energy,
            &self.bonds,
            self.partial_charges_resp,
            self.partial_charges_mulliken,
            self.partial_charges_nbo,
            self.ionization_energy,
            self.electron_affinity,
        )
    }
}

/// Load and validate a molecule entry file.
pub fn load_molecules(path: &Path) -> Result<Vec<MoleculeRecord>, LoaderError> {
    let contents = fs::read_to_string(path)?;
    let entries: Vec<MoleculeEntry> = serde_json::from_str(&contents)?;
    entries
        .into_iter()
        .map(|entry| entry.into_record().map_err(LoaderError::from))
        .collect()
}

/// Load candidate reactions. Indices refer to the filtered molecule table.
pub fn load_reactions(path: &Path) -> Result<Vec<ReactionRecord>, LoaderError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// The filtered-species view written to the output file: identity, derived
/// thermodynamics, and the graph annotations reaction filtering consumed.
#[derive(Debug, Serialize)]
pub struct MoleculeSummary<'a> {
    pub molecule_id: &'a str,
    pub formula: &'a str,
    pub charge: i64,
    pub free_energy: f64,
    pub solvation_free_energy: Option<f64>,
    pub total_hash: Option<&'a str>,
    pub covalent_hash: Option<&'a str>,
    pub fragment_data: &'a [FragmentComplex],
}

impl<'a> From<&'a MoleculeRecord> for MoleculeSummary<'a> {
    fn from(mol: &'a MoleculeRecord) -> Self {
        Self {
            molecule_id: &mol.molecule_id,
            formula: &mol.formula,
            charge: mol.charge,
            free_energy: mol.free_energy,
            solvation_free_energy: mol.solvation_free_energy,
            total_hash: mol.total_hash.as_deref(),
            covalent_hash: mol.covalent_hash.as_deref(),
            fragment_data: &mol.fragment_data,
        }
    }
}

/// Write the filtered molecule table.
pub fn write_molecules(path: &Path, molecules: &[MoleculeRecord]) -> Result<(), LoaderError> {
    let summaries: Vec<MoleculeSummary> = molecules.iter().map(MoleculeSummary::from).collect();
    fs::write(path, serde_json::to_string_pretty(&summaries)?)?;
    Ok(())
}

/// Write the kept reactions with their annotations.
pub fn write_reactions(path: &Path, reactions: &[ReactionRecord]) -> Result<(), LoaderError> {
    fs::write(path, serde_json::to_string_pretty(reactions)?)?;
    Ok(())
}
