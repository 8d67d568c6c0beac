//! Error taxonomy for decision-tree evaluation.
//!
//! A `FilterError` aborts evaluation of the record that triggered it and is
//! reported with the record's identity; it never blocks other records.
//! Evaluation is deterministic over pure data, so there is no retry: a
//! failure must be fixed at the data or tree-definition level.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    /// Every predicate at a non-terminal node returned false. This is a
    /// malformed tree definition, not a data problem.
    #[error("no predicate matched at a non-terminal node; the decision tree is malformed")]
    ExhaustedNode,

    /// An unrecognized free-energy selector was requested when building a
    /// predicate from configuration.
    #[error("unrecognized free energy type `{0}`")]
    UnknownFreeEnergyType(String),

    /// A predicate read a reaction annotation before the predicate that
    /// writes it ran. Tree stages must be ordered write-then-read.
    #[error("annotation `{0}` was read before any predicate wrote it")]
    MissingAnnotation(&'static str),

    /// A predicate required partial charge data that the molecule record
    /// does not carry under any estimator.
    #[error("molecule {molecule}: no partial charge data available")]
    MissingPartialCharges { molecule: String },

    /// A solvation environment has no shell parameters for a metal species
    /// present in the molecule.
    #[error("no solvation shell configured for `{key}`")]
    MissingSolvationShell { key: String },

    /// The Marcus inner reorganization average had no ionization energy or
    /// electron affinity values to average over.
    #[error("no ionization energies or electron affinities available for Marcus barrier")]
    EmptyReorganizationSet,

    /// The Marcus barrier only applies to single-electron transfers.
    #[error("Marcus barrier requested for a charge transfer of {0}")]
    UnsupportedChargeTransfer(i64),

    /// A candidate reaction referenced a molecule index that is not in the
    /// filtered molecule table.
    #[error("molecule index {index} out of range for a table of {table_len}")]
    MoleculeIndexOutOfRange { index: usize, table_len: usize },

    /// Wrapper attaching the offending predicate's name to an error raised
    /// during tree traversal.
    #[error("predicate `{name}` failed: {source}")]
    Predicate {
        name: String,
        source: Box<FilterError>,
    },
}
