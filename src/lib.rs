// Physical constants and metal identification
pub mod constants;

// Molecule definition, bonding graphs
pub mod molecule;

// Weisfeiler-Lehman graph canonization
pub mod canonize;

// Fragmentation by zero-or-one bond removal
pub mod fragment;

// Generic decision tree machinery
pub mod tree;

// Species predicate library and preset trees
pub mod species;

// Reaction predicate library and preset trees
pub mod reaction;

// Parallel filtering drivers
pub mod filter;

// Data IO
pub mod loader;

// Hard per-record filtering errors
pub mod error;
