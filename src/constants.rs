//! Physical constants and metal bookkeeping shared across the filter
//! libraries.
//!
//! All energies are in eV and all distances in Angstroms, matching the
//! quantum chemistry data the molecule records are built from.

/// Boltzmann constant in eV/K.
pub const KB: f64 = 8.617333262e-5;

/// Planck constant in eV s.
pub const PLANCK: f64 = 4.135667696e-15;

/// Room temperature in K, the default simulation temperature.
pub const ROOM_TEMP: f64 = 298.15;

/// Elements treated as metal centers. Bonds incident to these atoms are
/// coordination bonds, not covalent bonds.
pub const METALS: [&str; 4] = ["Li", "Mg", "Ca", "Zn"];

/// Return `true` iff `formula` describes a bare metal ion/atom, e.g. "Li1".
/// Formulas are alphabetized element-count tokens, so a bare metal is a
/// single token with count one.
pub fn is_bare_metal(formula: &str) -> bool {
    METALS.iter().any(|m| formula == format!("{m}1"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_metal_formulas() {
        assert!(is_bare_metal("Li1"));
        assert!(is_bare_metal("Mg1"));
        assert!(!is_bare_metal("Li2"));
        assert!(!is_bare_metal("C3 H4 O3"));
        assert!(!is_bare_metal("H1"));
    }
}
