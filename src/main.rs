use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use log::{error, info, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use reaction_gen::{
    filter::{filter_reactions, filter_species},
    loader,
    reaction::{
        li_ec_reaction_tree, mg_g2_reaction_tree, mg_thf_reaction_tree, ReactionFilter,
        ReactionParams,
    },
    species::{li_ec_species_tree, mg_g2_species_tree, mg_thf_species_tree, SpeciesFilter},
    tree::DecisionTree,
};

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Chemistry {
    /// Lithium / ethylene carbonate electrolyte.
    LiEc,
    /// Magnesium / diglyme electrolyte.
    MgG2,
    /// Magnesium / tetrahydrofuran electrolyte.
    MgThf,
}

impl Chemistry {
    fn trees(&self) -> (DecisionTree<SpeciesFilter>, DecisionTree<ReactionFilter>) {
        match self {
            Chemistry::LiEc => (li_ec_species_tree(), li_ec_reaction_tree()),
            Chemistry::MgG2 => (mg_g2_species_tree(), mg_g2_reaction_tree()),
            Chemistry::MgThf => (mg_thf_species_tree(), mg_thf_reaction_tree()),
        }
    }
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Molecule entry file (JSON).
    molecules: PathBuf,

    /// Candidate reaction file (JSON); indices refer to the filtered
    /// molecule table.
    reactions: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value = "li-ec")]
    chemistry: Chemistry,

    /// Temperature in K.
    #[arg(short, long, default_value_t = reaction_gen::constants::ROOM_TEMP)]
    temperature: f64,

    /// Free energy of a free electron in eV.
    #[arg(short, long, default_value_t = -1.4)]
    electron_free_energy: f64,

    /// Where to write the filtered molecule table.
    #[arg(long, default_value = "molecules.out.json")]
    molecule_output: PathBuf,

    /// Where to write the kept reactions.
    #[arg(long, default_value = "reactions.out.json")]
    reaction_output: PathBuf,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let (species_tree, reaction_tree) = cli.chemistry.trees();
    let params = ReactionParams {
        temperature: cli.temperature,
        electron_free_energy: cli.electron_free_energy,
    };

    let molecules = loader::load_molecules(&cli.molecules)
        .with_context(|| format!("loading molecules from {}", cli.molecules.display()))?;
    info!("loaded {} molecule entries", molecules.len());

    let species_outcome = filter_species(molecules, &species_tree);
    for (index, err) in &species_outcome.errors {
        error!("molecule {index}: {err}");
    }
    if !species_outcome.errors.is_empty() {
        bail!(
            "{} molecules failed species filtering",
            species_outcome.errors.len()
        );
    }
    loader::write_molecules(&cli.molecule_output, &species_outcome.kept)
        .with_context(|| format!("writing {}", cli.molecule_output.display()))?;

    let Some(reaction_path) = cli.reactions else {
        return Ok(());
    };
    let candidates = loader::load_reactions(&reaction_path)
        .with_context(|| format!("loading reactions from {}", reaction_path.display()))?;
    info!("loaded {} candidate reactions", candidates.len());

    let reaction_outcome =
        filter_reactions(candidates, &species_outcome.kept, &params, &reaction_tree);
    for (index, err) in &reaction_outcome.errors {
        error!("reaction {index}: {err}");
    }
    if !reaction_outcome.errors.is_empty() {
        bail!(
            "{} reactions failed filtering",
            reaction_outcome.errors.len()
        );
    }
    loader::write_reactions(&cli.reaction_output, &reaction_outcome.kept)
        .with_context(|| format!("writing {}", cli.reaction_output.display()))?;

    Ok(())
}
