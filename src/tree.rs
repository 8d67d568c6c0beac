//! Generic decision trees over predicate libraries.
//!
//! A tree is either a terminal verdict or an ordered list of (predicate,
//! child) pairs. Evaluation walks predicates in order and descends into the
//! child of the first predicate that answers true; it is a configuration
//! error for every predicate at a node to answer false. Trees are plain
//! serializable data so a run's tree definition can be persisted and
//! replayed identically.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::FilterError;

/// Terminal verdict of a decision tree.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Keep,
    Discard,
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Keep => write!(f, "keep"),
            Verdict::Discard => write!(f, "discard"),
        }
    }
}

/// An ordered decision tree over predicates of type `Q`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecisionTree<Q> {
    Terminal(Verdict),
    Node(Vec<(Q, DecisionTree<Q>)>),
}

impl<Q> DecisionTree<Q> {
    pub fn keep() -> Self {
        DecisionTree::Terminal(Verdict::Keep)
    }

    pub fn discard() -> Self {
        DecisionTree::Terminal(Verdict::Discard)
    }
}

/// Walk `tree` to a terminal verdict.
///
/// `eval` answers one predicate and may mutate the record it closes over;
/// its errors abort this record's evaluation and propagate wrapped with the
/// offending predicate's name. If
/// `pathway` is given, every predicate that answered true plus the final
/// terminal are appended in traversal order, for auditing why a record was
/// kept or discarded.
pub fn run_decision_tree<Q: Display>(
    tree: &DecisionTree<Q>,
    mut eval: impl FnMut(&Q) -> Result<bool, FilterError>,
    mut pathway: Option<&mut Vec<String>>,
) -> Result<Verdict, FilterError> {
    let mut node = tree;
    loop {
        match node {
            DecisionTree::Terminal(verdict) => {
                if let Some(path) = pathway.as_deref_mut() {
                    path.push(verdict.to_string());
                }
                return Ok(*verdict);
            }
            DecisionTree::Node(branches) => {
                let mut next = None;
                for (question, child) in branches {
                    let fired = eval(question).map_err(|e| FilterError::Predicate {
                        name: question.to_string(),
                        source: Box::new(e),
                    })?;
                    if fired {
                        if let Some(path) = pathway.as_deref_mut() {
                            path.push(question.to_string());
                        }
                        next = Some(child);
                        break;
                    }
                }
                node = next.ok_or(FilterError::ExhaustedNode)?;
            }
        }
    }
}
