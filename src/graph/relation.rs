//! Dependency relation taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of relation kinds an edge can carry.
///
/// Parser labels outside the known vocabulary map to [`RelationKind::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelationKind {
    /// Adjectival complement
    Acomp,
    /// Adverbial modifier
    Advmod,
    /// Adjectival modifier
    Amod,
    /// Conjunct
    Conj,
    /// Direct object
    Dobj,
    /// Indirect object
    Iobj,
    /// Negation modifier
    Neg,
    /// Nominal modifier
    Nmod,
    /// Noun phrase as adverbial modifier
    Npadvmod,
    /// Nominal subject
    Nsubj,
    /// Passive nominal subject
    Nsubjpass,
    /// Object of a preposition
    Pobj,
    /// Possession modifier
    Poss,
    /// Relative clause modifier
    Rcmod,
    /// Controlling subject
    Xsubj,
    Unknown,
}

impl RelationKind {
    /// Every kind, `Unknown` last.
    pub const ALL: [RelationKind; 16] = [
        RelationKind::Acomp,
        RelationKind::Advmod,
        RelationKind::Amod,
        RelationKind::Conj,
        RelationKind::Dobj,
        RelationKind::Iobj,
        RelationKind::Neg,
        RelationKind::Nmod,
        RelationKind::Npadvmod,
        RelationKind::Nsubj,
        RelationKind::Nsubjpass,
        RelationKind::Pobj,
        RelationKind::Poss,
        RelationKind::Rcmod,
        RelationKind::Xsubj,
        RelationKind::Unknown,
    ];

    /// Map a parser label to its kind. Exact, case-sensitive match; never fails.
    pub fn classify(label: &str) -> Self {
        match label {
            "acomp" => RelationKind::Acomp,
            "advmod" => RelationKind::Advmod,
            "amod" => RelationKind::Amod,
            "conj" => RelationKind::Conj,
            "dobj" => RelationKind::Dobj,
            "iobj" => RelationKind::Iobj,
            "neg" => RelationKind::Neg,
            "nmod" => RelationKind::Nmod,
            "npadvmod" => RelationKind::Npadvmod,
            "nsubj" => RelationKind::Nsubj,
            "nsubjpass" => RelationKind::Nsubjpass,
            "pobj" => RelationKind::Pobj,
            "poss" => RelationKind::Poss,
            "rcmod" => RelationKind::Rcmod,
            "xsubj" => RelationKind::Xsubj,
            _ => RelationKind::Unknown,
        }
    }

    /// Parser label this kind is recognized from (`None` for `Unknown`).
    pub fn label(self) -> Option<&'static str> {
        let label = match self {
            RelationKind::Acomp => "acomp",
            RelationKind::Advmod => "advmod",
            RelationKind::Amod => "amod",
            RelationKind::Conj => "conj",
            RelationKind::Dobj => "dobj",
            RelationKind::Iobj => "iobj",
            RelationKind::Neg => "neg",
            RelationKind::Nmod => "nmod",
            RelationKind::Npadvmod => "npadvmod",
            RelationKind::Nsubj => "nsubj",
            RelationKind::Nsubjpass => "nsubjpass",
            RelationKind::Pobj => "pobj",
            RelationKind::Poss => "poss",
            RelationKind::Rcmod => "rcmod",
            RelationKind::Xsubj => "xsubj",
            RelationKind::Unknown => return None,
        };
        Some(label)
    }

    /// Stored edge type name, e.g. `NSUBJ`.
    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::Acomp => "ACOMP",
            RelationKind::Advmod => "ADVMOD",
            RelationKind::Amod => "AMOD",
            RelationKind::Conj => "CONJ",
            RelationKind::Dobj => "DOBJ",
            RelationKind::Iobj => "IOBJ",
            RelationKind::Neg => "NEG",
            RelationKind::Nmod => "NMOD",
            RelationKind::Npadvmod => "NPADVMOD",
            RelationKind::Nsubj => "NSUBJ",
            RelationKind::Nsubjpass => "NSUBJPASS",
            RelationKind::Pobj => "POBJ",
            RelationKind::Poss => "POSS",
            RelationKind::Rcmod => "RCMOD",
            RelationKind::Xsubj => "XSUBJ",
            RelationKind::Unknown => "UNKNOWN",
        }
    }

    /// Inverse of [`as_str`](Self::as_str); unrecognized names read back as `Unknown`.
    pub fn from_stored(name: &str) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == name)
            .unwrap_or(RelationKind::Unknown)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
