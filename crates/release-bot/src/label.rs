//! Stage label grammar.
//!
//! Stage labels have the form `{release}/{stage}`, e.g. `17.06.1-ee-1/triage`.
//! Three stages are canonical and round-trip between labels and columns; any
//! other stage names a custom column and is placement-only.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::tracker::Label;

/// A label that is not of the form `{prefix}/{stage}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a stage label: {0}")]
pub struct MalformedLabel(pub String);

/// A parsed `{prefix}/{stage}` label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageLabel {
    pub prefix: String,
    pub stage: String,
}

impl StageLabel {
    #[must_use]
    pub fn new(prefix: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            stage: stage.into(),
        }
    }

    /// Parse a label name. Exactly one `/` with non-empty text on both sides.
    pub fn parse(label: &str) -> Result<Self, MalformedLabel> {
        let mut parts = label.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(prefix), Some(stage), None) if !prefix.is_empty() && !stage.is_empty() => {
                Ok(Self::new(prefix, stage))
            }
            _ => Err(MalformedLabel(label.to_string())),
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Name of the column this label places a card in.
    #[must_use]
    pub fn column_name(&self) -> &str {
        column_name_for(&self.stage)
    }
}

impl fmt::Display for StageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.prefix, self.stage)
    }
}

/// The stages every release board is provisioned with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalStage {
    Triage,
    CherryPick,
    CherryPicked,
}

impl CanonicalStage {
    /// Board column order.
    pub const ALL: [Self; 3] = [Self::Triage, Self::CherryPick, Self::CherryPicked];

    /// Stage as it appears after the `/` of a label.
    #[must_use]
    pub const fn stage(self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::CherryPick => "cherry-pick",
            Self::CherryPicked => "cherry-picked",
        }
    }

    #[must_use]
    pub const fn column_name(self) -> &'static str {
        match self {
            Self::Triage => "Triage",
            Self::CherryPick => "Cherry Pick",
            Self::CherryPicked => "Cherry Picked",
        }
    }

    /// Color the label is created with.
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::Triage => "eeeeee",
            Self::CherryPick => "a98bf3",
            Self::CherryPicked => "bfe5bf",
        }
    }

    #[must_use]
    pub fn from_stage(stage: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.stage() == stage)
    }

    #[must_use]
    pub fn label(self, prefix: &str) -> StageLabel {
        StageLabel::new(prefix, self.stage())
    }
}

/// Column name for a stage; unknown stages name their own column.
#[must_use]
pub fn column_name_for(stage: &str) -> &str {
    CanonicalStage::from_stage(stage).map_or(stage, |s| s.column_name())
}

/// Canonical stage of a column, `None` for custom columns.
#[must_use]
pub fn stage_for(column_name: &str) -> Option<CanonicalStage> {
    CanonicalStage::ALL
        .into_iter()
        .find(|s| s.column_name() == column_name)
}

fn rc_suffix() -> &'static Regex {
    static RC_SUFFIX: OnceLock<Regex> = OnceLock::new();
    RC_SUFFIX.get_or_init(|| Regex::new("-rc.*$").expect("static regex is valid"))
}

/// Release prefix of a board name: `17.06.1-ee-1-rc3` -> `17.06.1-ee-1`.
#[must_use]
pub fn release_prefix(board_name: &str) -> String {
    rc_suffix().replace(board_name, "").into_owned()
}

/// A label the provisioning reconciler creates for a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalLabel {
    pub stage: CanonicalStage,
    pub name: String,
    pub color: &'static str,
}

/// The three canonical labels of a release, in column order.
#[must_use]
pub fn canonical_labels(prefix: &str) -> Vec<CanonicalLabel> {
    CanonicalStage::ALL
        .into_iter()
        .map(|stage| CanonicalLabel {
            stage,
            name: stage.label(prefix).render(),
            color: stage.color(),
        })
        .collect()
}

/// Priority bucket of an issue, most important first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    P0,
    P1,
    P2,
    None,
}

impl Priority {
    /// Final top-to-bottom order in a column.
    pub const RANKED: [Self; 4] = [Self::P0, Self::P1, Self::P2, Self::None];

    /// First `priority/p0|p1|p2` label wins.
    #[must_use]
    pub fn from_labels(labels: &[Label]) -> Self {
        labels
            .iter()
            .find_map(|label| match label.name.as_str() {
                "priority/p0" => Some(Self::P0),
                "priority/p1" => Some(Self::P1),
                "priority/p2" => Some(Self::P2),
                _ => None,
            })
            .unwrap_or(Self::None)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::P0 => write!(f, "p0"),
            Self::P1 => write!(f, "p1"),
            Self::P2 => write!(f, "p2"),
            Self::None => write!(f, "none"),
        }
    }
}
