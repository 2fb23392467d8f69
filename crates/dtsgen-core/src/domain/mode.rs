//! Artifact modes.

use serde::{Deserialize, Serialize};

/// How a stage's artifacts are organized.
///
/// Basic modes hold one artifact per example; combined modes hold at most
/// one artifact built from all examples of their source modes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Examples extracted from the package readme.
    Extraction,

    /// Examples proposed by the prompting agent.
    Generation,

    CombinedExtraction,
    CombinedGeneration,

    /// Extraction and generation examples together.
    CombinedAll,
}

impl Mode {
    pub const BASIC: [Mode; 2] = [Mode::Extraction, Mode::Generation];

    pub const COMBINED: [Mode; 3] = [
        Mode::CombinedExtraction,
        Mode::CombinedGeneration,
        Mode::CombinedAll,
    ];

    pub const ALL: [Mode; 5] = [
        Mode::Extraction,
        Mode::Generation,
        Mode::CombinedExtraction,
        Mode::CombinedGeneration,
        Mode::CombinedAll,
    ];

    /// Directory name of the mode below a stage directory.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Mode::Extraction => "extraction",
            Mode::Generation => "generation",
            Mode::CombinedExtraction => "combined_extraction",
            Mode::CombinedGeneration => "combined_generation",
            Mode::CombinedAll => "combined_all",
        }
    }

    pub fn is_combined(&self) -> bool {
        Self::COMBINED.contains(self)
    }

    /// Modes a stage iterates over.
    pub fn selection(combined_only: bool) -> &'static [Mode] {
        if combined_only {
            &Self::COMBINED
        } else {
            &Self::ALL
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}
