//! CMS mode configuration.
//!
//! All dynamic behavior flags live in one immutable struct, resolved once
//! at startup and threaded into each component explicitly. The branches
//! materially change validation rules and storage shape (collection vs.
//! singleton parent), so they are plain fields rather than runtime
//! feature-flag lookups scattered through the code.

use serde::{Deserialize, Serialize};

use crate::models::SignatureLevel;

/// Immutable configuration for the CMS engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CmsConfig {
    /// Per-language name rows vs. a single flat name.
    pub multiple_language_mode: bool,
    /// Category `parents` is a collection vs. a pseudo-singleton.
    pub allow_multiple_parent_categories: bool,
    /// Disables the cycle check entirely.
    pub allow_circular_categories: bool,
    /// Enables scheduled/released-vs-draft filtering in listings.
    pub enable_draft_mode: bool,
    /// Enables the approval gate.
    pub signature_mode: bool,
    /// Ordered approval tiers; empty when no level system is configured.
    pub signature_levels: Vec<SignatureLevel>,
    /// External collaborator concern; treated as present/absent only.
    pub full_text_search_mode: bool,
}

impl CmsConfig {
    /// The highest-sequence configured level, or None when no levels exist.
    pub fn final_signature_level(&self) -> Option<&SignatureLevel> {
        self.signature_levels.iter().max_by_key(|l| l.sequence)
    }

    /// Levels sorted by sequence, ascending.
    pub fn ordered_signature_levels(&self) -> Vec<&SignatureLevel> {
        let mut levels: Vec<&SignatureLevel> = self.signature_levels.iter().collect();
        levels.sort_by_key(|l| l.sequence);
        levels
    }
}
