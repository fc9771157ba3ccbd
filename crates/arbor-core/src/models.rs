//! Core data models for the arbor CMS engine.
//!
//! These types are shared across all arbor crates and represent the
//! article/version/signature lifecycle entities and the category hierarchy.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Language used for synthesized name rows when a flat name is supplied
/// under multi-language mode.
pub const DEFAULT_LANGUAGE: &str = "en";

// =============================================================================
// ARTICLE & VERSION TYPES
// =============================================================================

/// Identity root for content items. Versions carry all mutable state.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Article {
    pub id: Uuid,
    pub created_at_utc: DateTime<Utc>,
}

/// An immutable-once-published snapshot of an article.
///
/// `version` values for one article form a strictly increasing sequence;
/// the latest version is `MAX(version)` among non-deleted rows.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ArticleVersion {
    pub article_id: Uuid,
    pub version: i32,
    /// Set when the version is sent for review.
    pub submitted_at: Option<DateTime<Utc>>,
    /// Set on publish; may be future-dated (scheduled release).
    pub released_at: Option<DateTime<Utc>>,
    /// Soft-delete marker. Queries must explicitly opt into deleted rows.
    pub deleted_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub created_at_utc: DateTime<Utc>,
}

/// One approval/rejection record against an article version.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ArticleSignature {
    pub id: Uuid,
    pub article_id: Uuid,
    pub version: i32,
    /// None in the degenerate no-level-system configuration.
    pub signature_level_id: Option<Uuid>,
    pub result: SignatureResult,
    pub signed_at: DateTime<Utc>,
    /// A withdrawn signature is soft-deleted and must not count.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Outcome recorded by a signer at a given level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "signature_result", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SignatureResult {
    Approved,
    Rejected,
    Pending,
}

/// A version together with its non-deleted signatures, as fetched by the
/// batched loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionWithSignatures {
    pub version: ArticleVersion,
    pub signatures: Vec<ArticleSignature>,
}

impl VersionWithSignatures {
    /// Signatures that still count: not withdrawn.
    pub fn active_signatures(&self) -> impl Iterator<Item = &ArticleSignature> {
        self.signatures.iter().filter(|s| s.deleted_at.is_none())
    }
}

/// Derived workflow stage of an article version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStage {
    Draft,
    Reviewing,
    Verified,
    Scheduled,
    Released,
    Deleted,
    Unknown,
}

impl ArticleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStage::Draft => "draft",
            ArticleStage::Reviewing => "reviewing",
            ArticleStage::Verified => "verified",
            ArticleStage::Scheduled => "scheduled",
            ArticleStage::Released => "released",
            ArticleStage::Deleted => "deleted",
            ArticleStage::Unknown => "unknown",
        }
    }
}

// =============================================================================
// SIGNATURE LEVEL TYPES
// =============================================================================

/// Ordered approval tier. The final level is the highest `sequence` entry
/// in the configured set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureLevel {
    pub id: Uuid,
    pub name: String,
    pub sequence: i32,
    pub required: bool,
}

// =============================================================================
// CATEGORY TYPES
// =============================================================================

/// Hierarchy node as stored.
///
/// `parent_id` carries the relation in single-parent mode; multi-parent
/// mode uses the `category_parent` edge table instead.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: Uuid,
    pub bindable: bool,
    /// Flat name, used when multi-language mode is off.
    pub name: Option<String>,
    pub parent_id: Option<Uuid>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One name row per `(category_id, language)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CategoryName {
    pub category_id: Uuid,
    pub language: String,
    pub name: String,
}

/// Read projection of a category.
///
/// When a language is requested (or multi-language mode is off) `name`
/// holds the projected single-language name and `names` is empty;
/// otherwise `names` carries the full per-language set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryView {
    pub id: Uuid,
    pub bindable: bool,
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub names: Vec<CategoryName>,
    pub parent_ids: Vec<Uuid>,
    pub children: Vec<CategoryView>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

/// Request for creating a category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateCategoryRequest {
    pub bindable: bool,
    /// Flat name; under multi-language mode this synthesizes a
    /// DEFAULT_LANGUAGE row when no translations are given.
    pub name: Option<String>,
    /// Map of language -> name. Only valid under multi-language mode.
    pub multi_language_names: Option<HashMap<String, String>>,
    pub parent_ids: Option<Vec<Uuid>>,
}

/// Request for updating a category.
///
/// `multi_language_names` is merged into the existing rows, not a
/// replacement: languages missing from the map are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCategoryRequest {
    pub bindable: Option<bool>,
    pub name: Option<String>,
    pub multi_language_names: Option<HashMap<String, String>>,
    pub parent_ids: Option<Vec<Uuid>>,
}

/// Filters for listing categories.
#[derive(Debug, Clone, Default)]
pub struct CategoryFilter {
    pub ids: Option<Vec<Uuid>>,
    /// Only categories with no non-deleted parent.
    pub from_top: bool,
    /// Children of the given parent set.
    pub parent_ids: Option<Vec<Uuid>>,
    pub language: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort: Option<CategorySort>,
}

/// Sort order for category listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CategorySort {
    CreatedAtAsc,
    #[default]
    CreatedAtDesc,
}

// =============================================================================
// LISTING FILTER TYPES
// =============================================================================

/// Which version of each article a listing should consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionScope {
    /// Latest non-deleted version regardless of release state.
    #[default]
    Latest,
    /// Latest non-deleted version with `released_at <= now` (draft mode's
    /// "released" view).
    LatestReleased,
}

/// Filter shape for article listings, consumed by the query builder.
#[derive(Debug, Clone, Default)]
pub struct ArticleListFilter {
    pub ids: Option<Vec<Uuid>>,
    pub category_ids: Option<Vec<Uuid>>,
    pub scope: VersionScope,
    pub only_approved: Option<bool>,
    pub signature_level: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_as_str_round_trip_with_serde() {
        let json = serde_json::to_string(&ArticleStage::Scheduled).unwrap();
        assert_eq!(json, "\"scheduled\"");
        assert_eq!(ArticleStage::Scheduled.as_str(), "scheduled");
    }

    #[test]
    fn test_signature_result_serde_uppercase() {
        let json = serde_json::to_string(&SignatureResult::Approved).unwrap();
        assert_eq!(json, "\"APPROVED\"");
        let back: SignatureResult = serde_json::from_str("\"REJECTED\"").unwrap();
        assert_eq!(back, SignatureResult::Rejected);
    }

    #[test]
    fn test_active_signatures_excludes_withdrawn() {
        let now = Utc::now();
        let version = ArticleVersion {
            article_id: Uuid::new_v4(),
            version: 1,
            submitted_at: None,
            released_at: None,
            deleted_at: None,
            tags: vec![],
            created_at_utc: now,
        };
        let article_id = version.article_id;
        let sig = |deleted: bool| ArticleSignature {
            id: Uuid::new_v4(),
            article_id,
            version: 1,
            signature_level_id: None,
            result: SignatureResult::Approved,
            signed_at: now,
            deleted_at: deleted.then_some(now),
        };
        let vws = VersionWithSignatures {
            version,
            signatures: vec![sig(false), sig(true), sig(false)],
        };
        assert_eq!(vws.active_signatures().count(), 2);
    }

    #[test]
    fn test_category_sort_default_is_desc() {
        assert_eq!(CategorySort::default(), CategorySort::CreatedAtDesc);
    }
}
