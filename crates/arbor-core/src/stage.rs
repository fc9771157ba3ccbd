//! Article stage derivation.
//!
//! Maps one fetched `(article_id, version)` result to exactly one stage
//! value. The order below is a deliberate precedence, not a set of
//! mutually exclusive conditions: a released version with no approval
//! signature is still RELEASED, because release supersedes the review
//! pipeline.

use chrono::{DateTime, Utc};

use crate::models::{ArticleStage, VersionWithSignatures};
use crate::signature::SignatureApprovalGate;

/// Derive the stage of a version fetch result.
///
/// Precedence, first match wins:
/// 1. UNKNOWN — no matching, non-deleted row found
/// 2. DELETED — `deleted_at` set
/// 3. RELEASED — `released_at <= now`
/// 4. SCHEDULED — `released_at > now`
/// 5. VERIFIED — final-level approval satisfied
/// 6. REVIEWING — `submitted_at` set
/// 7. DRAFT — none of the above
pub fn derive_stage(
    gate: &SignatureApprovalGate,
    found: Option<&VersionWithSignatures>,
    now: DateTime<Utc>,
) -> ArticleStage {
    let Some(vws) = found else {
        return ArticleStage::Unknown;
    };
    let version = &vws.version;

    if version.deleted_at.is_some() {
        return ArticleStage::Deleted;
    }
    if let Some(released_at) = version.released_at {
        if released_at <= now {
            return ArticleStage::Released;
        }
        return ArticleStage::Scheduled;
    }
    if gate.is_final_approved(&vws.signatures) {
        return ArticleStage::Verified;
    }
    if version.submitted_at.is_some() {
        return ArticleStage::Reviewing;
    }
    ArticleStage::Draft
}
