//! Signature approval gate.
//!
//! Decides whether a version's signature set satisfies "approved", both
//! for stage derivation and for listing-time filter construction. The
//! configured level set is captured at construction; tests substitute
//! arbitrary level sets without touching process globals.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CmsConfig;
use crate::models::{ArticleSignature, SignatureLevel, SignatureResult};

/// Listing-time signature filter request.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureFilter {
    pub only_approved: Option<bool>,
    pub signature_level: Option<Uuid>,
}

/// Resolved predicate a listing query must apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignaturePredicate {
    /// No signature filter.
    None,
    /// Require a non-deleted APPROVED signature at this level.
    ApprovedAtLevel(Uuid),
    /// Require a non-deleted APPROVED signature with `signature_level_id
    /// IS NULL` (no level system configured).
    ApprovedWithoutLevel,
}

/// Evaluates signature-level approval requirements.
#[derive(Debug, Clone)]
pub struct SignatureApprovalGate {
    enabled: bool,
    final_level: Option<SignatureLevel>,
}

impl SignatureApprovalGate {
    pub fn new(config: &CmsConfig) -> Self {
        Self {
            enabled: config.signature_mode,
            final_level: config.final_signature_level().cloned(),
        }
    }

    /// The highest-sequence configured level, if any.
    pub fn final_level(&self) -> Option<&SignatureLevel> {
        self.final_level.as_ref()
    }

    /// Whether the version's signatures satisfy the final-level approval
    /// requirement used by stage derivation.
    ///
    /// With no level system configured, an approved signature must carry
    /// no level id to count.
    pub fn is_final_approved(&self, signatures: &[ArticleSignature]) -> bool {
        if !self.enabled {
            return false;
        }
        let target = self.final_level.as_ref().map(|l| l.id);
        signatures.iter().any(|s| {
            s.deleted_at.is_none()
                && s.result == SignatureResult::Approved
                && s.signature_level_id == target
        })
    }

    /// Resolve a listing filter request into the predicate to apply.
    ///
    /// When both `signature_level` and `only_approved` are given,
    /// `signature_level` wins; the ignored flag is a diagnostic, not an
    /// error.
    pub fn predicate(&self, filter: &SignatureFilter) -> SignaturePredicate {
        let only_approved = filter.only_approved.unwrap_or(false);

        if !self.enabled {
            if only_approved || filter.signature_level.is_some() {
                debug!(
                    component = "signature_gate",
                    "signature filter requested while signature mode is disabled"
                );
            }
            return SignaturePredicate::None;
        }

        if let Some(level_id) = filter.signature_level {
            if only_approved {
                warn!(
                    component = "signature_gate",
                    signature_level = %level_id,
                    "onlyApproved ignored: signatureLevel takes precedence"
                );
            }
            return SignaturePredicate::ApprovedAtLevel(level_id);
        }

        if only_approved {
            return match &self.final_level {
                Some(level) => SignaturePredicate::ApprovedAtLevel(level.id),
                None => SignaturePredicate::ApprovedWithoutLevel,
            };
        }

        SignaturePredicate::None
    }
}
