//! Article listing filter query builder.
//!
//! Converts an [`ArticleListFilter`] into a SQL WHERE fragment with
//! parameterized queries for safe execution. The signature predicates
//! mirror the stage-derivation logic through the shared approval gate.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;
use tracing::debug;
use uuid::Uuid;

use arbor_core::{
    ArticleListFilter, SignatureApprovalGate, SignatureFilter, SignaturePredicate, VersionScope,
};

/// Type-safe parameter binding for SQL queries.
#[derive(Debug, Clone)]
pub enum QueryParam {
    /// Single UUID parameter.
    Uuid(Uuid),
    /// Array of UUIDs (for ANY operations).
    UuidArray(Vec<Uuid>),
    /// Integer parameter.
    Int(i32),
    /// 64-bit integer parameter (paging).
    BigInt(i64),
    /// Timestamp parameter.
    Timestamp(DateTime<Utc>),
    /// Boolean parameter.
    Bool(bool),
    /// String parameter.
    String(String),
    /// Array of strings (tag filtering).
    StringArray(Vec<String>),
}

/// Bind a parameter list onto a query in order.
pub fn bind_params<'q>(
    mut q: Query<'q, Postgres, PgArguments>,
    params: &'q [QueryParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        q = match param {
            QueryParam::Uuid(v) => q.bind(*v),
            QueryParam::UuidArray(v) => q.bind(v),
            QueryParam::Int(v) => q.bind(*v),
            QueryParam::BigInt(v) => q.bind(*v),
            QueryParam::Timestamp(v) => q.bind(*v),
            QueryParam::Bool(v) => q.bind(*v),
            QueryParam::String(v) => q.bind(v),
            QueryParam::StringArray(v) => q.bind(v),
        };
    }
    q
}

/// Generates SQL WHERE clause fragments for article listings.
///
/// The fragment references the version rows as `av` and assumes an
/// `article_signature` table for the approval predicates and an
/// `article_category` join table for category filtering.
pub struct ArticleFilterQueryBuilder {
    filter: ArticleListFilter,
    gate: SignatureApprovalGate,
    draft_mode: bool,
    now: DateTime<Utc>,
    param_offset: usize,
}

impl ArticleFilterQueryBuilder {
    /// Create a new builder.
    ///
    /// # Parameters
    ///
    /// * `filter` - The listing filter
    /// * `gate` - The configured approval gate
    /// * `draft_mode` - Whether released-vs-draft version scoping applies
    /// * `now` - Request-time clock for release comparisons
    /// * `param_offset` - Starting parameter index (number of parameters
    ///   already in the query)
    pub fn new(
        filter: ArticleListFilter,
        gate: SignatureApprovalGate,
        draft_mode: bool,
        now: DateTime<Utc>,
        param_offset: usize,
    ) -> Self {
        Self {
            filter,
            gate,
            draft_mode,
            now,
            param_offset,
        }
    }

    /// Build the WHERE clause fragment and its parameters.
    pub fn build(&self) -> (String, Vec<QueryParam>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        let mut param_idx = self.param_offset;

        // Listings never see soft-deleted versions.
        clauses.push("av.deleted_at IS NULL".to_string());

        // Version selection
        let scope = if self.draft_mode {
            self.filter.scope
        } else {
            if self.filter.scope == VersionScope::LatestReleased {
                debug!(
                    component = "filter_builder",
                    "released scope requested while draft mode is disabled; using latest"
                );
            }
            VersionScope::Latest
        };
        match scope {
            VersionScope::Latest => {
                clauses.push(
                    "av.version = (SELECT MAX(v2.version) FROM article_version v2 \
                     WHERE v2.article_id = av.article_id AND v2.deleted_at IS NULL)"
                        .to_string(),
                );
            }
            VersionScope::LatestReleased => {
                param_idx += 1;
                clauses.push(format!(
                    "av.released_at IS NOT NULL AND av.released_at <= ${idx} \
                     AND av.version = (SELECT MAX(v2.version) FROM article_version v2 \
                     WHERE v2.article_id = av.article_id AND v2.deleted_at IS NULL \
                     AND v2.released_at IS NOT NULL AND v2.released_at <= ${idx})",
                    idx = param_idx
                ));
                params.push(QueryParam::Timestamp(self.now));
            }
        }

        // Explicit article ids
        if let Some(ref ids) = self.filter.ids {
            param_idx += 1;
            clauses.push(format!("av.article_id = ANY(${}::uuid[])", param_idx));
            params.push(QueryParam::UuidArray(ids.clone()));
        }

        // Category membership
        if let Some(ref category_ids) = self.filter.category_ids {
            param_idx += 1;
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM article_category ac \
                 WHERE ac.article_id = av.article_id AND ac.category_id = ANY(${}::uuid[]))",
                param_idx
            ));
            params.push(QueryParam::UuidArray(category_ids.clone()));
        }

        // Signature approval
        let predicate = self.gate.predicate(&SignatureFilter {
            only_approved: self.filter.only_approved,
            signature_level: self.filter.signature_level,
        });
        match predicate {
            SignaturePredicate::None => {}
            SignaturePredicate::ApprovedAtLevel(level_id) => {
                param_idx += 1;
                clauses.push(format!(
                    "EXISTS (SELECT 1 FROM article_signature s \
                     WHERE s.article_id = av.article_id AND s.version = av.version \
                     AND s.deleted_at IS NULL AND s.result = 'APPROVED' \
                     AND s.signature_level_id = ${})",
                    param_idx
                ));
                params.push(QueryParam::Uuid(level_id));
            }
            SignaturePredicate::ApprovedWithoutLevel => {
                clauses.push(
                    "EXISTS (SELECT 1 FROM article_signature s \
                     WHERE s.article_id = av.article_id AND s.version = av.version \
                     AND s.deleted_at IS NULL AND s.result = 'APPROVED' \
                     AND s.signature_level_id IS NULL)"
                        .to_string(),
                );
            }
        }

        (clauses.join(" AND "), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{CmsConfig, SignatureLevel};

    fn gate(levels: Vec<SignatureLevel>) -> SignatureApprovalGate {
        SignatureApprovalGate::new(&CmsConfig {
            signature_mode: true,
            signature_levels: levels,
            ..Default::default()
        })
    }

    fn level(seq: i32) -> SignatureLevel {
        SignatureLevel {
            id: Uuid::new_v4(),
            name: format!("L{}", seq),
            sequence: seq,
            required: true,
        }
    }

    #[test]
    fn test_default_filter_selects_latest_non_deleted() {
        let builder = ArticleFilterQueryBuilder::new(
            ArticleListFilter::default(),
            gate(vec![]),
            false,
            Utc::now(),
            0,
        );
        let (sql, params) = builder.build();

        assert!(sql.contains("av.deleted_at IS NULL"));
        assert!(sql.contains("MAX(v2.version)"));
        assert!(!sql.contains("released_at"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_released_scope_binds_now_once_and_reuses_index() {
        let now = Utc::now();
        let filter = ArticleListFilter {
            scope: VersionScope::LatestReleased,
            ..Default::default()
        };
        let builder = ArticleFilterQueryBuilder::new(filter, gate(vec![]), true, now, 0);
        let (sql, params) = builder.build();

        assert!(sql.contains("av.released_at <= $1"));
        assert!(sql.contains("v2.released_at IS NOT NULL AND v2.released_at <= $1"));
        assert_eq!(params.len(), 1);
        assert!(matches!(params[0], QueryParam::Timestamp(ts) if ts == now));
    }

    #[test]
    fn test_released_scope_ignored_without_draft_mode() {
        let filter = ArticleListFilter {
            scope: VersionScope::LatestReleased,
            ..Default::default()
        };
        let builder = ArticleFilterQueryBuilder::new(filter, gate(vec![]), false, Utc::now(), 0);
        let (sql, params) = builder.build();

        assert!(!sql.contains("released_at"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_only_approved_uses_final_level() {
        let l1 = level(1);
        let l2 = level(2);
        let final_id = l2.id;
        let filter = ArticleListFilter {
            only_approved: Some(true),
            ..Default::default()
        };
        let builder =
            ArticleFilterQueryBuilder::new(filter, gate(vec![l1, l2]), false, Utc::now(), 0);
        let (sql, params) = builder.build();

        assert!(sql.contains("s.result = 'APPROVED'"));
        assert!(sql.contains("s.signature_level_id = $1"));
        assert!(matches!(params[0], QueryParam::Uuid(id) if id == final_id));
    }

    #[test]
    fn test_explicit_level_wins_over_only_approved() {
        let l1 = level(1);
        let l2 = level(2);
        let explicit = l1.id;
        let filter = ArticleListFilter {
            only_approved: Some(true),
            signature_level: Some(explicit),
            ..Default::default()
        };
        let builder =
            ArticleFilterQueryBuilder::new(filter, gate(vec![l1, l2]), false, Utc::now(), 0);
        let (_, params) = builder.build();

        assert_eq!(params.len(), 1);
        assert!(matches!(params[0], QueryParam::Uuid(id) if id == explicit));
    }

    #[test]
    fn test_only_approved_without_levels_requires_null_level() {
        let filter = ArticleListFilter {
            only_approved: Some(true),
            ..Default::default()
        };
        let builder = ArticleFilterQueryBuilder::new(filter, gate(vec![]), false, Utc::now(), 0);
        let (sql, params) = builder.build();

        assert!(sql.contains("s.signature_level_id IS NULL"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_param_offset_shifts_indexes() {
        let filter = ArticleListFilter {
            ids: Some(vec![Uuid::new_v4()]),
            category_ids: Some(vec![Uuid::new_v4()]),
            ..Default::default()
        };
        let builder = ArticleFilterQueryBuilder::new(filter, gate(vec![]), false, Utc::now(), 5);
        let (sql, params) = builder.build();

        assert!(sql.contains("av.article_id = ANY($6::uuid[])"));
        assert!(sql.contains("ac.category_id = ANY($7::uuid[])"));
        assert_eq!(params.len(), 2);
    }
}
