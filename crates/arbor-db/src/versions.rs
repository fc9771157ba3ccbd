//! Article version repository implementation.
//!
//! Point lookups here are always batched: stage and signature resolution
//! run once per item in a list, so the fetch surface is shaped around
//! "many (article_id, version) pairs in, one query out".

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use arbor_core::{
    ArticleSignature, ArticleVersion, ArticleVersionRepository, Category, Error, Result,
    SignatureResult, VersionWithSignatures,
};

/// PostgreSQL implementation of ArticleVersionRepository.
pub struct PgArticleVersionRepository {
    pool: Pool<Postgres>,
}

impl PgArticleVersionRepository {
    /// Create a new PgArticleVersionRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArticleVersionRepository for PgArticleVersionRepository {
    /// Fetch versions with their non-deleted signatures for a set of
    /// `(article_id, version)` pairs.
    ///
    /// Composite keys cannot be batched through a plain `IN`, so the
    /// WHERE clause is an explicit disjunction of per-pair equality
    /// brackets. Soft-deleted versions are included on purpose: stage
    /// derivation needs them to report DELETED rather than UNKNOWN.
    async fn fetch_many(
        &self,
        pairs: &[(Uuid, i32)],
    ) -> Result<HashMap<(Uuid, i32), VersionWithSignatures>> {
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }

        let brackets: Vec<String> = (0..pairs.len())
            .map(|i| format!("(av.article_id = ${} AND av.version = ${})", 2 * i + 1, 2 * i + 2))
            .collect();

        let sql = format!(
            r#"
            SELECT
                av.article_id, av.version, av.submitted_at, av.released_at,
                av.deleted_at, av.tags, av.created_at_utc,
                s.id as signature_id,
                s.signature_level_id,
                s.result as signature_result,
                s.signed_at,
                s.deleted_at as signature_deleted_at
            FROM article_version av
            LEFT JOIN article_signature s
                ON s.article_id = av.article_id
               AND s.version = av.version
               AND s.deleted_at IS NULL
            WHERE {}
            ORDER BY av.article_id, av.version
            "#,
            brackets.join(" OR ")
        );

        let mut q = sqlx::query(&sql);
        for (article_id, version) in pairs {
            q = q.bind(article_id).bind(version);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "version_repo",
            op = "fetch_many",
            batch_size = pairs.len(),
            result_count = rows.len(),
            "batched version fetch"
        );

        let mut out: HashMap<(Uuid, i32), VersionWithSignatures> = HashMap::new();
        for row in rows {
            let article_id: Uuid = row.get("article_id");
            let version_number: i32 = row.get("version");
            let entry = out
                .entry((article_id, version_number))
                .or_insert_with(|| VersionWithSignatures {
                    version: ArticleVersion {
                        article_id,
                        version: version_number,
                        submitted_at: row.get("submitted_at"),
                        released_at: row.get("released_at"),
                        deleted_at: row.get("deleted_at"),
                        tags: row.get("tags"),
                        created_at_utc: row.get("created_at_utc"),
                    },
                    signatures: Vec::new(),
                });

            let signature_id: Option<Uuid> = row.get("signature_id");
            if let Some(id) = signature_id {
                let result: SignatureResult = row.get("signature_result");
                entry.signatures.push(ArticleSignature {
                    id,
                    article_id,
                    version: version_number,
                    signature_level_id: row.get("signature_level_id"),
                    result,
                    signed_at: row.get("signed_at"),
                    deleted_at: row.get("signature_deleted_at"),
                });
            }
        }
        Ok(out)
    }

    /// Fetch the categories bound to each article in one query.
    async fn categories_for_articles(
        &self,
        article_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<Category>>> {
        if article_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT
                ac.article_id,
                c.id, c.bindable, c.name, c.parent_id,
                c.created_at_utc, c.updated_at_utc, c.deleted_at
            FROM article_category ac
            JOIN category c ON c.id = ac.category_id AND c.deleted_at IS NULL
            WHERE ac.article_id = ANY($1::uuid[])
            ORDER BY c.created_at_utc
            "#,
        )
        .bind(article_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut out: HashMap<Uuid, Vec<Category>> = HashMap::new();
        for row in rows {
            let article_id: Uuid = row.get("article_id");
            out.entry(article_id).or_default().push(Category {
                id: row.get("id"),
                bindable: row.get("bindable"),
                name: row.get("name"),
                parent_id: row.get("parent_id"),
                created_at_utc: row.get("created_at_utc"),
                updated_at_utc: row.get("updated_at_utc"),
                deleted_at: row.get("deleted_at"),
            });
        }
        Ok(out)
    }
}
