//! Category repository implementation.
//!
//! Enforces parent-arity and acyclicity invariants and provides
//! language-aware read projections. Parent storage follows the configured
//! mode: a `parent_id` column in single-parent mode, a `category_parent`
//! edge table in multi-parent mode. Ancestor walks go through the batched
//! loader by id with a locally-scoped visited set, so they terminate even
//! over a graph that is mid-transition between consistent states.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::{debug, error};
use uuid::Uuid;

use arbor_core::{
    new_v7, Category, CategoryFilter, CategoryName, CategoryRepository, CategorySort,
    CategoryView, CmsConfig, CreateCategoryRequest, Error, Result, UpdateCategoryRequest,
    DEFAULT_LANGUAGE,
};

use crate::batch::{BatchFn, CachePolicy, KeyedBatchCache};
use crate::filter::{bind_params, QueryParam};

/// Hard cap on page size regardless of the requested limit.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Loader for `category id -> non-deleted parent ids`.
pub type AncestorLoader = KeyedBatchCache<Uuid, Vec<Uuid>>;

/// Clamp a requested page size to the store-facing maximum.
fn clamp_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(50).min(MAX_PAGE_SIZE)
}

// =============================================================================
// NAME PLANNING
// =============================================================================

/// Name rows to write for a category create.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NamePlan {
    /// Flat name column value (single-language configuration).
    flat: Option<String>,
    /// `(language, name)` rows (multi-language configuration).
    rows: Vec<(String, String)>,
}

/// Decide which name storage a create request maps to.
fn plan_name_rows(
    config: &CmsConfig,
    name: Option<&str>,
    translations: Option<&HashMap<String, String>>,
) -> Result<NamePlan> {
    if !config.multiple_language_mode {
        if translations.is_some() {
            return Err(Error::Config(
                "multi-language names supplied while multiple language mode is disabled"
                    .to_string(),
            ));
        }
        let Some(name) = name else {
            return Err(Error::InvalidInput("category name is required".to_string()));
        };
        return Ok(NamePlan {
            flat: Some(name.to_string()),
            rows: Vec::new(),
        });
    }

    if let Some(map) = translations {
        if !map.is_empty() {
            let mut rows: Vec<(String, String)> = map
                .iter()
                .map(|(language, name)| (language.clone(), name.clone()))
                .collect();
            rows.sort();
            return Ok(NamePlan { flat: None, rows });
        }
    }

    // Fallback synthesis: a flat name becomes the DEFAULT_LANGUAGE row.
    let Some(name) = name else {
        return Err(Error::InvalidInput("category name is required".to_string()));
    };
    Ok(NamePlan {
        flat: None,
        rows: vec![(DEFAULT_LANGUAGE.to_string(), name.to_string())],
    })
}

/// Decide which name rows an update writes.
///
/// This is a merge, not a replace: languages missing from the incoming
/// map are left untouched. With no map and a flat name, a
/// DEFAULT_LANGUAGE row is synthesized exactly as in create.
fn plan_name_update(
    config: &CmsConfig,
    existing: &[CategoryName],
    name: Option<&str>,
    translations: Option<&HashMap<String, String>>,
) -> Result<Vec<(String, String)>> {
    if !config.multiple_language_mode {
        if translations.is_some() {
            return Err(Error::Config(
                "multi-language names supplied while multiple language mode is disabled"
                    .to_string(),
            ));
        }
        // Flat name changes go through the category row itself.
        return Ok(Vec::new());
    }

    let incoming: Vec<(String, String)> = match translations {
        Some(map) if !map.is_empty() => {
            map.iter().map(|(l, n)| (l.clone(), n.clone())).collect()
        }
        _ => match name {
            Some(name) => vec![(DEFAULT_LANGUAGE.to_string(), name.to_string())],
            None => return Ok(Vec::new()),
        },
    };

    let mut rows: Vec<(String, String)> = incoming
        .into_iter()
        .filter(|(language, name)| {
            existing
                .iter()
                .find(|row| &row.language == language)
                .map(|row| &row.name != name)
                .unwrap_or(true)
        })
        .collect();
    rows.sort();
    Ok(rows)
}

// =============================================================================
// PARENT ARITY & CYCLE CHECK
// =============================================================================

/// Reject multi-parent requests while multi-parent mode is disabled.
fn validate_parent_arity(config: &CmsConfig, parent_ids: &[Uuid]) -> Result<()> {
    if parent_ids.len() > 1 && !config.allow_multiple_parent_categories {
        return Err(Error::MultipleParentCategoryNotAllowed);
    }
    Ok(())
}

/// Full ancestor set reachable upward from `start`, including the
/// starting ids themselves.
///
/// The visited set guarantees termination even when the stored graph
/// already contains a cycle.
pub async fn reachable_ancestor_ids(
    loader: &AncestorLoader,
    start: &[Uuid],
) -> Result<HashSet<Uuid>> {
    let mut visited: HashSet<Uuid> = start.iter().copied().collect();
    let mut frontier: Vec<Uuid> = start.to_vec();

    while !frontier.is_empty() {
        let parent_lists = loader.load_many(frontier).await?;
        let mut next = Vec::new();
        for parents in parent_lists {
            for parent in parents {
                if visited.insert(parent) {
                    next.push(parent);
                }
            }
        }
        frontier = next;
    }
    Ok(visited)
}

/// Fail when attaching `prospective_parents` to `category_id` would
/// create a cycle. Skipped entirely when circular categories are allowed.
pub async fn check_circular(
    loader: &AncestorLoader,
    allow_circular: bool,
    category_id: Uuid,
    prospective_parents: &[Uuid],
) -> Result<()> {
    if allow_circular || prospective_parents.is_empty() {
        return Ok(());
    }
    let ancestors = reachable_ancestor_ids(loader, prospective_parents).await?;
    if ancestors.contains(&category_id) {
        return Err(Error::CircularCategoryNotAllowed(category_id));
    }
    Ok(())
}

fn ancestor_loader(pool: Pool<Postgres>, config: &CmsConfig, policy: CachePolicy) -> AncestorLoader {
    let multi_parent = config.allow_multiple_parent_categories;
    let batch_fn: BatchFn<Uuid, Vec<Uuid>> = Arc::new(move |keys| {
        let pool = pool.clone();
        Box::pin(async move {
            let sql = if multi_parent {
                "SELECT cp.category_id, cp.parent_id
                 FROM category_parent cp
                 JOIN category p ON p.id = cp.parent_id AND p.deleted_at IS NULL
                 WHERE cp.category_id = ANY($1::uuid[])"
            } else {
                "SELECT c.id as category_id, c.parent_id
                 FROM category c
                 JOIN category p ON p.id = c.parent_id AND p.deleted_at IS NULL
                 WHERE c.id = ANY($1::uuid[])"
            };
            let rows = sqlx::query(sql)
                .bind(&keys)
                .fetch_all(&pool)
                .await
                .map_err(Error::Database)?;

            let mut out: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
            for row in rows {
                let category_id: Uuid = row.get("category_id");
                out.entry(category_id).or_default().push(row.get("parent_id"));
            }
            Ok(out)
        })
    });
    KeyedBatchCache::new(policy, Vec::new(), batch_fn)
}

// =============================================================================
// REPOSITORY
// =============================================================================

/// PostgreSQL implementation of CategoryRepository.
pub struct PgCategoryRepository {
    pool: Pool<Postgres>,
    config: CmsConfig,
    ancestors: AncestorLoader,
}

impl PgCategoryRepository {
    /// Create a new PgCategoryRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>, config: CmsConfig) -> Self {
        let ancestors = ancestor_loader(pool.clone(), &config, CachePolicy::default());
        Self {
            pool,
            config,
            ancestors,
        }
    }

    /// All ancestors of `id`, including `id` itself.
    pub async fn parent_category_id_set(&self, id: Uuid) -> Result<HashSet<Uuid>> {
        reachable_ancestor_ids(&self.ancestors, &[id]).await
    }

    /// Resolve and validate requested parent ids per the arity mode.
    ///
    /// Multi-parent mode resolves the whole set with one `IN` lookup;
    /// single-parent mode uses a plain point lookup, because the storage
    /// shape of "parents" differs between the modes.
    async fn resolve_parent_ids(&self, parent_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let mut requested: Vec<Uuid> = Vec::new();
        for id in parent_ids {
            if !requested.contains(id) {
                requested.push(*id);
            }
        }
        validate_parent_arity(&self.config, &requested)?;
        if requested.is_empty() {
            return Ok(requested);
        }

        if self.config.allow_multiple_parent_categories {
            let rows = sqlx::query(
                "SELECT id FROM category WHERE id = ANY($1::uuid[]) AND deleted_at IS NULL",
            )
            .bind(&requested)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

            let found: HashSet<Uuid> = rows.iter().map(|r| r.get("id")).collect();
            let missing: Vec<String> = requested
                .iter()
                .filter(|id| !found.contains(id))
                .map(|id| id.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(Error::ParentCategoryNotFound(missing.join(", ")));
            }
        } else {
            let parent_id = requested[0];
            let row =
                sqlx::query("SELECT id FROM category WHERE id = $1 AND deleted_at IS NULL")
                    .bind(parent_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(Error::Database)?;
            if row.is_none() {
                return Err(Error::ParentCategoryNotFound(parent_id.to_string()));
            }
        }
        Ok(requested)
    }

    /// Parents currently stored for `id` (non-deleted only), read fresh.
    async fn current_parent_ids(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let sql = if self.config.allow_multiple_parent_categories {
            "SELECT cp.parent_id
             FROM category_parent cp
             JOIN category p ON p.id = cp.parent_id AND p.deleted_at IS NULL
             WHERE cp.category_id = $1"
        } else {
            "SELECT c.parent_id
             FROM category c
             JOIN category p ON p.id = c.parent_id AND p.deleted_at IS NULL
             WHERE c.id = $1"
        };
        let rows = sqlx::query(sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.iter().map(|r| r.get("parent_id")).collect())
    }

    async fn load_names(&self, category_ids: &[Uuid]) -> Result<Vec<CategoryName>> {
        if !self.config.multiple_language_mode || category_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, CategoryName>(
            "SELECT category_id, language, name FROM category_name
             WHERE category_id = ANY($1::uuid[])
             ORDER BY category_id, language",
        )
        .bind(category_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows)
    }

    /// One level of non-deleted children, grouped by parent.
    async fn load_children(&self, parent_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Category>>> {
        if parent_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut out: HashMap<Uuid, Vec<Category>> = HashMap::new();
        if self.config.allow_multiple_parent_categories {
            let rows = sqlx::query(
                "SELECT cp.parent_id as via_parent,
                        c.id, c.bindable, c.name, c.parent_id,
                        c.created_at_utc, c.updated_at_utc, c.deleted_at
                 FROM category_parent cp
                 JOIN category c ON c.id = cp.category_id AND c.deleted_at IS NULL
                 WHERE cp.parent_id = ANY($1::uuid[])
                 ORDER BY c.created_at_utc",
            )
            .bind(parent_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
            for row in rows {
                let via: Uuid = row.get("via_parent");
                out.entry(via).or_default().push(category_from_row(&row));
            }
        } else {
            let rows = sqlx::query(
                "SELECT c.id, c.bindable, c.name, c.parent_id,
                        c.created_at_utc, c.updated_at_utc, c.deleted_at
                 FROM category c
                 WHERE c.parent_id = ANY($1::uuid[]) AND c.deleted_at IS NULL
                 ORDER BY c.created_at_utc",
            )
            .bind(parent_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
            for row in rows {
                let category = category_from_row(&row);
                let via = category.parent_id.expect("child row has a parent");
                out.entry(via).or_default().push(category);
            }
        }
        Ok(out)
    }

    /// Parent ids for a page of categories, grouped by child.
    async fn load_parent_ids(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Uuid>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = if self.config.allow_multiple_parent_categories {
            "SELECT cp.category_id, cp.parent_id
             FROM category_parent cp
             JOIN category p ON p.id = cp.parent_id AND p.deleted_at IS NULL
             WHERE cp.category_id = ANY($1::uuid[])"
        } else {
            "SELECT c.id as category_id, c.parent_id
             FROM category c
             JOIN category p ON p.id = c.parent_id AND p.deleted_at IS NULL
             WHERE c.id = ANY($1::uuid[])"
        };
        let rows = sqlx::query(sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        let mut out: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for row in rows {
            let category_id: Uuid = row.get("category_id");
            out.entry(category_id).or_default().push(row.get("parent_id"));
        }
        Ok(out)
    }

    async fn insert_category_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        bindable: bool,
        flat_name: &Option<String>,
        parent_ids: &[Uuid],
        name_rows: &[(String, String)],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let single_parent = if self.config.allow_multiple_parent_categories {
            None
        } else {
            parent_ids.first().copied()
        };

        sqlx::query(
            "INSERT INTO category (id, bindable, name, parent_id, created_at_utc, updated_at_utc)
             VALUES ($1, $2, $3, $4, $5, $5)",
        )
        .bind(id)
        .bind(bindable)
        .bind(flat_name)
        .bind(single_parent)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        if self.config.allow_multiple_parent_categories {
            for parent_id in parent_ids {
                sqlx::query(
                    "INSERT INTO category_parent (category_id, parent_id) VALUES ($1, $2)",
                )
                .bind(id)
                .bind(parent_id)
                .execute(&mut **tx)
                .await
                .map_err(Error::Database)?;
            }
        }

        // Called on both branches; the empty slice is a no-op, keeping
        // the write paths symmetric.
        upsert_name_rows(tx, id, name_rows).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_update_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        bindable: bool,
        flat_name: &Option<String>,
        replace_parents: bool,
        parent_ids: &[Uuid],
        name_rows: &[(String, String)],
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.config.allow_multiple_parent_categories {
            sqlx::query(
                "UPDATE category SET bindable = $2, name = $3, updated_at_utc = $4 WHERE id = $1",
            )
            .bind(id)
            .bind(bindable)
            .bind(flat_name)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

            if replace_parents {
                sqlx::query("DELETE FROM category_parent WHERE category_id = $1")
                    .bind(id)
                    .execute(&mut **tx)
                    .await
                    .map_err(Error::Database)?;
                for parent_id in parent_ids {
                    sqlx::query(
                        "INSERT INTO category_parent (category_id, parent_id) VALUES ($1, $2)",
                    )
                    .bind(id)
                    .bind(parent_id)
                    .execute(&mut **tx)
                    .await
                    .map_err(Error::Database)?;
                }
            }
        } else {
            let parent_id = parent_ids.first().copied();
            if replace_parents {
                sqlx::query(
                    "UPDATE category SET bindable = $2, name = $3, parent_id = $4, updated_at_utc = $5
                     WHERE id = $1",
                )
                .bind(id)
                .bind(bindable)
                .bind(flat_name)
                .bind(parent_id)
                .bind(now)
                .execute(&mut **tx)
                .await
                .map_err(Error::Database)?;
            } else {
                sqlx::query(
                    "UPDATE category SET bindable = $2, name = $3, updated_at_utc = $4 WHERE id = $1",
                )
                .bind(id)
                .bind(bindable)
                .bind(flat_name)
                .bind(now)
                .execute(&mut **tx)
                .await
                .map_err(Error::Database)?;
            }
        }

        upsert_name_rows(tx, id, name_rows).await?;
        Ok(())
    }

    /// Roll up a write failure: domain errors pass through, anything else
    /// is logged with its cause and surfaced sanitized.
    fn sanitize_write_error(&self, op: &str, e: Error) -> Error {
        if e.is_domain() {
            return e;
        }
        error!(
            subsystem = "db",
            component = "category_repo",
            op = op,
            error = %e,
            "category write failed; transaction rolled back"
        );
        Error::InvalidInput(format!("category {} failed", op))
    }

    fn project(
        &self,
        language: Option<&str>,
        category: &Category,
        names: &[CategoryName],
        parent_ids: Vec<Uuid>,
        children: Vec<CategoryView>,
    ) -> CategoryView {
        let own_names: Vec<CategoryName> = names
            .iter()
            .filter(|n| n.category_id == category.id)
            .cloned()
            .collect();

        let (name, names) = if !self.config.multiple_language_mode {
            (category.name.clone(), Vec::new())
        } else if let Some(language) = language {
            (pick_name(&own_names, language), Vec::new())
        } else {
            (None, own_names)
        };

        CategoryView {
            id: category.id,
            bindable: category.bindable,
            name,
            names,
            parent_ids,
            children,
            created_at_utc: category.created_at_utc,
            updated_at_utc: category.updated_at_utc,
        }
    }
}

/// Single-language projection: requested language, else the default
/// language, else the first available row.
fn pick_name(names: &[CategoryName], language: &str) -> Option<String> {
    names
        .iter()
        .find(|n| n.language == language)
        .or_else(|| names.iter().find(|n| n.language == DEFAULT_LANGUAGE))
        .or_else(|| names.first())
        .map(|n| n.name.clone())
}

fn category_from_row(row: &sqlx::postgres::PgRow) -> Category {
    Category {
        id: row.get("id"),
        bindable: row.get("bindable"),
        name: row.get("name"),
        parent_id: row.get("parent_id"),
        created_at_utc: row.get("created_at_utc"),
        updated_at_utc: row.get("updated_at_utc"),
        deleted_at: row.get("deleted_at"),
    }
}

async fn upsert_name_rows(
    tx: &mut Transaction<'_, Postgres>,
    category_id: Uuid,
    rows: &[(String, String)],
) -> Result<()> {
    for (language, name) in rows {
        sqlx::query(
            "INSERT INTO category_name (category_id, language, name)
             VALUES ($1, $2, $3)
             ON CONFLICT (category_id, language) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(category_id)
        .bind(language)
        .bind(name)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
    }
    Ok(())
}

#[async_trait]
impl CategoryRepository for PgCategoryRepository {
    async fn create(&self, req: CreateCategoryRequest) -> Result<CategoryView> {
        let plan = plan_name_rows(
            &self.config,
            req.name.as_deref(),
            req.multi_language_names.as_ref(),
        )?;
        let parent_ids = self
            .resolve_parent_ids(req.parent_ids.as_deref().unwrap_or(&[]))
            .await?;

        let id = new_v7();
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let written = self
            .insert_category_tx(&mut tx, id, req.bindable, &plan.flat, &parent_ids, &plan.rows, now)
            .await;
        match written {
            Ok(()) => tx
                .commit()
                .await
                .map_err(|e| self.sanitize_write_error("create", Error::Database(e)))?,
            Err(e) => {
                tx.rollback().await.ok();
                return Err(self.sanitize_write_error("create", e));
            }
        }

        debug!(
            subsystem = "db",
            component = "category_repo",
            op = "create",
            category_id = %id,
            "category created"
        );

        let names = plan
            .rows
            .into_iter()
            .map(|(language, name)| CategoryName {
                category_id: id,
                language,
                name,
            })
            .collect();
        Ok(CategoryView {
            id,
            bindable: req.bindable,
            name: plan.flat,
            names,
            parent_ids,
            children: Vec::new(),
            created_at_utc: now,
            updated_at_utc: now,
        })
    }

    async fn update(&self, id: Uuid, req: UpdateCategoryRequest) -> Result<CategoryView> {
        let existing = sqlx::query_as::<_, Category>(
            "SELECT id, bindable, name, parent_id, created_at_utc, updated_at_utc, deleted_at
             FROM category WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::CategoryNotFound(id))?;

        let existing_names = self.load_names(&[id]).await?;
        let name_rows = plan_name_update(
            &self.config,
            &existing_names,
            req.name.as_deref(),
            req.multi_language_names.as_ref(),
        )?;

        let replace_parents = req.parent_ids.is_some();
        let prospective_parents = match req.parent_ids.as_deref() {
            Some(ids) => self.resolve_parent_ids(ids).await?,
            None => self.current_parent_ids(id).await?,
        };

        // Read-only; runs just before the transaction.
        check_circular(
            &self.ancestors,
            self.config.allow_circular_categories,
            id,
            &prospective_parents,
        )
        .await?;

        let bindable = req.bindable.unwrap_or(existing.bindable);
        let flat_name = if self.config.multiple_language_mode {
            existing.name
        } else {
            req.name.clone().or(existing.name)
        };
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let written = self
            .apply_update_tx(
                &mut tx,
                id,
                bindable,
                &flat_name,
                replace_parents,
                &prospective_parents,
                &name_rows,
                now,
            )
            .await;
        match written {
            Ok(()) => tx
                .commit()
                .await
                .map_err(|e| self.sanitize_write_error("update", Error::Database(e)))?,
            Err(e) => {
                tx.rollback().await.ok();
                return Err(self.sanitize_write_error("update", e));
            }
        }

        debug!(
            subsystem = "db",
            component = "category_repo",
            op = "update",
            category_id = %id,
            "category updated"
        );

        self.find_by_id(id, None).await
    }

    async fn archive(&self, id: Uuid) -> Result<()> {
        let existing = sqlx::query("SELECT id FROM category WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        if existing.is_none() {
            return Err(Error::CategoryNotFound(id));
        }

        // No cascading archive of children; that is the caller's policy.
        let now = Utc::now();
        sqlx::query("UPDATE category SET deleted_at = $2, updated_at_utc = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn find_all(&self, filter: CategoryFilter) -> Result<Vec<CategoryView>> {
        let limit = clamp_limit(filter.limit);
        let offset = filter.offset.unwrap_or(0).max(0);
        let sort = filter.sort.unwrap_or_default();

        let mut clauses = vec!["c.deleted_at IS NULL".to_string()];
        let mut params: Vec<QueryParam> = Vec::new();
        let mut param_idx = 0;

        if let Some(ref ids) = filter.ids {
            param_idx += 1;
            clauses.push(format!("c.id = ANY(${}::uuid[])", param_idx));
            params.push(QueryParam::UuidArray(ids.clone()));
        }

        if filter.from_top {
            if self.config.allow_multiple_parent_categories {
                clauses.push(
                    "NOT EXISTS (SELECT 1 FROM category_parent cp \
                     JOIN category p ON p.id = cp.parent_id AND p.deleted_at IS NULL \
                     WHERE cp.category_id = c.id)"
                        .to_string(),
                );
            } else {
                clauses.push(
                    "(c.parent_id IS NULL OR NOT EXISTS \
                     (SELECT 1 FROM category p WHERE p.id = c.parent_id AND p.deleted_at IS NULL))"
                        .to_string(),
                );
            }
        }

        if let Some(ref parent_ids) = filter.parent_ids {
            param_idx += 1;
            if self.config.allow_multiple_parent_categories {
                clauses.push(format!(
                    "EXISTS (SELECT 1 FROM category_parent cp \
                     JOIN category p ON p.id = cp.parent_id AND p.deleted_at IS NULL \
                     WHERE cp.category_id = c.id AND cp.parent_id = ANY(${}::uuid[]))",
                    param_idx
                ));
            } else {
                clauses.push(format!("c.parent_id = ANY(${}::uuid[])", param_idx));
            }
            params.push(QueryParam::UuidArray(parent_ids.clone()));
        }

        let order_clause = match sort {
            CategorySort::CreatedAtAsc => "c.created_at_utc ASC",
            CategorySort::CreatedAtDesc => "c.created_at_utc DESC",
        };

        let sql = format!(
            "SELECT c.id, c.bindable, c.name, c.parent_id,
                    c.created_at_utc, c.updated_at_utc, c.deleted_at
             FROM category c
             WHERE {}
             ORDER BY {}
             LIMIT ${} OFFSET ${}",
            clauses.join(" AND "),
            order_clause,
            param_idx + 1,
            param_idx + 2
        );
        params.push(QueryParam::BigInt(limit));
        params.push(QueryParam::BigInt(offset));

        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        let categories: Vec<Category> = rows.iter().map(category_from_row).collect();

        let page_ids: Vec<Uuid> = categories.iter().map(|c| c.id).collect();
        let mut children = self.load_children(&page_ids).await?;
        let parent_map = self.load_parent_ids(&page_ids).await?;

        let child_ids: Vec<Uuid> = children
            .values()
            .flat_map(|list| list.iter().map(|c| c.id))
            .collect();
        let mut name_scope = page_ids.clone();
        name_scope.extend(child_ids);
        let names = self.load_names(&name_scope).await?;

        let language = filter.language.as_deref();
        let views = categories
            .iter()
            .map(|category| {
                // Children carry no further recursion; one level is
                // projected with the same language rules.
                let child_views: Vec<CategoryView> = children
                    .remove(&category.id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|child| {
                        self.project(language, &child, &names, vec![category.id], Vec::new())
                    })
                    .collect();
                self.project(
                    language,
                    category,
                    &names,
                    parent_map.get(&category.id).cloned().unwrap_or_default(),
                    child_views,
                )
            })
            .collect();
        Ok(views)
    }

    async fn find_by_id(&self, id: Uuid, language: Option<&str>) -> Result<CategoryView> {
        let mut views = self
            .find_all(CategoryFilter {
                ids: Some(vec![id]),
                language: language.map(|l| l.to_string()),
                limit: Some(1),
                ..Default::default()
            })
            .await?;
        if views.is_empty() {
            return Err(Error::CategoryNotFound(id));
        }
        Ok(views.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ml_config() -> CmsConfig {
        CmsConfig {
            multiple_language_mode: true,
            ..Default::default()
        }
    }

    fn name_row(category_id: Uuid, language: &str, name: &str) -> CategoryName {
        CategoryName {
            category_id,
            language: language.to_string(),
            name: name.to_string(),
        }
    }

    /// In-memory ancestor loader over a fixed parent map.
    fn graph_loader(edges: Vec<(Uuid, Vec<Uuid>)>) -> AncestorLoader {
        let graph: HashMap<Uuid, Vec<Uuid>> = edges.into_iter().collect();
        let batch_fn: BatchFn<Uuid, Vec<Uuid>> = Arc::new(move |keys| {
            let graph = graph.clone();
            Box::pin(async move {
                Ok(keys
                    .into_iter()
                    .filter_map(|k| graph.get(&k).map(|parents| (k, parents.clone())))
                    .collect())
            })
        });
        KeyedBatchCache::new(CachePolicy::default(), Vec::new(), batch_fn)
    }

    #[test]
    fn test_clamp_limit_caps_at_max_page_size() {
        assert_eq!(clamp_limit(Some(1000)), 100);
        assert_eq!(clamp_limit(Some(10)), 10);
        assert_eq!(clamp_limit(None), 50);
    }

    #[test]
    fn test_plan_name_rows_flat_mode() {
        let config = CmsConfig::default();
        let plan = plan_name_rows(&config, Some("News"), None).unwrap();
        assert_eq!(plan.flat.as_deref(), Some("News"));
        assert!(plan.rows.is_empty());
    }

    #[test]
    fn test_plan_name_rows_rejects_translations_without_mode() {
        let config = CmsConfig::default();
        let translations = HashMap::from([("en".to_string(), "News".to_string())]);
        let err = plan_name_rows(&config, None, Some(&translations));
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_plan_name_rows_synthesizes_default_language() {
        let plan = plan_name_rows(&ml_config(), Some("News"), None).unwrap();
        assert_eq!(plan.flat, None);
        assert_eq!(
            plan.rows,
            vec![(DEFAULT_LANGUAGE.to_string(), "News".to_string())]
        );
    }

    #[test]
    fn test_plan_name_rows_fans_out_translations() {
        let translations = HashMap::from([
            ("en".to_string(), "News".to_string()),
            ("ko".to_string(), "뉴스".to_string()),
        ]);
        let plan = plan_name_rows(&ml_config(), None, Some(&translations)).unwrap();
        assert_eq!(plan.rows.len(), 2);
        assert_eq!(plan.rows[0].0, "en");
        assert_eq!(plan.rows[1].0, "ko");
    }

    #[test]
    fn test_plan_name_rows_requires_some_name() {
        assert!(matches!(
            plan_name_rows(&ml_config(), None, None),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            plan_name_rows(&CmsConfig::default(), None, None),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_plan_name_update_merges_instead_of_replacing() {
        let id = Uuid::new_v4();
        let existing = vec![
            name_row(id, "en", "News"),
            name_row(id, "ko", "뉴스"),
            name_row(id, "ja", "ニュース"),
        ];
        // "ja" is missing from the incoming map and must stay untouched;
        // "en" is unchanged and needs no write; "ko" changes.
        let translations = HashMap::from([
            ("en".to_string(), "News".to_string()),
            ("ko".to_string(), "새 뉴스".to_string()),
            ("fr".to_string(), "Nouvelles".to_string()),
        ]);
        let rows =
            plan_name_update(&ml_config(), &existing, None, Some(&translations)).unwrap();
        assert_eq!(
            rows,
            vec![
                ("fr".to_string(), "Nouvelles".to_string()),
                ("ko".to_string(), "새 뉴스".to_string()),
            ]
        );
    }

    #[test]
    fn test_plan_name_update_synthesizes_default_from_flat_name() {
        let id = Uuid::new_v4();
        let existing = vec![name_row(id, "en", "Old")];
        let rows = plan_name_update(&ml_config(), &existing, Some("New"), None).unwrap();
        assert_eq!(rows, vec![(DEFAULT_LANGUAGE.to_string(), "New".to_string())]);
    }

    #[test]
    fn test_plan_name_update_nothing_to_do() {
        let rows = plan_name_update(&ml_config(), &[], None, None).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_validate_parent_arity() {
        let single = CmsConfig::default();
        let multi = CmsConfig {
            allow_multiple_parent_categories: true,
            ..Default::default()
        };
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];

        assert!(matches!(
            validate_parent_arity(&single, &ids),
            Err(Error::MultipleParentCategoryNotAllowed)
        ));
        assert!(validate_parent_arity(&multi, &ids).is_ok());
        assert!(validate_parent_arity(&single, &ids[..1]).is_ok());
    }

    #[test]
    fn test_pick_name_fallback_chain() {
        let id = Uuid::new_v4();
        let names = vec![name_row(id, "en", "News"), name_row(id, "ko", "뉴스")];
        assert_eq!(pick_name(&names, "ko").as_deref(), Some("뉴스"));
        // Unknown language falls back to the default language.
        assert_eq!(pick_name(&names, "de").as_deref(), Some("News"));

        let no_default = vec![name_row(id, "ko", "뉴스")];
        // No default row either; first available wins.
        assert_eq!(pick_name(&no_default, "de").as_deref(), Some("뉴스"));
        assert_eq!(pick_name(&[], "de"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_detected_through_ancestor_chain() {
        // a -> b -> c (parent direction: a's parent is b, b's parent is c)
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let loader = graph_loader(vec![(a, vec![b]), (b, vec![c])]);

        // Attaching c under a-reachable ancestry: making a a parent of c
        // puts c's prospective ancestors at {a, b, c} -> cycle.
        let err = check_circular(&loader, false, c, &[a]).await;
        assert!(matches!(err, Err(Error::CircularCategoryNotAllowed(id)) if id == c));
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_self_parent_is_a_cycle() {
        let a = Uuid::new_v4();
        let loader = graph_loader(vec![]);
        let err = check_circular(&loader, false, a, &[a]).await;
        assert!(matches!(err, Err(Error::CircularCategoryNotAllowed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_parent_passes() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let loader = graph_loader(vec![(a, vec![b])]);
        assert!(check_circular(&loader, false, c, &[a]).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_circular_skips_check_entirely() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let loader = graph_loader(vec![(a, vec![b])]);
        assert!(check_circular(&loader, true, b, &[a]).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_walk_terminates_on_pre_existing_cycle() {
        // The stored graph already contains a -> b -> a.
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let loader = graph_loader(vec![(a, vec![b]), (b, vec![a])]);

        let reachable = reachable_ancestor_ids(&loader, &[a]).await.unwrap();
        assert_eq!(reachable, HashSet::from([a, b]));

        // Unrelated category can still be checked against the cyclic graph.
        assert!(check_circular(&loader, false, c, &[a]).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reachable_set_includes_start() {
        let a = Uuid::new_v4();
        let loader = graph_loader(vec![]);
        let reachable = reachable_ancestor_ids(&loader, &[a]).await.unwrap();
        assert_eq!(reachable, HashSet::from([a]));
    }
}
