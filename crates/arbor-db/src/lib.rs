//! # arbor-db
//!
//! PostgreSQL persistence layer for the arbor CMS engine.
//!
//! This crate provides:
//! - Connection pool management
//! - The generic keyed batch cache used by every loader
//! - Repository implementations for versions, signatures, and categories
//! - Request-scoped stage/category loaders
//! - The article listing filter query builder
//!
//! ## Example
//!
//! ```rust,ignore
//! use arbor_core::CmsConfig;
//! use arbor_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/arbor", CmsConfig::default()).await?;
//!
//!     let loaders = db.loaders();
//!     let stage = loaders.stages.resolve(article_id, 3).await?;
//!     println!("stage: {:?}", stage);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod categories;
pub mod filter;
pub mod pool;
pub mod stage;
pub mod versions;

use std::sync::Arc;

// Re-export core types
pub use arbor_core::*;

// Re-export repository implementations and primitives
pub use batch::{BatchFn, CachePolicy, KeyedBatchCache, VersionKey};
pub use categories::{check_circular, reachable_ancestor_ids, PgCategoryRepository};
pub use filter::{bind_params, ArticleFilterQueryBuilder, QueryParam};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use stage::{ArticleCategoryLoader, ArticleStageLoader};
pub use versions::PgArticleVersionRepository;

/// Request-scoped loader set. Construct one per request so batching and
/// memoization stay scoped to that request's resolution pass.
pub struct CmsLoaders {
    /// Stage resolution over `(article_id, version)` pairs.
    pub stages: ArticleStageLoader,
    /// Categories bound to an article.
    pub categories: ArticleCategoryLoader,
}

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Resolved mode configuration.
    pub config: CmsConfig,
    /// Version/signature repository for batched reads.
    pub versions: Arc<PgArticleVersionRepository>,
    /// Category repository for hierarchy management.
    pub categories: PgCategoryRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>, config: CmsConfig) -> Self {
        Self {
            versions: Arc::new(PgArticleVersionRepository::new(pool.clone())),
            categories: PgCategoryRepository::new(pool.clone(), config.clone()),
            config,
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str, config: CmsConfig) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool, config))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(
        url: &str,
        pool_config: PoolConfig,
        config: CmsConfig,
    ) -> Result<Self> {
        let pool = create_pool_with_config(url, pool_config).await?;
        Ok(Self::new(pool, config))
    }

    /// Build a request-scoped loader set.
    pub fn loaders(&self) -> CmsLoaders {
        let gate = SignatureApprovalGate::new(&self.config);
        let repo: Arc<dyn ArticleVersionRepository> = self.versions.clone();
        CmsLoaders {
            stages: ArticleStageLoader::new(Arc::clone(&repo), gate, CachePolicy::default()),
            categories: ArticleCategoryLoader::new(repo, CachePolicy::default()),
        }
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
