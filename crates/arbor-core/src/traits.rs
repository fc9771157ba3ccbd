//! Core traits for arbor abstractions.
//!
//! These traits define the interfaces that concrete implementations must
//! satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// CATEGORY REPOSITORY
// =============================================================================

/// Repository for category hierarchy management.
#[async_trait]
pub trait CategoryRepository: Send + Sync {
    /// Create a category, resolving parents per the configured arity mode.
    async fn create(&self, req: CreateCategoryRequest) -> Result<CategoryView>;

    /// Update a category; name reconciliation is a merge, and the
    /// prospective parent set is cycle-checked before commit.
    async fn update(&self, id: Uuid, req: UpdateCategoryRequest) -> Result<CategoryView>;

    /// Soft-delete a category. Children are not cascaded.
    async fn archive(&self, id: Uuid) -> Result<()>;

    /// List categories with filtering, paging, and language projection.
    async fn find_all(&self, filter: CategoryFilter) -> Result<Vec<CategoryView>>;

    /// Fetch one category; `CategoryNotFound` when absent.
    async fn find_by_id(&self, id: Uuid, language: Option<&str>) -> Result<CategoryView>;
}

// =============================================================================
// ARTICLE VERSION REPOSITORY
// =============================================================================

/// Batched read access to versions, signatures, and category bindings.
#[async_trait]
pub trait ArticleVersionRepository: Send + Sync {
    /// Fetch versions with their non-deleted signatures for a set of
    /// `(article_id, version)` pairs in one query.
    async fn fetch_many(
        &self,
        pairs: &[(Uuid, i32)],
    ) -> Result<HashMap<(Uuid, i32), VersionWithSignatures>>;

    /// Fetch the categories bound to each article in one query. Articles
    /// with no categories are absent from the map.
    async fn categories_for_articles(
        &self,
        article_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<Category>>>;
}
