//! Batched stage and category loaders.
//!
//! Thin configurations of [`KeyedBatchCache`] over the version
//! repository, intended to be constructed once per request scope so list
//! resolvers collapse their per-row lookups into one query per tick.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use arbor_core::{
    derive_stage, ArticleStage, ArticleVersionRepository, Category, Result,
    SignatureApprovalGate, VersionWithSignatures,
};

use crate::batch::{BatchFn, CachePolicy, KeyedBatchCache, VersionKey};

/// Resolves article stages through a batched, memoized fetch.
#[derive(Clone)]
pub struct ArticleStageLoader {
    gate: SignatureApprovalGate,
    cache: KeyedBatchCache<VersionKey, Option<VersionWithSignatures>>,
}

impl ArticleStageLoader {
    pub fn new(
        repo: Arc<dyn ArticleVersionRepository>,
        gate: SignatureApprovalGate,
        policy: CachePolicy,
    ) -> Self {
        let batch_fn: BatchFn<VersionKey, Option<VersionWithSignatures>> =
            Arc::new(move |keys| {
                let repo = Arc::clone(&repo);
                Box::pin(async move {
                    let pairs: Vec<(Uuid, i32)> =
                        keys.iter().map(|k| (k.article_id, k.version)).collect();
                    let found = repo.fetch_many(&pairs).await?;
                    let mut out = HashMap::with_capacity(keys.len());
                    for key in keys {
                        if let Some(vws) = found.get(&(key.article_id, key.version)) {
                            out.insert(key, Some(vws.clone()));
                        }
                    }
                    Ok(out)
                })
            });
        Self {
            gate,
            // Misses stay None so absent pairs resolve to UNKNOWN.
            cache: KeyedBatchCache::new(policy, None, batch_fn),
        }
    }

    /// Fetch one version with its signatures, None when absent.
    pub async fn load_version(
        &self,
        article_id: Uuid,
        version: i32,
    ) -> Result<Option<VersionWithSignatures>> {
        self.cache.load(VersionKey::new(article_id, version)).await
    }

    /// Derive the stage of one `(article_id, version)` pair.
    pub async fn resolve(&self, article_id: Uuid, version: i32) -> Result<ArticleStage> {
        let found = self.load_version(article_id, version).await?;
        Ok(derive_stage(&self.gate, found.as_ref(), Utc::now()))
    }

    /// Derive stages for many pairs, preserving input order.
    pub async fn resolve_many(&self, pairs: &[(Uuid, i32)]) -> Result<Vec<ArticleStage>> {
        let keys: Vec<VersionKey> = pairs
            .iter()
            .map(|(id, version)| VersionKey::new(*id, *version))
            .collect();
        let found = self.cache.load_many(keys).await?;
        let now = Utc::now();
        Ok(found
            .iter()
            .map(|vws| derive_stage(&self.gate, vws.as_ref(), now))
            .collect())
    }
}

/// Resolves `article_id -> Vec<Category>` for list rendering, defaulting
/// to an empty list for articles with no categories.
#[derive(Clone)]
pub struct ArticleCategoryLoader {
    cache: KeyedBatchCache<Uuid, Vec<Category>>,
}

impl ArticleCategoryLoader {
    pub fn new(repo: Arc<dyn ArticleVersionRepository>, policy: CachePolicy) -> Self {
        let batch_fn: BatchFn<Uuid, Vec<Category>> = Arc::new(move |keys| {
            let repo = Arc::clone(&repo);
            Box::pin(async move { repo.categories_for_articles(&keys).await })
        });
        Self {
            cache: KeyedBatchCache::new(policy, Vec::new(), batch_fn),
        }
    }

    pub async fn load(&self, article_id: Uuid) -> Result<Vec<Category>> {
        self.cache.load(article_id).await
    }

    pub async fn load_many(&self, article_ids: Vec<Uuid>) -> Result<Vec<Vec<Category>>> {
        self.cache.load_many(article_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{
        ArticleSignature, ArticleVersion, CmsConfig, SignatureLevel, SignatureResult,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory version store for exercising the loaders without a
    /// database.
    struct MemoryVersionRepo {
        versions: Vec<VersionWithSignatures>,
        categories: HashMap<Uuid, Vec<Category>>,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ArticleVersionRepository for MemoryVersionRepo {
        async fn fetch_many(
            &self,
            pairs: &[(Uuid, i32)],
        ) -> Result<HashMap<(Uuid, i32), VersionWithSignatures>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut out = HashMap::new();
            for vws in &self.versions {
                let key = (vws.version.article_id, vws.version.version);
                if pairs.contains(&key) {
                    // Backing store keeps only non-deleted signatures.
                    let mut vws = vws.clone();
                    vws.signatures.retain(|s| s.deleted_at.is_none());
                    out.insert(key, vws);
                }
            }
            Ok(out)
        }

        async fn categories_for_articles(
            &self,
            article_ids: &[Uuid],
        ) -> Result<HashMap<Uuid, Vec<Category>>> {
            Ok(self
                .categories
                .iter()
                .filter(|(id, _)| article_ids.contains(id))
                .map(|(id, cats)| (*id, cats.clone()))
                .collect())
        }
    }

    fn two_level_config() -> (CmsConfig, Uuid, Uuid) {
        let l1 = SignatureLevel {
            id: Uuid::new_v4(),
            name: "L1".to_string(),
            sequence: 1,
            required: true,
        };
        let l2 = SignatureLevel {
            id: Uuid::new_v4(),
            name: "L2".to_string(),
            sequence: 2,
            required: true,
        };
        let (l1_id, l2_id) = (l1.id, l2.id);
        let config = CmsConfig {
            signature_mode: true,
            signature_levels: vec![l1, l2],
            ..Default::default()
        };
        (config, l1_id, l2_id)
    }

    fn submitted_version(article_id: Uuid) -> ArticleVersion {
        let now = Utc::now();
        ArticleVersion {
            article_id,
            version: 1,
            submitted_at: Some(now - Duration::hours(1)),
            released_at: None,
            deleted_at: None,
            tags: vec![],
            created_at_utc: now - Duration::hours(2),
        }
    }

    fn signature(
        version: &ArticleVersion,
        level_id: Uuid,
        deleted_at: Option<DateTime<Utc>>,
    ) -> ArticleSignature {
        ArticleSignature {
            id: Uuid::new_v4(),
            article_id: version.article_id,
            version: version.version,
            signature_level_id: Some(level_id),
            result: SignatureResult::Approved,
            signed_at: Utc::now(),
            deleted_at,
        }
    }

    fn loader_over(
        repo: MemoryVersionRepo,
        config: &CmsConfig,
    ) -> (ArticleStageLoader, Arc<MemoryVersionRepo>) {
        let repo = Arc::new(repo);
        let loader = ArticleStageLoader::new(
            Arc::clone(&repo) as Arc<dyn ArticleVersionRepository>,
            SignatureApprovalGate::new(config),
            CachePolicy::default(),
        );
        (loader, repo)
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_level_approval_resolves_verified() {
        let (config, _l1, l2) = two_level_config();
        let article_id = Uuid::new_v4();
        let version = submitted_version(article_id);
        let signatures = vec![signature(&version, l2, None)];
        let repo = MemoryVersionRepo {
            versions: vec![VersionWithSignatures {
                version,
                signatures,
            }],
            categories: HashMap::new(),
            fetches: AtomicUsize::new(0),
        };
        let (loader, _) = loader_over(repo, &config);

        assert_eq!(
            loader.resolve(article_id, 1).await.unwrap(),
            ArticleStage::Verified
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdrawn_final_approval_resolves_reviewing() {
        let (config, _l1, l2) = two_level_config();
        let article_id = Uuid::new_v4();
        let version = submitted_version(article_id);
        let signatures = vec![signature(&version, l2, Some(Utc::now()))];
        let repo = MemoryVersionRepo {
            versions: vec![VersionWithSignatures {
                version,
                signatures,
            }],
            categories: HashMap::new(),
            fetches: AtomicUsize::new(0),
        };
        let (loader, _) = loader_over(repo, &config);

        assert_eq!(
            loader.resolve(article_id, 1).await.unwrap(),
            ArticleStage::Reviewing
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_pair_never_throws() {
        let (config, _, _) = two_level_config();
        let repo = MemoryVersionRepo {
            versions: vec![],
            categories: HashMap::new(),
            fetches: AtomicUsize::new(0),
        };
        let (loader, _) = loader_over(repo, &config);

        assert_eq!(
            loader.resolve(Uuid::new_v4(), 9).await.unwrap(),
            ArticleStage::Unknown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_many_is_one_fetch_in_input_order() {
        let (config, _l1, l2) = two_level_config();
        let verified_id = Uuid::new_v4();
        let draft_id = Uuid::new_v4();
        let missing_id = Uuid::new_v4();

        let verified = submitted_version(verified_id);
        let verified_sigs = vec![signature(&verified, l2, None)];
        let mut draft = submitted_version(draft_id);
        draft.submitted_at = None;

        let repo = MemoryVersionRepo {
            versions: vec![
                VersionWithSignatures {
                    version: verified,
                    signatures: verified_sigs,
                },
                VersionWithSignatures {
                    version: draft,
                    signatures: vec![],
                },
            ],
            categories: HashMap::new(),
            fetches: AtomicUsize::new(0),
        };
        let (loader, repo) = loader_over(repo, &config);

        let stages = loader
            .resolve_many(&[(verified_id, 1), (missing_id, 1), (draft_id, 1)])
            .await
            .unwrap();
        assert_eq!(
            stages,
            vec![
                ArticleStage::Verified,
                ArticleStage::Unknown,
                ArticleStage::Draft
            ]
        );
        assert_eq!(repo.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_category_loader_defaults_to_empty() {
        let with_categories = Uuid::new_v4();
        let without = Uuid::new_v4();
        let category = Category {
            id: Uuid::new_v4(),
            bindable: true,
            name: Some("news".to_string()),
            parent_id: None,
            created_at_utc: Utc::now(),
            updated_at_utc: Utc::now(),
            deleted_at: None,
        };
        let repo = Arc::new(MemoryVersionRepo {
            versions: vec![],
            categories: HashMap::from([(with_categories, vec![category.clone()])]),
            fetches: AtomicUsize::new(0),
        });
        let loader = ArticleCategoryLoader::new(
            repo as Arc<dyn ArticleVersionRepository>,
            CachePolicy::default(),
        );

        let results = loader
            .load_many(vec![with_categories, without])
            .await
            .unwrap();
        assert_eq!(results[0].len(), 1);
        assert_eq!(results[0][0].id, category.id);
        assert!(results[1].is_empty());
    }
}
