//! Product catalog service.
//!
//! Reads go through the query caches; mutations go straight to the
//! repository and then invalidate every listing (plus the product's detail
//! entry for updates and deletes).

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info, instrument};
use validator::Validate;

use crate::cache::{KeyWatch, QueryCache, QueryCacheConfig, QueryState};
use crate::errors::ServiceError;
use crate::filters::{select_query, FilterState, QueryKey};
use crate::models::product::{Product, ProductFormData, ProductId, ProductPatch};
use crate::repositories::ProductRepository;
use crate::search::{refine, sort_products, SortOption};

type Fetch<V> = BoxFuture<'static, Result<V, ServiceError>>;

/// Entry point for everything the screens and the HTTP API do with products.
#[derive(Clone)]
pub struct ProductCatalog {
    repository: Arc<dyn ProductRepository>,
    listings: QueryCache<Vec<Product>>,
    details: QueryCache<Product>,
}

impl std::fmt::Debug for ProductCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductCatalog")
            .field("listings", &self.listings)
            .field("details", &self.details)
            .finish_non_exhaustive()
    }
}

impl ProductCatalog {
    pub fn new(repository: Arc<dyn ProductRepository>, config: &QueryCacheConfig) -> Self {
        Self::with_caches(repository, QueryCache::new(config), QueryCache::new(config))
    }

    /// Builds a catalog over caches created elsewhere, e.g. shared with
    /// another catalog or observed by a test.
    pub fn with_caches(
        repository: Arc<dyn ProductRepository>,
        listings: QueryCache<Vec<Product>>,
        details: QueryCache<Product>,
    ) -> Self {
        Self {
            repository,
            listings,
            details,
        }
    }

    pub fn listings(&self) -> &QueryCache<Vec<Product>> {
        &self.listings
    }

    pub fn details(&self) -> &QueryCache<Product> {
        &self.details
    }

    /// Products for the active filter. A filter whose query is disabled
    /// (empty category, unusable price range) yields an empty listing and
    /// never reaches the store.
    #[instrument(skip(self))]
    pub async fn list(&self, filter: &FilterState) -> Result<Arc<Vec<Product>>, ServiceError> {
        let Some(key) = select_query(filter).key else {
            debug!("listing query disabled");
            return Ok(Arc::new(Vec::new()));
        };
        let fetcher = self.listing_fetcher(key.clone());
        let snapshot = self.listings.fetch(key, fetcher).await?;
        Ok(snapshot.data)
    }

    /// Like [`ProductCatalog::list`] but always asks the store.
    #[instrument(skip(self))]
    pub async fn refetch(&self, filter: &FilterState) -> Result<Arc<Vec<Product>>, ServiceError> {
        let Some(key) = select_query(filter).key else {
            return Ok(Arc::new(Vec::new()));
        };
        let fetcher = self.listing_fetcher(key.clone());
        let snapshot = self.listings.refetch(key, fetcher).await?;
        Ok(snapshot.data)
    }

    /// Listing for `filter` narrowed by `query` and ordered by `sort`.
    pub async fn search(
        &self,
        filter: &FilterState,
        query: &str,
        sort: SortOption,
    ) -> Result<Vec<Product>, ServiceError> {
        let listing = self.list(filter).await?;
        let mut products = refine(&listing, query);
        sort_products(&mut products, sort);
        Ok(products)
    }

    #[instrument(skip(self))]
    pub async fn product(&self, id: ProductId) -> Result<Arc<Product>, ServiceError> {
        let snapshot = self
            .details
            .fetch(QueryKey::ProductDetail(id), self.detail_fetcher(id))
            .await?;
        Ok(snapshot.data)
    }

    #[instrument(skip(self))]
    pub async fn refetch_product(&self, id: ProductId) -> Result<Arc<Product>, ServiceError> {
        let snapshot = self
            .details
            .refetch(QueryKey::ProductDetail(id), self.detail_fetcher(id))
            .await?;
        Ok(snapshot.data)
    }

    pub fn listing_state(&self, filter: &FilterState) -> Option<QueryState<Vec<Product>>> {
        select_query(filter)
            .key
            .and_then(|key| self.listings.state(&key))
    }

    pub fn detail_state(&self, id: ProductId) -> Option<QueryState<Product>> {
        self.details.state(&QueryKey::ProductDetail(id))
    }

    /// Change notifications for `key`, from whichever cache holds it.
    pub fn watch(&self, key: QueryKey) -> KeyWatch {
        if key.is_listing() {
            self.listings.watch(key)
        } else {
            self.details.watch(key)
        }
    }

    /// Validates and stores a new product.
    #[instrument(skip(self, data), fields(name = %data.name))]
    pub async fn create(&self, data: ProductFormData) -> Result<ProductId, ServiceError> {
        data.validate()?;
        let id = self.repository.create(data).await?;
        self.invalidate_listings();
        info!(product_id = %id, "catalog product created");
        Ok(id)
    }

    /// Applies `patch`. Failures always reach the caller.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: ProductId, patch: ProductPatch) -> Result<(), ServiceError> {
        if patch.is_empty() {
            return Err(ServiceError::InvalidInput("No fields to update".to_string()));
        }
        patch.validate_fields()?;
        self.repository.update(id, patch).await?;
        self.invalidate_product(id);
        info!(product_id = %id, "catalog product updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: ProductId) -> Result<(), ServiceError> {
        self.repository.delete(id).await?;
        self.invalidate_product(id);
        info!(product_id = %id, "catalog product deleted");
        Ok(())
    }

    /// Round trip to the store, bypassing the caches.
    pub async fn check_store(&self) -> Result<(), ServiceError> {
        self.repository.list().await.map(|_| ())
    }

    fn invalidate_listings(&self) -> usize {
        let count = self.listings.invalidate_where(QueryKey::is_listing);
        debug!(count, "listings invalidated");
        count
    }

    fn invalidate_product(&self, id: ProductId) {
        self.invalidate_listings();
        self.details.invalidate_key(&QueryKey::ProductDetail(id));
    }

    fn listing_fetcher(
        &self,
        key: QueryKey,
    ) -> impl Fn() -> Fetch<Vec<Product>> + Send + Sync + 'static {
        let repository = Arc::clone(&self.repository);
        move || {
            let repository = Arc::clone(&repository);
            let key = key.clone();
            async move {
                match key {
                    QueryKey::Products => repository.list().await,
                    QueryKey::ProductsByCategory(category) => {
                        repository.list_by_category(&category).await
                    }
                    QueryKey::ProductsByPrice { min, max } => {
                        repository.list_by_price_range(min, max).await
                    }
                    QueryKey::ProductDetail(_) => Err(ServiceError::InternalError(format!(
                        "{} is not a listing query",
                        key
                    ))),
                }
            }
            .boxed()
        }
    }

    fn detail_fetcher(&self, id: ProductId) -> impl Fn() -> Fetch<Product> + Send + Sync + 'static {
        let repository = Arc::clone(&self.repository);
        move || {
            let repository = Arc::clone(&repository);
            async move { repository.get_by_id(id).await }.boxed()
        }
    }
}
