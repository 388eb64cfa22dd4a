use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use stateset_catalog::{
    cache::QueryCacheConfig,
    errors::ServiceError,
    filters::{FilterState, PriceRange, QueryKey},
    models::{Product, ProductFormData, ProductId, ProductPatch},
    repositories::{DocumentProductRepository, InMemoryDocumentBackend, ProductRepository},
    services::ProductCatalog,
};

/// Document store that counts listing reads and answers slowly, so
/// overlapping requests really overlap.
struct SlowCountingRepository {
    inner: DocumentProductRepository,
    list_calls: AtomicUsize,
}

impl SlowCountingRepository {
    fn new() -> Self {
        Self {
            inner: DocumentProductRepository::new(Arc::new(InMemoryDocumentBackend::new())),
            list_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProductRepository for SlowCountingRepository {
    async fn list(&self) -> Result<Vec<Product>, ServiceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        // read first, answer late: the result reflects the store at call time
        let products = self.inner.list().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        products
    }

    async fn list_by_category(&self, category: &str) -> Result<Vec<Product>, ServiceError> {
        self.inner.list_by_category(category).await
    }

    async fn list_by_price_range(
        &self,
        min: Decimal,
        max: Decimal,
    ) -> Result<Vec<Product>, ServiceError> {
        self.inner.list_by_price_range(min, max).await
    }

    async fn get_by_id(&self, id: ProductId) -> Result<Product, ServiceError> {
        self.inner.get_by_id(id).await
    }

    async fn create(&self, data: ProductFormData) -> Result<ProductId, ServiceError> {
        self.inner.create(data).await
    }

    async fn update(&self, id: ProductId, patch: ProductPatch) -> Result<(), ServiceError> {
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: ProductId) -> Result<(), ServiceError> {
        self.inner.delete(id).await
    }
}

fn memory_catalog() -> ProductCatalog {
    let backend = Arc::new(InMemoryDocumentBackend::new());
    ProductCatalog::new(
        Arc::new(DocumentProductRepository::new(backend)),
        &QueryCacheConfig::default(),
    )
}

fn form(name: &str, price: Decimal, category: &str) -> ProductFormData {
    ProductFormData {
        name: name.to_string(),
        description: format!("{} description", name),
        price,
        image_url: None,
        category: category.to_string(),
    }
}

fn price(min: Decimal, max: Decimal) -> FilterState {
    FilterState::Price(PriceRange::new(min, max, ""))
}

#[tokio::test]
async fn mug_moves_between_price_listings_after_update() {
    let catalog = memory_catalog();
    catalog
        .create(form("Lamp", dec!(30), "Home"))
        .await
        .expect("create lamp");

    // warm every cache the update must invalidate
    assert_eq!(catalog.list(&FilterState::None).await.unwrap().len(), 1);
    assert!(catalog
        .list(&price(dec!(10), dec!(20)))
        .await
        .unwrap()
        .is_empty());

    let mug = catalog
        .create(form("Mug", dec!(9.5), "Home"))
        .await
        .expect("create mug");

    let all = catalog.list(&FilterState::None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, mug, "newest product lists first");

    let home = catalog
        .list(&FilterState::Category("Home".into()))
        .await
        .unwrap();
    assert_eq!(home.len(), 2);

    catalog
        .update(
            mug,
            ProductPatch {
                price: Some(dec!(12.0)),
                ..Default::default()
            },
        )
        .await
        .expect("update mug price");

    let in_range = catalog.list(&price(dec!(10), dec!(20))).await.unwrap();
    assert!(in_range.iter().any(|p| p.id == mug));
    let cheap = catalog.list(&price(dec!(0), dec!(9))).await.unwrap();
    assert!(cheap.iter().all(|p| p.id != mug));

    let detail = catalog.product(mug).await.unwrap();
    assert_eq!(detail.price, dec!(12));
    assert!(detail.updated_at > detail.created_at);
}

#[tokio::test]
async fn deleted_products_leave_listings_and_details() {
    let catalog = memory_catalog();
    let id = catalog
        .create(form("Poster", dec!(15), "Art"))
        .await
        .unwrap();
    assert_eq!(catalog.product(id).await.unwrap().name, "Poster");
    assert_eq!(
        catalog
            .list(&FilterState::Category("Art".into()))
            .await
            .unwrap()
            .len(),
        1
    );

    catalog.delete(id).await.unwrap();

    assert!(catalog
        .list(&FilterState::Category("Art".into()))
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        catalog.product(id).await,
        Err(ServiceError::NotFound(_))
    ));
    // deleting again is not an error
    catalog.delete(id).await.unwrap();
}

#[tokio::test]
async fn concurrent_reads_of_one_key_share_a_single_store_call() {
    let repository = Arc::new(SlowCountingRepository::new());
    let catalog = ProductCatalog::new(repository.clone(), &QueryCacheConfig::default());

    let reads = (0..8).map(|_| {
        let catalog = catalog.clone();
        tokio::spawn(async move { catalog.list(&FilterState::None).await })
    });
    for read in futures::future::join_all(reads).await {
        assert!(read.unwrap().unwrap().is_empty());
    }

    assert_eq!(repository.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn a_read_after_create_sees_the_new_product_despite_a_pending_listing() {
    let repository = Arc::new(SlowCountingRepository::new());
    let catalog = ProductCatalog::new(repository.clone(), &QueryCacheConfig::default());

    let pending = {
        let catalog = catalog.clone();
        tokio::spawn(async move { catalog.list(&FilterState::None).await })
    };
    while !catalog.listings().is_fetching(&QueryKey::Products) {
        tokio::task::yield_now().await;
    }

    catalog
        .create(form("Mug", dec!(9.5), "Home"))
        .await
        .expect("create mug");
    let listing = catalog.list(&FilterState::None).await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "Mug");
    assert_eq!(repository.list_calls.load(Ordering::SeqCst), 2);

    // the pending read finishes on its own and leaves the newer listing alone
    pending.await.unwrap().unwrap();
    assert_eq!(catalog.list(&FilterState::None).await.unwrap().len(), 1);
    assert_eq!(repository.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalid_products_are_rejected_before_the_store() {
    let repository = Arc::new(SlowCountingRepository::new());
    let catalog = ProductCatalog::new(repository.clone(), &QueryCacheConfig::default());

    let result = catalog.create(form("", dec!(-1), "Home")).await;
    assert!(matches!(result, Err(ServiceError::ValidationError(_))));

    let all = catalog.list(&FilterState::None).await.unwrap();
    assert!(all.is_empty());
}
