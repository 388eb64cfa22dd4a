use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::errors::ServiceError;
use crate::models::product::{Product, ProductFormData, ProductId, ProductPatch};

pub mod document;
pub mod document_product_repository;
pub mod sea_orm_product_repository;

pub use document::{DocumentBackend, InMemoryDocumentBackend};
pub use document_product_repository::DocumentProductRepository;
pub use sea_orm_product_repository::SeaOrmProductRepository;

/// URL scheme selecting the process-local document backend.
pub const MEMORY_STORE_URL: &str = "memory://";

/// Access to stored products.
///
/// Implementations never validate input (that is the form's job) and never
/// mutate partially: an operation either fully applies or fails with a
/// [`ServiceError::StoreError`] naming what was attempted.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// All products, most recently updated first.
    async fn list(&self) -> Result<Vec<Product>, ServiceError>;

    /// Products whose category equals `category` exactly, most recently
    /// updated first. An empty category returns nothing without touching
    /// the backend.
    async fn list_by_category(&self, category: &str) -> Result<Vec<Product>, ServiceError>;

    /// Products priced within `[min, max]`, cheapest first.
    async fn list_by_price_range(
        &self,
        min: Decimal,
        max: Decimal,
    ) -> Result<Vec<Product>, ServiceError>;

    /// Fails with [`ServiceError::NotFound`] when no product has `id`.
    async fn get_by_id(&self, id: ProductId) -> Result<Product, ServiceError>;

    /// Stores a new product; the store assigns the id and both timestamps.
    async fn create(&self, data: ProductFormData) -> Result<ProductId, ServiceError>;

    /// Applies the fields present in `patch` and refreshes `updated_at`.
    async fn update(&self, id: ProductId, patch: ProductPatch) -> Result<(), ServiceError>;

    /// Removes the product. Removing an absent id succeeds.
    async fn delete(&self, id: ProductId) -> Result<(), ServiceError>;
}

pub(crate) fn not_found(id: ProductId) -> ServiceError {
    ServiceError::NotFound(format!("Product with ID {} not found", id))
}

pub(crate) fn price_range_context(min: Decimal, max: Decimal) -> String {
    format!("Failed to fetch products in price range ${} - ${}", min, max)
}

/// Issues server-side timestamps.
///
/// Timestamps have microsecond precision and strictly increase, so ordering
/// by `updated_at` never ties within one store.
#[derive(Debug, Default)]
pub struct ServerClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let mut now = Utc::now().trunc_subsecs(6);
        if let Some(previous) = *last {
            if now <= previous {
                now = previous + Duration::microseconds(1);
            }
        }
        *last = Some(now);
        now
    }
}

/// Builds the repository named by `store_url`: [`MEMORY_STORE_URL`] selects
/// the in-memory document backend, anything else is handed to sea-orm.
pub async fn connect(
    store_url: &str,
    max_connections: u32,
) -> Result<Arc<dyn ProductRepository>, ServiceError> {
    if store_url == MEMORY_STORE_URL {
        info!("using in-memory document store");
        let backend = Arc::new(InMemoryDocumentBackend::new());
        return Ok(Arc::new(DocumentProductRepository::new(backend)));
    }

    let repository = SeaOrmProductRepository::connect(store_url, max_connections).await?;
    info!("using relational product store");
    Ok(Arc::new(repository))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_clock_strictly_increases() {
        let clock = ServerClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            assert_eq!(next.timestamp_subsec_nanos() % 1000, 0);
            previous = next;
        }
    }
}
