use std::sync::Arc;

use tracing::warn;

use crate::errors::ServiceError;
use crate::filters::QueryKey;
use crate::models::product::{Product, ProductId};
use crate::notifications::Notifier;
use crate::services::ProductCatalog;

use super::{format_date, format_price, BusyFlag, Route};

#[derive(Debug, Clone, PartialEq)]
pub enum DetailStatus {
    Loading,
    Loaded(Arc<Product>),
    /// Dedicated state with a back action
    NotFound { message: String },
    /// Shown with a retry action
    Failed { message: String },
}

/// Product detail screen.
#[derive(Debug)]
pub struct ProductDetailView {
    catalog: ProductCatalog,
    notifier: Notifier,
    id: ProductId,
    status: DetailStatus,
    deleting: bool,
}

impl ProductDetailView {
    pub fn new(catalog: ProductCatalog, notifier: Notifier, id: ProductId) -> Self {
        Self {
            catalog,
            notifier,
            id,
            status: DetailStatus::Loading,
            deleting: false,
        }
    }

    pub fn status(&self) -> &DetailStatus {
        &self.status
    }

    pub fn watched_key(&self) -> QueryKey {
        QueryKey::ProductDetail(self.id)
    }

    pub fn is_deleting(&self) -> bool {
        self.deleting
    }

    pub async fn load(&mut self) -> &DetailStatus {
        self.status = DetailStatus::Loading;
        let result = self.catalog.product(self.id).await;
        self.apply(result)
    }

    pub async fn retry(&mut self) -> &DetailStatus {
        self.status = DetailStatus::Loading;
        let result = self.catalog.refetch_product(self.id).await;
        self.apply(result)
    }

    pub fn back(&self) -> Route {
        Route::Back
    }

    pub fn edit(&self) -> Route {
        Route::EditProduct(self.id)
    }

    /// Deletes the product after the user confirmed. On success the screen
    /// should return to the list once the notifier requests navigation.
    pub async fn delete(&mut self) -> Result<Route, ServiceError> {
        let busy = BusyFlag::raise(&mut self.deleting);
        let result = self.catalog.delete(self.id).await;
        drop(busy);
        match result {
            Ok(()) => {
                self.notifier
                    .success_then_navigate("Product deleted successfully");
                Ok(Route::List)
            }
            Err(err) => {
                warn!(product_id = %self.id, error = %err, "delete failed");
                self.notifier.failure(&err);
                Err(err)
            }
        }
    }

    pub fn price_text(&self) -> Option<String> {
        self.product().map(|p| format_price(p.price))
    }

    pub fn added_text(&self) -> Option<String> {
        self.product()
            .and_then(|p| p.created_at)
            .map(|at| format!("Added: {}", format_date(at)))
    }

    /// Only shown once the product was edited after creation.
    pub fn updated_text(&self) -> Option<String> {
        let product = self.product()?;
        let updated = product.updated_at?;
        if product.created_at == Some(updated) {
            return None;
        }
        Some(format!("Last updated: {}", format_date(updated)))
    }

    fn product(&self) -> Option<&Product> {
        match &self.status {
            DetailStatus::Loaded(product) => Some(product.as_ref()),
            _ => None,
        }
    }

    fn apply(&mut self, result: Result<Arc<Product>, ServiceError>) -> &DetailStatus {
        self.status = match result {
            Ok(product) => DetailStatus::Loaded(product),
            Err(err @ ServiceError::NotFound(_)) => DetailStatus::NotFound {
                message: err.response_message(),
            },
            Err(err) => DetailStatus::Failed {
                message: format!("Error: {}", err.response_message()),
            },
        };
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryCacheConfig;
    use crate::models::product::{ProductFormData, ProductPatch};
    use crate::notifications::{NotificationEvent, NotificationKind};
    use crate::services::catalog::tests::CountingRepository;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use uuid::Uuid;

    async fn seeded() -> (Arc<CountingRepository>, ProductCatalog, ProductId) {
        let repository = Arc::new(CountingRepository::new());
        let catalog = ProductCatalog::new(repository.clone(), &QueryCacheConfig::default());
        let id = catalog
            .create(ProductFormData {
                name: "Mug".into(),
                description: "Ceramic".into(),
                price: dec!(9.5),
                image_url: None,
                category: "Home".into(),
            })
            .await
            .unwrap();
        (repository, catalog, id)
    }

    #[tokio::test]
    async fn loaded_product_is_formatted() {
        let (_, catalog, id) = seeded().await;
        let mut view = ProductDetailView::new(catalog.clone(), Notifier::default(), id);
        view.load().await;

        assert_eq!(view.price_text().as_deref(), Some("$9.50"));
        assert!(view.added_text().unwrap().starts_with("Added: "));
        assert_eq!(view.updated_text(), None);

        let patch = ProductPatch {
            price: Some(dec!(12)),
            ..Default::default()
        };
        catalog.update(id, patch).await.unwrap();
        view.load().await;
        assert_eq!(view.price_text().as_deref(), Some("$12.00"));
        assert!(view.updated_text().is_some());
    }

    #[tokio::test]
    async fn missing_product_has_its_own_state() {
        let (_, catalog, _) = seeded().await;
        let mut view = ProductDetailView::new(catalog, Notifier::default(), Uuid::new_v4());
        assert_matches!(view.load().await, DetailStatus::NotFound { .. });
        assert_eq!(view.back(), Route::Back);
    }

    #[tokio::test]
    async fn store_failure_can_be_retried() {
        let (repository, catalog, id) = seeded().await;
        let mut view = ProductDetailView::new(catalog, Notifier::default(), id);

        repository.fail_reads.store(true, Ordering::SeqCst);
        assert_matches!(view.load().await, DetailStatus::Failed { .. });

        repository.fail_reads.store(false, Ordering::SeqCst);
        assert_matches!(view.retry().await, DetailStatus::Loaded(_));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_delete_clears_the_busy_flag() {
        let (repository, catalog, id) = seeded().await;
        repository.write_delay_ms.store(1_000, Ordering::SeqCst);
        let mut view = ProductDetailView::new(catalog.clone(), Notifier::default(), id);

        let abandoned = tokio::time::timeout(Duration::from_millis(10), view.delete()).await;
        assert!(abandoned.is_err());
        assert!(!view.is_deleting());
        assert_eq!(catalog.product(id).await.unwrap().name, "Mug");
    }

    #[tokio::test(start_paused = true)]
    async fn delete_notifies_and_returns_to_the_list() {
        let (_, catalog, id) = seeded().await;
        let notifier = Notifier::default();
        let mut events = notifier.subscribe();
        let mut view = ProductDetailView::new(catalog.clone(), notifier.clone(), id);

        assert_eq!(view.delete().await.unwrap(), Route::List);
        assert!(!view.is_deleting());

        let Ok(NotificationEvent::Shown(shown)) = events.recv().await else {
            panic!("expected a notification");
        };
        assert_eq!(shown.kind, NotificationKind::Success);
        assert_eq!(shown.message, "Product deleted successfully");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(
            events.recv().await.unwrap(),
            NotificationEvent::NavigationRequested(shown.id)
        );
        assert!(catalog.list(&Default::default()).await.unwrap().is_empty());
    }
}
