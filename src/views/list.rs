use tracing::debug;

use crate::errors::ServiceError;
use crate::filters::{preset_price_ranges, select_query, FilterState, PriceRange, QueryKey};
use crate::forms::PRESET_CATEGORIES;
use crate::models::product::{Product, ProductId};
use crate::search::{refine, sort_products, SortOption};
use crate::services::ProductCatalog;

use super::Route;

#[derive(Debug, Clone, PartialEq)]
pub enum ListStatus {
    Idle,
    Loading,
    Loaded(Vec<Product>),
    /// Shown with a retry action
    Failed { message: String },
}

/// Product list screen: one active filter, a search box and a sort order.
#[derive(Debug)]
pub struct ProductListView {
    catalog: ProductCatalog,
    filter: FilterState,
    search: String,
    sort: SortOption,
    status: ListStatus,
}

impl ProductListView {
    pub fn new(catalog: ProductCatalog) -> Self {
        Self {
            catalog,
            filter: FilterState::None,
            search: String::new(),
            sort: SortOption::default(),
            status: ListStatus::Idle,
        }
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn status(&self) -> &ListStatus {
        &self.status
    }

    pub fn categories(&self) -> &'static [&'static str] {
        &PRESET_CATEGORIES
    }

    pub fn price_ranges(&self) -> Vec<PriceRange> {
        preset_price_ranges()
    }

    /// Replaces whatever filter was active.
    pub fn select_category(&mut self, category: impl Into<String>) {
        self.filter = FilterState::Category(category.into());
    }

    pub fn select_price_range(&mut self, range: PriceRange) {
        self.filter = FilterState::Price(range);
    }

    pub fn clear_filters(&mut self) {
        self.filter = FilterState::None;
    }

    /// Updates the search text; a loaded listing is narrowed in place from
    /// the cached result, without another store read.
    pub fn set_search(&mut self, text: impl Into<String>) {
        self.search = text.into();
        self.reapply();
    }

    pub fn set_sort(&mut self, sort: SortOption) {
        self.sort = sort;
        self.reapply();
    }

    /// Cache key the screen should watch to reload on changes.
    pub fn watched_key(&self) -> Option<QueryKey> {
        select_query(&self.filter).key
    }

    pub async fn load(&mut self) -> &ListStatus {
        self.status = ListStatus::Loading;
        let result = self.catalog.list(&self.filter).await;
        self.apply(result)
    }

    /// The retry action: refetches the active query regardless of staleness.
    pub async fn retry(&mut self) -> &ListStatus {
        self.status = ListStatus::Loading;
        let result = self.catalog.refetch(&self.filter).await;
        self.apply(result)
    }

    /// Products after search and sort; empty unless loaded.
    pub fn visible(&self) -> &[Product] {
        match &self.status {
            ListStatus::Loaded(products) => products,
            _ => &[],
        }
    }

    /// Empty-state prompt once a load found nothing.
    pub fn is_empty(&self) -> bool {
        matches!(&self.status, ListStatus::Loaded(products) if products.is_empty())
    }

    pub fn open(&self, id: ProductId) -> Route {
        Route::Detail(id)
    }

    pub fn add_product(&self) -> Route {
        Route::AddProduct
    }

    fn reapply(&mut self) {
        if !matches!(self.status, ListStatus::Loaded(_)) {
            return;
        }
        let cached = self
            .catalog
            .listing_state(&self.filter)
            .and_then(|state| state.last_success().map(|s| s.data.clone()));
        if let Some(listing) = cached {
            self.apply(Ok(listing));
        }
    }

    fn apply(
        &mut self,
        result: Result<std::sync::Arc<Vec<Product>>, ServiceError>,
    ) -> &ListStatus {
        self.status = match result {
            Ok(listing) => {
                let mut products = refine(&listing, &self.search);
                sort_products(&mut products, self.sort);
                debug!(count = products.len(), "product list loaded");
                ListStatus::Loaded(products)
            }
            Err(err) => ListStatus::Failed {
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
    use crate::models::product::ProductFormData;
    use crate::services::catalog::tests::CountingRepository;
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    async fn seeded() -> (Arc<CountingRepository>, ProductListView) {
        let repository = Arc::new(CountingRepository::new());
        let catalog = ProductCatalog::new(repository.clone(), &QueryCacheConfig::default());
        for (name, price, category) in [
            ("Mug", dec!(9.5), "Home"),
            ("Novel", dec!(15), "Books"),
            ("Laptop", dec!(900), "Electronics"),
        ] {
            catalog
                .create(ProductFormData {
                    name: name.into(),
                    description: format!("A {}", name.to_lowercase()),
                    price,
                    image_url: None,
                    category: category.into(),
                })
                .await
                .unwrap();
        }
        (repository, ProductListView::new(catalog))
    }

    fn names(view: &ProductListView) -> Vec<&str> {
        view.visible().iter().map(|p| p.name.as_str()).collect()
    }

    #[tokio::test]
    async fn switching_filters_replaces_the_previous_one() {
        let (_, mut view) = seeded().await;
        view.select_category("Books");
        view.load().await;
        assert_eq!(names(&view), ["Novel"]);

        view.select_price_range(PriceRange::new(dec!(500), dec!(100000), "Over $500"));
        assert_eq!(view.filter().category(), None);
        view.load().await;
        assert_eq!(names(&view), ["Laptop"]);

        view.clear_filters();
        view.load().await;
        assert_eq!(names(&view), ["Laptop", "Novel", "Mug"]);
    }

    #[tokio::test]
    async fn price_listing_stays_cheapest_first() {
        let (_, mut view) = seeded().await;
        view.select_price_range(PriceRange::new(dec!(0), dec!(50), "Under $50"));
        view.load().await;
        assert_eq!(names(&view), ["Mug", "Novel"]);

        view.set_search("a");
        assert_eq!(names(&view), ["Mug", "Novel"]);
    }

    #[tokio::test]
    async fn search_narrows_the_loaded_listing() {
        let (repository, mut view) = seeded().await;
        view.set_search("MUG");
        view.load().await;
        assert_eq!(names(&view), ["Mug"]);

        view.set_search("nothing like it");
        view.load().await;
        assert!(view.is_empty());
        assert_eq!(repository.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn search_and_sort_apply_to_a_loaded_listing_immediately() {
        let (repository, mut view) = seeded().await;
        view.load().await;
        view.set_sort(SortOption::PriceAsc);
        assert_eq!(names(&view), ["Mug", "Novel", "Laptop"]);

        view.set_search("o");
        assert_eq!(names(&view), ["Novel", "Laptop"]);
        assert_eq!(repository.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_offer_a_retry() {
        let (repository, mut view) = seeded().await;
        repository.fail_reads.store(true, Ordering::SeqCst);
        let status = view.load().await.clone();
        assert_eq!(
            status,
            ListStatus::Failed {
                message: "Error: Failed to fetch products".into()
            }
        );
        assert!(view.visible().is_empty());

        repository.fail_reads.store(false, Ordering::SeqCst);
        view.retry().await;
        assert_eq!(view.visible().len(), 3);
    }

    #[tokio::test]
    async fn empty_category_shows_nothing_without_a_fetch() {
        let (repository, mut view) = seeded().await;
        view.select_category("");
        assert_eq!(view.watched_key(), None);
        view.load().await;
        assert!(view.is_empty());
        assert_eq!(repository.reads.load(Ordering::SeqCst), 0);
    }
}
