use axum::{
    extract::{Json, Path, Query, State},
    response::Response,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::filters::{preset_price_ranges, select_query, FilterState, PriceRange};
use crate::forms::{rules, PRESET_CATEGORIES};
use crate::handlers::common::{
    created_response, no_content_response, success_response, ListResponse,
};
use crate::models::product::{Product, ProductFormData, ProductPatch};
use crate::search::{refine, sort_products, SortOption};
use crate::AppState;

/// Creates the router for product endpoints
pub fn products_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/refetch", post(refetch_products))
        .route(
            "/:id",
            get(get_product).patch(update_product).delete(delete_product),
        )
}

/// Preset lookups for the filter and form menus
pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories))
        .route("/price-ranges", get(list_price_ranges))
}

/// Listing query string. Category and price bounds are mutually exclusive.
#[derive(Debug, Default, Deserialize)]
pub struct ListProductsParams {
    pub category: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub price_label: Option<String>,
    pub q: Option<String>,
    pub sort: Option<SortOption>,
}

impl ListProductsParams {
    /// Normalizes the query string into the single active filter.
    pub fn filter_state(&self) -> Result<FilterState, ServiceError> {
        let has_price =
            self.min_price.is_some() || self.max_price.is_some() || self.price_label.is_some();

        match (&self.category, has_price) {
            (Some(_), true) => Err(ServiceError::InvalidInput(
                "category and price filters cannot be combined".to_string(),
            )),
            (Some(category), false) => Ok(FilterState::Category(category.clone())),
            (None, true) => self.price_range().map(FilterState::Price),
            (None, false) => Ok(FilterState::None),
        }
    }

    fn price_range(&self) -> Result<PriceRange, ServiceError> {
        let label = self.price_label.clone().unwrap_or_default();
        if self.min_price.is_none() && self.max_price.is_none() {
            // a bare label selects the preset of that name
            return Ok(preset_price_ranges()
                .into_iter()
                .find(|range| range.label == label)
                .unwrap_or_else(PriceRange::degenerate));
        }

        let bound = |raw: &Option<String>, name: &str| -> Result<Decimal, ServiceError> {
            match raw {
                Some(raw) => rules::parse_price(raw)
                    .map_err(|msg| ServiceError::InvalidInput(format!("{}: {}", name, msg))),
                None => Ok(Decimal::ZERO),
            }
        };
        Ok(PriceRange::new(
            bound(&self.min_price, "min_price")?,
            bound(&self.max_price, "max_price")?,
            label,
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct ProductListResponse {
    #[serde(flatten)]
    pub list: ListResponse<Product>,
    /// Cache key of the query that ran, absent when the filter disabled it
    pub query: Option<String>,
    pub filter: FilterState,
}

async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<ListProductsParams>,
) -> Result<Response, ServiceError> {
    let filter = params.filter_state()?;
    let listing = state.catalog.list(&filter).await?;
    Ok(listing_response(&params, filter, &listing))
}

/// Forces the active query to the store, like the list screen's retry
async fn refetch_products(
    State(state): State<AppState>,
    Query(params): Query<ListProductsParams>,
) -> Result<Response, ServiceError> {
    let filter = params.filter_state()?;
    let listing = state.catalog.refetch(&filter).await?;
    Ok(listing_response(&params, filter, &listing))
}

fn listing_response(params: &ListProductsParams, filter: FilterState, listing: &[Product]) -> Response {
    let mut products = refine(listing, params.q.as_deref().unwrap_or_default());
    sort_products(&mut products, params.sort.unwrap_or_default());
    success_response(ProductListResponse {
        list: ListResponse::new(products),
        query: select_query(&filter).key.map(|key| key.to_string()),
        filter,
    })
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let product = state.catalog.product(id).await?;
    Ok(success_response(product.as_ref()))
}

async fn create_product(
    State(state): State<AppState>,
    Json(mut payload): Json<ProductFormData>,
) -> Result<Response, ServiceError> {
    payload.name = payload.name.trim().to_string();
    payload.description = payload.description.trim().to_string();
    payload.image_url = payload.image_url.filter(|url| !url.trim().is_empty());

    let id = state.catalog.create(payload).await?;
    let product = state.catalog.product(id).await?;
    Ok(created_response(product.as_ref()))
}

async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<ProductPatch>,
) -> Result<Response, ServiceError> {
    state.catalog.update(id, patch).await?;
    let product = state.catalog.product(id).await?;
    Ok(success_response(product.as_ref()))
}

async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.catalog.delete(id).await?;
    Ok(no_content_response())
}

async fn list_categories() -> Response {
    success_response(PRESET_CATEGORIES)
}

async fn list_price_ranges() -> Response {
    success_response(preset_price_ranges())
}
