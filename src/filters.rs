//! Filter state and query selection.
//!
//! The listing screen has exactly one active filter: none, a category, or a
//! price range. [`select_query`] turns that state into the single query that
//! may run; the other two listing queries stay disabled and never reach the
//! store.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::product::ProductId;

/// Inclusive price bounds with a display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    #[serde(with = "rust_decimal::serde::float")]
    pub min: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub max: Decimal,
    #[serde(default)]
    pub label: String,
}

impl PriceRange {
    pub fn new(min: Decimal, max: Decimal, label: impl Into<String>) -> Self {
        Self {
            min,
            max,
            label: label.into(),
        }
    }

    /// The range substituted when a price filter arrives without bounds.
    pub fn degenerate() -> Self {
        Self::new(Decimal::ZERO, Decimal::ZERO, "")
    }

    /// A range is queryable when `0 <= min <= max` and `max > 0`.
    pub fn is_queryable(&self) -> bool {
        self.min >= Decimal::ZERO && self.max > Decimal::ZERO && self.min <= self.max
    }

    pub fn contains(&self, price: Decimal) -> bool {
        self.min <= price && price <= self.max
    }
}

/// Price ranges offered by the filter menu.
pub fn preset_price_ranges() -> Vec<PriceRange> {
    vec![
        PriceRange::new(dec!(0), dec!(50), "Under $50"),
        PriceRange::new(dec!(50), dec!(100), "$50 - $100"),
        PriceRange::new(dec!(100), dec!(500), "$100 - $500"),
        PriceRange::new(dec!(500), dec!(100000), "Over $500"),
    ]
}

/// The one active listing filter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "FilterShape", into = "FilterShape")]
pub enum FilterState {
    #[default]
    None,
    Category(String),
    Price(PriceRange),
}

/// Loose wire shape: a `type` tag with optional payloads. Only the payload
/// matching the tag survives conversion. Field names are snake_case like the
/// rest of the API; `priceRange` is still read.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FilterShape {
    #[serde(rename = "type")]
    kind: FilterKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(default, alias = "priceRange", skip_serializing_if = "Option::is_none")]
    price_range: Option<PriceRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    None,
    Category,
    Price,
}

impl From<FilterShape> for FilterState {
    fn from(shape: FilterShape) -> Self {
        match shape.kind {
            FilterKind::None => FilterState::None,
            FilterKind::Category => FilterState::Category(shape.category.unwrap_or_default()),
            FilterKind::Price => {
                FilterState::Price(shape.price_range.unwrap_or_else(PriceRange::degenerate))
            }
        }
    }
}

impl From<FilterState> for FilterShape {
    fn from(state: FilterState) -> Self {
        match state {
            FilterState::None => FilterShape {
                kind: FilterKind::None,
                category: None,
                price_range: None,
            },
            FilterState::Category(category) => FilterShape {
                kind: FilterKind::Category,
                category: Some(category),
                price_range: None,
            },
            FilterState::Price(range) => FilterShape {
                kind: FilterKind::Price,
                category: None,
                price_range: Some(range),
            },
        }
    }
}

impl FilterState {
    pub fn kind(&self) -> FilterKind {
        match self {
            FilterState::None => FilterKind::None,
            FilterState::Category(_) => FilterKind::Category,
            FilterState::Price(_) => FilterKind::Price,
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            FilterState::Category(category) => Some(category),
            _ => None,
        }
    }

    pub fn price_range(&self) -> Option<&PriceRange> {
        match self {
            FilterState::Price(range) => Some(range),
            _ => None,
        }
    }
}

/// Cache key of a query. Equal keys are the same query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueryKey {
    Products,
    ProductsByCategory(String),
    ProductsByPrice { min: Decimal, max: Decimal },
    ProductDetail(ProductId),
}

impl QueryKey {
    pub fn products_by_price(min: Decimal, max: Decimal) -> Self {
        // 50 and 50.00 must name the same query
        QueryKey::ProductsByPrice {
            min: min.normalize(),
            max: max.normalize(),
        }
    }

    /// Listing keys are the ones any mutation can change.
    pub fn is_listing(&self) -> bool {
        !matches!(self, QueryKey::ProductDetail(_))
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::Products => f.write_str("products"),
            QueryKey::ProductsByCategory(category) => {
                write!(f, "products-by-category:{}", category)
            }
            QueryKey::ProductsByPrice { min, max } => {
                write!(f, "products-by-price:{}-{}", min, max)
            }
            QueryKey::ProductDetail(id) => write!(f, "product-detail:{}", id),
        }
    }
}

/// The three listing queries a filter can select between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingQuery {
    All,
    ByCategory,
    ByPrice,
}

/// Outcome of query selection: which listing is active and, if it may run,
/// under which key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySelection {
    pub active: ListingQuery,
    pub key: Option<QueryKey>,
}

impl QuerySelection {
    /// Whether `query` may execute. At most the active one ever is.
    pub fn is_enabled(&self, query: ListingQuery) -> bool {
        self.active == query && self.key.is_some()
    }

    pub fn enabled_count(&self) -> usize {
        [ListingQuery::All, ListingQuery::ByCategory, ListingQuery::ByPrice]
            .into_iter()
            .filter(|q| self.is_enabled(*q))
            .count()
    }
}

/// Chooses the single listing query for a filter state.
pub fn select_query(filter: &FilterState) -> QuerySelection {
    match filter {
        FilterState::None => QuerySelection {
            active: ListingQuery::All,
            key: Some(QueryKey::Products),
        },
        FilterState::Category(category) => QuerySelection {
            active: ListingQuery::ByCategory,
            key: (!category.is_empty()).then(|| QueryKey::ProductsByCategory(category.clone())),
        },
        FilterState::Price(range) => QuerySelection {
            active: ListingQuery::ByPrice,
            key: range
                .is_queryable()
                .then(|| QueryKey::products_by_price(range.min, range.max)),
        },
    }
}
