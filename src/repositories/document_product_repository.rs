use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use tracing::{debug, error, info, instrument};

use super::document::{
    BackendError, Direction, Document, DocumentBackend, DocumentQuery, FieldValue, WriteFields,
};
use super::{not_found, price_range_context, ProductRepository};
use crate::errors::ServiceError;
use crate::models::product::{Product, ProductFormData, ProductId, ProductPatch};

pub const PRODUCTS_COLLECTION: &str = "products";

// Field names in the stored documents
const NAME: &str = "name";
const DESCRIPTION: &str = "description";
const PRICE: &str = "price";
const IMAGE_URL: &str = "imageUrl";
const CATEGORY: &str = "category";
const CREATED_AT: &str = "createdAt";
const UPDATED_AT: &str = "updatedAt";

/// Product repository over a document backend.
pub struct DocumentProductRepository {
    backend: Arc<dyn DocumentBackend>,
}

impl std::fmt::Debug for DocumentProductRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentProductRepository").finish_non_exhaustive()
    }
}

impl DocumentProductRepository {
    pub fn new(backend: Arc<dyn DocumentBackend>) -> Self {
        Self { backend }
    }

    async fn run_query(
        &self,
        query: DocumentQuery,
        context: impl FnOnce() -> String,
    ) -> Result<Vec<Product>, ServiceError> {
        match self.backend.query(PRODUCTS_COLLECTION, &query).await {
            Ok(docs) => Ok(docs.into_iter().map(decode_product).collect()),
            Err(err) => Err(store_error(context(), err)),
        }
    }
}

fn store_error(context: String, err: BackendError) -> ServiceError {
    error!(error = %err, "{}", context);
    ServiceError::store(context, err)
}

/// Decodes a stored document. Missing or mistyped fields fall back to
/// empty values rather than failing the whole listing.
pub fn decode_product(doc: Document) -> Product {
    let text = |field: &str| {
        doc.fields
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let timestamp = |field: &str| {
        doc.fields
            .get(field)
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };
    let price = match doc.fields.get(PRICE) {
        Some(Value::Number(n)) => decode_price(n),
        _ => Decimal::ZERO,
    };
    let image_url = Some(text(IMAGE_URL)).filter(|url| !url.is_empty());

    Product {
        id: doc.id,
        name: text(NAME),
        description: text(DESCRIPTION),
        price,
        image_url,
        category: text(CATEGORY),
        created_at: timestamp(CREATED_AT),
        updated_at: timestamp(UPDATED_AT),
    }
}

fn decode_price(n: &Number) -> Decimal {
    let raw = n.to_string();
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .unwrap_or(Decimal::ZERO)
}

fn encode_price(price: Decimal) -> Result<Value, ServiceError> {
    price
        .to_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| ServiceError::InvalidInput(format!("price {} cannot be stored", price)))
}

fn value(v: Value) -> FieldValue {
    FieldValue::Value(v)
}

#[async_trait]
impl ProductRepository for DocumentProductRepository {
    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Product>, ServiceError> {
        let query = DocumentQuery::new().order_by(UPDATED_AT, Direction::Descending);
        self.run_query(query, || "Failed to fetch products".to_string())
            .await
    }

    #[instrument(skip(self))]
    async fn list_by_category(&self, category: &str) -> Result<Vec<Product>, ServiceError> {
        if category.is_empty() {
            return Ok(Vec::new());
        }
        let query = DocumentQuery::new()
            .where_eq(CATEGORY, Value::String(category.to_string()))
            .order_by(UPDATED_AT, Direction::Descending);
        self.run_query(query, || {
            format!("Failed to fetch products in category {}", category)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_by_price_range(
        &self,
        min: Decimal,
        max: Decimal,
    ) -> Result<Vec<Product>, ServiceError> {
        let query = DocumentQuery::new()
            .where_gte(PRICE, encode_price(min)?)
            .where_lte(PRICE, encode_price(max)?)
            .order_by(PRICE, Direction::Ascending);
        self.run_query(query, || price_range_context(min, max)).await
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: ProductId) -> Result<Product, ServiceError> {
        let doc = self
            .backend
            .get(PRODUCTS_COLLECTION, id)
            .await
            .map_err(|err| store_error(format!("Failed to fetch product with ID {}", id), err))?;
        match doc {
            Some(doc) => Ok(decode_product(doc)),
            None => {
                debug!(product_id = %id, "product not found");
                Err(not_found(id))
            }
        }
    }

    #[instrument(skip(self, data), fields(name = %data.name))]
    async fn create(&self, data: ProductFormData) -> Result<ProductId, ServiceError> {
        let mut fields = WriteFields::new();
        fields.insert(NAME.into(), value(Value::String(data.name)));
        fields.insert(DESCRIPTION.into(), value(Value::String(data.description)));
        fields.insert(PRICE.into(), value(encode_price(data.price)?));
        if let Some(url) = data.image_url {
            fields.insert(IMAGE_URL.into(), value(Value::String(url)));
        }
        fields.insert(CATEGORY.into(), value(Value::String(data.category)));
        fields.insert(CREATED_AT.into(), FieldValue::ServerTimestamp);
        fields.insert(UPDATED_AT.into(), FieldValue::ServerTimestamp);

        let id = self
            .backend
            .add(PRODUCTS_COLLECTION, fields)
            .await
            .map_err(|err| store_error("Failed to add product".to_string(), err))?;

        info!(product_id = %id, "Product created");
        Ok(id)
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, id: ProductId, patch: ProductPatch) -> Result<(), ServiceError> {
        let mut fields = WriteFields::new();
        if let Some(name) = patch.name {
            fields.insert(NAME.into(), value(Value::String(name)));
        }
        if let Some(description) = patch.description {
            fields.insert(DESCRIPTION.into(), value(Value::String(description)));
        }
        if let Some(price) = patch.price {
            fields.insert(PRICE.into(), value(encode_price(price)?));
        }
        if let Some(image_url) = patch.image_url {
            let stored = image_url.map(Value::String).unwrap_or(Value::Null);
            fields.insert(IMAGE_URL.into(), value(stored));
        }
        if let Some(category) = patch.category {
            fields.insert(CATEGORY.into(), value(Value::String(category)));
        }
        fields.insert(UPDATED_AT.into(), FieldValue::ServerTimestamp);

        match self.backend.update(PRODUCTS_COLLECTION, id, fields).await {
            Ok(()) => {
                info!(product_id = %id, "Product updated");
                Ok(())
            }
            Err(BackendError::DocumentNotFound(_)) => Err(not_found(id)),
            Err(err) => Err(store_error(
                format!("Failed to update product with ID {}", id),
                err,
            )),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: ProductId) -> Result<(), ServiceError> {
        self.backend
            .delete(PRODUCTS_COLLECTION, id)
            .await
            .map_err(|err| store_error(format!("Failed to delete product with ID {}", id), err))?;
        info!(product_id = %id, "Product deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::document::{Fields, InMemoryDocumentBackend};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use uuid::Uuid;

    fn repository() -> (Arc<InMemoryDocumentBackend>, DocumentProductRepository) {
        let backend = Arc::new(InMemoryDocumentBackend::new());
        let repo = DocumentProductRepository::new(backend.clone());
        (backend, repo)
    }

    fn form(name: &str, price: Decimal, category: &str) -> ProductFormData {
        ProductFormData {
            name: name.into(),
            description: format!("{} description", name),
            price,
            image_url: None,
            category: category.into(),
        }
    }

    #[test]
    fn decoding_fills_missing_fields_with_defaults() {
        let mut fields = Fields::new();
        fields.insert(NAME.into(), json!("Lamp"));
        fields.insert(PRICE.into(), json!("not a number"));
        fields.insert(IMAGE_URL.into(), json!(""));
        let product = decode_product(Document {
            id: Uuid::new_v4(),
            fields,
        });

        assert_eq!(product.name, "Lamp");
        assert_eq!(product.description, "");
        assert_eq!(product.price, Decimal::ZERO);
        assert_eq!(product.image_url, None);
        assert_eq!(product.created_at, None);
    }

    #[test]
    fn prices_survive_the_document_format() {
        for price in [dec!(19.99), dec!(0), dec!(12.0), dec!(100000)] {
            let encoded = encode_price(price).unwrap();
            let Value::Number(n) = encoded else {
                panic!("price must be stored as a number");
            };
            assert_eq!(decode_price(&n), price);
        }
    }

    #[tokio::test]
    async fn create_assigns_id_and_timestamps() {
        let (_, repo) = repository();
        let id = repo.create(form("Mug", dec!(19.99), "Home")).await.unwrap();
        let product = repo.get_by_id(id).await.unwrap();

        assert_eq!(product.id, id);
        assert_eq!(product.price, dec!(19.99));
        assert!(product.created_at.is_some());
        assert_eq!(product.created_at, product.updated_at);
    }

    #[tokio::test]
    async fn update_applies_only_present_fields() {
        let (_, repo) = repository();
        let id = repo.create(form("Mug", dec!(9.5), "Home")).await.unwrap();
        let before = repo.get_by_id(id).await.unwrap();

        let patch = ProductPatch {
            price: Some(dec!(12.0)),
            ..Default::default()
        };
        repo.update(id, patch).await.unwrap();
        let after = repo.get_by_id(id).await.unwrap();

        assert_eq!(after.price, dec!(12));
        assert_eq!(after.name, before.name);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);
    }

    #[tokio::test]
    async fn clearing_the_image_url() {
        let (_, repo) = repository();
        let mut data = form("Lamp", dec!(30), "Home");
        data.image_url = Some("https://example.com/lamp.png".into());
        let id = repo.create(data).await.unwrap();

        let patch = ProductPatch {
            image_url: Some(None),
            ..Default::default()
        };
        repo.update(id, patch).await.unwrap();
        assert_eq!(repo.get_by_id(id).await.unwrap().image_url, None);
    }

    #[tokio::test]
    async fn missing_products_are_not_found() {
        let (_, repo) = repository();
        let id = Uuid::new_v4();
        assert_matches!(repo.get_by_id(id).await, Err(ServiceError::NotFound(_)));
        assert_matches!(
            repo.update(id, ProductPatch::default()).await,
            Err(ServiceError::NotFound(_))
        );
        assert!(repo.delete(id).await.is_ok());
    }

    #[tokio::test]
    async fn listings_follow_their_ordering() {
        let (_, repo) = repository();
        let cheap = repo.create(form("Pen", dec!(2), "Office")).await.unwrap();
        let mid = repo.create(form("Mug", dec!(9.5), "Home")).await.unwrap();
        let dear = repo.create(form("Lamp", dec!(45), "Home")).await.unwrap();

        let ids = |products: Vec<Product>| products.into_iter().map(|p| p.id).collect::<Vec<_>>();

        assert_eq!(ids(repo.list().await.unwrap()), [dear, mid, cheap]);
        assert_eq!(ids(repo.list_by_category("Home").await.unwrap()), [dear, mid]);
        assert!(repo.list_by_category("home").await.unwrap().is_empty());
        assert_eq!(
            ids(repo.list_by_price_range(dec!(2), dec!(9.5)).await.unwrap()),
            [cheap, mid]
        );
    }

    #[tokio::test]
    async fn empty_category_skips_the_backend() {
        let (backend, repo) = repository();
        backend.insert_raw(PRODUCTS_COLLECTION, Uuid::new_v4(), Fields::new());
        assert!(repo.list_by_category("").await.unwrap().is_empty());
    }
}
