use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DbErr, EntityTrait, QueryFilter, QueryOrder, Schema, Set,
};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::{not_found, price_range_context, ProductRepository, ServerClock};
use crate::entities::product::{
    ActiveModel as ProductActiveModel, Column, Entity as ProductEntity,
};
use crate::errors::ServiceError;
use crate::models::product::{Product, ProductFormData, ProductId, ProductPatch};

/// Product repository over a relational database (sqlite or postgres).
#[derive(Debug)]
pub struct SeaOrmProductRepository {
    db: Arc<DatabaseConnection>,
    clock: ServerClock,
}

fn store_error(context: String, err: DbErr) -> ServiceError {
    error!(error = %err, "{}", context);
    ServiceError::store(context, err)
}

impl SeaOrmProductRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            clock: ServerClock::new(),
        }
    }

    /// Opens a pool on `url` and makes sure the products table exists.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, ServiceError> {
        let mut opt = ConnectOptions::new(url.to_string());
        opt.max_connections(max_connections.max(1))
            .min_connections(1)
            .sqlx_logging(false);

        info!(max_connections, "Connecting to product database");
        let db = Database::connect(opt)
            .await
            .map_err(|e| store_error("Failed to connect to product database".to_string(), e))?;

        let repository = Self::new(Arc::new(db));
        repository.ensure_schema().await?;
        Ok(repository)
    }

    /// Creates the products table when it is missing.
    pub async fn ensure_schema(&self) -> Result<(), ServiceError> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);
        let mut table = schema.create_table_from_entity(ProductEntity);
        table.if_not_exists();

        self.db
            .execute(backend.build(&table))
            .await
            .map_err(|e| store_error("Failed to create products table".to_string(), e))?;
        debug!("products table ready");
        Ok(())
    }

    fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl ProductRepository for SeaOrmProductRepository {
    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Product>, ServiceError> {
        let rows = ProductEntity::find()
            .order_by_desc(Column::UpdatedAt)
            .order_by_asc(Column::Id)
            .all(self.db())
            .await
            .map_err(|e| store_error("Failed to fetch products".to_string(), e))?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    #[instrument(skip(self))]
    async fn list_by_category(&self, category: &str) -> Result<Vec<Product>, ServiceError> {
        if category.is_empty() {
            return Ok(Vec::new());
        }
        let rows = ProductEntity::find()
            .filter(Column::Category.eq(category))
            .order_by_desc(Column::UpdatedAt)
            .order_by_asc(Column::Id)
            .all(self.db())
            .await
            .map_err(|e| {
                store_error(format!("Failed to fetch products in category {}", category), e)
            })?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    #[instrument(skip(self))]
    async fn list_by_price_range(
        &self,
        min: Decimal,
        max: Decimal,
    ) -> Result<Vec<Product>, ServiceError> {
        let rows = ProductEntity::find()
            .filter(Column::Price.gte(min))
            .filter(Column::Price.lte(max))
            .order_by_asc(Column::Price)
            .order_by_asc(Column::Id)
            .all(self.db())
            .await
            .map_err(|e| store_error(price_range_context(min, max), e))?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: ProductId) -> Result<Product, ServiceError> {
        let row = ProductEntity::find_by_id(id)
            .one(self.db())
            .await
            .map_err(|e| store_error(format!("Failed to fetch product with ID {}", id), e))?;
        row.map(Product::from).ok_or_else(|| not_found(id))
    }

    #[instrument(skip(self, data), fields(name = %data.name))]
    async fn create(&self, data: ProductFormData) -> Result<ProductId, ServiceError> {
        let now = self.clock.now();
        let id = Uuid::new_v4();
        let model = ProductActiveModel {
            id: Set(id),
            name: Set(data.name),
            description: Set(data.description),
            price: Set(data.price),
            image_url: Set(data.image_url),
            category: Set(data.category),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model
            .insert(self.db())
            .await
            .map_err(|e| store_error("Failed to add product".to_string(), e))?;

        info!(product_id = %id, "Product created");
        Ok(id)
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, id: ProductId, patch: ProductPatch) -> Result<(), ServiceError> {
        let context = || format!("Failed to update product with ID {}", id);
        let existing = ProductEntity::find_by_id(id)
            .one(self.db())
            .await
            .map_err(|e| store_error(context(), e))?
            .ok_or_else(|| not_found(id))?;

        let mut active: ProductActiveModel = existing.into();
        if let Some(name) = patch.name {
            active.name = Set(name);
        }
        if let Some(description) = patch.description {
            active.description = Set(description);
        }
        if let Some(price) = patch.price {
            active.price = Set(price);
        }
        if let Some(image_url) = patch.image_url {
            active.image_url = Set(image_url);
        }
        if let Some(category) = patch.category {
            active.category = Set(category);
        }
        active.updated_at = Set(self.clock.now());

        active
            .update(self.db())
            .await
            .map_err(|e| store_error(context(), e))?;

        info!(product_id = %id, "Product updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: ProductId) -> Result<(), ServiceError> {
        let result = ProductEntity::delete_by_id(id)
            .exec(self.db())
            .await
            .map_err(|e| store_error(format!("Failed to delete product with ID {}", id), e))?;
        info!(product_id = %id, rows_affected = result.rows_affected, "Product deleted");
        Ok(())
    }
}
