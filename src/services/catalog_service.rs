use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::catalog::{CatalogError, NewProduct, Product, ProductFilter, ProductUpdate};
use crate::database::DatabaseError;

const PRODUCT_COLUMNS: &str = "id, slug, name, description, category, price_cents, image_url, is_available, \
                               is_catering, min_quantity, created_at, updated_at";

pub struct CatalogService {
    pool: PgPool,
}

impl CatalogService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, filter: &ProductFilter) -> Result<Vec<Product>, CatalogError> {
        let sql = format!(
            r#"
            SELECT {PRODUCT_COLUMNS} FROM products
            WHERE ($1::text IS NULL OR category = $1)
              AND ($2::bool IS NULL OR is_catering = $2)
              AND ($3 OR is_available)
              AND ($4::text IS NULL OR name ILIKE $4 OR description ILIKE $4)
            ORDER BY category, name
            LIMIT $5 OFFSET $6
            "#
        );

        let products = sqlx::query_as::<_, Product>(&sql)
            .bind(filter.category())
            .bind(filter.catering)
            .bind(filter.include_unavailable)
            .bind(filter.search_pattern())
            .bind(filter.limit())
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        Ok(products)
    }

    /// Public product page; unavailable products read as not found
    pub async fn get_by_slug(&self, slug: &str) -> Result<Product, CatalogError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE slug = $1 AND is_available");
        sqlx::query_as::<_, Product>(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?
            .ok_or_else(|| CatalogError::NotFound(slug.to_string()))
    }

    pub async fn get(&self, id: Uuid) -> Result<Product, CatalogError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    /// Current rows for a set of ids, used to re-price a cart at checkout
    pub async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Product>, CatalogError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)");
        let products = sqlx::query_as::<_, Product>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(products)
    }

    pub async fn create(&self, input: NewProduct) -> Result<Product, CatalogError> {
        let input = input.validate()?;
        let slug = input.slug.clone().unwrap_or_default();
        let now = Utc::now();

        let sql = format!(
            r#"
            INSERT INTO products
                (id, slug, name, description, category, price_cents, image_url, is_available,
                 is_catering, min_quantity, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, $8, $9, $10, $10)
            RETURNING {PRODUCT_COLUMNS}
            "#
        );

        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(Uuid::new_v4())
            .bind(&slug)
            .bind(&input.name)
            .bind(&input.description)
            .bind(&input.category)
            .bind(input.price_cents)
            .bind(&input.image_url)
            .bind(input.is_catering)
            .bind(input.min_quantity.unwrap_or(1))
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatabaseError::from_unique(e, &format!("product slug '{}'", slug)))?;

        tracing::info!("Created product {} ({})", product.slug, product.id);
        Ok(product)
    }

    pub async fn update(&self, id: Uuid, update: ProductUpdate) -> Result<Product, CatalogError> {
        let product = update.apply(self.get(id).await?)?;

        let sql = format!(
            r#"
            UPDATE products
            SET name = $2, description = $3, category = $4, price_cents = $5, image_url = $6,
                is_available = $7, min_quantity = $8, updated_at = $9
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        );

        let updated = sqlx::query_as::<_, Product>(&sql)
            .bind(product.id)
            .bind(&product.name)
            .bind(&product.description)
            .bind(&product.category)
            .bind(product.price_cents)
            .bind(&product.image_url)
            .bind(product.is_available)
            .bind(product.min_quantity)
            .bind(product.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        tracing::info!("Updated product {} ({})", updated.slug, updated.id);
        Ok(updated)
    }

    /// Take a product off the menu (or put it back) without touching anything else
    pub async fn set_availability(&self, id: Uuid, is_available: bool) -> Result<Product, CatalogError> {
        let sql = format!(
            "UPDATE products SET is_available = $2, updated_at = now() WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        );
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .bind(is_available)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;

        tracing::info!("Product {} is now {}", product.slug, if is_available { "available" } else { "unavailable" });
        Ok(product)
    }
}
