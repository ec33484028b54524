use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::cart::{Cart, CartError, CartItem};
use crate::database::DatabaseError;
use crate::security::sanitize::sanitize_text;
use crate::services::catalog_service::CatalogService;

/// Carts persisted as JSONB, one row per session
pub struct CartService {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct CartRow {
    session_id: Uuid,
    items: Json<Vec<CartItem>>,
    updated_at: DateTime<Utc>,
}

impl CartService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load the session's cart, or an empty one if none is stored
    pub async fn load(&self, session_id: Uuid) -> Result<Cart, CartError> {
        let row = sqlx::query_as::<_, CartRow>("SELECT session_id, items, updated_at FROM carts WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        Ok(match row {
            Some(row) => Cart {
                session_id: row.session_id,
                items: row.items.0,
                updated_at: row.updated_at,
            },
            None => Cart::new(session_id),
        })
    }

    /// Apply `change` to the session's cart under a row lock, so concurrent
    /// edits from the same session serialize instead of overwriting each other.
    async fn modify<F>(&self, session_id: Uuid, change: F) -> Result<Cart, CartError>
    where
        F: FnOnce(&mut Cart) -> Result<(), CartError>,
    {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        // A row has to exist before it can be locked
        sqlx::query("INSERT INTO carts (session_id) VALUES ($1) ON CONFLICT (session_id) DO NOTHING")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from)?;
        let row = sqlx::query_as::<_, CartRow>(
            "SELECT session_id, items, updated_at FROM carts WHERE session_id = $1 FOR UPDATE",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        let mut cart = Cart {
            session_id: row.session_id,
            items: row.items.0,
            updated_at: row.updated_at,
        };
        change(&mut cart)?;

        sqlx::query("UPDATE carts SET items = $2, updated_at = $3 WHERE session_id = $1")
            .bind(cart.session_id)
            .bind(Json(&cart.items))
            .bind(cart.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from)?;
        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(cart)
    }

    pub async fn add_item(
        &self,
        session_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        notes: Option<String>,
    ) -> Result<Cart, CartError> {
        let product = CatalogService::new(self.pool.clone()).get(product_id).await?;
        let notes = notes.map(|n| sanitize_text(&n, 500));
        self.modify(session_id, |cart| cart.add_item(&product, quantity, notes)).await
    }

    pub async fn update_item(&self, session_id: Uuid, product_id: Uuid, quantity: i32) -> Result<Cart, CartError> {
        self.modify(session_id, |cart| cart.update_quantity(product_id, quantity)).await
    }

    pub async fn remove_item(&self, session_id: Uuid, product_id: Uuid) -> Result<Cart, CartError> {
        self.modify(session_id, |cart| cart.remove_item(product_id)).await
    }

    pub async fn clear(&self, session_id: Uuid) -> Result<(), CartError> {
        sqlx::query("DELETE FROM carts WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(())
    }
}
