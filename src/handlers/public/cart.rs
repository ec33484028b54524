use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::cart::{Cart, CartTotals};
use crate::middleware::{ApiResponse, ApiResult};
use crate::security::SessionContext;
use crate::types::Fulfilment;

#[derive(Debug, Serialize)]
pub struct CartView {
    #[serde(flatten)]
    pub cart: Cart,
    pub totals: CartTotals,
}

#[derive(Debug, Default, Deserialize)]
pub struct CartQuery {
    pub fulfilment: Option<Fulfilment>,
}

#[derive(Debug, Deserialize)]
pub struct AddItemBody {
    pub product_id: Uuid,
    #[serde(default = "one")]
    pub quantity: i32,
    pub notes: Option<String>,
}

fn one() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemBody {
    pub quantity: i32,
}

fn view(state: &AppState, cart: Cart, fulfilment: Option<Fulfilment>) -> CartView {
    let totals = cart.totals(&state.pricing(), fulfilment.unwrap_or(Fulfilment::Pickup));
    CartView { cart, totals }
}

/// GET /api/cart - the session's cart with totals (pickup unless `?fulfilment=delivery`)
pub async fn get_cart(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Query(query): Query<CartQuery>,
) -> ApiResult<CartView> {
    let cart = state.carts().load(session.session_id).await?;
    Ok(ApiResponse::success(view(&state, cart, query.fulfilment)))
}

/// POST /api/cart/items
pub async fn add_item(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(body): Json<AddItemBody>,
) -> ApiResult<CartView> {
    let cart = state
        .carts()
        .add_item(session.session_id, body.product_id, body.quantity, body.notes)
        .await?;
    Ok(ApiResponse::success(view(&state, cart, None)))
}

/// PUT /api/cart/items/:product_id - a quantity of 0 removes the line
pub async fn update_item(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(product_id): Path<Uuid>,
    Json(body): Json<UpdateItemBody>,
) -> ApiResult<CartView> {
    let cart = state
        .carts()
        .update_item(session.session_id, product_id, body.quantity)
        .await?;
    Ok(ApiResponse::success(view(&state, cart, None)))
}

/// DELETE /api/cart/items/:product_id
pub async fn remove_item(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<CartView> {
    let cart = state.carts().remove_item(session.session_id, product_id).await?;
    Ok(ApiResponse::success(view(&state, cart, None)))
}

/// DELETE /api/cart
pub async fn clear_cart(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> ApiResult<()> {
    state.carts().clear(session.session_id).await?;
    Ok(ApiResponse::<()>::no_content())
}
