use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, patch},
};
use uuid::Uuid;

use crate::{
    dto::cart::{
        AddToCartRequest, CartList, CartUpdateResult, UpdateQuantityRequest,
        UpdateSelectionRequest,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::CartItem,
    response::ApiResponse,
    services::cart_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(cart_list).post(add_to_cart))
        .route("/{cart_item_id}", delete(remove_from_cart))
        .route("/{cart_item_id}/quantity", patch(update_quantity))
        .route("/{cart_item_id}/colors", patch(update_colors))
        .route("/{cart_item_id}/sizes", patch(update_sizes))
}

#[utoipa::path(
    get,
    path = "/api/cart",
    responses(
        (status = 200, description = "List cart items for current user", body = ApiResponse<CartList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn cart_list(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<CartList>>> {
    let resp = cart_service::list_cart(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/cart",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Add product to cart and mirror into the draft order", body = ApiResponse<CartItem>),
        (status = 400, description = "Bad request"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddToCartRequest>,
) -> AppResult<Json<ApiResponse<CartItem>>> {
    // Storefront rule: a product goes into the cart with at least one color
    // and size picked. Updates may clear them later.
    if payload.colors.iter().all(|c| c.is_none()) {
        return Err(AppError::BadRequest("Select at least one color".into()));
    }
    if payload.sizes.iter().all(|s| s.is_none()) {
        return Err(AppError::BadRequest("Select at least one size".into()));
    }
    let resp = cart_service::add_to_cart(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/cart/{cart_item_id}/quantity",
    params(
        ("cart_item_id" = Uuid, Path, description = "Cart item ID")
    ),
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Quantity updated on cart line and draft order line", body = ApiResponse<CartUpdateResult>),
        (status = 400, description = "Non-positive quantity"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_quantity(
    State(state): State<AppState>,
    user: AuthUser,
    Path(cart_item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> AppResult<Json<ApiResponse<CartUpdateResult>>> {
    let resp =
        cart_service::update_quantity(&state, &user, cart_item_id, payload.quantity).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/cart/{cart_item_id}/colors",
    params(
        ("cart_item_id" = Uuid, Path, description = "Cart item ID")
    ),
    request_body = UpdateSelectionRequest,
    responses(
        (status = 200, description = "Color selection replaced on both sides", body = ApiResponse<CartUpdateResult>),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_colors(
    State(state): State<AppState>,
    user: AuthUser,
    Path(cart_item_id): Path<Uuid>,
    Json(payload): Json<UpdateSelectionRequest>,
) -> AppResult<Json<ApiResponse<CartUpdateResult>>> {
    let resp = cart_service::update_colors(&state, &user, cart_item_id, payload.values).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/cart/{cart_item_id}/sizes",
    params(
        ("cart_item_id" = Uuid, Path, description = "Cart item ID")
    ),
    request_body = UpdateSelectionRequest,
    responses(
        (status = 200, description = "Size selection replaced on both sides", body = ApiResponse<CartUpdateResult>),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_sizes(
    State(state): State<AppState>,
    user: AuthUser,
    Path(cart_item_id): Path<Uuid>,
    Json(payload): Json<UpdateSelectionRequest>,
) -> AppResult<Json<ApiResponse<CartUpdateResult>>> {
    let resp = cart_service::update_sizes(&state, &user, cart_item_id, payload.values).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/cart/{cart_item_id}",
    params(
        ("cart_item_id" = Uuid, Path, description = "Cart item ID")
    ),
    responses(
        (status = 200, description = "Cart line and draft order line removed", body = ApiResponse<serde_json::Value>),
        (status = 404, description = "Cart item not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Path(cart_item_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = cart_service::remove_from_cart(&state, &user, cart_item_id).await?;
    Ok(Json(resp))
}
