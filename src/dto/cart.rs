use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Product;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Selected variant attributes. Nulls are dropped, duplicates collapsed.
    #[serde(default)]
    pub colors: Vec<Option<String>>,
    #[serde(default)]
    pub sizes: Vec<Option<String>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateSelectionRequest {
    /// Replacement value set; an empty list clears the selection.
    #[serde(default)]
    pub values: Vec<Option<String>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartItemDto {
    pub id: Uuid,
    pub product: Product,
    pub quantity: i32,
    pub selected_colors: Vec<String>,
    pub selected_sizes: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartList {
    pub items: Vec<CartItemDto>,
}

/// Outcome of a cart-side update; `updated` is false when the cart line
/// did not exist and the call was a no-op.
#[derive(Debug, Serialize, ToSchema)]
pub struct CartUpdateResult {
    pub updated: bool,
}
