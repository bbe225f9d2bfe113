use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::cart::{AddToCartRequest, CartItemDto, CartList, CartUpdateResult},
    entity::{
        cart_items::{
            ActiveModel as CartItemActive, Column as CartCol, Entity as CartItems,
            Model as CartItemModel,
        },
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{CartItem, OrderStatus, Product},
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Drop null entries and collapse duplicates, keeping first-seen order.
/// An empty result is a valid selection (it clears the attribute).
pub fn normalize_selection(values: Vec<Option<String>>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values.into_iter().flatten() {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

fn selection_from_json(value: serde_json::Value) -> Vec<String> {
    serde_json::from_value(value).unwrap_or_default()
}

async fn find_draft_order<C: sea_orm::ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> AppResult<Option<OrderModel>> {
    let order = Orders::find()
        .filter(OrderCol::UserId.eq(user_id))
        .filter(OrderCol::Status.eq(OrderStatus::Draft.as_str()))
        .one(conn)
        .await?;
    Ok(order)
}

/// Create the user's draft order. Two concurrent first adds can both miss
/// the lookup and insert; ON CONFLICT DO NOTHING on the one-draft-per-user
/// index keeps the loser's transaction alive so it picks up the winner's
/// draft on the re-select.
async fn create_or_reuse_draft<C: sea_orm::ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> AppResult<OrderModel> {
    let on_conflict = OnConflict::column(OrderCol::UserId)
        .target_and_where(Expr::col(OrderCol::Status).eq(OrderStatus::Draft.as_str()))
        .do_nothing()
        .to_owned();

    let insert = Orders::insert(OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        status: Set(OrderStatus::Draft.as_str().to_string()),
        is_taken: Set(false),
        created_at: Set(Utc::now().into()),
        ..Default::default()
    })
    .on_conflict(on_conflict)
    .exec(conn)
    .await;

    match insert {
        Ok(_) | Err(DbErr::RecordNotInserted) => {}
        Err(err) => return Err(err.into()),
    }

    find_draft_order(conn, user_id)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn list_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartList>> {
    let rows = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .order_by_desc(CartCol::CreatedAt)
        .find_also_related(Products)
        .all(&state.orm)
        .await?;

    let mut items = Vec::with_capacity(rows.len());
    for (line, product) in rows {
        let Some(product) = product else {
            continue;
        };
        items.push(CartItemDto {
            id: line.id,
            product: product_from_entity(product),
            quantity: line.quantity,
            selected_colors: selection_from_json(line.selected_colors),
            selected_sizes: selection_from_json(line.selected_sizes),
        });
    }

    Ok(ApiResponse::success(
        "OK",
        CartList { items },
        Some(Meta::empty()),
    ))
}

/// Add a product to the user's cart, mirroring the change into the draft
/// order. Creates the draft order and both lines on first contact; on repeat
/// adds the quantity is incremented and the color/size selections are
/// replaced, on both sides, inside one transaction.
pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }
    let colors = normalize_selection(payload.colors);
    let sizes = normalize_selection(payload.sizes);

    let txn = state.orm.begin().await?;

    let product = Products::find_by_id(payload.product_id).one(&txn).await?;
    let product = match product {
        Some(p) => p,
        None => return Err(AppError::InvalidReference("Product not found".into())),
    };

    let order = match find_draft_order(&txn, user.user_id).await? {
        Some(o) => o,
        None => create_or_reuse_draft(&txn, user.user_id).await?,
    };

    let existing = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .filter(CartCol::ProductId.eq(payload.product_id))
        .one(&txn)
        .await?;

    let cart_item = match existing {
        Some(line) => {
            let quantity = line.quantity + payload.quantity;
            let mut active: CartItemActive = line.into();
            active.quantity = Set(quantity);
            active.selected_colors = Set(serde_json::json!(colors));
            active.selected_sizes = Set(serde_json::json!(sizes));
            active.update(&txn).await?
        }
        None => {
            CartItemActive {
                id: Set(Uuid::new_v4()),
                user_id: Set(user.user_id),
                product_id: Set(payload.product_id),
                quantity: Set(payload.quantity),
                selected_colors: Set(serde_json::json!(colors)),
                selected_sizes: Set(serde_json::json!(sizes)),
                created_at: NotSet,
            }
            .insert(&txn)
            .await?
        }
    };

    let mirrored = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .filter(OrderItemCol::ProductId.eq(payload.product_id))
        .one(&txn)
        .await?;

    match mirrored {
        Some(line) => {
            let quantity = line.quantity + payload.quantity;
            let mut active: OrderItemActive = line.into();
            active.quantity = Set(quantity);
            active.selected_colors = Set(serde_json::json!(colors));
            active.selected_sizes = Set(serde_json::json!(sizes));
            active.update(&txn).await?;
        }
        None => {
            // The unit price is fixed here; later catalog changes do not
            // affect what the buyer pays.
            OrderItemActive {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(payload.product_id),
                quantity: Set(payload.quantity),
                price: Set(product.price),
                selected_colors: Set(serde_json::json!(colors)),
                selected_sizes: Set(serde_json::json!(sizes)),
                created_at: NotSet,
            }
            .insert(&txn)
            .await?;
        }
    }

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_add",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Added to cart",
        cart_item_from_entity(cart_item),
        None,
    ))
}

/// Set the quantity on a cart line and its mirrored draft-order line.
/// A missing cart line is a silent no-op (`updated: false`); a cart line
/// whose draft-order mirror is gone is a hard failure.
pub async fn update_quantity(
    state: &AppState,
    user: &AuthUser,
    cart_item_id: Uuid,
    quantity: i32,
) -> AppResult<ApiResponse<CartUpdateResult>> {
    if quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let txn = state.orm.begin().await?;

    let line = CartItems::find_by_id(cart_item_id)
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&txn)
        .await?;
    let line = match line {
        Some(l) => l,
        None => {
            return Ok(ApiResponse::success(
                "Cart item not found",
                CartUpdateResult { updated: false },
                Some(Meta::empty()),
            ));
        }
    };

    let product_id = line.product_id;
    let mut active: CartItemActive = line.into();
    active.quantity = Set(quantity);
    active.update(&txn).await?;

    let mirror = mirrored_order_item(&txn, user.user_id, product_id).await?;
    let mut active: OrderItemActive = mirror.into();
    active.quantity = Set(quantity);
    active.update(&txn).await?;

    txn.commit().await?;

    Ok(ApiResponse::success(
        "Quantity updated",
        CartUpdateResult { updated: true },
        Some(Meta::empty()),
    ))
}

pub async fn update_colors(
    state: &AppState,
    user: &AuthUser,
    cart_item_id: Uuid,
    values: Vec<Option<String>>,
) -> AppResult<ApiResponse<CartUpdateResult>> {
    update_selection(state, user, cart_item_id, values, Selection::Colors).await
}

pub async fn update_sizes(
    state: &AppState,
    user: &AuthUser,
    cart_item_id: Uuid,
    values: Vec<Option<String>>,
) -> AppResult<ApiResponse<CartUpdateResult>> {
    update_selection(state, user, cart_item_id, values, Selection::Sizes).await
}

#[derive(Clone, Copy)]
enum Selection {
    Colors,
    Sizes,
}

async fn update_selection(
    state: &AppState,
    user: &AuthUser,
    cart_item_id: Uuid,
    values: Vec<Option<String>>,
    which: Selection,
) -> AppResult<ApiResponse<CartUpdateResult>> {
    let values = serde_json::json!(normalize_selection(values));

    let txn = state.orm.begin().await?;

    let line = CartItems::find_by_id(cart_item_id)
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&txn)
        .await?;
    let line = match line {
        Some(l) => l,
        None => {
            return Ok(ApiResponse::success(
                "Cart item not found",
                CartUpdateResult { updated: false },
                Some(Meta::empty()),
            ));
        }
    };

    let product_id = line.product_id;
    let mut active: CartItemActive = line.into();
    match which {
        Selection::Colors => active.selected_colors = Set(values.clone()),
        Selection::Sizes => active.selected_sizes = Set(values.clone()),
    }
    active.update(&txn).await?;

    let mirror = mirrored_order_item(&txn, user.user_id, product_id).await?;
    let mut active: OrderItemActive = mirror.into();
    match which {
        Selection::Colors => active.selected_colors = Set(values),
        Selection::Sizes => active.selected_sizes = Set(values),
    }
    active.update(&txn).await?;

    txn.commit().await?;

    Ok(ApiResponse::success(
        "Selection updated",
        CartUpdateResult { updated: true },
        Some(Meta::empty()),
    ))
}

/// Resolve the draft-order line mirroring a cart line. The cart line exists
/// at this point, so a missing draft order or order line means the mirror
/// invariant is broken and the update must not half-apply.
async fn mirrored_order_item<C: sea_orm::ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    product_id: Uuid,
) -> AppResult<crate::entity::order_items::Model> {
    let order = match find_draft_order(conn, user_id).await? {
        Some(o) => o,
        None => return Err(AppError::InvalidReference("Cart item not found".into())),
    };
    let item = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .filter(OrderItemCol::ProductId.eq(product_id))
        .one(conn)
        .await?;
    item.ok_or_else(|| AppError::InvalidReference("Cart item not found".into()))
}

/// Remove a cart line together with its mirrored draft-order line.
pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    cart_item_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let txn = state.orm.begin().await?;

    let line = CartItems::find_by_id(cart_item_id)
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&txn)
        .await?;
    let line = match line {
        Some(l) => l,
        None => return Err(AppError::NotFound),
    };

    if let Some(order) = find_draft_order(&txn, user.user_id).await? {
        OrderItems::delete_many()
            .filter(OrderItemCol::OrderId.eq(order.id))
            .filter(OrderItemCol::ProductId.eq(line.product_id))
            .exec(&txn)
            .await?;
    }

    CartItems::delete_by_id(line.id).exec(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "cart_item_id": cart_item_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

fn cart_item_from_entity(model: CartItemModel) -> CartItem {
    CartItem {
        id: model.id,
        product_id: model.product_id,
        user_id: model.user_id,
        quantity: model.quantity,
        selected_colors: selection_from_json(model.selected_colors),
        selected_sizes: selection_from_json(model.selected_sizes),
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn product_from_entity(model: ProductModel) -> Product {
    Product {
        id: model.id,
        name: model.name,
        description: model.description,
        price: model.price,
        stock_quantity: model.stock_quantity,
        is_available: model.is_available,
        is_approved: model.is_approved,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_selection;

    #[test]
    fn normalize_drops_nulls_and_duplicates() {
        let values = vec![
            Some("Blue".to_string()),
            None,
            Some("Red".to_string()),
            Some("Blue".to_string()),
            None,
        ];
        assert_eq!(normalize_selection(values), vec!["Blue", "Red"]);
    }

    #[test]
    fn normalize_keeps_empty_selection() {
        assert_eq!(normalize_selection(vec![]), Vec::<String>::new());
        assert_eq!(normalize_selection(vec![None, None]), Vec::<String>::new());
    }
}
