use chrono::Utc;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{CheckoutRequest, OrderItemView, OrderList, OrderView},
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

/// Commit the user's draft order: stamp shipping details, decrement stock
/// and clear the cart, all inside one transaction. Stock is taken with a
/// conditional decrement so two concurrent checkouts cannot drive it
/// negative; the loser of the race sees `InsufficientStock`.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderView>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(OrderCol::UserId.eq(user.user_id))
        .filter(OrderCol::Status.eq(OrderStatus::Draft.as_str()))
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let lines = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&txn)
        .await?;
    if lines.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    for line in &lines {
        // UPDATE .. SET stock_quantity = stock_quantity - q
        // WHERE id = ? AND stock_quantity >= q
        let taken = Products::update_many()
            .col_expr(
                ProdCol::StockQuantity,
                Expr::col(ProdCol::StockQuantity).sub(line.quantity),
            )
            .filter(ProdCol::Id.eq(line.product_id))
            .filter(ProdCol::StockQuantity.gte(line.quantity))
            .exec(&txn)
            .await?;

        if taken.rows_affected == 0 {
            let name = Products::find_by_id(line.product_id)
                .one(&txn)
                .await?
                .map(|p| p.name)
                .unwrap_or_else(|| "unknown product".to_string());
            return Err(AppError::InsufficientStock(name));
        }

        Products::update_many()
            .col_expr(ProdCol::IsAvailable, Expr::value(false))
            .filter(ProdCol::Id.eq(line.product_id))
            .filter(ProdCol::StockQuantity.lte(0))
            .exec(&txn)
            .await?;
    }

    let order_id = order.id;
    let mut active: OrderActive = order.into();
    active.first_name = Set(Some(payload.first_name));
    active.last_name = Set(Some(payload.last_name));
    active.address = Set(Some(payload.address));
    active.phone_number = Set(Some(payload.phone_number));
    active.email = Set(Some(payload.email));
    active.delivery_option = Set(Some(payload.delivery_option));
    active.status = Set(OrderStatus::Committed.as_str().to_string());
    // "created" means "placed": the draft timestamp is overwritten here.
    active.created_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(&txn)
        .await?;

    let view = order_view(&txn, order).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("Checkout success", view, Some(Meta::empty())))
}

/// The buyer's orders, newest first, excluding ones already taken.
pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all()
        .add(OrderCol::UserId.eq(user.user_id))
        .add(OrderCol::IsTaken.eq(false));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        let status = OrderStatus::parse(status)
            .ok_or_else(|| AppError::BadRequest("Invalid order status".into()))?;
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let mut items = Vec::with_capacity(orders.len());
    for order in orders {
        items.push(order_view(&state.orm, order).await?);
    }

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Ok", OrderList { items }, Some(meta)))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderView>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let view = order_view(&state.orm, order).await?;
    Ok(ApiResponse::success("OK", view, Some(Meta::empty())))
}

pub async fn order_exists(state: &AppState, id: Uuid) -> AppResult<bool> {
    let found = Orders::find_by_id(id).one(&state.orm).await?;
    Ok(found.is_some())
}

/// Mark an order shipped. Not idempotent: re-shipping an already-shipped
/// order fails and `shipped_at` keeps its original stamp.
pub async fn ship_order(state: &AppState, actor: &AuthUser, id: Uuid) -> AppResult<ApiResponse<Order>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    if order.status == OrderStatus::Shipped.as_str() {
        return Err(AppError::AlreadyShipped);
    }

    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Shipped.as_str().to_string());
    active.shipped_at = Set(Some(Utc::now().into()));
    let order = active.update(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(actor.user_id),
        "order_shipped",
        Some("orders"),
        Some(serde_json::json!({ "order_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order shipped",
        order_from_entity(order)?,
        Some(Meta::empty()),
    ))
}

/// Mark an order taken by the buyer. Idempotent: taking an already-taken
/// order succeeds without changing anything.
pub async fn take_order(state: &AppState, actor: &AuthUser, id: Uuid) -> AppResult<ApiResponse<Order>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    if order.is_taken {
        return Ok(ApiResponse::success(
            "Order already taken",
            order_from_entity(order)?,
            Some(Meta::empty()),
        ));
    }

    let mut active: OrderActive = order.into();
    active.is_taken = Set(true);
    let order = active.update(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(actor.user_id),
        "order_taken",
        Some("orders"),
        Some(serde_json::json!({ "order_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order taken",
        order_from_entity(order)?,
        Some(Meta::empty()),
    ))
}

async fn order_view<C: sea_orm::ConnectionTrait>(
    conn: &C,
    order: OrderModel,
) -> AppResult<OrderView> {
    let rows = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .find_also_related(Products)
        .all(conn)
        .await?;

    let mut total_price: i64 = 0;
    let mut items = Vec::with_capacity(rows.len());
    for (item, product) in rows {
        total_price += item.price * item.quantity as i64;
        items.push(OrderItemView {
            product_id: item.product_id,
            product_name: product.map(|p| p.name).unwrap_or_default(),
            quantity: item.quantity,
            price: item.price,
            selected_colors: selection_from_json(item.selected_colors),
            selected_sizes: selection_from_json(item.selected_sizes),
        });
    }

    let order = order_from_entity(order)?;
    Ok(OrderView {
        id: order.id,
        status: order.status,
        first_name: order.first_name,
        last_name: order.last_name,
        address: order.address,
        phone_number: order.phone_number,
        email: order.email,
        delivery_option: order.delivery_option,
        is_taken: order.is_taken,
        created_at: order.created_at,
        shipped_at: order.shipped_at,
        total_price,
        items,
    })
}

fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    let status = OrderStatus::parse(&model.status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("unknown order status {}", model.status))
    })?;
    Ok(Order {
        id: model.id,
        user_id: model.user_id,
        status,
        first_name: model.first_name,
        last_name: model.last_name,
        address: model.address,
        phone_number: model.phone_number,
        email: model.email,
        delivery_option: model.delivery_option,
        is_taken: model.is_taken,
        created_at: model.created_at.with_timezone(&Utc),
        shipped_at: model.shipped_at.map(|dt| dt.with_timezone(&Utc)),
    })
}

fn selection_from_json(value: serde_json::Value) -> Vec<String> {
    serde_json::from_value(value).unwrap_or_default()
}
