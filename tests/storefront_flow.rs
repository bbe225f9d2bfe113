use std::time::Duration;

use axum_storefront_api::{
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{cart::AddToCartRequest, orders::CheckoutRequest},
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{Column as OrderCol, Entity as Orders},
        products::{ActiveModel as ProductActive, Entity as Products},
        users::ActiveModel as UserActive,
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::OrderStatus,
    services::{cart_service, order_service},
    state::AppState,
    sweeper,
};
use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

// Allow skipping when no DB is configured in the environment. Each test
// creates its own users and products, so they do not step on each other.
async fn test_state() -> anyhow::Result<Option<AppState>> {
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
                );
                return Ok(None);
            }
        };

    let pool = create_pool(&database_url).await?;
    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;

    Ok(Some(AppState { pool, orm }))
}

async fn create_user(state: &AppState, role: &str) -> anyhow::Result<AuthUser> {
    let id = Uuid::new_v4();
    UserActive {
        id: Set(id),
        email: Set(format!("{id}@test.example")),
        password_hash: Set("dummy".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(AuthUser {
        user_id: id,
        role: role.into(),
    })
}

async fn create_product(state: &AppState, price: i64, stock: i32) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    ProductActive {
        id: Set(id),
        name: Set(format!("Test Product {id}")),
        description: Set(Some("A product for testing".into())),
        price: Set(price),
        stock_quantity: Set(stock),
        is_available: Set(true),
        is_approved: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(id)
}

fn add_request(product_id: Uuid, quantity: i32) -> AddToCartRequest {
    AddToCartRequest {
        product_id,
        quantity,
        colors: vec![Some("Blue".into())],
        sizes: vec![Some("M".into())],
    }
}

fn checkout_request() -> CheckoutRequest {
    CheckoutRequest {
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        address: "1 Analytical Way".into(),
        phone_number: "+10000000000".into(),
        email: "ada@test.example".into(),
        delivery_option: "courier".into(),
    }
}

async fn stock_of(state: &AppState, product_id: Uuid) -> anyhow::Result<(i32, bool)> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .expect("product exists");
    Ok((product.stock_quantity, product.is_available))
}

/// Both bookkeeping sides, side by side, for one user's draft.
async fn cart_and_draft_lines(
    state: &AppState,
    user_id: Uuid,
) -> anyhow::Result<(
    Vec<(Uuid, i32, serde_json::Value, serde_json::Value)>,
    Vec<(Uuid, i32, serde_json::Value, serde_json::Value)>,
)> {
    let mut cart: Vec<_> = CartItems::find()
        .filter(CartCol::UserId.eq(user_id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|l| (l.product_id, l.quantity, l.selected_colors, l.selected_sizes))
        .collect();
    cart.sort_by_key(|l| l.0);

    let draft = Orders::find()
        .filter(OrderCol::UserId.eq(user_id))
        .filter(OrderCol::Status.eq(OrderStatus::Draft.as_str()))
        .one(&state.orm)
        .await?;

    let mut order = Vec::new();
    if let Some(draft) = draft {
        order = OrderItems::find()
            .filter(OrderItemCol::OrderId.eq(draft.id))
            .all(&state.orm)
            .await?
            .into_iter()
            .map(|l| (l.product_id, l.quantity, l.selected_colors, l.selected_sizes))
            .collect();
        order.sort_by_key(|l| l.0);
    }

    Ok((cart, order))
}

async fn assert_mirrored(state: &AppState, user_id: Uuid) -> anyhow::Result<()> {
    let (cart, order) = cart_and_draft_lines(state, user_id).await?;
    assert_eq!(
        cart, order,
        "cart lines and draft order lines should mirror each other"
    );
    Ok(())
}

#[tokio::test]
async fn cart_and_draft_order_stay_in_lockstep() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let shirt = create_product(&state, 780_000, 10).await?;
    let tote = create_product(&state, 350_000, 10).await?;

    let added = cart_service::add_to_cart(&state, &user, add_request(shirt, 2)).await?;
    let cart_line = added.data.expect("cart item");
    assert_mirrored(&state, user.user_id).await?;

    cart_service::add_to_cart(&state, &user, add_request(tote, 1)).await?;
    assert_mirrored(&state, user.user_id).await?;

    // Re-adding increments quantity and replaces the selections on both sides.
    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id: shirt,
            quantity: 1,
            colors: vec![Some("Red".into()), None, Some("Red".into())],
            sizes: vec![Some("L".into())],
        },
    )
    .await?;
    assert_mirrored(&state, user.user_id).await?;
    let (cart, _) = cart_and_draft_lines(&state, user.user_id).await?;
    let shirt_line = cart.iter().find(|l| l.0 == shirt).expect("shirt line");
    assert_eq!(shirt_line.1, 3);
    assert_eq!(shirt_line.2, serde_json::json!(["Red"]));

    cart_service::update_quantity(&state, &user, cart_line.id, 5).await?;
    assert_mirrored(&state, user.user_id).await?;

    cart_service::update_colors(
        &state,
        &user,
        cart_line.id,
        vec![Some("Green".into()), Some("Blue".into())],
    )
    .await?;
    cart_service::update_sizes(&state, &user, cart_line.id, vec![]).await?;
    assert_mirrored(&state, user.user_id).await?;

    cart_service::remove_from_cart(&state, &user, cart_line.id).await?;
    assert_mirrored(&state, user.user_id).await?;
    let (cart, _) = cart_and_draft_lines(&state, user.user_id).await?;
    assert_eq!(cart.len(), 1);
    assert_eq!(cart[0].0, tote);

    Ok(())
}

#[tokio::test]
async fn checkout_commits_stock_and_clears_cart() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let product = create_product(&state, 1_000, 10).await?;

    cart_service::add_to_cart(&state, &user, add_request(product, 2)).await?;

    let resp = order_service::checkout(&state, &user, checkout_request()).await?;
    let order = resp.data.expect("order view");
    assert_eq!(order.status, OrderStatus::Committed);
    assert_eq!(order.total_price, 2_000);
    assert_eq!(order.first_name.as_deref(), Some("Ada"));

    let (stock, available) = stock_of(&state, product).await?;
    assert_eq!(stock, 8);
    assert!(available);

    // Cart is empty and no draft order remains.
    let (cart, draft_lines) = cart_and_draft_lines(&state, user.user_id).await?;
    assert!(cart.is_empty());
    assert!(draft_lines.is_empty());

    // A second checkout has nothing to commit.
    let err = order_service::checkout(&state, &user, checkout_request())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    Ok(())
}

#[tokio::test]
async fn failed_checkout_rolls_everything_back() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let plentiful = create_product(&state, 1_000, 50).await?;
    let scarce = create_product(&state, 2_000, 1).await?;

    cart_service::add_to_cart(&state, &user, add_request(plentiful, 3)).await?;
    cart_service::add_to_cart(&state, &user, add_request(scarce, 2)).await?;

    let err = order_service::checkout(&state, &user, checkout_request())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock(_)));

    // Nothing moved: stock untouched, order still a draft, cart intact.
    assert_eq!(stock_of(&state, plentiful).await?.0, 50);
    assert_eq!(stock_of(&state, scarce).await?.0, 1);
    let (cart, draft_lines) = cart_and_draft_lines(&state, user.user_id).await?;
    assert_eq!(cart.len(), 2);
    assert_eq!(draft_lines.len(), 2);

    Ok(())
}

#[tokio::test]
async fn concurrent_checkouts_cannot_oversell_the_last_unit() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let first = create_user(&state, "user").await?;
    let second = create_user(&state, "user").await?;
    let product = create_product(&state, 5_000, 1).await?;

    cart_service::add_to_cart(&state, &first, add_request(product, 1)).await?;
    cart_service::add_to_cart(&state, &second, add_request(product, 1)).await?;

    let (a, b) = tokio::join!(
        order_service::checkout(&state, &first, checkout_request()),
        order_service::checkout(&state, &second, checkout_request()),
    );

    let succeeded = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(succeeded, 1, "exactly one checkout should win the last unit");
    for result in [a, b] {
        if let Err(err) = result {
            assert!(matches!(err, AppError::InsufficientStock(_)));
        }
    }

    let (stock, available) = stock_of(&state, product).await?;
    assert_eq!(stock, 0);
    assert!(!available, "sold-out product should be unavailable");

    Ok(())
}

#[tokio::test]
async fn concurrent_first_adds_share_one_draft() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let shirt = create_product(&state, 780_000, 10).await?;
    let tote = create_product(&state, 350_000, 10).await?;

    // The user's very first cart actions, racing to create the draft order.
    let (a, b) = tokio::join!(
        cart_service::add_to_cart(&state, &user, add_request(shirt, 1)),
        cart_service::add_to_cart(&state, &user, add_request(tote, 2)),
    );
    a?;
    b?;

    let drafts = Orders::find()
        .filter(OrderCol::UserId.eq(user.user_id))
        .filter(OrderCol::Status.eq(OrderStatus::Draft.as_str()))
        .all(&state.orm)
        .await?;
    assert_eq!(drafts.len(), 1, "both adds should land on one draft order");

    assert_mirrored(&state, user.user_id).await?;
    let (cart, order_lines) = cart_and_draft_lines(&state, user.user_id).await?;
    assert_eq!(cart.len(), 2);
    assert_eq!(order_lines.len(), 2);

    Ok(())
}

#[tokio::test]
async fn ship_rejects_reshipping_but_take_is_idempotent() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let admin = create_user(&state, "admin").await?;
    let product = create_product(&state, 1_000, 5).await?;

    cart_service::add_to_cart(&state, &user, add_request(product, 1)).await?;
    let order = order_service::checkout(&state, &user, checkout_request())
        .await?
        .data
        .expect("order view");

    let shipped = order_service::ship_order(&state, &admin, order.id)
        .await?
        .data
        .expect("order");
    assert_eq!(shipped.status, OrderStatus::Shipped);
    let first_stamp = shipped.shipped_at.expect("shipped_at set");

    let err = order_service::ship_order(&state, &admin, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyShipped));
    let unchanged = order_service::get_order(&state, &user, order.id)
        .await?
        .data
        .expect("order view");
    assert_eq!(unchanged.shipped_at, Some(first_stamp));

    let taken = order_service::take_order(&state, &user, order.id)
        .await?
        .data
        .expect("order");
    assert!(taken.is_taken);

    let again = order_service::take_order(&state, &user, order.id).await?;
    assert_eq!(again.message, "Order already taken");
    assert!(again.data.expect("order").is_taken);

    Ok(())
}

#[tokio::test]
async fn sweeper_promotes_shipped_orders_only_after_dwell() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let admin = create_user(&state, "admin").await?;
    let product = create_product(&state, 1_000, 5).await?;

    cart_service::add_to_cart(&state, &user, add_request(product, 1)).await?;
    let order = order_service::checkout(&state, &user, checkout_request())
        .await?
        .data
        .expect("order view");
    let shipped_at = order_service::ship_order(&state, &admin, order.id)
        .await?
        .data
        .expect("order")
        .shipped_at
        .expect("shipped_at set");

    let dwell = Duration::from_secs(20);

    // One second short of the dwell: nothing moves.
    let early = shipped_at + chrono::Duration::seconds(19);
    sweeper::promote_shipped(&state.orm, early, dwell).await?;
    let view = order_service::get_order(&state, &user, order.id)
        .await?
        .data
        .expect("order view");
    assert_eq!(view.status, OrderStatus::Shipped);

    // At the dwell boundary the order is promoted.
    let due = shipped_at + chrono::Duration::seconds(20);
    let promoted = sweeper::promote_shipped(&state.orm, due, dwell).await?;
    assert!(promoted >= 1);
    let view = order_service::get_order(&state, &user, order.id)
        .await?
        .data
        .expect("order view");
    assert_eq!(view.status, OrderStatus::ReadyForPickup);

    // Re-running the sweep leaves the promoted order alone.
    sweeper::promote_shipped(&state.orm, Utc::now(), dwell).await?;
    let again = order_service::get_order(&state, &user, order.id)
        .await?
        .data
        .expect("order view");
    assert_eq!(again.status, OrderStatus::ReadyForPickup);

    Ok(())
}

#[tokio::test]
async fn missing_cart_line_soft_fails_but_broken_mirror_hard_fails() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let product = create_product(&state, 1_000, 5).await?;

    // Updating a nonexistent cart line is a silent no-op.
    let resp = cart_service::update_quantity(&state, &user, Uuid::new_v4(), 3).await?;
    assert!(!resp.data.expect("result").updated);

    // Removing a nonexistent cart line is a hard failure.
    let err = cart_service::remove_from_cart(&state, &user, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    // If the draft-order mirror of an existing cart line is gone, updates
    // must refuse rather than half-apply.
    let added = cart_service::add_to_cart(&state, &user, add_request(product, 1)).await?;
    let cart_line = added.data.expect("cart item");
    OrderItems::delete_many()
        .filter(OrderItemCol::ProductId.eq(product))
        .exec(&state.orm)
        .await?;
    let err = cart_service::update_quantity(&state, &user, cart_line.id, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidReference(_)));
    assert_eq!(err.to_string(), "Cart item not found");

    Ok(())
}

#[tokio::test]
async fn add_to_cart_validates_its_inputs() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let product = create_product(&state, 1_000, 5).await?;

    let err = cart_service::add_to_cart(&state, &user, add_request(product, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = cart_service::add_to_cart(&state, &user, add_request(Uuid::new_v4(), 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidReference(_)));

    Ok(())
}
