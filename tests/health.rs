use axum_storefront_api::routes::health::health_check;

#[tokio::test]
async fn health_check_reports_ok() {
    let response = health_check().await;
    let data = response.0.data.expect("health data");
    assert_eq!(data.status, "ok");
}
