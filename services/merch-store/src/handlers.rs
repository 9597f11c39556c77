use crate::auth::TokenIssuer;
use crate::errors::MerchStoreError;
use crate::models::{AuthRequest, AuthResponse, InfoResponse, MessageResponse, SendCoinRequest};
use crate::security_middleware::JwtAuth;
use crate::services::{AuthenticatedUser, MerchService};
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "merch-store",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Logs in or registers, returning a bearer token
pub async fn authenticate(
    service: web::Data<Arc<MerchService>>,
    issuer: web::Data<Arc<TokenIssuer>>,
    request: web::Json<AuthRequest>,
) -> Result<HttpResponse, MerchStoreError> {
    let request = request.into_inner();
    request
        .validate()
        .map_err(|e| MerchStoreError::Validation(e.to_string()))?;

    let user = service
        .authenticate_or_register(&request.username, &request.password)
        .await?;
    let token = issuer.issue(&user.name)?;

    Ok(HttpResponse::Ok().json(AuthResponse { token }))
}

/// Buys one unit of the named item
pub async fn buy_item(
    service: web::Data<Arc<MerchService>>,
    user: AuthenticatedUser,
    item: web::Path<String>,
) -> Result<HttpResponse, MerchStoreError> {
    service.purchase(&user, &item).await?;
    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Item purchased successfully".to_string(),
    }))
}

/// Sends coins to another user
pub async fn send_coin(
    service: web::Data<Arc<MerchService>>,
    user: AuthenticatedUser,
    request: web::Json<SendCoinRequest>,
) -> Result<HttpResponse, MerchStoreError> {
    let request = request.into_inner();
    request
        .validate()
        .map_err(|e| MerchStoreError::Validation(e.to_string()))?;

    service.transfer(&user, &request.to_user, request.amount).await?;
    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Coins transferred successfully".to_string(),
    }))
}

/// Balance, inventory and coin history of the caller
pub async fn get_info(
    service: web::Data<Arc<MerchService>>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, MerchStoreError> {
    let info = service.get_info(&user).await?;
    Ok(HttpResponse::Ok().json(InfoResponse::from(info)))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint(service: web::Data<Arc<MerchService>>) -> HttpResponse {
    match service.metrics().export() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "errors": format!("Failed to gather metrics: {}", e)
        })),
    }
}

/// Malformed JSON bodies are reported like any other validation failure.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(16 * 1024)
        .error_handler(|err, _req| MerchStoreError::Validation(err.to_string()).into())
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig, issuer: Arc<TokenIssuer>) {
    cfg.app_data(json_config())
        .app_data(web::Data::new(issuer.clone()))
        .route("/api/auth", web::post().to(authenticate))
        .service(
            web::scope("/api")
                .wrap(JwtAuth::new(issuer))
                .route("/buy/{item}", web::get().to(buy_item))
                .route("/sendCoin", web::post().to(send_coin))
                .route("/info", web::get().to(get_info)),
        )
        .route("/metrics", web::get().to(metrics_endpoint))
        .route("/health", web::get().to(health_check));
}
