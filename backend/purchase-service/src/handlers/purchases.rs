//! Purchase handlers - gateway submission and ledger queries
use actix_web::{web, HttpResponse};
use event_schema::PurchaseRecord;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app_state::AppState;
use crate::error::{AppError, Result};
use crate::publisher::BuyRequest;

#[derive(Debug, Serialize)]
pub struct BuyData {
    pub username: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub price: f64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct BuyResponse {
    pub message: String,
    pub status: &'static str,
    pub kafka_published: bool,
    pub data: BuyData,
}

#[derive(Debug, Serialize)]
pub struct UserPurchasesResponse {
    pub purchases: Vec<PurchaseRecord>,
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct RecentPurchasesResponse {
    pub purchases: Vec<PurchaseRecord>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct UserIdQuery {
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/// Publish a purchase request
pub async fn buy(state: web::Data<AppState>, req: web::Json<BuyRequest>) -> Result<HttpResponse> {
    let publisher = state
        .publisher
        .as_ref()
        .ok_or(AppError::NotEnabled("POST /buy"))?;

    let (event, ack) = publisher.submit(req.into_inner()).await?;

    info!(
        user_id = %event.user_id(),
        partition = ack.partition,
        offset = ack.offset,
        "Purchase request accepted"
    );

    Ok(HttpResponse::Ok().json(BuyResponse {
        message: "Purchase request received and published successfully".to_string(),
        status: "success",
        kafka_published: true,
        data: BuyData {
            username: event.username().to_string(),
            user_id: event.user_id().to_string(),
            price: event.price(),
            timestamp: event.timestamp().to_string(),
        },
    }))
}

/// Gateway read-through of a user's purchases
///
/// Served from the local store when the ledger runs in this process, otherwise through
/// the ledger API; an unreachable ledger yields an empty list.
pub async fn get_all_user_buys(
    state: web::Data<AppState>,
    query: web::Query<UserIdQuery>,
) -> Result<HttpResponse> {
    let user_id = query.into_inner().user_id;

    let purchases = if let Some(service) = &state.query {
        service.get_by_user(&user_id).await?
    } else if let Some(client) = &state.ledger_client {
        client.user_purchases_or_empty(&user_id).await
    } else {
        return Err(AppError::NotEnabled("GET /getAllUserBuys"));
    };

    Ok(HttpResponse::Ok().json(UserPurchasesResponse { purchases, user_id }))
}

/// All purchases of one user, in insertion order
pub async fn get_user_purchases(
    state: web::Data<AppState>,
    user_id: web::Path<String>,
) -> Result<HttpResponse> {
    let service = state
        .query
        .as_ref()
        .ok_or(AppError::NotEnabled("GET /api/purchases/{userId}"))?;
    let user_id = user_id.into_inner();

    let purchases = service.get_by_user(&user_id).await?;

    Ok(HttpResponse::Ok().json(UserPurchasesResponse { purchases, user_id }))
}

/// Most recent purchases (diagnostics)
pub async fn get_recent_purchases(
    state: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> Result<HttpResponse> {
    let service = state
        .query
        .as_ref()
        .ok_or(AppError::NotEnabled("GET /api/purchases"))?;

    let purchases = service.get_recent(query.limit).await?;
    let count = purchases.len();

    Ok(HttpResponse::Ok().json(RecentPurchasesResponse { purchases, count }))
}
