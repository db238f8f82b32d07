use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use ineedit_market::{
    AcceptOffer, BroadcastOffer, CreateOffer, CreatePrivateOffer, Inbox, IssueRefund, Market,
    MarketError, NewAccount, NewListing, Principal, PurchaseListing, SendMessage,
};
use ineedit_shared::{AccountId, ListingId, OfferId, OrderId, OrderStatus, PartyRole, ThreadId};
use ineedit_store::{Account, Listing, Message, Offer, Order};

use crate::error::ServerError;

/// Header carrying the caller's account id, set by the identity provider.
pub const ACCOUNT_HEADER: &str = "x-account-id";

#[derive(Clone)]
pub struct AppState {
    pub market: Arc<Market>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/accounts", post(create_account))
        .route("/accounts/me", get(my_account))
        .route("/listings", post(create_listing))
        .route("/listings/:id", get(get_listing).delete(delete_listing))
        .route("/listings/:id/publish", post(publish_listing))
        .route("/listings/:id/price-drop", post(drop_price))
        .route("/listings/:id/favorite", post(favorite).delete(unfavorite))
        .route("/listings/:id/purchase", post(purchase_listing))
        .route("/offers", post(create_offer))
        .route("/offers/private", post(create_private_offer))
        .route("/offers/broadcast", post(broadcast_offer))
        .route("/offers/:id", get(get_offer))
        .route("/offers/:id/accept", post(accept_offer))
        .route("/offers/:id/decline", post(decline_offer))
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/advance", post(advance_order))
        .route("/orders/:id/refund", post(issue_refund))
        .route("/threads", get(inbox))
        .route("/threads/:id/messages", get(thread_messages))
        .route("/threads/:id/read", post(mark_thread_read))
        .route("/messages", post(send_message))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run a market operation on the blocking pool. Each call opens its own
/// SQLite connection.
async fn run<T, F>(state: &AppState, op: F) -> Result<T, ServerError>
where
    F: FnOnce(&Market) -> ineedit_market::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let market = state.market.clone();
    tokio::task::spawn_blocking(move || op(&market))
        .await
        .map_err(|e| ServerError::Internal(format!("Market task failed: {e}")))?
        .map_err(ServerError::from)
}

/// The authenticated caller, with its balance as of this request.
pub struct Caller(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let account = parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<AccountId>().ok())
            .ok_or(ServerError::Unauthenticated)?;

        match run(state, move |m| m.principal(account)).await {
            Ok(principal) => Ok(Caller(principal)),
            Err(ServerError::Market(MarketError::NotFound(_))) => Err(ServerError::Unauthenticated),
            Err(e) => Err(e),
        }
    }
}

type Created<T> = (StatusCode, Json<T>);

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct PriceDropRequest {
    price_cents: i64,
}

#[derive(Serialize)]
struct FavoriteResponse {
    favorited: bool,
}

#[derive(Deserialize)]
struct RoleQuery {
    #[serde(default)]
    role: Option<PartyRole>,
}

#[derive(Deserialize, Default)]
struct AdvanceRequest {
    #[serde(default)]
    target: Option<OrderStatus>,
}

#[derive(Serialize)]
struct ReadResponse {
    marked: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Accounts ───

async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<NewAccount>,
) -> Result<Created<Account>, ServerError> {
    let account = run(&state, move |m| m.create_account(req)).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn my_account(
    State(state): State<AppState>,
    Caller(me): Caller,
) -> Result<Json<Account>, ServerError> {
    Ok(Json(run(&state, move |m| m.account(&me)).await?))
}

// ─── Listings ───

async fn create_listing(
    State(state): State<AppState>,
    Caller(me): Caller,
    Json(req): Json<NewListing>,
) -> Result<Created<Listing>, ServerError> {
    let listing = run(&state, move |m| m.create_listing(&me, req)).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<ListingId>,
) -> Result<Json<Listing>, ServerError> {
    Ok(Json(run(&state, move |m| m.get_listing(id)).await?))
}

async fn publish_listing(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<ListingId>,
) -> Result<Json<Listing>, ServerError> {
    Ok(Json(run(&state, move |m| m.publish_listing(&me, id)).await?))
}

async fn drop_price(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<ListingId>,
    Json(req): Json<PriceDropRequest>,
) -> Result<Json<Listing>, ServerError> {
    Ok(Json(
        run(&state, move |m| m.drop_price(&me, id, req.price_cents)).await?,
    ))
}

async fn delete_listing(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<ListingId>,
) -> Result<Json<Listing>, ServerError> {
    Ok(Json(run(&state, move |m| m.delete_listing(&me, id)).await?))
}

async fn favorite(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<ListingId>,
) -> Result<Json<FavoriteResponse>, ServerError> {
    run(&state, move |m| m.favorite(&me, id)).await?;
    Ok(Json(FavoriteResponse { favorited: true }))
}

async fn unfavorite(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<ListingId>,
) -> Result<Json<FavoriteResponse>, ServerError> {
    run(&state, move |m| m.unfavorite(&me, id)).await?;
    Ok(Json(FavoriteResponse { favorited: false }))
}

async fn purchase_listing(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<ListingId>,
    Json(req): Json<PurchaseListing>,
) -> Result<Created<Order>, ServerError> {
    let order = run(&state, move |m| m.purchase_listing(&me, id, req)).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

// ─── Offers ───

async fn create_offer(
    State(state): State<AppState>,
    Caller(me): Caller,
    Json(req): Json<CreateOffer>,
) -> Result<Created<Offer>, ServerError> {
    let offer = run(&state, move |m| m.create_offer(&me, req)).await?;
    Ok((StatusCode::CREATED, Json(offer)))
}

async fn create_private_offer(
    State(state): State<AppState>,
    Caller(me): Caller,
    Json(req): Json<CreatePrivateOffer>,
) -> Result<Created<Offer>, ServerError> {
    let offer = run(&state, move |m| m.create_private_offer(&me, req)).await?;
    Ok((StatusCode::CREATED, Json(offer)))
}

async fn broadcast_offer(
    State(state): State<AppState>,
    Caller(me): Caller,
    Json(req): Json<BroadcastOffer>,
) -> Result<Created<Vec<Offer>>, ServerError> {
    let offers = run(&state, move |m| m.broadcast_offer(&me, req)).await?;
    info!(recipients = offers.len(), "Broadcast offer sent via API");
    Ok((StatusCode::CREATED, Json(offers)))
}

async fn get_offer(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<OfferId>,
) -> Result<Json<Offer>, ServerError> {
    Ok(Json(run(&state, move |m| m.get_offer(&me, id)).await?))
}

async fn accept_offer(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<OfferId>,
    body: Option<Json<AcceptOffer>>,
) -> Result<Created<Order>, ServerError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let order = run(&state, move |m| m.accept_offer(&me, id, req)).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn decline_offer(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<OfferId>,
) -> Result<Json<Offer>, ServerError> {
    Ok(Json(run(&state, move |m| m.decline_offer(&me, id)).await?))
}

// ─── Orders ───

async fn list_orders(
    State(state): State<AppState>,
    Caller(me): Caller,
    Query(q): Query<RoleQuery>,
) -> Result<Json<Vec<Order>>, ServerError> {
    let role = q.role.unwrap_or(PartyRole::Buyer);
    Ok(Json(run(&state, move |m| m.list_orders(&me, role)).await?))
}

async fn get_order(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>, ServerError> {
    Ok(Json(run(&state, move |m| m.get_order(&me, id)).await?))
}

async fn advance_order(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<OrderId>,
    body: Option<Json<AdvanceRequest>>,
) -> Result<Json<Order>, ServerError> {
    let target = body.map(|Json(b)| b).unwrap_or_default().target;
    Ok(Json(
        run(&state, move |m| m.advance_order(&me, id, target)).await?,
    ))
}

async fn issue_refund(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<OrderId>,
    Json(req): Json<IssueRefund>,
) -> Result<Json<Order>, ServerError> {
    Ok(Json(run(&state, move |m| m.issue_refund(&me, id, req)).await?))
}

// ─── Conversations ───

async fn inbox(
    State(state): State<AppState>,
    Caller(me): Caller,
) -> Result<Json<Inbox>, ServerError> {
    Ok(Json(run(&state, move |m| m.inbox(&me)).await?))
}

async fn thread_messages(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<ThreadId>,
) -> Result<Json<Vec<Message>>, ServerError> {
    Ok(Json(run(&state, move |m| m.thread_messages(&me, id)).await?))
}

async fn mark_thread_read(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<ThreadId>,
) -> Result<Json<ReadResponse>, ServerError> {
    let marked = run(&state, move |m| m.mark_thread_read(&me, id)).await?;
    Ok(Json(ReadResponse { marked }))
}

async fn send_message(
    State(state): State<AppState>,
    Caller(me): Caller,
    Json(req): Json<SendMessage>,
) -> Result<Created<Message>, ServerError> {
    let message = run(&state, move |m| m.send_message(&me, req)).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
