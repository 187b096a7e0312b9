use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::config::NodeConfig;
use crate::error::DbError;
use crate::inventory::InventoryService;
use crate::replication::{
    EventKind, EventLog, ReceiveOutcome, ReplicaReceiver, ReplicationEvent, ReplicationQueue,
    REPLICA_TOKEN_HEADER,
};
use crate::server::auth::{require_admin, AuthService, Claims};
use crate::status::{StatusReporter, StatusSnapshot};
use crate::store::{
    ClientRecord, OrderItem, OrderRecord, ProductRecord, Role, StockRecord, StorageEngine,
    UserRecord,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<NodeConfig>,
    pub inventory: Arc<InventoryService>,
    pub events: EventLog,
    pub queues: Arc<ReplicationQueue>,
    pub receiver: Arc<ReplicaReceiver>,
    pub status: Arc<StatusReporter>,
}

impl AppState {
    /// Wire the engine, domain service, and replication plumbing together.
    pub fn new(config: NodeConfig, engine: Arc<StorageEngine>) -> Self {
        let config = Arc::new(config);
        let inventory = Arc::new(InventoryService::new(
            engine.clone(),
            config.node_id.clone(),
        ));
        let queues = Arc::new(ReplicationQueue::new(&config.peers));
        let receiver = Arc::new(ReplicaReceiver::new(
            inventory.clone(),
            config.replication_token.clone(),
            config.seen_cache_size,
        ));
        let status = Arc::new(StatusReporter::new(
            engine,
            queues.clone(),
            config.node_id.clone(),
        ));

        Self {
            events: EventLog::new(config.node_id.clone()),
            config,
            inventory,
            queues,
            receiver,
            status,
        }
    }
}

// ==================== Request/Response Types ====================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::Operator
}

/// User as exposed over the API: everything but the password hash.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub username: String,
    pub role: Role,
    pub version: u64,
    pub last_modified_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for UserView {
    fn from(user: UserRecord) -> Self {
        Self {
            username: user.username,
            role: user.role,
            version: user.version,
            last_modified_by: user.last_modified_by,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub name: String,
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub client_id: String,
    pub items: Vec<OrderItemRequest>,
    /// Optional caller-chosen id, useful for controlled tests
    #[serde(default)]
    pub order_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order: OrderRecord,
}

#[derive(Debug, Deserialize)]
pub struct StockAdjustRequest {
    pub delta: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReplicaEventResponse {
    pub outcome: String,
}

// ==================== Auth Handlers ====================

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, DbError> {
    let user = state
        .inventory
        .get_user(&req.username)?
        .ok_or_else(|| DbError::Unauthorized("Invalid credentials".to_string()))?;

    if !AuthService::verify_password(&req.password, &user.password_hash) {
        return Err(DbError::Unauthorized("Invalid credentials".to_string()));
    }

    let token = AuthService::create_jwt(&user.username, user.role, state.config.jwt_expires_minutes)?;
    Ok(Json(TokenResponse {
        access_token: token,
        token_type: "bearer".to_string(),
    }))
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<UserView>, DbError> {
    require_admin(&claims)?;
    if req.username.len() < 3 {
        return Err(DbError::BadRequest(
            "username must be at least 3 characters".to_string(),
        ));
    }
    if req.password.len() < 6 {
        return Err(DbError::BadRequest(
            "password must be at least 6 characters".to_string(),
        ));
    }

    let password_hash = AuthService::hash_password(&req.password)?;
    let user = state
        .inventory
        .upsert_user(req.username, password_hash, req.role)?;

    let event = state.events.record(
        EventKind::UserUpsert,
        &user.username,
        user.version,
        json!({ "user": &user }),
    );
    state.queues.broadcast(event);

    Ok(Json(user.into()))
}

pub async fn current_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserView>, DbError> {
    let user = state
        .inventory
        .get_user(&claims.sub)?
        .ok_or_else(|| DbError::UserNotFound(claims.sub.clone()))?;
    Ok(Json(user.into()))
}

// ==================== Client Handlers ====================

pub async fn create_client(
    State(state): State<AppState>,
    Json(req): Json<CreateClientRequest>,
) -> Result<Json<ClientRecord>, DbError> {
    if req.name.len() < 2 {
        return Err(DbError::BadRequest(
            "client name must be at least 2 characters".to_string(),
        ));
    }

    let client = state
        .inventory
        .upsert_client(None, req.name, req.document, req.email)?;

    let event = state.events.record(
        EventKind::ClientUpsert,
        &client.id,
        client.version,
        json!({ "client": &client }),
    );
    state.queues.broadcast(event);

    Ok(Json(client))
}

pub async fn list_clients(
    State(state): State<AppState>,
) -> Result<Json<Vec<ClientRecord>>, DbError> {
    Ok(Json(state.inventory.list_clients()?))
}

pub async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClientRecord>, DbError> {
    let client = state
        .inventory
        .get_client(&id)?
        .ok_or(DbError::ClientNotFound(id))?;
    Ok(Json(client))
}

// ==================== Product Handlers ====================

pub async fn create_product(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateProductRequest>,
) -> Result<Json<ProductRecord>, DbError> {
    require_admin(&claims)?;
    if req.name.len() < 2 {
        return Err(DbError::BadRequest(
            "product name must be at least 2 characters".to_string(),
        ));
    }

    let product = state
        .inventory
        .upsert_product(None, req.name, req.description, req.active)?;

    let event = state.events.record(
        EventKind::ProductUpsert,
        &product.id,
        product.version,
        json!({ "product": &product }),
    );
    state.queues.broadcast(event);

    Ok(Json(product))
}

pub async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProductRecord>>, DbError> {
    Ok(Json(state.inventory.list_products()?))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProductRecord>, DbError> {
    let product = state
        .inventory
        .get_product(&id)?
        .ok_or(DbError::ProductNotFound(id))?;
    Ok(Json(product))
}

// ==================== Order Handlers ====================

pub async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<OrderResponse>, DbError> {
    let items: Vec<OrderItem> = req
        .items
        .into_iter()
        .map(|item| OrderItem {
            product_id: item.product_id,
            quantity: item.quantity,
            product_name: None,
        })
        .collect();

    let (order, stock_updates, products) = state
        .inventory
        .create_order(&req.client_id, items, req.order_id)
        .await?;

    // The order event embeds client and products so replicas can resolve
    // references before inserting the order row.
    let client = state.inventory.get_client(&order.client_id)?;
    let event = state.events.record(
        EventKind::OrderCreated,
        &order.id,
        order.version,
        json!({ "order": &order, "client": &client, "products": &products }),
    );
    state.queues.broadcast(event);

    for entry in &stock_updates {
        let product = products.iter().find(|p| p.id == entry.product_id);
        let event = state.events.record(
            EventKind::StockUpdate,
            &entry.product_id,
            entry.version,
            json!({ "entry": entry, "product": product }),
        );
        state.queues.broadcast(event);
    }

    Ok(Json(OrderResponse { order }))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderRecord>, DbError> {
    let order = state
        .inventory
        .get_order(&id)?
        .ok_or(DbError::OrderNotFound(id))?;
    Ok(Json(order))
}

// ==================== Stock Handlers ====================

pub async fn get_stock(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<StockRecord>, DbError> {
    Ok(Json(state.inventory.get_stock(&product_id)?))
}

pub async fn adjust_stock(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Json(req): Json<StockAdjustRequest>,
) -> Result<Json<StockRecord>, DbError> {
    if req.delta == 0 {
        return Err(DbError::BadRequest("delta cannot be zero".to_string()));
    }
    let reference = req.reason.unwrap_or_else(|| "manual-adjustment".to_string());

    let entry = state
        .inventory
        .adjust_stock(&product_id, req.delta, &reference)
        .await?;

    let product = state.inventory.get_product(&product_id)?;
    let event = state.events.record(
        EventKind::StockUpdate,
        &entry.product_id,
        entry.version,
        json!({ "entry": &entry, "product": &product }),
    );
    state.queues.broadcast(event);

    Ok(Json(entry))
}

// ==================== Status / Replication Handlers ====================

pub async fn node_status(State(state): State<AppState>) -> Result<Json<StatusSnapshot>, DbError> {
    Ok(Json(state.status.snapshot()?))
}

pub async fn replica_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<ReplicationEvent>,
) -> Result<Json<ReplicaEventResponse>, DbError> {
    let presented = headers
        .get(REPLICA_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok());

    let outcome = state.receiver.receive(&event, presented).await?;
    let outcome = match outcome {
        ReceiveOutcome::Accepted => "accepted",
        ReceiveOutcome::DuplicateIgnored => "duplicate_ignored",
    };
    Ok(Json(ReplicaEventResponse {
        outcome: outcome.to_string(),
    }))
}
