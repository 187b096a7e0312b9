use axum::http::Method;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::auth_middleware;
use super::handlers::*;

pub fn create_router(state: AppState) -> Router {
    // Domain routes sit behind bearer auth; login and the inter-node
    // replication endpoint authenticate differently.
    let protected = Router::new()
        .route("/users", post(create_user))
        .route("/users/me", get(current_user))
        .route("/clients", post(create_client).get(list_clients))
        .route("/clients/{id}", get(get_client))
        .route("/products", post(create_product).get(list_products))
        .route("/products/{id}", get(get_product))
        .route("/orders", post(create_order))
        .route("/orders/{id}", get(get_order))
        .route("/stock/{product_id}", get(get_stock).put(adjust_stock))
        .route("/status", get(node_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let public = Router::new()
        .route("/auth/login", post(login))
        .route("/replica/event", post(replica_event));

    Router::new()
        .merge(protected)
        .merge(public)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
                .allow_headers(Any),
        )
}
