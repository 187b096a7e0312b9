use std::time::Duration;

use uuid::Uuid;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn split_csv(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Immutable per-process node configuration.
///
/// Topology (port, peers, data dir) comes from the CLI; secrets and tuning
/// come from the environment. Treated as read-only for the process lifetime.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique identifier for this node, stamped on every mutation it originates
    pub node_id: String,

    /// Port the HTTP API listens on
    pub port: u16,

    /// Data directory path
    pub data_dir: String,

    /// Base URLs of peer nodes this node replicates to
    pub peers: Vec<String>,

    /// Shared inter-node secret checked on the inbound replication endpoint
    pub replication_token: String,

    /// Fixed delay between redelivery attempts for a failing peer
    pub retry_interval: Duration,

    /// Timeout for a single outbound replication request
    pub request_timeout: Duration,

    /// End-user JWT lifetime in minutes
    pub jwt_expires_minutes: u64,

    /// Bootstrap admin credentials, created on first start
    pub admin_user: String,
    pub admin_password: String,

    /// Capacity of the seen-event-id dedup cache on the receive path
    pub seen_cache_size: usize,
}

impl NodeConfig {
    /// Build the configuration from CLI values plus environment variables.
    pub fn new(node_id: Option<String>, port: u16, data_dir: String, peers: Vec<String>) -> Self {
        let node_id = node_id
            .or_else(|| std::env::var("NODE_NAME").ok())
            .unwrap_or_else(|| {
                // Stable-ish default: hostname + random suffix
                let host = hostname::get()
                    .map(|h| h.to_string_lossy().to_string())
                    .unwrap_or_else(|_| "node".to_string());
                format!("{}-{}", host, &Uuid::new_v4().to_string()[..8])
            });

        let mut peers = peers;
        if peers.is_empty() {
            peers = split_csv(std::env::var("PEERS").ok());
        }
        let peers = peers.into_iter().map(normalize_peer_url).collect();

        let replication_token = match std::env::var("REPLICATION_TOKEN") {
            Ok(token) if !token.is_empty() => token,
            _ => {
                tracing::warn!(
                    "REPLICATION_TOKEN is not set - using the default development secret"
                );
                "replica-secret".to_string()
            }
        };

        Self {
            node_id,
            port,
            data_dir,
            peers,
            replication_token,
            retry_interval: Duration::from_secs(env_or("REPLICATION_RETRY_SECONDS", 10)),
            request_timeout: Duration::from_secs(env_or("REPLICATION_TIMEOUT_SECONDS", 10)),
            jwt_expires_minutes: env_or("JWT_EXPIRES_MINUTES", 60),
            admin_user: std::env::var("ADMIN_USER").unwrap_or_else(|_| "admin".to_string()),
            admin_password: std::env::var("ADMIN_PASSWORD")
                .unwrap_or_else(|_| "admin123".to_string()),
            seen_cache_size: env_or("SEEN_CACHE_SIZE", 4096),
        }
    }
}

/// Trim whitespace and trailing slashes, default the scheme to http.
fn normalize_peer_url(url: String) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}
