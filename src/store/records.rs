use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The entity families the store knows about. Each kind owns a key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Client,
    Product,
    User,
    Order,
    Stock,
}

impl EntityKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::Client => "client",
            EntityKind::Product => "product",
            EntityKind::User => "user",
            EntityKind::Order => "order",
            EntityKind::Stock => "stock",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// End-user role, carried inside JWT claims and replicated user records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Auditor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub version: u64,
    pub last_modified_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub active: bool,
    pub version: u64,
    pub last_modified_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored user. The password hash replicates with the record so any node can
/// authenticate the user locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub version: u64,
    pub last_modified_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub product_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub client_id: String,
    pub client_name: String,
    pub items: Vec<OrderItem>,
    pub status: String,
    pub version: u64,
    pub last_modified_by: String,
    pub created_at: DateTime<Utc>,
}

/// Stock level for one product. A missing row reads as quantity 0, version 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: String,
    pub quantity: i64,
    pub version: u64,
    pub last_modified_by: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub reference: Option<String>,
}

impl StockRecord {
    /// Zero-quantity placeholder for a product that has never had stock.
    pub fn empty(product_id: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            quantity: 0,
            version: 0,
            last_modified_by: String::new(),
            updated_at: Utc::now(),
            reference: None,
        }
    }
}
