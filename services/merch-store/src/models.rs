use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Coins a freshly registered user starts with.
pub const DEFAULT_STARTING_BALANCE: i64 = 1000;

/// Catalog the initial migration seeds; the in-memory store starts from the same list.
pub const DEFAULT_CATALOG: &[(&str, i64)] = &[
    ("t-shirt", 80),
    ("cup", 20),
    ("book", 50),
    ("pen", 10),
    ("powerbank", 200),
    ("hoody", 300),
    ("umbrella", 200),
    ("socks", 10),
    ("wallet", 50),
    ("pink-hoody", 500),
];

/// Registered employee and their coin balance
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct User {
    pub name: String,
    pub credential_hash: String,
    pub coins: i64,
}

/// Catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Item {
    pub name: String,
    pub price: i64,
}

/// Purchased items owned by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct InventoryEntry {
    pub item_name: String,
    pub quantity: i64,
}

/// Immutable ledger row written once per completed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Transfer {
    pub id: i64,
    pub from_user_name: String,
    pub to_user_name: String,
    pub amount: i64,
}

/// Everything the info view shows about one user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserInfo {
    pub balance: i64,
    pub inventory: Vec<InventoryEntry>,
    pub sent: Vec<Transfer>,
    pub received: Vec<Transfer>,
}

impl UserInfo {
    /// Splits a user's ledger history by direction.
    pub fn new(user: &str, balance: i64, inventory: Vec<InventoryEntry>, history: Vec<Transfer>) -> Self {
        let (sent, received): (Vec<Transfer>, Vec<Transfer>) = history
            .into_iter()
            .partition(|transfer| transfer.from_user_name == user);

        UserInfo {
            balance,
            inventory,
            sent,
            received,
        }
    }
}

/// Authentication request
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct AuthRequest {
    #[validate(length(min = 1, max = 64), custom = "not_blank")]
    pub username: String,
    #[validate(length(min = 1, max = 128), custom = "not_blank")]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
}

/// Coin transfer request
#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendCoinRequest {
    #[validate(length(min = 1, max = 64), custom = "not_blank")]
    pub to_user: String,
    pub amount: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Info view as returned over HTTP
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    pub coins: i64,
    pub inventory: Vec<InventoryItemResponse>,
    pub coin_history: CoinHistoryResponse,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryItemResponse {
    #[serde(rename = "type")]
    pub item_type: String,
    pub quantity: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CoinHistoryResponse {
    pub received: Vec<ReceivedCoins>,
    pub sent: Vec<SentCoins>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedCoins {
    pub from_user: String,
    pub amount: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SentCoins {
    pub to_user: String,
    pub amount: i64,
}

impl From<UserInfo> for InfoResponse {
    fn from(info: UserInfo) -> Self {
        InfoResponse {
            coins: info.balance,
            inventory: info
                .inventory
                .into_iter()
                .map(|entry| InventoryItemResponse {
                    item_type: entry.item_name,
                    quantity: entry.quantity,
                })
                .collect(),
            coin_history: CoinHistoryResponse {
                received: info
                    .received
                    .into_iter()
                    .map(|transfer| ReceivedCoins {
                        from_user: transfer.from_user_name,
                        amount: transfer.amount,
                    })
                    .collect(),
                sent: info
                    .sent
                    .into_iter()
                    .map(|transfer| SentCoins {
                        to_user: transfer.to_user_name,
                        amount: transfer.amount,
                    })
                    .collect(),
            },
        }
    }
}

fn not_blank(value: &str) -> Result<(), validator::ValidationError> {
    if value.trim().is_empty() {
        return Err(validator::ValidationError::new("blank"));
    }
    Ok(())
}
