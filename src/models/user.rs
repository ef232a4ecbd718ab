use serde::{Deserialize, Serialize};

/// An authenticated account, resolved from an API token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Staff accounts may write platforms and any review
    pub is_staff: bool,
}
