//! Core data models shared by the persistence, auth, and HTTP layers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A registered user row.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub hashed_password: String,
}

/// Registration request body for `POST /users/`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserCreate {
    pub email: String,
    pub password: String,
}

/// Public view of a user; never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserOut {
    pub id: i64,
    pub email: String,
}

impl From<User> for UserOut {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
        }
    }
}

/// One client-side event submitted to `POST /log-event/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogCreate {
    pub session_id: String,
    pub event_type: String,
    pub payload: Map<String, Value>,
}
