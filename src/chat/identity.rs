use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{DisplayName, User, UserId};

/// What an identity provider knows about the person who just signed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    pub fn into_user(self) -> User {
        User {
            id: self.user_id,
            display_name: self.display_name.and_then(|name| DisplayName::parse(&name).ok()),
            avatar_url: self.avatar_url,
            email: self.email,
        }
    }
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            display_name: user.display_name.as_ref().map(|name| name.as_str().to_owned()),
            avatar_url: user.avatar_url.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("login cancelled")]
    Cancelled,
    #[error("{0}")]
    Rejected(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self) -> Result<Identity, AuthFailure>;

    async fn set_display_name(&self, name: &DisplayName) -> Result<(), AuthFailure>;

    async fn sign_out(&self);
}
