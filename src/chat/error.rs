use thiserror::Error;

use crate::store::StoreError;

use super::{AuthFailure, RoomKey, UserId};

/// Everything a chat operation can refuse with. None of these are fatal; the
/// session stays usable and the caller decides whether to try again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    AuthFailed(#[from] AuthFailure),
    #[error("session is already signed in")]
    AlreadyAuthenticated,
    #[error("not signed in")]
    Unauthenticated,
    #[error("room {0} does not exist")]
    RoomNotFound(RoomKey),
    #[error("room keys are six letters or digits, got {0:?}")]
    InvalidRoomKey(String),
    #[error("user {0} is not known")]
    UnknownUser(UserId),
    #[error("message body is empty")]
    EmptyBody,
    #[error("username is empty")]
    EmptyUsername,
    #[error("no room or conversation selected")]
    NoContext,
    #[error("write rejected: {0}")]
    WriteFailed(#[source] StoreError),
    #[error("read failed: {0}")]
    Store(#[source] StoreError),
    #[error("feed subscription failed: {0}")]
    SubscriptionError(#[source] StoreError),
}
