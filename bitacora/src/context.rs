//! Request identifiers and the per-request logging scope
//!
//! Every record carries the identifier of the request that produced it
//! (`reqId`) when one is in scope. The scope is a tokio task-local, so it
//! follows the request across `.await` points without being threaded through
//! every call.
//!
//! ```rust
//! use bitacora::context::{current_request_id, with_request_id, RequestId};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let id = RequestId::new();
//! let seen = with_request_id(id.to_string(), async { current_request_id() }).await;
//! assert_eq!(seen.as_deref(), Some(id.as_str()));
//! # }
//! ```
//!
//! Request IDs use the TypeID format (`req_<base32 uuidv7>`), which keeps
//! them readable and time-sortable.

use mti::prelude::*;
use std::fmt;
use std::future::Future;
use std::str::FromStr;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Identifier generated for requests that arrive without one
///
/// `req_<base32 uuidv7>`, e.g. `req_01h455vb4pex5vsknk084sn02q`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(MagicTypeId);

impl RequestId {
    pub const PREFIX: &'static str = "req";

    #[must_use]
    pub fn new() -> Self {
        Self(Self::PREFIX.create_type_id::<V7>())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestId {
    type Err = RequestIdError;

    /// Parse a generated identifier; upstream ids need not be parseable
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = MagicTypeId::from_str(s)?;
        let prefix = id.prefix().as_str().to_string();
        if prefix != Self::PREFIX {
            return Err(RequestIdError::InvalidPrefix(prefix));
        }
        Ok(Self(id))
    }
}

/// A string that is not a generated request identifier
#[derive(Debug, thiserror::Error)]
pub enum RequestIdError {
    #[error("malformed request id: {0}")]
    Parse(#[from] MagicTypeIdError),

    #[error("request id prefix must be `req`, got `{0}`")]
    InvalidPrefix(String),
}

/// Run a future with `id` as the current request identifier
///
/// Identifiers coming from upstream headers are accepted verbatim; they do
/// not have to be [`RequestId`]s.
pub async fn with_request_id<F>(id: impl Into<String>, fut: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(id.into(), fut).await
}

/// Run a closure with `id` as the current request identifier
pub fn sync_with_request_id<R>(id: impl Into<String>, f: impl FnOnce() -> R) -> R {
    REQUEST_ID.sync_scope(id.into(), f)
}

/// The request identifier in scope, if any
///
/// Empty identifiers are treated as absent.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID
        .try_with(|id| id.clone())
        .ok()
        .filter(|id| !id.is_empty())
}
