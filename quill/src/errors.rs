use std::borrow::Cow;

use thiserror::Error;

/// Top-level error type returned by the engagement pipeline.
///
/// The four variants mirror the failure kinds a caller can observe: ownership violations,
/// missing referenced documents, malformed input, and failures of the backing store itself.
#[derive(Debug, Error)]
pub enum EngagementError {
    /// The actor does not own the resource it attempted to mutate.
    #[error("unauthorized: {actor} may not modify {resource}")]
    Unauthorized { actor: String, resource: String },

    /// A referenced document (parent comment, chapter, book, notification) does not exist.
    #[error("{collection}/{id} not found")]
    NotFound { collection: Cow<'static, str>, id: String },

    /// Invalid input supplied to an operation.
    #[error("invalid argument `{field}`: {message}")]
    InvalidArgument { field: Cow<'static, str>, message: String },

    /// The remote store call failed (network, quota, serialization).
    #[error("transient store failure: {0}")]
    Store(#[from] StoreError),
}

impl EngagementError {
    pub fn unauthorized(actor: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::Unauthorized {
            actor: actor.into(),
            resource: resource.into(),
        }
    }

    pub fn not_found(collection: impl Into<Cow<'static, str>>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn invalid(field: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the failure came from the store rather than from the caller's input.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Failures raised by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying Redis command failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A `create` write targeted a document that already exists.
    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    /// Object storage (avatar files) failed.
    #[error("object storage error: {0}")]
    Io(#[from] std::io::Error),

    /// More ids were passed to a batched lookup than the store accepts in one call.
    #[error("id in-list of {len} exceeds the limit of {max}")]
    InListTooLarge { len: usize, max: usize },

    /// Any other backend failure.
    #[error("{message}")]
    Backend { message: Cow<'static, str> },
}

impl StoreError {
    pub fn backend(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Failures reported while handing a message to the push gateway.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("push gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("push gateway rejected message: {message}")]
    Rejected { message: String },

    #[error("invalid push gateway endpoint `{endpoint}`")]
    Endpoint { endpoint: String },
}

/// Convenience alias used throughout the pipeline.
pub type EngagementResult<T> = Result<T, EngagementError>;
