//! Client error types for Relog

/// Error type for Relog client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("invalid target '{0}'")]
    InvalidTarget(String),

    #[error("no resolver registered for scheme '{0}'")]
    UnknownScheme(String),

    #[error("resolver is closed")]
    Closed,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
