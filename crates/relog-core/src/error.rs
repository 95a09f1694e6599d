//! Error types for the core components

use tonic::Status;

/// Error returned by member event handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Commit log errors
#[derive(thiserror::Error, Debug)]
pub enum LogError {
    #[error("offset out of range: {0}")]
    OffsetOutOfRange(u64),

    #[error("commit log is closed")]
    Closed,

    #[error("corrupt record at byte position {position}")]
    Corrupt { position: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LogError {
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, LogError::OffsetOutOfRange(_))
    }
}

impl From<LogError> for Status {
    fn from(err: LogError) -> Self {
        match err {
            LogError::OffsetOutOfRange(offset) => {
                Status::out_of_range(format!("offset out of range: {}", offset))
            }
            LogError::Closed => Status::unavailable(err.to_string()),
            LogError::Corrupt { .. } => Status::data_loss(err.to_string()),
            LogError::Io(_) => Status::internal(err.to_string()),
        }
    }
}

/// Replication errors
#[derive(thiserror::Error, Debug)]
pub enum ReplicationError {
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("gRPC error: {0}")]
    Grpc(#[from] Status),

    #[error("invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("replication stream from '{0}' ended")]
    StreamEnded(String),
}

/// Membership errors
#[derive(thiserror::Error, Debug)]
pub enum MembershipError {
    #[error("failed to bind gossip listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("gRPC error: {0}")]
    Grpc(#[from] Status),

    #[error("no seed address could be reached: {0:?}")]
    JoinFailed(Vec<String>),

    #[error("membership has already left the cluster")]
    AlreadyLeft,

    #[error(transparent)]
    Config(#[from] relog_common::RelogError),
}
