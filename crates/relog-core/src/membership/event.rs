// Member change events
// Join/leave notifications are queued by the member table and delivered in
// order by a single dispatcher task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::HandlerError;

/// Type of member change event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberChangeType {
    /// A member entered the live set
    MemberJoin,
    /// A member left the live set (failed or departed)
    MemberLeave,
}

impl std::fmt::Display for MemberChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberChangeType::MemberJoin => write!(f, "MEMBER_JOIN"),
            MemberChangeType::MemberLeave => write!(f, "MEMBER_LEAVE"),
        }
    }
}

/// Member change event
#[derive(Clone, Debug)]
pub struct MemberChangeEvent {
    pub change_type: MemberChangeType,
    pub member_id: String,
    /// RPC address of the member, empty for leaves
    pub rpc_addr: String,
    /// Milliseconds since the epoch when the change was observed
    pub timestamp: i64,
}

impl MemberChangeEvent {
    pub fn member_join(member_id: impl Into<String>, rpc_addr: impl Into<String>) -> Self {
        Self {
            change_type: MemberChangeType::MemberJoin,
            member_id: member_id.into(),
            rpc_addr: rpc_addr.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn member_leave(member_id: impl Into<String>) -> Self {
        Self {
            change_type: MemberChangeType::MemberLeave,
            member_id: member_id.into(),
            rpc_addr: String::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Receiver of membership changes
#[async_trait::async_trait]
pub trait MemberEventHandler: Send + Sync {
    /// Called when member `id` serving RPCs at `rpc_addr` joins.
    async fn join(&self, id: &str, rpc_addr: &str) -> Result<(), HandlerError>;

    /// Called when member `id` leaves or fails.
    async fn leave(&self, id: &str) -> Result<(), HandlerError>;
}

/// Deliver queued events to `handler` one at a time until `shutdown` fires
/// or every sender is gone.
pub(crate) fn spawn_dispatcher(
    mut events: mpsc::UnboundedReceiver<MemberChangeEvent>,
    handler: Arc<dyn MemberEventHandler>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            info!(
                member = %event.member_id,
                "Dispatching member change event: {}",
                event.change_type
            );
            let result = match event.change_type {
                MemberChangeType::MemberJoin => {
                    handler.join(&event.member_id, &event.rpc_addr).await
                }
                MemberChangeType::MemberLeave => handler.leave(&event.member_id).await,
            };
            if let Err(e) = result {
                error!(
                    member = %event.member_id,
                    "Failed to handle {} event: {}",
                    event.change_type, e
                );
            }
        }
        debug!("Member event dispatcher stopped");
    })
}
