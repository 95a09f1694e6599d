//! Routing table fed by a resolver
//!
//! Keeps the latest resolved [`State`] and lets routing policies subscribe
//! to replacements.

use tokio::sync::watch;

use crate::error::Result;
use crate::resolver::{Address, ClientConn, State};

pub struct RoutingTable {
    state: watch::Sender<State>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTable {
    pub fn new() -> Self {
        let (state, _) = watch::channel(State::default());
        Self { state }
    }

    /// Latest resolved state.
    pub fn state(&self) -> State {
        self.state.borrow().clone()
    }

    /// Receive every replacement of the resolved state.
    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    pub fn leader(&self) -> Option<Address> {
        self.state.borrow().leader().cloned()
    }

    pub fn followers(&self) -> Vec<Address> {
        self.state.borrow().followers().cloned().collect()
    }
}

impl ClientConn for RoutingTable {
    fn update_state(&self, state: State) -> Result<()> {
        self.state.send_replace(state);
        Ok(())
    }
}
