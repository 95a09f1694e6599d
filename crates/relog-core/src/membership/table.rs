// Member table
// Holds the local view of every member ever seen and applies the merge and
// failure-detection rules. Changes to the live set are queued as events
// while the affected entry is still locked, so events for one member are
// emitted in the order the transitions happened.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tracing::{debug, info};

use relog_api::Member;
use relog_api::membership::v1::{MemberState, MemberStatus};

use super::event::MemberChangeEvent;

struct MemberEntry {
    state: MemberState,
    /// Last time the member's incarnation advanced
    updated_at: Instant,
    /// When the member left the live set; `None` while live
    tombstoned_at: Option<Instant>,
}

fn is_live(status: MemberStatus) -> bool {
    matches!(status, MemberStatus::Alive | MemberStatus::Suspect)
}

fn precedence(status: MemberStatus) -> u8 {
    match status {
        MemberStatus::Alive => 0,
        MemberStatus::Suspect => 1,
        MemberStatus::Dead => 2,
        MemberStatus::Left => 3,
    }
}

/// Whether `incoming` carries newer information than `current`.
fn supersedes(incoming: &MemberState, current: &MemberState) -> bool {
    incoming.incarnation > current.incarnation
        || (incoming.incarnation == current.incarnation
            && precedence(incoming.status()) > precedence(current.status()))
}

pub(crate) struct MemberTable {
    local_id: String,
    members: DashMap<String, MemberEntry>,
    events: mpsc::UnboundedSender<MemberChangeEvent>,
}

impl MemberTable {
    pub(crate) fn new(
        local: MemberState,
        events: mpsc::UnboundedSender<MemberChangeEvent>,
    ) -> Self {
        let local_id = local.id.clone();
        let members = DashMap::new();
        members.insert(
            local_id.clone(),
            MemberEntry {
                state: local,
                updated_at: Instant::now(),
                tombstoned_at: None,
            },
        );
        Self {
            local_id,
            members,
            events,
        }
    }

    fn emit(&self, event: MemberChangeEvent) {
        // The receiver only goes away once membership has stopped
        let _ = self.events.send(event);
    }

    #[cfg(test)]
    pub(crate) fn local_state(&self) -> Option<MemberState> {
        self.members
            .get(&self.local_id)
            .map(|entry| entry.state.clone())
    }

    /// Advance the local incarnation so peers see this member as alive.
    pub(crate) fn heartbeat(&self) {
        if let Some(mut entry) = self.members.get_mut(&self.local_id)
            && entry.state.status() == MemberStatus::Alive
        {
            entry.state.incarnation += 1;
            entry.updated_at = Instant::now();
        }
    }

    /// Mark the local member as departed.
    pub(crate) fn mark_left(&self) {
        if let Some(mut entry) = self.members.get_mut(&self.local_id) {
            entry.state.incarnation += 1;
            entry.state.set_status(MemberStatus::Left);
        }
    }

    /// Full view, including dead and departed members.
    pub(crate) fn snapshot(&self) -> Vec<MemberState> {
        self.members
            .iter()
            .map(|entry| entry.value().state.clone())
            .collect()
    }

    pub(crate) fn merge(&self, incoming: Vec<MemberState>) {
        for state in incoming {
            self.merge_one(state);
        }
    }

    fn merge_one(&self, incoming: MemberState) {
        if incoming.id.is_empty() {
            return;
        }
        if incoming.id == self.local_id {
            self.refute(&incoming);
            return;
        }

        match self.members.entry(incoming.id.clone()) {
            Entry::Vacant(vacant) => {
                let live = is_live(incoming.status());
                if live {
                    info!(
                        member = %incoming.id,
                        addr = %incoming.bind_addr,
                        "Discovered new member"
                    );
                    self.emit(MemberChangeEvent::member_join(
                        incoming.id.clone(),
                        incoming.rpc_addr.clone(),
                    ));
                }
                vacant.insert(MemberEntry {
                    state: incoming,
                    updated_at: Instant::now(),
                    tombstoned_at: (!live).then(Instant::now),
                });
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if !supersedes(&incoming, &entry.state) {
                    return;
                }

                let was_live = is_live(entry.state.status());
                let now_live = is_live(incoming.status());
                if incoming.incarnation > entry.state.incarnation {
                    entry.updated_at = Instant::now();
                }
                debug!(
                    member = %incoming.id,
                    incarnation = incoming.incarnation,
                    status = ?incoming.status(),
                    "Updating member"
                );
                entry.state = incoming;

                if !was_live && now_live {
                    entry.tombstoned_at = None;
                    info!(member = %entry.state.id, "Member rejoined");
                    self.emit(MemberChangeEvent::member_join(
                        entry.state.id.clone(),
                        entry.state.rpc_addr.clone(),
                    ));
                } else if was_live && !now_live {
                    entry.tombstoned_at = Some(Instant::now());
                    info!(member = %entry.state.id, status = ?entry.state.status(), "Member left");
                    self.emit(MemberChangeEvent::member_leave(entry.state.id.clone()));
                }
            }
        }
    }

    /// Answer a rumour about the local member that claims it is not alive.
    fn refute(&self, incoming: &MemberState) {
        if incoming.status() == MemberStatus::Alive {
            return;
        }
        if let Some(mut entry) = self.members.get_mut(&self.local_id)
            && entry.state.status() == MemberStatus::Alive
            && incoming.incarnation >= entry.state.incarnation
        {
            info!(
                incarnation = incoming.incarnation,
                "Refuting suspicion about local member"
            );
            entry.state.incarnation = incoming.incarnation + 1;
        }
    }

    /// Suspect members whose incarnation stalled and declare dead the ones
    /// that stayed silent past `dead_timeout`.
    pub(crate) fn detect_failures(&self, suspect_timeout: Duration, dead_timeout: Duration) {
        for mut entry in self.members.iter_mut() {
            if entry.key() == &self.local_id {
                continue;
            }
            let elapsed = entry.updated_at.elapsed();
            match entry.state.status() {
                MemberStatus::Alive | MemberStatus::Suspect if elapsed >= dead_timeout => {
                    info!(member = %entry.key(), ?elapsed, "Member declared dead");
                    entry.state.set_status(MemberStatus::Dead);
                    entry.tombstoned_at = Some(Instant::now());
                    self.emit(MemberChangeEvent::member_leave(entry.key().clone()));
                }
                MemberStatus::Alive if elapsed >= suspect_timeout => {
                    info!(member = %entry.key(), ?elapsed, "Member suspected");
                    entry.state.set_status(MemberStatus::Suspect);
                }
                _ => {}
            }
        }
    }

    /// Forget members that have been dead or departed for `tombstone_timeout`.
    pub(crate) fn expire_tombstones(&self, tombstone_timeout: Duration) {
        self.members.retain(|id, entry| {
            let expired = id != &self.local_id
                && entry
                    .tombstoned_at
                    .is_some_and(|at| at.elapsed() >= tombstone_timeout);
            if expired {
                debug!(member = %id, "Expiring member tombstone");
            }
            !expired
        });
    }

    /// Gossip addresses of up to `count` random live peers.
    pub(crate) fn gossip_targets(&self, count: usize) -> Vec<String> {
        let mut targets = self.live_peer_addrs();
        targets.shuffle(&mut rand::rng());
        targets.truncate(count);
        targets
    }

    /// Gossip addresses of every live peer.
    pub(crate) fn live_peer_addrs(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|entry| entry.key() != &self.local_id && is_live(entry.state.status()))
            .map(|entry| entry.state.bind_addr.clone())
            .collect()
    }

    /// Live members, including the local one, sorted by id.
    pub(crate) fn live_members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .members
            .iter()
            .filter(|entry| is_live(entry.state.status()))
            .map(|entry| {
                Member::new(
                    entry.state.id.clone(),
                    entry.state.rpc_addr.clone(),
                    entry.state.is_leader,
                )
            })
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    #[cfg(test)]
    pub(crate) fn status_of(&self, id: &str) -> Option<MemberStatus> {
        self.members.get(id).map(|entry| entry.state.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::event::MemberChangeType;

    fn state(id: &str, incarnation: u64, status: MemberStatus) -> MemberState {
        MemberState {
            id: id.to_string(),
            bind_addr: format!("{}-gossip:1", id),
            rpc_addr: format!("{}-rpc:1", id),
            is_leader: false,
            incarnation,
            status: status as i32,
        }
    }

    fn table() -> (MemberTable, mpsc::UnboundedReceiver<MemberChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MemberTable::new(state("local", 10, MemberStatus::Alive), tx),
            rx,
        )
    }

    fn drain(
        rx: &mut mpsc::UnboundedReceiver<MemberChangeEvent>,
    ) -> Vec<(MemberChangeType, String)> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((event.change_type, event.member_id));
        }
        events
    }

    #[test]
    fn test_new_member_emits_join() {
        let (table, mut rx) = table();
        table.merge(vec![state("a", 1, MemberStatus::Alive)]);

        let events = drain(&mut rx);
        assert_eq!(events, vec![(MemberChangeType::MemberJoin, "a".to_string())]);
        assert_eq!(table.live_peer_addrs(), vec!["a-gossip:1".to_string()]);
    }

    #[test]
    fn test_unknown_departed_member_is_silent() {
        let (table, mut rx) = table();
        table.merge(vec![state("gone", 3, MemberStatus::Left)]);

        assert!(drain(&mut rx).is_empty());
        assert!(table.live_peer_addrs().is_empty());
        assert_eq!(table.status_of("gone"), Some(MemberStatus::Left));
    }

    #[test]
    fn test_stale_updates_are_ignored() {
        let (table, mut rx) = table();
        table.merge(vec![state("a", 5, MemberStatus::Alive)]);
        table.merge(vec![state("a", 4, MemberStatus::Left)]);

        assert_eq!(table.status_of("a"), Some(MemberStatus::Alive));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_left_then_rejoin() {
        let (table, mut rx) = table();
        table.merge(vec![state("a", 5, MemberStatus::Alive)]);
        table.merge(vec![state("a", 5, MemberStatus::Left)]);
        table.merge(vec![state("a", 9, MemberStatus::Alive)]);

        assert_eq!(
            drain(&mut rx),
            vec![
                (MemberChangeType::MemberJoin, "a".to_string()),
                (MemberChangeType::MemberLeave, "a".to_string()),
                (MemberChangeType::MemberJoin, "a".to_string()),
            ]
        );
    }

    #[test]
    fn test_suspect_is_still_live() {
        let (table, mut rx) = table();
        table.merge(vec![state("a", 5, MemberStatus::Alive)]);
        table.merge(vec![state("a", 5, MemberStatus::Suspect)]);

        assert_eq!(table.status_of("a"), Some(MemberStatus::Suspect));
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(table.live_members().len(), 2);
    }

    #[test]
    fn test_refute_rumour_about_local_member() {
        let (table, mut rx) = table();
        table.merge(vec![state("local", 12, MemberStatus::Dead)]);

        let local = table.local_state().unwrap();
        assert_eq!(local.status(), MemberStatus::Alive);
        assert_eq!(local.incarnation, 13);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_heartbeat_and_mark_left() {
        let (table, _rx) = table();
        table.heartbeat();
        assert_eq!(table.local_state().unwrap().incarnation, 11);

        table.mark_left();
        let local = table.local_state().unwrap();
        assert_eq!(local.status(), MemberStatus::Left);
        assert_eq!(local.incarnation, 12);

        table.heartbeat();
        assert_eq!(table.local_state().unwrap().incarnation, 12);
        assert!(table.live_members().is_empty());
    }

    #[test]
    fn test_failure_detection() {
        let (table, mut rx) = table();
        table.merge(vec![state("a", 1, MemberStatus::Alive)]);
        drain(&mut rx);

        table.detect_failures(Duration::ZERO, Duration::from_secs(3600));
        assert_eq!(table.status_of("a"), Some(MemberStatus::Suspect));
        assert!(drain(&mut rx).is_empty());

        table.detect_failures(Duration::ZERO, Duration::ZERO);
        assert_eq!(table.status_of("a"), Some(MemberStatus::Dead));
        assert_eq!(drain(&mut rx), vec![(MemberChangeType::MemberLeave, "a".to_string())]);
        assert_eq!(table.status_of("local"), Some(MemberStatus::Alive));
    }

    #[test]
    fn test_tombstones_expire() {
        let (table, mut rx) = table();
        table.merge(vec![
            state("a", 1, MemberStatus::Alive),
            state("b", 1, MemberStatus::Alive),
            state("gone", 4, MemberStatus::Left),
        ]);
        table.merge(vec![state("b", 2, MemberStatus::Left)]);
        drain(&mut rx);

        table.expire_tombstones(Duration::from_secs(3600));
        assert_eq!(table.snapshot().len(), 4);

        table.expire_tombstones(Duration::ZERO);
        let mut ids: Vec<String> = table.snapshot().into_iter().map(|s| s.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "local".to_string()]);
        assert!(drain(&mut rx).is_empty());

        // A dead member is forgotten too, and the local member never is
        table.detect_failures(Duration::ZERO, Duration::ZERO);
        table.mark_left();
        table.expire_tombstones(Duration::ZERO);
        assert_eq!(table.status_of("a"), None);
        assert_eq!(table.status_of("local"), Some(MemberStatus::Left));
    }

    #[test]
    fn test_live_members_sorted() {
        let (table, _rx) = table();
        let mut leader = state("b", 1, MemberStatus::Alive);
        leader.is_leader = true;
        table.merge(vec![leader, state("a", 1, MemberStatus::Alive)]);

        let members = table.live_members();
        let ids: Vec<&str> = members.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "local"]);
        assert!(members[1].is_leader);
        assert_eq!(members[0].rpc_addr, "a-rpc:1");
    }

    #[test]
    fn test_gossip_targets_bounded() {
        let (table, _rx) = table();
        table.merge(vec![
            state("a", 1, MemberStatus::Alive),
            state("b", 1, MemberStatus::Alive),
            state("c", 1, MemberStatus::Dead),
        ]);

        assert_eq!(table.gossip_targets(1).len(), 1);
        let mut all = table.gossip_targets(10);
        all.sort();
        assert_eq!(all, vec!["a-gossip:1".to_string(), "b-gossip:1".to_string()]);
    }
}
