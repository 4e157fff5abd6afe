// Membership Table
//
// Mapping from node id to descriptor, one per cluster node. The merge in
// `add_or_update` is the conflict-resolution core of the protocol: a fresher
// observation replaces the resident entry, while a tied or older one may only
// improve the recorded health. A dead entry never changes again except by
// removal, and the local node's entry accepts nothing from the inbound path
// but a last-seen refresh.

use super::{now_rfc3339, NodeDescriptor, NodeHealth};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::debug;

/// A node's view of the cluster.
pub struct MembershipTable {
    /// Descriptors keyed by node id (BTreeMap for consistent ordering).
    members: BTreeMap<String, NodeDescriptor>,

    /// Id of the node owning this table, once registered.
    local_id: Option<String>,
}

impl MembershipTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            members: BTreeMap::new(),
            local_id: None,
        }
    }

    /// Insert the owning node's descriptor and pin its identity.
    ///
    /// The local entry is forced alive and from here on is writable only
    /// through `update_last_seen`; merges, state marks, and removals all
    /// refuse the local id.
    pub fn register_local(&mut self, mut descriptor: NodeDescriptor) {
        descriptor.status = NodeHealth::Alive;
        self.local_id = Some(descriptor.id.clone());
        self.members.insert(descriptor.id.clone(), descriptor);
    }

    /// Id of the owning node, if registered.
    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    /// Current descriptor of the owning node.
    pub fn local(&self) -> Option<NodeDescriptor> {
        self.local_id
            .as_ref()
            .and_then(|id| self.members.get(id))
            .cloned()
    }

    fn is_local(&self, id: &str) -> bool {
        self.local_id.as_deref() == Some(id)
    }

    /// Merge one observed descriptor into the table.
    ///
    /// Resolution rules, in order:
    ///
    /// 1. Unknown id: insert verbatim.
    /// 2. Resident entry is dead: ignore; only removal clears a dead entry.
    /// 3. Incoming timestamp strictly newer: replace wholesale.
    /// 4. Incoming tied or older: keep the resident timestamp, take the
    ///    incoming status only if it has strictly higher health priority.
    ///    A late proof of liveness may heal a premature suspicion, while a
    ///    stale `dead` can never overwrite a fresh `alive`.
    ///
    /// If either timestamp fails to parse, the RFC 3339 strings are compared
    /// lexicographically and the greater descriptor wins.
    pub fn add_or_update(&mut self, incoming: NodeDescriptor) {
        if incoming.id.is_empty() {
            debug!("Discarding descriptor with empty id");
            return;
        }
        if self.is_local(&incoming.id) {
            // A peer's view of this node never overwrites the local entry.
            return;
        }

        match self.members.entry(incoming.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(incoming);
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if existing.status == NodeHealth::Dead {
                    return;
                }

                match (existing.last_seen_at(), incoming.last_seen_at()) {
                    (Some(resident), Some(observed)) => {
                        if observed > resident {
                            *existing = incoming;
                        } else if incoming.status.priority() > existing.status.priority() {
                            existing.status = incoming.status;
                        }
                    }
                    _ => {
                        if incoming.last_seen > existing.last_seen {
                            *existing = incoming;
                        }
                    }
                }
            }
        }
    }

    /// Unconditional eviction. The local entry cannot be evicted.
    pub fn remove(&mut self, id: &str) -> bool {
        if self.is_local(id) {
            return false;
        }
        self.members.remove(id).is_some()
    }

    /// Transition a node to suspect. No-op for dead entries and for self.
    pub fn mark_suspect(&mut self, id: &str) {
        if self.is_local(id) {
            return;
        }
        if let Some(node) = self.members.get_mut(id) {
            if node.status != NodeHealth::Dead {
                node.status = NodeHealth::Suspect;
            }
        }
    }

    /// Transition a node to dead. No-op for self.
    pub fn mark_dead(&mut self, id: &str) {
        if self.is_local(id) {
            return;
        }
        if let Some(node) = self.members.get_mut(id) {
            node.status = NodeHealth::Dead;
        }
    }

    /// Refresh a node's last-seen instant to now and promote it to alive.
    /// No-op for dead entries: positive evidence cannot resurrect them.
    pub fn update_last_seen(&mut self, id: &str) {
        if let Some(node) = self.members.get_mut(id) {
            if node.status != NodeHealth::Dead {
                node.last_seen = now_rfc3339();
                node.status = NodeHealth::Alive;
            }
        }
    }

    /// Copy of all descriptors. Callers iterate and send without the lock.
    pub fn snapshot(&self) -> Vec<NodeDescriptor> {
        self.members.values().cloned().collect()
    }

    /// Current descriptor of one node.
    pub fn get(&self, id: &str) -> Option<NodeDescriptor> {
        self.members.get(id).cloned()
    }

    /// Current status of one node.
    pub fn status_of(&self, id: &str) -> Option<NodeHealth> {
        self.members.get(id).map(|node| node.status)
    }

    /// Raw last-seen string of one node.
    pub fn last_seen_of(&self, id: &str) -> Option<String> {
        self.members.get(id).map(|node| node.last_seen.clone())
    }

    /// Total number of known nodes, self included.
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Number of nodes currently alive.
    pub fn alive_count(&self) -> usize {
        self.members
            .values()
            .filter(|node| node.status == NodeHealth::Alive)
            .count()
    }
}

impl Default for MembershipTable {
    fn default() -> Self {
        Self::new()
    }
}
