//! Family-scoped subscriber groups and event fan-out

use hearth_api::{Event, EventPayload};
use hearth_util::{ConnectionId, FamilyId, HearthError, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{AuthorityScope, Authorizer, RequestContext};

/// Where a subscriber's events are delivered
pub type EventSink = mpsc::UnboundedSender<Event>;

/// Fans events out to every connection joined to a family group.
///
/// Delivery is best-effort and non-durable: a subscriber whose sink is closed
/// is pruned on the next broadcast and nothing is replayed.
pub struct NotificationBroadcaster {
    authorizer: Arc<dyn Authorizer>,
    groups: RwLock<HashMap<FamilyId, HashMap<ConnectionId, EventSink>>>,
}

impl NotificationBroadcaster {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            authorizer,
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection to a family group. Requires guardian authority over
    /// the family; a refused join leaves no membership behind.
    pub async fn join(
        &self,
        ctx: &RequestContext,
        connection_id: ConnectionId,
        family_id: &FamilyId,
        sink: EventSink,
    ) -> Result<()> {
        let user_id = ctx.actor()?;
        let allowed = self
            .authorizer
            .has_guardian_authority(user_id, AuthorityScope::Family(family_id))
            .await?;
        if !allowed {
            warn!(
                connection_id = %connection_id,
                family_id = %family_id,
                user_id = %user_id,
                "Subscription refused: no guardian authority"
            );
            return Err(HearthError::unauthorized(format!(
                "{} is not a guardian of family {}",
                user_id, family_id
            )));
        }

        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        groups
            .entry(family_id.clone())
            .or_default()
            .insert(connection_id, sink);

        info!(connection_id = %connection_id, family_id = %family_id, "Subscriber joined");
        Ok(())
    }

    /// Remove a connection from every group. Unknown connections are ignored.
    pub fn leave(&self, connection_id: &ConnectionId) -> usize {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        groups.retain(|_, members| {
            if members.remove(connection_id).is_some() {
                removed += 1;
            }
            !members.is_empty()
        });

        if removed > 0 {
            debug!(connection_id = %connection_id, groups = removed, "Subscriber left");
        }
        removed
    }

    /// Deliver an event to the event's family group. Returns the number of
    /// subscribers it reached.
    pub fn broadcast(&self, event: Event) -> usize {
        let mut dead = Vec::new();
        let delivered = {
            let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
            let Some(members) = groups.get(&event.family_id) else {
                debug!(family_id = %event.family_id, kind = event.kind(), "No subscribers");
                return 0;
            };

            let mut delivered = 0;
            for (connection_id, sink) in members {
                if sink.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*connection_id);
                }
            }
            delivered
        };

        if !dead.is_empty() {
            self.prune(&event.family_id, &dead);
        }

        debug!(
            family_id = %event.family_id,
            kind = event.kind(),
            delivered,
            pruned = dead.len(),
            "Event broadcast"
        );
        delivered
    }

    /// Tell every subscriber the service is going away
    pub fn broadcast_shutdown(&self) {
        let families: Vec<FamilyId> = {
            let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
            groups.keys().cloned().collect()
        };
        for family_id in families {
            self.broadcast(Event::new(family_id, EventPayload::Shutdown));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups.values().map(HashMap::len).sum()
    }

    pub fn is_member(&self, connection_id: &ConnectionId, family_id: &FamilyId) -> bool {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups
            .get(family_id)
            .is_some_and(|members| members.contains_key(connection_id))
    }

    fn prune(&self, family_id: &FamilyId, dead: &[ConnectionId]) {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(members) = groups.get_mut(family_id) {
            for connection_id in dead {
                // Only drop the sink if it is still the closed one
                if members.get(connection_id).is_some_and(|s| s.is_closed()) {
                    members.remove(connection_id);
                    debug!(connection_id = %connection_id, "Pruned dead subscriber");
                }
            }
            if members.is_empty() {
                groups.remove(family_id);
            }
        }
    }
}
