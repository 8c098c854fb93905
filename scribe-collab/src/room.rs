//! Document rooms and the session manager.
//!
//! A [`Room`] is a broadcast channel shared by every connection joined
//! to one document. Frames are pre-encoded once and shared as
//! `Arc<String>` so a room with many members serializes each update a
//! single time. Delivery is at-most-once: a member whose receiver has
//! lagged past the channel capacity simply misses the dropped frames.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::auth::Identity;
use crate::protocol::{now_millis, DocumentId, Participant, WireEvent};

/// One frame queued for a room. `exclude` names the connection that
/// produced it, which must not receive its own relay.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub exclude: Option<Uuid>,
    pub frame: Arc<String>,
}

impl Outbound {
    pub fn broadcast(frame: Arc<String>) -> Self {
        Outbound {
            exclude: None,
            frame,
        }
    }

    pub fn relay(sender: Uuid, frame: Arc<String>) -> Self {
        Outbound {
            exclude: Some(sender),
            frame,
        }
    }
}

/// Shared state for one document's active connections.
pub struct Room {
    document_id: DocumentId,
    tx: broadcast::Sender<Outbound>,
    participants: RwLock<HashMap<Uuid, Participant>>,
}

impl Room {
    fn new(document_id: DocumentId, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Room {
            document_id,
            tx,
            participants: RwLock::new(HashMap::new()),
        }
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Snapshot of the current members, ordered by join time.
    pub async fn participants(&self) -> Vec<Participant> {
        let mut members: Vec<Participant> =
            self.participants.read().await.values().cloned().collect();
        members.sort_by_key(|p| (p.joined_at, p.connection_id));
        members
    }

    pub async fn len(&self) -> usize {
        self.participants.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.participants.read().await.is_empty()
    }

    /// Queue a frame for every current subscriber. A room with no
    /// receivers is not an error; the frame is simply dropped.
    pub fn publish(&self, out: Outbound) -> usize {
        self.tx.send(out).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.tx.subscribe()
    }
}

/// Everything a connection needs after joining a room.
pub struct JoinOutcome {
    pub participant: Participant,
    pub receiver: broadcast::Receiver<Outbound>,
    pub room: Arc<Room>,
}

/// Registry of active rooms, keyed by document id.
///
/// A connection belongs to at most one room at a time; joining a second
/// document implicitly leaves the first. Rooms are created on first join
/// and dropped when their last member leaves.
pub struct SessionManager {
    rooms: RwLock<HashMap<DocumentId, Arc<Room>>>,
    memberships: RwLock<HashMap<Uuid, DocumentId>>,
    capacity: usize,
}

impl SessionManager {
    pub fn new(capacity: usize) -> Self {
        SessionManager {
            rooms: RwLock::new(HashMap::new()),
            memberships: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub async fn room(&self, document_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(document_id).cloned()
    }

    /// The document a connection is currently joined to, if any.
    pub async fn membership(&self, connection_id: Uuid) -> Option<DocumentId> {
        self.memberships.read().await.get(&connection_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Members of a document room in join order; empty when the room
    /// does not exist.
    pub async fn list_participants(&self, document_id: &str) -> Vec<Participant> {
        match self.room(document_id).await {
            Some(room) => room.participants().await,
            None => Vec::new(),
        }
    }

    async fn get_or_create(&self, document_id: &str) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(document_id) {
            return room.clone();
        }
        let mut rooms = self.rooms.write().await;
        // Double-checked: another connection may have created it while
        // we waited for the write lock.
        rooms
            .entry(document_id.to_string())
            .or_insert_with(|| {
                debug!("creating room for document {document_id}");
                Arc::new(Room::new(document_id.to_string(), self.capacity))
            })
            .clone()
    }

    /// Join a connection to a document room. Subscribes before the
    /// presence broadcast so the joiner sees the membership that
    /// includes itself, and implicitly leaves any previous room.
    pub async fn join(
        &self,
        connection_id: Uuid,
        identity: &Identity,
        document_id: &str,
    ) -> JoinOutcome {
        let previous = self
            .memberships
            .read()
            .await
            .get(&connection_id)
            .cloned();
        if let Some(prev) = previous {
            if prev != document_id {
                self.leave(connection_id).await;
            }
        }

        let participant = Participant {
            connection_id,
            user_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
            joined_at: now_millis(),
        };
        let room = loop {
            let room = self.get_or_create(document_id).await;
            room.participants
                .write()
                .await
                .insert(connection_id, participant.clone());
            // The empty-room GC can drop the registry entry between the
            // lookup above and our insert. A member of an unregistered
            // room would never see another frame, so re-resolve and
            // retry against whatever the registry holds now.
            let registered = self.rooms.read().await.get(document_id).cloned();
            match registered {
                Some(current) if Arc::ptr_eq(&current, &room) => break room,
                _ => {
                    room.participants.write().await.remove(&connection_id);
                }
            }
        };
        let receiver = room.subscribe();
        self.memberships
            .write()
            .await
            .insert(connection_id, document_id.to_string());

        self.announce_presence(&room).await;
        JoinOutcome {
            participant,
            receiver,
            room,
        }
    }

    /// Remove a connection from its room, if it has one. Used both for
    /// the explicit leave frame and for connection teardown; a dropped
    /// socket and a polite leave are indistinguishable to the room.
    pub async fn leave(&self, connection_id: Uuid) {
        let Some(document_id) = self.memberships.write().await.remove(&connection_id) else {
            return;
        };
        let Some(room) = self.room(&document_id).await else {
            warn!("membership pointed at missing room {document_id}");
            return;
        };
        room.participants.write().await.remove(&connection_id);
        if room.is_empty().await {
            let mut rooms = self.rooms.write().await;
            // Re-check under the write lock; a join may have raced us.
            if room.is_empty().await {
                rooms.remove(&document_id);
                debug!("dropping empty room for document {document_id}");
                return;
            }
        }
        self.announce_presence(&room).await;
    }

    async fn announce_presence(&self, room: &Room) {
        let participants = room.participants().await;
        match WireEvent::presence(room.document_id().clone(), participants).encode() {
            Ok(frame) => {
                room.publish(Outbound::broadcast(Arc::new(frame)));
            }
            Err(e) => warn!("could not encode presence frame: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WireEvent;

    fn identity(name: &str) -> Identity {
        Identity {
            user_id: format!("{name}-id"),
            display_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn join_creates_room_and_broadcasts_presence_to_joiner() {
        let sessions = SessionManager::new(16);
        let conn = Uuid::new_v4();
        let mut outcome = sessions.join(conn, &identity("alice"), "doc-1").await;

        assert_eq!(sessions.room_count().await, 1);
        assert_eq!(outcome.participant.display_name, "alice");

        let out = outcome.receiver.try_recv().unwrap();
        assert_eq!(out.exclude, None);
        match WireEvent::decode(&out.frame).unwrap() {
            WireEvent::Presence {
                document_id,
                participants,
            } => {
                assert_eq!(document_id, "doc-1");
                assert_eq!(participants.len(), 1);
                assert_eq!(participants[0].connection_id, conn);
            }
            other => panic!("expected presence, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_member_presence_reaches_both() {
        let sessions = SessionManager::new(16);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut first = sessions.join(a, &identity("alice"), "doc-1").await;
        first.receiver.try_recv().unwrap(); // alice's own join
        let mut second = sessions.join(b, &identity("bob"), "doc-1").await;

        for rx in [&mut first.receiver, &mut second.receiver] {
            let out = rx.try_recv().unwrap();
            match WireEvent::decode(&out.frame).unwrap() {
                WireEvent::Presence { participants, .. } => {
                    assert_eq!(participants.len(), 2);
                }
                other => panic!("expected presence, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn last_leave_drops_the_room() {
        let sessions = SessionManager::new(16);
        let conn = Uuid::new_v4();
        sessions.join(conn, &identity("alice"), "doc-1").await;
        assert_eq!(sessions.room_count().await, 1);

        sessions.leave(conn).await;
        assert_eq!(sessions.room_count().await, 0);
        assert_eq!(sessions.membership(conn).await, None);
    }

    #[tokio::test]
    async fn leave_announces_to_remaining_members() {
        let sessions = SessionManager::new(16);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut first = sessions.join(a, &identity("alice"), "doc-1").await;
        sessions.join(b, &identity("bob"), "doc-1").await;
        first.receiver.try_recv().unwrap(); // own join
        first.receiver.try_recv().unwrap(); // bob's join

        sessions.leave(b).await;
        let out = first.receiver.try_recv().unwrap();
        match WireEvent::decode(&out.frame).unwrap() {
            WireEvent::Presence { participants, .. } => {
                assert_eq!(participants.len(), 1);
                assert_eq!(participants[0].connection_id, a);
            }
            other => panic!("expected presence, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn joining_a_second_document_leaves_the_first() {
        let sessions = SessionManager::new(16);
        let conn = Uuid::new_v4();
        sessions.join(conn, &identity("alice"), "doc-1").await;
        sessions.join(conn, &identity("alice"), "doc-2").await;

        assert_eq!(sessions.membership(conn).await, Some("doc-2".to_string()));
        assert!(sessions.room("doc-1").await.is_none());
        assert_eq!(sessions.room("doc-2").await.unwrap().len().await, 1);
    }

    #[tokio::test]
    async fn rejoining_the_same_document_does_not_duplicate() {
        let sessions = SessionManager::new(16);
        let conn = Uuid::new_v4();
        sessions.join(conn, &identity("alice"), "doc-1").await;
        sessions.join(conn, &identity("alice"), "doc-1").await;

        assert_eq!(sessions.room("doc-1").await.unwrap().len().await, 1);
    }

    #[tokio::test]
    async fn leave_without_membership_is_a_no_op() {
        let sessions = SessionManager::new(16);
        sessions.leave(Uuid::new_v4()).await;
        assert_eq!(sessions.room_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_churn_never_orphans_a_member() {
        let sessions = Arc::new(SessionManager::new(16));
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let sessions = sessions.clone();
            tasks.push(tokio::spawn(async move {
                let conn = Uuid::new_v4();
                for _ in 0..100 {
                    let outcome = sessions.join(conn, &identity("churner"), "doc-1").await;
                    // While we are a member, the registry must hand out
                    // the very room we joined, or our receiver is dead.
                    let registered = sessions
                        .room("doc-1")
                        .await
                        .expect("room vanished under a live member");
                    assert!(Arc::ptr_eq(&outcome.room, &registered));
                    sessions.leave(conn).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(sessions.room_count().await, 0);
    }

    #[tokio::test]
    async fn relay_carries_the_sender_exclusion() {
        let sessions = SessionManager::new(16);
        let a = Uuid::new_v4();
        let mut outcome = sessions.join(a, &identity("alice"), "doc-1").await;
        outcome.receiver.try_recv().unwrap(); // presence

        let frame = Arc::new("{}".to_string());
        outcome.room.publish(Outbound::relay(a, frame));
        let out = outcome.receiver.try_recv().unwrap();
        assert_eq!(out.exclude, Some(a));
    }
}
