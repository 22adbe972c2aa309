//! Room allocation and hand-off to the session transport
//!
//! Once two entries have been claimed the pairing is final. The allocator
//! names the room, packages each side's public profile for the other party
//! and passes the result on. Nothing here can undo the pairing.

use crate::amqp::publisher::EventPublisher;
use crate::error::Result;
use crate::store::UserStore;
use crate::types::{DeviceId, Intent, MatchFound, Pairing, PublicProfile, QueueEntry, RoomId};
use crate::utils::generate_room_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// One participant of a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSeat {
    pub device_id: DeviceId,
    pub intent: Intent,
    /// This participant's profile, as shown to the other one
    pub profile: PublicProfile,
}

/// A newly allocated room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomAssignment {
    pub room_id: RoomId,
    /// The device whose admission produced the pairing
    pub requester: RoomSeat,
    /// The device that was already waiting
    pub partner: RoomSeat,
    pub created_at: DateTime<Utc>,
    /// Profile lookups that failed and fell back to placeholders
    #[serde(skip)]
    pub profile_lookup_failures: u32,
}

impl RoomAssignment {
    /// The pairing as reported back to the requester
    pub fn requester_pairing(&self) -> Pairing {
        Pairing {
            room_id: self.room_id.clone(),
            partner_id: self.partner.device_id.clone(),
            partner_intent: self.partner.intent,
            partner_profile: self.partner.profile.clone(),
            created_at: self.created_at,
        }
    }
}

/// Trait for delivering a room to the session transport
#[async_trait]
pub trait RoomHandoff: Send + Sync {
    async fn hand_off(&self, assignment: &RoomAssignment) -> Result<()>;
}

/// Builds rooms for claimed pairs
#[derive(Clone)]
pub struct RoomAllocator {
    users: Arc<dyn UserStore>,
    handoff: Arc<dyn RoomHandoff>,
}

impl RoomAllocator {
    pub fn new(users: Arc<dyn UserStore>, handoff: Arc<dyn RoomHandoff>) -> Self {
        Self { users, handoff }
    }

    /// Name the room and collect both profiles. Profile lookups fail open.
    pub async fn allocate(
        &self,
        requester: (&str, Intent),
        partner: &QueueEntry,
        now: DateTime<Utc>,
    ) -> RoomAssignment {
        let (requester_id, requester_intent) = requester;
        let mut failures = 0;

        let requester_profile = self.public_profile(requester_id, &mut failures).await;
        let partner_profile = self.public_profile(&partner.device_id, &mut failures).await;

        let room_id = generate_room_id(requester_id, &partner.device_id, now);
        debug!("Allocated room {}", room_id);

        RoomAssignment {
            room_id,
            requester: RoomSeat {
                device_id: requester_id.to_string(),
                intent: requester_intent,
                profile: requester_profile,
            },
            partner: RoomSeat {
                device_id: partner.device_id.clone(),
                intent: partner.intent,
                profile: partner_profile,
            },
            created_at: now,
            profile_lookup_failures: failures,
        }
    }

    /// Deliver a room to the transport
    pub async fn hand_off(&self, assignment: &RoomAssignment) -> Result<()> {
        self.handoff.hand_off(assignment).await
    }

    async fn public_profile(&self, device_id: &str, failures: &mut u32) -> PublicProfile {
        match self.users.load_profile(device_id).await {
            Ok(profile) => profile.into(),
            Err(e) => {
                warn!("Profile lookup failed for {}, using placeholders: {}", device_id, e);
                *failures += 1;
                None.into()
            }
        }
    }
}

/// Hands rooms off by publishing a `MatchFound` event to each participant
pub struct PublisherHandoff {
    publisher: Arc<dyn EventPublisher>,
}

impl PublisherHandoff {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl RoomHandoff for PublisherHandoff {
    async fn hand_off(&self, assignment: &RoomAssignment) -> Result<()> {
        for (seat, other) in [
            (&assignment.requester, &assignment.partner),
            (&assignment.partner, &assignment.requester),
        ] {
            self.publisher
                .publish_match_found(MatchFound {
                    device_id: seat.device_id.clone(),
                    room_id: assignment.room_id.clone(),
                    partner: other.profile.clone(),
                    timestamp: assignment.created_at,
                })
                .await?;
        }
        Ok(())
    }
}

/// Hand-off that keeps every room in memory (for testing and embedding)
#[derive(Debug, Default)]
pub struct RecordingRoomHandoff {
    rooms: Mutex<Vec<RoomAssignment>>,
}

impl RecordingRoomHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rooms handed off so far
    pub fn rooms(&self) -> Vec<RoomAssignment> {
        self.rooms
            .lock()
            .map(|rooms| rooms.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RoomHandoff for RecordingRoomHandoff {
    async fn hand_off(&self, assignment: &RoomAssignment) -> Result<()> {
        if let Ok(mut rooms) = self.rooms.lock() {
            rooms.push(assignment.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::store::InMemoryUserStore;
    use crate::types::{Gender, Preference, Profile, DEFAULT_BIO, DEFAULT_NICKNAME};

    fn partner_entry() -> QueueEntry {
        QueueEntry {
            device_id: "p".to_string(),
            intent: Intent::new(Gender::Female, Preference::Any),
            enqueued_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_allocate_packages_profiles() {
        let users = Arc::new(InMemoryUserStore::new());
        users
            .save_profile(
                "p",
                Profile {
                    nickname: Some("wren".to_string()),
                    bio: Some("hi".to_string()),
                    gender: Some("female".to_string()),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let handoff = Arc::new(RecordingRoomHandoff::new());
        let allocator = RoomAllocator::new(users, handoff.clone());

        let now = Utc::now();
        let requester_intent = Intent::new(Gender::Male, Preference::Female);
        let room = allocator
            .allocate(("r", requester_intent), &partner_entry(), now)
            .await;

        assert!(room.room_id.starts_with("chat_r_p_"));
        assert_eq!(room.partner.profile.nickname, "wren");
        assert_eq!(room.requester.profile.nickname, DEFAULT_NICKNAME);
        assert_eq!(room.requester.profile.bio, DEFAULT_BIO);
        assert_eq!(room.profile_lookup_failures, 0);

        let pairing = room.requester_pairing();
        assert_eq!(pairing.partner_id, "p");
        assert_eq!(pairing.partner_profile.bio, "hi");

        allocator.hand_off(&room).await.unwrap();
        assert_eq!(handoff.rooms(), vec![room]);
    }

    #[tokio::test]
    async fn test_publisher_handoff_notifies_both_sides() {
        let publisher = Arc::new(MockEventPublisher::new());
        let handoff = PublisherHandoff::new(publisher.clone());
        let allocator = RoomAllocator::new(Arc::new(InMemoryUserStore::new()), Arc::new(handoff));

        let room = allocator
            .allocate(
                ("r", Intent::new(Gender::Male, Preference::Any)),
                &partner_entry(),
                Utc::now(),
            )
            .await;
        allocator.hand_off(&room).await.unwrap();

        assert_eq!(
            publisher.get_published_events(),
            vec!["MatchFound".to_string(), "MatchFound".to_string()]
        );
    }
}
