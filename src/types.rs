//! Common types used throughout the matchmaking service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::MatchmakingError;

/// Opaque, caller-supplied stable identifier for a participant's device
pub type DeviceId = String;

/// Unique identifier for chat rooms
pub type RoomId = String;

/// Declared (verified upstream) gender of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// Requested partner gender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    Male,
    Female,
    Any,
}

impl Gender {
    pub const ALL: [Gender; 3] = [Gender::Male, Gender::Female, Gender::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }

    /// The preference another participant would declare to seek this gender.
    /// There is no "seeking other" preference, so Other maps to Any.
    pub fn as_preference(&self) -> Preference {
        match self {
            Gender::Male => Preference::Male,
            Gender::Female => Preference::Female,
            Gender::Other => Preference::Any,
        }
    }
}

impl Preference {
    pub const ALL: [Preference; 3] = [Preference::Male, Preference::Female, Preference::Any];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preference::Male => "male",
            Preference::Female => "female",
            Preference::Any => "any",
        }
    }

    /// The gender being sought, if the preference is specific
    pub fn as_gender(&self) -> Option<Gender> {
        match self {
            Preference::Male => Some(Gender::Male),
            Preference::Female => Some(Gender::Female),
            Preference::Any => None,
        }
    }

    /// Targeted searches consume the daily usage allowance
    pub fn is_targeted(&self) -> bool {
        !matches!(self, Preference::Any)
    }
}

impl FromStr for Gender {
    type Err = MatchmakingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            _ => Err(MatchmakingError::InvalidIntent {
                reason: format!("Unrecognized gender '{}'", s),
            }),
        }
    }
}

impl FromStr for Preference {
    type Err = MatchmakingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" => Ok(Preference::Male),
            "female" => Ok(Preference::Female),
            "any" => Ok(Preference::Any),
            _ => Err(MatchmakingError::InvalidIntent {
                reason: format!("Unrecognized preference '{}'", s),
            }),
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Display for Preference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A (gender, preference) pair. Each intent owns exactly one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Intent {
    pub gender: Gender,
    pub preference: Preference,
}

impl Intent {
    pub fn new(gender: Gender, preference: Preference) -> Self {
        Self { gender, preference }
    }

    /// Parse an intent from loosely-typed input. Missing or unrecognized
    /// values are rejected as `InvalidIntent`.
    pub fn parse(
        gender: Option<&str>,
        preference: Option<&str>,
    ) -> Result<Self, MatchmakingError> {
        let gender: Gender = gender
            .filter(|g| !g.trim().is_empty())
            .ok_or_else(|| MatchmakingError::InvalidIntent {
                reason: "Gender required".to_string(),
            })?
            .parse()?;
        let preference: Preference = preference
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| MatchmakingError::InvalidIntent {
                reason: "Preference required".to_string(),
            })?
            .parse()?;
        Ok(Self::new(gender, preference))
    }

    /// All nine intents, in a stable order
    pub fn all() -> impl Iterator<Item = Intent> {
        Gender::ALL.into_iter().flat_map(|gender| {
            Preference::ALL
                .into_iter()
                .map(move |preference| Intent::new(gender, preference))
        })
    }

    /// Key of the ordered set backing this intent's queue
    pub fn queue_key(&self) -> String {
        format!("queue:{}:{}", self.gender, self.preference)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue:{}:{}", self.gender, self.preference)
    }
}

/// A device waiting in a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub device_id: DeviceId,
    pub intent: Intent,
    /// Milliseconds since the Unix epoch at enqueue time
    pub enqueued_at_ms: i64,
}

/// Public profile a participant shares with their partner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub nickname: Option<String>,
    pub bio: Option<String>,
    pub gender: Option<String>,
}

/// Profile as delivered to the other party, with placeholders filled in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicProfile {
    pub nickname: String,
    pub bio: String,
    pub gender: String,
}

pub const DEFAULT_NICKNAME: &str = "Anonymous";
pub const DEFAULT_BIO: &str = "No bio";
pub const DEFAULT_GENDER_LABEL: &str = "Unknown";

impl From<Option<Profile>> for PublicProfile {
    fn from(profile: Option<Profile>) -> Self {
        let profile = profile.unwrap_or_default();
        let or_default = |value: Option<String>, default: &str| {
            value
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            nickname: or_default(profile.nickname, DEFAULT_NICKNAME),
            bio: or_default(profile.bio, DEFAULT_BIO),
            gender: or_default(profile.gender, DEFAULT_GENDER_LABEL),
        }
    }
}

/// Durable per-device record used for ban and report tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub device_id: DeviceId,
    pub report_count: u32,
    pub banned_until: Option<DateTime<Utc>>,
    pub last_online: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(device_id: DeviceId, now: DateTime<Utc>) -> Self {
        Self {
            device_id,
            report_count: 0,
            banned_until: None,
            last_online: now,
            created_at: now,
        }
    }
}

/// Request to enter matchmaking. Gender and preference arrive untyped from
/// the transport and are validated before any state is touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnterRequest {
    pub device_id: DeviceId,
    pub gender: Option<String>,
    pub preference: Option<String>,
    #[serde(default)]
    pub profile: Profile,
}

/// Request to withdraw from matchmaking (disconnect or explicit cancel)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub device_id: DeviceId,
    pub gender: Option<String>,
    pub preference: Option<String>,
}

/// Report against the partner of a room; the transport resolves the target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub reporter_id: DeviceId,
    pub room_id: RoomId,
    pub target_id: DeviceId,
}

/// Why an admission was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    Banned { remaining_ms: i64 },
    RateLimited,
    InvalidIntent { detail: String },
    AlreadyQueued,
}

impl Rejection {
    /// Metric label for this rejection
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::Banned { .. } => "banned",
            Rejection::RateLimited => "rate_limited",
            Rejection::InvalidIntent { .. } => "invalid_intent",
            Rejection::AlreadyQueued => "already_queued",
        }
    }

    /// Human-readable message for the client
    pub fn message(&self) -> String {
        match self {
            Rejection::Banned { remaining_ms } => {
                let hours_left = (*remaining_ms as f64 / 3_600_000.0).ceil() as i64;
                format!(
                    "You are banned for {} more hours due to reports.",
                    hours_left
                )
            }
            Rejection::RateLimited => "Daily limit reached".to_string(),
            Rejection::InvalidIntent { detail } => detail.clone(),
            Rejection::AlreadyQueued => "Already in queue".to_string(),
        }
    }
}

/// A successful pairing as seen by the requester
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pairing {
    pub room_id: RoomId,
    pub partner_id: DeviceId,
    pub partner_intent: Intent,
    pub partner_profile: PublicProfile,
    pub created_at: DateTime<Utc>,
}

/// Result of an admission call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionOutcome {
    pub accepted: bool,
    pub rejection: Option<Rejection>,
    pub pairing: Option<Pairing>,
}

impl AdmissionOutcome {
    pub fn rejected(rejection: Rejection) -> Self {
        Self {
            accepted: false,
            rejection: Some(rejection),
            pairing: None,
        }
    }

    pub fn matched(&self) -> bool {
        self.pairing.is_some()
    }
}

/// Result of a report call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOutcome {
    pub banned: bool,
    pub record: Option<UserRecord>,
}

/// Event emitted when a device has been accepted into a queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJoined {
    pub device_id: DeviceId,
    pub preference: Preference,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when an admission is refused
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRejected {
    pub device_id: DeviceId,
    pub rejection: Rejection,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted to each participant of a new room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFound {
    pub device_id: DeviceId,
    pub room_id: RoomId,
    pub partner: PublicProfile,
    pub timestamp: DateTime<Utc>,
}

/// Event asking the transport to end a device's session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEnded {
    pub device_id: DeviceId,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all AMQP messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AmqpMessage {
    EnterQueue(EnterRequest),
    LeaveQueue(LeaveRequest),
    ReportPartner(ReportRequest),
    QueueJoined(QueueJoined),
    QueueRejected(QueueRejected),
    MatchFound(MatchFound),
    SessionEnded(SessionEnded),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_parsing() {
        let intent = Intent::parse(Some("Male"), Some("female")).unwrap();
        assert_eq!(intent, Intent::new(Gender::Male, Preference::Female));

        assert!(Intent::parse(None, Some("any")).is_err());
        assert!(Intent::parse(Some("female"), Some("")).is_err());
        assert!(Intent::parse(Some("female"), Some("other")).is_err());
        assert!(Intent::parse(Some("robot"), Some("any")).is_err());
    }

    #[test]
    fn test_all_intents() {
        let all: Vec<Intent> = Intent::all().collect();
        assert_eq!(all.len(), 9);
        assert!(all.contains(&Intent::new(Gender::Other, Preference::Any)));
    }

    #[test]
    fn test_queue_key() {
        let intent = Intent::new(Gender::Female, Preference::Any);
        assert_eq!(intent.queue_key(), "queue:female:any");
    }

    #[test]
    fn test_public_profile_placeholders() {
        let profile: PublicProfile = None.into();
        assert_eq!(profile.nickname, DEFAULT_NICKNAME);
        assert_eq!(profile.bio, DEFAULT_BIO);
        assert_eq!(profile.gender, DEFAULT_GENDER_LABEL);

        let partial: PublicProfile = Some(Profile {
            nickname: Some("kit".to_string()),
            bio: Some("  ".to_string()),
            gender: None,
        })
        .into();
        assert_eq!(partial.nickname, "kit");
        assert_eq!(partial.bio, DEFAULT_BIO);
    }

    #[test]
    fn test_banned_message_rounds_up_hours() {
        let rejection = Rejection::Banned {
            remaining_ms: 3_600_001,
        };
        assert_eq!(
            rejection.message(),
            "You are banned for 2 more hours due to reports."
        );
    }

    #[test]
    fn test_amqp_message_tagging() {
        let json = r#"{"type":"EnterQueue","device_id":"d1","gender":"male","preference":"any"}"#;
        let message: AmqpMessage = serde_json::from_str(json).unwrap();
        match message {
            AmqpMessage::EnterQueue(request) => {
                assert_eq!(request.device_id, "d1");
                assert_eq!(request.profile, Profile::default());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
}
