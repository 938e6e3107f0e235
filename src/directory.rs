//! Identity and room lookups. Membership, profiles and auth are owned by
//! another system; the engine only needs emails and room ownership.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use crate::model::{RoomId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub owner_id: UserId,
    #[serde(default)]
    pub name: String,
    /// Preferred notification address for the tutor. Falls back to the owner's
    /// account email when absent.
    #[serde(default)]
    pub owner_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("reading directory file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing directory file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[async_trait]
pub trait Directory: Send + Sync {
    /// Contact email for a user, lowercased. `None` if unknown or blank.
    async fn user_email(&self, user_id: &str) -> Option<String>;

    async fn room(&self, room_id: &str) -> Option<Room>;

    async fn owner_email(&self, room: &Room) -> Option<String> {
        match room.owner_email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => Some(email.to_lowercase()),
            _ => self.user_email(&room.owner_id).await,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    users: Vec<UserRecord>,
    #[serde(default)]
    rooms: Vec<Room>,
}

/// In-memory directory, seeded from a JSON file of `{"users": [...], "rooms": [...]}`.
#[derive(Default)]
pub struct StaticDirectory {
    users: DashMap<UserId, UserRecord>,
    rooms: DashMap<RoomId, Room>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, DirectoryError> {
        let file: DirectoryFile = serde_json::from_str(json)?;
        let dir = Self::new();
        for user in file.users {
            dir.insert_user(user);
        }
        for room in file.rooms {
            dir.insert_room(room);
        }
        Ok(dir)
    }

    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let json = std::fs::read_to_string(path)?;
        let dir = Self::from_json(&json)?;
        tracing::info!(
            users = dir.users.len(),
            rooms = dir.rooms.len(),
            "directory loaded from {}",
            path.display()
        );
        Ok(dir)
    }

    pub fn insert_user(&self, user: UserRecord) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn insert_room(&self, room: Room) {
        self.rooms.insert(room.id.clone(), room);
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn user_email(&self, user_id: &str) -> Option<String> {
        let user = self.users.get(user_id)?;
        let email = user.email.as_deref()?.trim();
        (!email.is_empty()).then(|| email.to_lowercase())
    }

    async fn room(&self, room_id: &str) -> Option<Room> {
        self.rooms.get(room_id).map(|r| r.value().clone())
    }
}
