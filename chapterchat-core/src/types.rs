use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(UserId);
string_id!(BookId);
string_id!(ChapterId);
string_id!(NotificationId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One transcript entry. Entries are never edited once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub bearer_token: String,
    pub user_id: UserId,
    #[serde(default)]
    pub auth_provider: Option<String>,
}

impl Credential {
    pub fn new(bearer_token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            bearer_token: bearer_token.into(),
            user_id: UserId::new(user_id),
            auth_provider: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.auth_provider = Some(provider.into());
        self
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("bearer_token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("auth_provider", &self.auth_provider)
            .finish()
    }
}

/// Read state as the backend encodes it (`seen_status: "yes" | "no"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeenStatus {
    #[serde(rename = "yes")]
    Seen,
    #[serde(rename = "no")]
    Unseen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    #[serde(rename = "_id")]
    pub id: NotificationId,
    pub title: String,
    pub message: String,
    pub seen_status: SeenStatus,
    #[serde(rename = "createdAt", default)]
    pub created_at: String,
}

impl NotificationRecord {
    pub fn is_unseen(&self) -> bool {
        self.seen_status == SeenStatus::Unseen
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    #[serde(rename = "_id")]
    pub id: BookId,
    pub title: String,
    #[serde(rename = "coverImage", default)]
    pub cover_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(rename = "_id")]
    pub id: ChapterId,
    pub title: String,
    #[serde(rename = "bookId", default)]
    pub book_id: Option<BookId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Idle,
    Recording,
    Captured,
    Sending,
}
