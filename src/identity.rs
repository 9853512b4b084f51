#![forbid(unsafe_code)]

// Local user identity and the ids derived from it

use std::time::{SystemTime, UNIX_EPOCH};

/// The authenticated local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Backend user id, usually a UUID string
    pub user_id: String,
    pub username: String,
    pub display_name: String,
}

impl LocalIdentity {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            user_id: user_id.into(),
            display_name: username.clone(),
            username,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Load from `HANGHIVE_USER_ID`, `HANGHIVE_USERNAME` and the optional
    /// `HANGHIVE_DISPLAY_NAME`. Returns None if either required var is unset.
    pub fn from_env() -> Option<Self> {
        let user_id = std::env::var("HANGHIVE_USER_ID").ok()?;
        let username = std::env::var("HANGHIVE_USERNAME").ok()?;
        let identity = Self::new(user_id, username);
        Some(match std::env::var("HANGHIVE_DISPLAY_NAME") {
            Ok(name) => identity.with_display_name(name),
            Err(_) => identity,
        })
    }

    /// Id announced on voice/video channels: lowercase username, whitespace as `_`.
    pub fn participant_id(&self) -> String {
        self.username
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .flat_map(char::to_lowercase)
            .collect()
    }

    /// Id used on the primary chat channel: the leading hex digits of the
    /// first dash-separated group of the user id, or the current time in
    /// milliseconds.
    pub fn chat_client_id(&self) -> String {
        self.user_id
            .split('-')
            .next()
            .map(|head| {
                let end = head.find(|c: char| !c.is_ascii_hexdigit()).unwrap_or(head.len());
                &head[..end]
            })
            .and_then(|digits| u64::from_str_radix(digits, 16).ok())
            .filter(|&n| n != 0)
            .unwrap_or_else(unix_millis)
            .to_string()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
