//! Session domain types — one user transaction at the kiosk.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Guest,
    Member,
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionKind::Guest => f.write_str("guest"),
            SessionKind::Member => f.write_str("member"),
        }
    }
}

/// Why a session was closed by the controller rather than by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutReason {
    Inactivity,
    MaxDuration,
    BinFull,
}

impl std::fmt::Display for TimeoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutReason::Inactivity => f.write_str("inactivity"),
            TimeoutReason::MaxDuration => f.write_str("max_duration"),
            TimeoutReason::BinFull => f.write_str("bin_full"),
        }
    }
}

/// Identity of a member, as handed over by the (external) validation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_points: Option<i64>,
}

/// A validated request to open a session.
///
/// The token has already been checked by the scanner/backend; the controller
/// treats `session_id` and `session_code` as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStart {
    pub kind: SessionKind,
    pub session_id: String,
    pub session_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<MemberInfo>,
}

impl SessionStart {
    pub fn guest(session_id: impl Into<String>, session_code: impl Into<String>) -> Self {
        Self {
            kind: SessionKind::Guest,
            session_id: session_id.into(),
            session_code: session_code.into(),
            member: None,
        }
    }

    pub fn member(
        session_id: impl Into<String>,
        session_code: impl Into<String>,
        member: MemberInfo,
    ) -> Self {
        Self {
            kind: SessionKind::Member,
            session_id: session_id.into(),
            session_code: session_code.into(),
            member: Some(member),
        }
    }
}

/// The open session. At most one exists system-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub session_code: String,
    pub kind: SessionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<MemberInfo>,
    pub started_at: DateTime<Utc>,
    pub items_processed: u32,
    /// Pushed forward on every completed item.
    pub inactivity_deadline: DateTime<Utc>,
    /// Fixed at open time regardless of activity.
    pub max_deadline: DateTime<Utc>,
}

impl Session {
    pub fn open(start: SessionStart, inactivity: Duration, max_duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            session_id: start.session_id,
            session_code: start.session_code,
            kind: start.kind,
            member: start.member,
            started_at: now,
            items_processed: 0,
            inactivity_deadline: now + inactivity,
            max_deadline: now + max_duration,
        }
    }

    pub fn touch(&mut self, inactivity: Duration) {
        self.inactivity_deadline = Utc::now() + inactivity;
    }
}
