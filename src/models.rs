use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of the student a request acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub String);

impl StudentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Staff,
    Student,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Staff => "STAFF",
            UserRole::Student => "STUDENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "STAFF" => Some(UserRole::Staff),
            "STUDENT" => Some(UserRole::Student),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Pending,
    CheckedIn,
    Missed,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Pending => "PENDING",
            AttendanceStatus::CheckedIn => "CHECKED_IN",
            AttendanceStatus::Missed => "MISSED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(AttendanceStatus::Pending),
            "CHECKED_IN" => Some(AttendanceStatus::CheckedIn),
            "MISSED" => Some(AttendanceStatus::Missed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    Lecture,
    Lab,
    Seminar,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Lecture => "Lecture",
            SessionType::Lab => "Lab",
            SessionType::Seminar => "Seminar",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Lecture" => Some(SessionType::Lecture),
            "Lab" => Some(SessionType::Lab),
            "Seminar" => Some(SessionType::Seminar),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: StudentId,
    pub name: String,
    pub role: UserRole,
    pub email: String,
    pub level: i32,
    pub current_xp: i32,
    pub streak_days: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Course {
    pub id: String,
    pub code: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub course_id: String,
    pub session_type: SessionType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: String,
    pub lecturer: String,
    pub is_check_in_open: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attendance {
    pub id: i64,
    pub session_id: String,
    pub student_id: StudentId,
    pub status: AttendanceStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: Uuid,
    pub author_name: String,
    pub author_role: UserRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub likes: i32,
    pub comments_count: i32,
    pub tags: Vec<String>,
}

/// Result of the atomic insert-if-absent a store performs for a check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInOutcome {
    AlreadyCheckedIn,
    Recorded { current_streak: i32, current_xp: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricStatus {
    Good,
    Warning,
    Critical,
}

impl MetricStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricStatus::Good => "GOOD",
            MetricStatus::Warning => "WARNING",
            MetricStatus::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementMetric {
    pub category: String,
    pub score: u8,
    pub status: MetricStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gamification {
    pub level: i32,
    pub current_xp: i32,
    pub next_level_xp: i32,
    pub avatar_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub student_id: StudentId,
    pub risk_level: RiskLevel,
    pub gamification: Gamification,
    pub metrics: Vec<EngagementMetric>,
    pub recommendations: Vec<String>,
}
