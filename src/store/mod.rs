//! Data access shared by every endpoint. Both backends expose the same
//! records so the check-in and risk logic is written once against [`Store`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Backend;
use crate::error::Error;
use crate::models::{Attendance, CheckInOutcome, Course, Post, Session, StudentId, User};
use crate::seed::SeedData;

pub mod postgres;
pub mod sheets;

#[async_trait]
pub trait Store: Send + Sync {
    /// Create tables or sheets that do not exist yet.
    async fn init(&self) -> Result<(), Error>;

    /// Insert `data` unless the store already holds users. Returns whether it seeded.
    async fn seed(&self, data: &SeedData) -> Result<bool, Error>;

    async fn get_student(&self, student_id: &StudentId) -> Result<User, Error>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, Error>;

    /// All sessions ordered by start time.
    async fn list_sessions(&self) -> Result<Vec<Session>, Error>;

    /// Sessions whose end time is strictly before `before`.
    async fn list_past_sessions(&self, before: DateTime<Utc>) -> Result<Vec<Session>, Error>;

    async fn list_courses(&self) -> Result<Vec<Course>, Error>;

    async fn list_attendance(&self, student_id: &StudentId) -> Result<Vec<Attendance>, Error>;

    async fn list_checked_in(&self, student_id: &StudentId) -> Result<Vec<Attendance>, Error>;

    /// Insert a CHECKED_IN record for (session, student) if none exists and, only
    /// when inserted, award `xp` and bump the streak. Both happen atomically.
    async fn record_check_in(
        &self,
        session_id: &str,
        student_id: &StudentId,
        at: DateTime<Utc>,
        xp: i32,
    ) -> Result<CheckInOutcome, Error>;

    async fn list_posts(&self) -> Result<Vec<Post>, Error>;

    async fn count_students(&self) -> Result<i64, Error>;

    async fn count_check_ins(&self) -> Result<i64, Error>;
}

pub async fn connect(backend: &Backend) -> Result<Arc<dyn Store>, Error> {
    let store: Arc<dyn Store> = match backend {
        Backend::Postgres { database_url } => {
            Arc::new(postgres::PgStore::connect(database_url).await?)
        }
        Backend::Sheets { dir } => Arc::new(sheets::SheetStore::open(dir)?),
    };
    tracing::info!(backend = backend.name(), "store ready");
    Ok(store)
}

pub(crate) fn student_not_found(student_id: &StudentId) -> Error {
    Error::NotFound(format!("Student {student_id} not found"))
}
