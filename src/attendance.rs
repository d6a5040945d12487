use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Error;
use crate::models::{AttendanceStatus, CheckInOutcome, StudentId};
use crate::risk::{attendance_rate, EngagementRiskCalculator};
use crate::store::Store;

pub const XP_PER_CHECK_IN: i32 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInRequest {
    pub session_id: String,
    // Accepted for client compatibility; not verified.
    #[serde(default)]
    pub qr_token: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckInData {
    pub check_in_time: String,
    pub current_streak: i32,
    pub xp_gained: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckInResponse {
    pub status: String,
    pub message: String,
    pub data: Option<CheckInData>,
}

/// Record the student's presence at a session. Repeat calls for the same
/// session succeed without data and without touching XP or streak.
pub async fn check_in(
    store: &dyn Store,
    student_id: &StudentId,
    request: &CheckInRequest,
    now: DateTime<Utc>,
) -> Result<CheckInResponse, Error> {
    let session_id = request.session_id.trim();
    if session_id.is_empty() {
        return Err(Error::Validation("session_id must not be empty".to_string()));
    }

    if store.get_session(session_id).await?.is_none() {
        return Err(Error::NotFound("Session not found".to_string()));
    }
    // Fails with NotFound before anything is written.
    store.get_student(student_id).await?;

    // Streak grows on every new check-in, not once per calendar day.
    let outcome = store
        .record_check_in(session_id, student_id, now, XP_PER_CHECK_IN)
        .await?;

    let response = match outcome {
        CheckInOutcome::AlreadyCheckedIn => {
            info!(%student_id, session_id, "already checked in");
            CheckInResponse {
                status: "SUCCESS".to_string(),
                message: "Already checked in".to_string(),
                data: None,
            }
        }
        CheckInOutcome::Recorded {
            current_streak,
            current_xp,
        } => {
            info!(%student_id, session_id, current_streak, current_xp, "checked in");
            CheckInResponse {
                status: "SUCCESS".to_string(),
                message: "Checked in successfully".to_string(),
                data: Some(CheckInData {
                    check_in_time: now.to_rfc3339(),
                    current_streak,
                    xp_gained: XP_PER_CHECK_IN,
                }),
            }
        }
    };

    Ok(response)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceHistoryItem {
    pub date: String,
    pub session: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceHistory {
    pub current_streak_days: i32,
    pub total_attendance_percentage: f64,
    pub history: Vec<AttendanceHistoryItem>,
}

/// One entry per session that has ended, newest first. Sessions without a
/// record count as missed.
pub async fn attendance_history(
    store: &dyn Store,
    student_id: &StudentId,
    now: DateTime<Utc>,
) -> Result<AttendanceHistory, Error> {
    let student = store.get_student(student_id).await?;
    let mut past_sessions = store.list_past_sessions(now).await?;
    past_sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));

    let courses: HashMap<String, String> = store
        .list_courses()
        .await?
        .into_iter()
        .map(|c| (c.id, c.code))
        .collect();
    let statuses: HashMap<String, AttendanceStatus> = store
        .list_attendance(student_id)
        .await?
        .into_iter()
        .map(|a| (a.session_id, a.status))
        .collect();

    let history = past_sessions
        .iter()
        .map(|session| {
            let code = courses
                .get(&session.course_id)
                .map(String::as_str)
                .unwrap_or(session.course_id.as_str());
            AttendanceHistoryItem {
                date: session.start_time.format("%Y-%m-%d").to_string(),
                session: format!("{code} {}", session.session_type.as_str()),
                status: statuses
                    .get(&session.id)
                    .copied()
                    .unwrap_or(AttendanceStatus::Missed),
            }
        })
        .collect();

    let (past, attended) =
        EngagementRiskCalculator::attendance_counts(store, student_id, now).await?;

    Ok(AttendanceHistory {
        current_streak_days: student.streak_days,
        total_attendance_percentage: f64::from(attendance_rate(past, attended)),
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{SeedData, DEMO_STUDENT_ID};
    use crate::store::sheets::SheetStore;

    fn request(session_id: &str) -> CheckInRequest {
        CheckInRequest {
            session_id: session_id.to_string(),
            qr_token: "QR-123".to_string(),
            timestamp: "2026-01-01T09:05:00Z".to_string(),
        }
    }

    async fn demo_store(now: DateTime<Utc>) -> (tempfile::TempDir, SheetStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SheetStore::open(dir.path()).unwrap();
        store.init().await.unwrap();
        store.seed(&SeedData::demo(now)).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn first_check_in_awards_xp_and_streak() {
        let now = Utc::now();
        let (_dir, store) = demo_store(now).await;
        let student = StudentId::new(DEMO_STUDENT_ID);

        let response = check_in(&store, &student, &request("s_today_1"), now)
            .await
            .unwrap();

        assert_eq!(response.status, "SUCCESS");
        assert_eq!(response.message, "Checked in successfully");
        let data = response.data.unwrap();
        assert_eq!(data.xp_gained, 50);
        assert_eq!(data.current_streak, 15);

        let user = store.get_student(&student).await.unwrap();
        assert_eq!(user.current_xp, 2450 + 50);
        assert_eq!(user.streak_days, data.current_streak);
    }

    #[tokio::test]
    async fn second_check_in_changes_nothing() {
        let now = Utc::now();
        let (_dir, store) = demo_store(now).await;
        let student = StudentId::new(DEMO_STUDENT_ID);

        check_in(&store, &student, &request("s_today_2"), now)
            .await
            .unwrap();
        let after_first = store.get_student(&student).await.unwrap();
        let checkins_after_first = store.count_check_ins().await.unwrap();

        let response = check_in(&store, &student, &request("s_today_2"), now)
            .await
            .unwrap();

        assert_eq!(response.message, "Already checked in");
        assert!(response.data.is_none());
        assert_eq!(store.get_student(&student).await.unwrap(), after_first);
        assert_eq!(store.count_check_ins().await.unwrap(), checkins_after_first);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_check_ins_award_xp_once() {
        let now = Utc::now();
        let (_dir, store) = demo_store(now).await;
        let store = std::sync::Arc::new(store);
        let student = StudentId::new(DEMO_STUDENT_ID);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let student = student.clone();
                tokio::spawn(async move {
                    check_in(store.as_ref(), &student, &request("s_today_1"), now).await
                })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            if response.data.is_some() {
                succeeded += 1;
            } else {
                assert_eq!(response.message, "Already checked in");
            }
        }
        assert_eq!(succeeded, 1);

        let user = store.get_student(&student).await.unwrap();
        assert_eq!(user.current_xp, 2450 + XP_PER_CHECK_IN);
        assert_eq!(user.streak_days, 15);
        assert_eq!(store.count_check_ins().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let now = Utc::now();
        let (_dir, store) = demo_store(now).await;

        let err = check_in(
            &store,
            &StudentId::new(DEMO_STUDENT_ID),
            &request("s_does_not_exist"),
            now,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn blank_session_id_is_rejected() {
        let now = Utc::now();
        let (_dir, store) = demo_store(now).await;

        let err = check_in(&store, &StudentId::new(DEMO_STUDENT_ID), &request("  "), now)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn history_lists_past_sessions_newest_first() {
        let now = Utc::now();
        let (_dir, store) = demo_store(now).await;
        let student = StudentId::new(DEMO_STUDENT_ID);

        let history = attendance_history(&store, &student, now).await.unwrap();

        assert_eq!(history.current_streak_days, 14);
        let past: Vec<_> = history
            .history
            .iter()
            .filter(|item| item.session == "COMP3001 Lecture")
            .collect();
        assert!(past.len() >= 5);
        let dates: Vec<_> = history.history.iter().map(|i| i.date.clone()).collect();
        let mut sorted = dates.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(dates, sorted);

        let missed = history
            .history
            .iter()
            .filter(|i| i.status == AttendanceStatus::Missed)
            .count();
        let checked_in = history
            .history
            .iter()
            .filter(|i| i.status == AttendanceStatus::CheckedIn)
            .count();
        assert_eq!(checked_in, 3);
        assert_eq!(missed, history.history.len() - 3);
    }
}
