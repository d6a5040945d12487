use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;

use crate::error::Error;
use crate::models::{AttendanceStatus, Course, Session, StudentId};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub id: String,
    pub module_code: String,
    pub module_title: String,
    #[serde(rename = "type")]
    pub session_type: String,
    pub start_time: String,
    pub end_time: String,
    pub location: String,
    pub lecturer: String,
    pub is_check_in_open: bool,
    pub attendance_status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timetable {
    pub date: String,
    pub sessions: Vec<SessionView>,
}

pub async fn today(
    store: &dyn Store,
    student_id: &StudentId,
    now: DateTime<Utc>,
) -> Result<Timetable, Error> {
    let local_now = now.with_timezone(&Local);
    let day = local_now.date_naive();

    let courses: HashMap<String, Course> = store
        .list_courses()
        .await?
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();
    let statuses: HashMap<String, AttendanceStatus> = store
        .list_attendance(student_id)
        .await?
        .into_iter()
        .map(|a| (a.session_id, a.status))
        .collect();

    let sessions = sessions_on(store.list_sessions().await?, day)
        .iter()
        .map(|session| {
            let status = statuses
                .get(&session.id)
                .copied()
                .unwrap_or(AttendanceStatus::Pending);
            session_view(session, courses.get(&session.course_id), status)
        })
        .collect();

    Ok(Timetable {
        date: local_now.format("%A, %d %B").to_string(),
        sessions,
    })
}

/// Sessions starting on local calendar day `day`, in start order.
fn sessions_on(mut sessions: Vec<Session>, day: NaiveDate) -> Vec<Session> {
    sessions.retain(|s| s.start_time.with_timezone(&Local).date_naive() == day);
    sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time));
    sessions
}

fn session_view(
    session: &Session,
    course: Option<&Course>,
    status: AttendanceStatus,
) -> SessionView {
    let (module_code, module_title) = match course {
        Some(course) => (course.code.clone(), course.title.clone()),
        None => (session.course_id.clone(), String::new()),
    };

    SessionView {
        id: session.id.clone(),
        module_code,
        module_title,
        session_type: session.session_type.as_str().to_string(),
        start_time: session.start_time.with_timezone(&Local).to_rfc3339(),
        end_time: session.end_time.with_timezone(&Local).to_rfc3339(),
        location: session.location.clone(),
        lecturer: session.lecturer.clone(),
        is_check_in_open: session.is_check_in_open,
        attendance_status: status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{SeedData, DEMO_STUDENT_ID};
    use crate::store::sheets::SheetStore;

    #[tokio::test]
    async fn lists_only_todays_sessions_with_pending_status() {
        let now = Utc::now();
        let dir = tempfile::tempdir().unwrap();
        let store = SheetStore::open(dir.path()).unwrap();
        store.init().await.unwrap();
        store.seed(&SeedData::demo(now)).await.unwrap();

        let timetable = today(&store, &StudentId::new(DEMO_STUDENT_ID), now)
            .await
            .unwrap();

        let ids: Vec<_> = timetable.sessions.iter().map(|s| s.id.as_str()).collect();
        assert!(ids.contains(&"s_today_1"));
        assert!(ids.contains(&"s_today_2"));
        assert!(!ids.iter().any(|id| id.starts_with("s_past")));

        let first = timetable.sessions.iter().find(|s| s.id == "s_today_1").unwrap();
        assert_eq!(first.module_code, "COMP3001");
        assert_eq!(first.module_title, "Advanced Software Engineering");
        assert_eq!(first.session_type, "Lecture");
        assert!(first.is_check_in_open);
        assert_eq!(first.attendance_status, AttendanceStatus::Pending);
    }

    #[tokio::test]
    async fn checked_in_session_reports_its_status() {
        let now = Utc::now();
        let dir = tempfile::tempdir().unwrap();
        let store = SheetStore::open(dir.path()).unwrap();
        store.init().await.unwrap();
        store.seed(&SeedData::demo(now)).await.unwrap();
        let student = StudentId::new(DEMO_STUDENT_ID);
        store
            .record_check_in("s_today_2", &student, now, 50)
            .await
            .unwrap();

        let timetable = today(&store, &student, now).await.unwrap();
        let lab = timetable.sessions.iter().find(|s| s.id == "s_today_2").unwrap();
        assert_eq!(lab.attendance_status, AttendanceStatus::CheckedIn);
    }
}
