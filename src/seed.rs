use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use crate::models::{
    Attendance, AttendanceStatus, Course, Post, Session, SessionType, StudentId, User, UserRole,
};

pub const DEMO_STUDENT_ID: &str = "MOCK_STUDENT_123";

/// Records a store inserts in one go when it is empty.
#[derive(Debug, Clone, Default)]
pub struct SeedData {
    pub users: Vec<User>,
    pub courses: Vec<Course>,
    pub sessions: Vec<Session>,
    pub attendance: Vec<Attendance>,
    pub posts: Vec<Post>,
}

impl SeedData {
    /// Demo dataset: two sessions today and five past sessions, three of them
    /// attended, so the demo student lands in the HIGH risk band.
    pub fn demo(now: DateTime<Utc>) -> Self {
        let student_id = StudentId::new(DEMO_STUDENT_ID);
        let today_start = local_today_at(now, 9);

        let users = vec![
            User {
                id: student_id.clone(),
                name: "Alex Student".to_string(),
                role: UserRole::Student,
                email: "alex@leeds.ac.uk".to_string(),
                level: 12,
                current_xp: 2450,
                streak_days: 14,
            },
            User {
                id: StudentId::new("STAFF_001"),
                name: "Dr. Smith".to_string(),
                role: UserRole::Staff,
                email: "smith@leeds.ac.uk".to_string(),
                level: 1,
                current_xp: 0,
                streak_days: 0,
            },
        ];

        let courses = vec![
            course("c1", "COMP3001", "Advanced Software Engineering"),
            course("c2", "COMP3220", "Artificial Intelligence"),
            course("c3", "LUBS1000", "Innovation & Entrepreneurship"),
        ];

        let mut sessions = vec![
            Session {
                id: "s_today_1".to_string(),
                course_id: "c1".to_string(),
                session_type: SessionType::Lecture,
                start_time: today_start,
                end_time: today_start + Duration::hours(1),
                location: "Roger Stevens LT 20".to_string(),
                lecturer: "Dr. A. Smith".to_string(),
                is_check_in_open: true,
            },
            Session {
                id: "s_today_2".to_string(),
                course_id: "c2".to_string(),
                session_type: SessionType::Lab,
                start_time: today_start + Duration::hours(2),
                end_time: today_start + Duration::hours(4),
                location: "EC Stoner 9.10".to_string(),
                lecturer: "Prof. B. Jones".to_string(),
                is_check_in_open: false,
            },
        ];

        let mut attendance = Vec::new();
        for i in 1..=5 {
            let start = now - Duration::days(i);
            let id = format!("s_past_{i}");
            sessions.push(Session {
                id: id.clone(),
                course_id: "c1".to_string(),
                session_type: SessionType::Lecture,
                start_time: start,
                end_time: start + Duration::hours(1),
                location: "Remote".to_string(),
                lecturer: "Dr. Smith".to_string(),
                is_check_in_open: false,
            });

            let status = if i <= 3 {
                AttendanceStatus::CheckedIn
            } else {
                AttendanceStatus::Missed
            };
            attendance.push(Attendance {
                id: i,
                session_id: id,
                student_id: student_id.clone(),
                status,
                timestamp: start,
            });
        }

        let posts = vec![
            Post {
                id: Uuid::new_v4(),
                author_name: "Dr. Smith".to_string(),
                author_role: UserRole::Staff,
                content: "Reminder: Assignment 1 deadline extended by 24 hours due to server maintenance."
                    .to_string(),
                timestamp: now - Duration::hours(2),
                likes: 45,
                comments_count: 12,
                tags: vec!["Announcement".to_string(), "Help".to_string()],
            },
            Post {
                id: Uuid::new_v4(),
                author_name: "Jamie Lee".to_string(),
                author_role: UserRole::Student,
                content: "Does anyone want to form a study group for the AI module? Meet at Laidlaw?"
                    .to_string(),
                timestamp: now - Duration::minutes(30),
                likes: 8,
                comments_count: 3,
                tags: vec!["Study Group".to_string(), "Social".to_string()],
            },
        ];

        SeedData {
            users,
            courses,
            sessions,
            attendance,
            posts,
        }
    }
}

fn course(id: &str, code: &str, title: &str) -> Course {
    Course {
        id: id.to_string(),
        code: code.to_string(),
        title: title.to_string(),
    }
}

/// `hour:00` on the local calendar day containing `now`.
fn local_today_at(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let local_day = now.with_timezone(&Local).date_naive();
    let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default();
    Local
        .from_local_datetime(&local_day.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}
