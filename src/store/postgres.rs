use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::{student_not_found, Store};
use crate::error::Error;
use crate::models::{
    Attendance, AttendanceStatus, CheckInOutcome, Course, Post, Session, SessionType, StudentId,
    User, UserRole,
};
use crate::seed::SeedData;

const SESSION_COLUMNS: &str = "id, course_id, session_type, start_time, end_time, location, \
     lecturer, is_check_in_open";

/// Relational backend over the `athena` Postgres schema.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn init(&self) -> Result<(), Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn seed(&self, data: &SeedData) -> Result<bool, Error> {
        let populated: bool = sqlx::query("SELECT EXISTS (SELECT 1 FROM athena.users) AS populated")
            .fetch_one(&self.pool)
            .await?
            .get("populated");
        if populated {
            debug!("users table already populated, skipping seed");
            return Ok(false);
        }

        let mut tx = self.pool.begin().await?;

        for user in &data.users {
            sqlx::query(
                r#"
                INSERT INTO athena.users (id, name, role, email, level, current_xp, streak_days)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(user.id.as_str())
            .bind(&user.name)
            .bind(user.role.as_str())
            .bind(&user.email)
            .bind(user.level)
            .bind(user.current_xp)
            .bind(user.streak_days)
            .execute(&mut *tx)
            .await?;
        }

        for course in &data.courses {
            sqlx::query(
                r#"
                INSERT INTO athena.courses (id, code, title)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO UPDATE
                SET code = EXCLUDED.code, title = EXCLUDED.title
                "#,
            )
            .bind(&course.id)
            .bind(&course.code)
            .bind(&course.title)
            .execute(&mut *tx)
            .await?;
        }

        for session in &data.sessions {
            sqlx::query(
                r#"
                INSERT INTO athena.sessions
                (id, course_id, session_type, start_time, end_time, location, lecturer, is_check_in_open)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&session.id)
            .bind(&session.course_id)
            .bind(session.session_type.as_str())
            .bind(session.start_time)
            .bind(session.end_time)
            .bind(&session.location)
            .bind(&session.lecturer)
            .bind(session.is_check_in_open)
            .execute(&mut *tx)
            .await?;
        }

        for record in &data.attendance {
            sqlx::query(
                r#"
                INSERT INTO athena.attendance (session_id, student_id, status, timestamp)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (session_id, student_id) DO NOTHING
                "#,
            )
            .bind(&record.session_id)
            .bind(record.student_id.as_str())
            .bind(record.status.as_str())
            .bind(record.timestamp)
            .execute(&mut *tx)
            .await?;
        }

        for post in &data.posts {
            sqlx::query(
                r#"
                INSERT INTO athena.posts
                (id, author_name, author_role, content, timestamp, likes, comments_count, tags)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(post.id)
            .bind(&post.author_name)
            .bind(post.author_role.as_str())
            .bind(&post.content)
            .bind(post.timestamp)
            .bind(post.likes)
            .bind(post.comments_count)
            .bind(&post.tags)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            users = data.users.len(),
            sessions = data.sessions.len(),
            "seeded postgres store"
        );
        Ok(true)
    }

    async fn get_student(&self, student_id: &StudentId) -> Result<User, Error> {
        let row = sqlx::query(
            "SELECT id, name, role, email, level, current_xp, streak_days \
             FROM athena.users WHERE id = $1",
        )
        .bind(student_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => user_from_row(&row),
            None => Err(student_not_found(student_id)),
        }
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, Error> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM athena.sessions WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, Error> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM athena.sessions ORDER BY start_time");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter().map(session_from_row).collect()
    }

    async fn list_past_sessions(&self, before: DateTime<Utc>) -> Result<Vec<Session>, Error> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM athena.sessions WHERE end_time < $1 ORDER BY start_time"
        );
        let rows = sqlx::query(&query)
            .bind(before)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(session_from_row).collect()
    }

    async fn list_courses(&self) -> Result<Vec<Course>, Error> {
        let rows = sqlx::query("SELECT id, code, title FROM athena.courses ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| Course {
                id: row.get("id"),
                code: row.get("code"),
                title: row.get("title"),
            })
            .collect())
    }

    async fn list_attendance(&self, student_id: &StudentId) -> Result<Vec<Attendance>, Error> {
        let rows = sqlx::query(
            "SELECT id, session_id, student_id, status, timestamp \
             FROM athena.attendance WHERE student_id = $1 ORDER BY id",
        )
        .bind(student_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(attendance_from_row).collect()
    }

    async fn list_checked_in(&self, student_id: &StudentId) -> Result<Vec<Attendance>, Error> {
        let rows = sqlx::query(
            "SELECT id, session_id, student_id, status, timestamp \
             FROM athena.attendance WHERE student_id = $1 AND status = $2 ORDER BY id",
        )
        .bind(student_id.as_str())
        .bind(AttendanceStatus::CheckedIn.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(attendance_from_row).collect()
    }

    async fn record_check_in(
        &self,
        session_id: &str,
        student_id: &StudentId,
        at: DateTime<Utc>,
        xp: i32,
    ) -> Result<CheckInOutcome, Error> {
        let mut tx = self.pool.begin().await?;

        // The unique (session_id, student_id) constraint decides who wins.
        let inserted = sqlx::query(
            r#"
            INSERT INTO athena.attendance (session_id, student_id, status, timestamp)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id, student_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(session_id)
        .bind(student_id.as_str())
        .bind(AttendanceStatus::CheckedIn.as_str())
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            tx.rollback().await?;
            return Ok(CheckInOutcome::AlreadyCheckedIn);
        }

        let row = sqlx::query(
            r#"
            UPDATE athena.users
            SET current_xp = current_xp + $2, streak_days = streak_days + 1
            WHERE id = $1
            RETURNING current_xp, streak_days
            "#,
        )
        .bind(student_id.as_str())
        .bind(xp)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(student_not_found(student_id));
        };

        tx.commit().await?;
        Ok(CheckInOutcome::Recorded {
            current_streak: row.get("streak_days"),
            current_xp: row.get("current_xp"),
        })
    }

    async fn list_posts(&self) -> Result<Vec<Post>, Error> {
        let rows = sqlx::query(
            "SELECT id, author_name, author_role, content, timestamp, likes, comments_count, tags \
             FROM athena.posts ORDER BY timestamp DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut posts = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row.get("author_role");
            posts.push(Post {
                id: row.get::<Uuid, _>("id"),
                author_name: row.get("author_name"),
                author_role: parse_role(&role)?,
                content: row.get("content"),
                timestamp: row.get("timestamp"),
                likes: row.get("likes"),
                comments_count: row.get("comments_count"),
                tags: row.get("tags"),
            });
        }

        Ok(posts)
    }

    async fn count_students(&self) -> Result<i64, Error> {
        let count = sqlx::query("SELECT COUNT(*) AS count FROM athena.users WHERE role = $1")
            .bind(UserRole::Student.as_str())
            .fetch_one(&self.pool)
            .await?
            .get("count");
        Ok(count)
    }

    async fn count_check_ins(&self) -> Result<i64, Error> {
        let count = sqlx::query("SELECT COUNT(*) AS count FROM athena.attendance WHERE status = $1")
            .bind(AttendanceStatus::CheckedIn.as_str())
            .fetch_one(&self.pool)
            .await?
            .get("count");
        Ok(count)
    }
}

fn user_from_row(row: &PgRow) -> Result<User, Error> {
    let role: String = row.get("role");
    Ok(User {
        id: StudentId::new(row.get::<String, _>("id")),
        name: row.get("name"),
        role: parse_role(&role)?,
        email: row.get("email"),
        level: row.get("level"),
        current_xp: row.get("current_xp"),
        streak_days: row.get("streak_days"),
    })
}

fn session_from_row(row: &PgRow) -> Result<Session, Error> {
    let session_type: String = row.get("session_type");
    Ok(Session {
        id: row.get("id"),
        course_id: row.get("course_id"),
        session_type: SessionType::parse(&session_type)
            .ok_or_else(|| Error::Internal(format!("unknown session type '{session_type}'")))?,
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        location: row.get("location"),
        lecturer: row.get("lecturer"),
        is_check_in_open: row.get("is_check_in_open"),
    })
}

fn attendance_from_row(row: &PgRow) -> Result<Attendance, Error> {
    let status: String = row.get("status");
    Ok(Attendance {
        id: row.get("id"),
        session_id: row.get("session_id"),
        student_id: StudentId::new(row.get::<String, _>("student_id")),
        status: AttendanceStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("unknown attendance status '{status}'")))?,
        timestamp: row.get("timestamp"),
    })
}

fn parse_role(role: &str) -> Result<UserRole, Error> {
    UserRole::parse(role).ok_or_else(|| Error::Internal(format!("unknown user role '{role}'")))
}
