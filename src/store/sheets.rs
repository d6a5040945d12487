use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{student_not_found, Store};
use crate::error::Error;
use crate::models::{
    Attendance, AttendanceStatus, CheckInOutcome, Course, Post, Session, SessionType, StudentId,
    User, UserRole,
};
use crate::seed::SeedData;

const USERS: &str = "users";
const COURSES: &str = "courses";
const SESSIONS: &str = "sessions";
const ATTENDANCE: &str = "attendance";
const POSTS: &str = "posts";

const SHEETS: [(&str, &[&str]); 5] = [
    (
        USERS,
        &["id", "name", "role", "email", "level", "current_xp", "streak_days"],
    ),
    (COURSES, &["id", "code", "title"]),
    (
        SESSIONS,
        &[
            "id",
            "course_id",
            "type",
            "start_time",
            "end_time",
            "location",
            "lecturer",
            "is_check_in_open",
        ],
    ),
    (
        ATTENDANCE,
        &["id", "session_id", "student_id", "status", "timestamp"],
    ),
    (
        POSTS,
        &[
            "id",
            "author_name",
            "author_role",
            "content",
            "timestamp",
            "likes",
            "comments_count",
            "tags",
        ],
    ),
];

/// Spreadsheet backend: a workbook directory holding one CSV sheet per table.
///
/// Readers share the lock, writers hold it exclusively, so a check-in's
/// existence test and both sheet rewrites run as one critical section.
/// Sheet I/O runs on the blocking pool.
pub struct SheetStore {
    workbook: Arc<Workbook>,
    lock: RwLock<()>,
}

struct Workbook {
    dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct UserRow {
    id: String,
    name: String,
    role: UserRole,
    email: String,
    level: i32,
    current_xp: i32,
    streak_days: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct CourseRow {
    id: String,
    code: String,
    title: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionRow {
    id: String,
    course_id: String,
    #[serde(rename = "type")]
    session_type: SessionType,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    location: String,
    lecturer: String,
    is_check_in_open: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct AttendanceRow {
    id: i64,
    session_id: String,
    student_id: String,
    status: AttendanceStatus,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PostRow {
    id: Uuid,
    author_name: String,
    author_role: UserRole,
    content: String,
    timestamp: DateTime<Utc>,
    likes: i32,
    comments_count: i32,
    // Comma separated, like the sheet column users edit by hand.
    tags: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: StudentId::new(row.id),
            name: row.name,
            role: row.role,
            email: row.email,
            level: row.level,
            current_xp: row.current_xp,
            streak_days: row.streak_days,
        }
    }
}

impl From<&User> for UserRow {
    fn from(user: &User) -> Self {
        UserRow {
            id: user.id.as_str().to_string(),
            name: user.name.clone(),
            role: user.role,
            email: user.email.clone(),
            level: user.level,
            current_xp: user.current_xp,
            streak_days: user.streak_days,
        }
    }
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            course_id: row.course_id,
            session_type: row.session_type,
            start_time: row.start_time,
            end_time: row.end_time,
            location: row.location,
            lecturer: row.lecturer,
            is_check_in_open: row.is_check_in_open,
        }
    }
}

impl From<&Session> for SessionRow {
    fn from(session: &Session) -> Self {
        SessionRow {
            id: session.id.clone(),
            course_id: session.course_id.clone(),
            session_type: session.session_type,
            start_time: session.start_time,
            end_time: session.end_time,
            location: session.location.clone(),
            lecturer: session.lecturer.clone(),
            is_check_in_open: session.is_check_in_open,
        }
    }
}

impl From<AttendanceRow> for Attendance {
    fn from(row: AttendanceRow) -> Self {
        Attendance {
            id: row.id,
            session_id: row.session_id,
            student_id: StudentId::new(row.student_id),
            status: row.status,
            timestamp: row.timestamp,
        }
    }
}

impl From<&Attendance> for AttendanceRow {
    fn from(record: &Attendance) -> Self {
        AttendanceRow {
            id: record.id,
            session_id: record.session_id.clone(),
            student_id: record.student_id.as_str().to_string(),
            status: record.status,
            timestamp: record.timestamp,
        }
    }
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            id: row.id,
            author_name: row.author_name,
            author_role: row.author_role,
            content: row.content,
            timestamp: row.timestamp,
            likes: row.likes,
            comments_count: row.comments_count,
            tags: split_tags(&row.tags),
        }
    }
}

impl From<&Post> for PostRow {
    fn from(post: &Post) -> Self {
        PostRow {
            id: post.id,
            author_name: post.author_name.clone(),
            author_role: post.author_role,
            content: post.content.clone(),
            timestamp: post.timestamp,
            likes: post.likes,
            comments_count: post.comments_count,
            tags: post.tags.join(","),
        }
    }
}

fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

impl SheetStore {
    /// Open the workbook at `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            workbook: Arc::new(Workbook { dir }),
            lock: RwLock::new(()),
        })
    }

    /// Run `f` against the workbook on the blocking pool. Callers hold the
    /// lock across the await.
    async fn blocking<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Workbook) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let workbook = Arc::clone(&self.workbook);
        tokio::task::spawn_blocking(move || f(&workbook))
            .await
            .map_err(|err| Error::Internal(format!("worksheet task failed: {err}")))?
    }
}

impl Workbook {
    fn sheet_path(&self, sheet: &str) -> PathBuf {
        self.dir.join(format!("{sheet}.csv"))
    }

    fn staging_path(&self, sheet: &str) -> PathBuf {
        self.dir.join(format!("{sheet}.csv.tmp"))
    }

    fn headers(sheet: &str) -> Result<&'static [&'static str], Error> {
        SHEETS
            .iter()
            .find(|(name, _)| *name == sheet)
            .map(|(_, headers)| *headers)
            .ok_or_else(|| Error::Internal(format!("Worksheet '{sheet}' is not defined")))
    }

    fn read_sheet<T: DeserializeOwned>(&self, sheet: &str) -> Result<Vec<T>, Error> {
        let path = self.sheet_path(sheet);
        if !path.exists() {
            return Err(Error::Internal(format!(
                "Worksheet '{sheet}' not found in {}",
                self.dir.display()
            )));
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let mut rows = Vec::new();
        for result in reader.deserialize::<T>() {
            rows.push(result?);
        }
        Ok(rows)
    }

    /// Write a whole sheet to its staging file. Nothing readers see changes
    /// until the staged file is renamed over the sheet.
    fn stage_sheet<T: Serialize>(&self, sheet: &str, rows: &[T]) -> Result<PathBuf, Error> {
        let headers = Self::headers(sheet)?;
        let tmp = self.staging_path(sheet);

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp)?;
        writer.write_record(headers)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(tmp)
    }

    fn discard_staged(&self, sheets: &[&str]) {
        for sheet in sheets {
            let tmp = self.staging_path(sheet);
            if tmp.is_file() {
                let _ = std::fs::remove_file(tmp);
            }
        }
    }

    fn write_sheet<T: Serialize>(&self, sheet: &str, rows: &[T]) -> Result<(), Error> {
        let tmp = self.stage_sheet(sheet, rows).inspect_err(|_| {
            self.discard_staged(&[sheet]);
        })?;
        std::fs::rename(tmp, self.sheet_path(sheet))?;
        Ok(())
    }

    fn read_users(&self) -> Result<Vec<UserRow>, Error> {
        self.read_sheet(USERS)
    }

    fn read_sessions(&self) -> Result<Vec<Session>, Error> {
        let mut sessions: Vec<Session> = self
            .read_sheet::<SessionRow>(SESSIONS)?
            .into_iter()
            .map(Session::from)
            .collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(sessions)
    }

    fn read_attendance(&self) -> Result<Vec<Attendance>, Error> {
        Ok(self
            .read_sheet::<AttendanceRow>(ATTENDANCE)?
            .into_iter()
            .map(Attendance::from)
            .collect())
    }

    fn init(&self) -> Result<(), Error> {
        for (sheet, headers) in SHEETS {
            let path = self.sheet_path(sheet);
            if path.exists() {
                continue;
            }
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(headers)?;
            writer.flush()?;
            debug!(sheet, "created worksheet");
        }
        Ok(())
    }

    fn seed(&self, data: &SeedData) -> Result<bool, Error> {
        if !self.read_users()?.is_empty() {
            debug!("users sheet already populated, skipping seed");
            return Ok(false);
        }

        let users: Vec<UserRow> = data.users.iter().map(UserRow::from).collect();
        let courses: Vec<CourseRow> = data
            .courses
            .iter()
            .map(|c| CourseRow {
                id: c.id.clone(),
                code: c.code.clone(),
                title: c.title.clone(),
            })
            .collect();
        let sessions: Vec<SessionRow> = data.sessions.iter().map(SessionRow::from).collect();
        let attendance: Vec<AttendanceRow> =
            data.attendance.iter().map(AttendanceRow::from).collect();
        let posts: Vec<PostRow> = data.posts.iter().map(PostRow::from).collect();

        self.write_sheet(COURSES, &courses)?;
        self.write_sheet(SESSIONS, &sessions)?;
        self.write_sheet(ATTENDANCE, &attendance)?;
        self.write_sheet(POSTS, &posts)?;
        // Users last: a populated users sheet is what marks the workbook seeded.
        self.write_sheet(USERS, &users)?;

        info!(
            users = users.len(),
            sessions = sessions.len(),
            dir = %self.dir.display(),
            "seeded sheet store"
        );
        Ok(true)
    }

    /// Both sheets are staged before either is renamed into place, so a
    /// failed write leaves the record and the user's XP untouched.
    fn record_check_in(
        &self,
        session_id: &str,
        student_id: &StudentId,
        at: DateTime<Utc>,
        xp: i32,
    ) -> Result<CheckInOutcome, Error> {
        let mut attendance: Vec<AttendanceRow> = self.read_sheet(ATTENDANCE)?;
        let exists = attendance
            .iter()
            .any(|row| row.session_id == session_id && row.student_id == student_id.as_str());
        if exists {
            return Ok(CheckInOutcome::AlreadyCheckedIn);
        }

        let mut users = self.read_users()?;
        let user = users
            .iter_mut()
            .find(|row| row.id == student_id.as_str())
            .ok_or_else(|| student_not_found(student_id))?;
        user.current_xp += xp;
        user.streak_days += 1;
        let outcome = CheckInOutcome::Recorded {
            current_streak: user.streak_days,
            current_xp: user.current_xp,
        };

        let next_id = attendance.iter().map(|row| row.id).max().unwrap_or(0) + 1;
        attendance.push(AttendanceRow {
            id: next_id,
            session_id: session_id.to_string(),
            student_id: student_id.as_str().to_string(),
            status: AttendanceStatus::CheckedIn,
            timestamp: at,
        });

        let staged = self.stage_sheet(ATTENDANCE, &attendance).and_then(|attendance_tmp| {
            self.stage_sheet(USERS, &users)
                .map(|users_tmp| (attendance_tmp, users_tmp))
        });
        let (attendance_tmp, users_tmp) = match staged {
            Ok(paths) => paths,
            Err(err) => {
                self.discard_staged(&[ATTENDANCE, USERS]);
                return Err(err);
            }
        };

        if let Err(err) = std::fs::rename(&attendance_tmp, self.sheet_path(ATTENDANCE)) {
            self.discard_staged(&[ATTENDANCE, USERS]);
            return Err(err.into());
        }
        if let Err(err) = std::fs::rename(&users_tmp, self.sheet_path(USERS)) {
            // Restore the old attendance sheet so the check-in can be retried.
            attendance.pop();
            if let Err(restore) = self.write_sheet(ATTENDANCE, &attendance) {
                error!(%restore, "failed to restore attendance sheet");
            }
            self.discard_staged(&[USERS]);
            return Err(err.into());
        }

        Ok(outcome)
    }
}

#[async_trait]
impl Store for SheetStore {
    async fn init(&self) -> Result<(), Error> {
        let _guard = self.lock.write().await;
        self.blocking(Workbook::init).await
    }

    async fn seed(&self, data: &SeedData) -> Result<bool, Error> {
        let _guard = self.lock.write().await;
        let data = data.clone();
        self.blocking(move |workbook| workbook.seed(&data)).await
    }

    async fn get_student(&self, student_id: &StudentId) -> Result<User, Error> {
        let _guard = self.lock.read().await;
        let users = self.blocking(Workbook::read_users).await?;
        users
            .into_iter()
            .find(|row| row.id == student_id.as_str())
            .map(User::from)
            .ok_or_else(|| student_not_found(student_id))
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, Error> {
        let _guard = self.lock.read().await;
        let sessions = self.blocking(Workbook::read_sessions).await?;
        Ok(sessions.into_iter().find(|session| session.id == session_id))
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, Error> {
        let _guard = self.lock.read().await;
        self.blocking(Workbook::read_sessions).await
    }

    async fn list_past_sessions(&self, before: DateTime<Utc>) -> Result<Vec<Session>, Error> {
        let _guard = self.lock.read().await;
        let sessions = self.blocking(Workbook::read_sessions).await?;
        Ok(sessions
            .into_iter()
            .filter(|session| session.end_time < before)
            .collect())
    }

    async fn list_courses(&self) -> Result<Vec<Course>, Error> {
        let _guard = self.lock.read().await;
        let rows = self
            .blocking(|workbook| workbook.read_sheet::<CourseRow>(COURSES))
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Course {
                id: row.id,
                code: row.code,
                title: row.title,
            })
            .collect())
    }

    async fn list_attendance(&self, student_id: &StudentId) -> Result<Vec<Attendance>, Error> {
        let _guard = self.lock.read().await;
        let records = self.blocking(Workbook::read_attendance).await?;
        Ok(records
            .into_iter()
            .filter(|record| &record.student_id == student_id)
            .collect())
    }

    async fn list_checked_in(&self, student_id: &StudentId) -> Result<Vec<Attendance>, Error> {
        let _guard = self.lock.read().await;
        let records = self.blocking(Workbook::read_attendance).await?;
        Ok(records
            .into_iter()
            .filter(|record| {
                &record.student_id == student_id && record.status == AttendanceStatus::CheckedIn
            })
            .collect())
    }

    async fn record_check_in(
        &self,
        session_id: &str,
        student_id: &StudentId,
        at: DateTime<Utc>,
        xp: i32,
    ) -> Result<CheckInOutcome, Error> {
        let _guard = self.lock.write().await;
        let session_id = session_id.to_string();
        let student_id = student_id.clone();
        self.blocking(move |workbook| workbook.record_check_in(&session_id, &student_id, at, xp))
            .await
    }

    async fn list_posts(&self) -> Result<Vec<Post>, Error> {
        let _guard = self.lock.read().await;
        let rows = self
            .blocking(|workbook| workbook.read_sheet::<PostRow>(POSTS))
            .await?;
        Ok(rows.into_iter().map(Post::from).collect())
    }

    async fn count_students(&self) -> Result<i64, Error> {
        let _guard = self.lock.read().await;
        let users = self.blocking(Workbook::read_users).await?;
        let count = users
            .iter()
            .filter(|row| row.role == UserRole::Student)
            .count();
        Ok(count as i64)
    }

    async fn count_check_ins(&self) -> Result<i64, Error> {
        let _guard = self.lock.read().await;
        let records = self.blocking(Workbook::read_attendance).await?;
        let count = records
            .iter()
            .filter(|record| record.status == AttendanceStatus::CheckedIn)
            .count();
        Ok(count as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::DEMO_STUDENT_ID;
    use chrono::Duration;

    async fn seeded_store(dir: &Path, now: DateTime<Utc>) -> SheetStore {
        let store = SheetStore::open(dir).unwrap();
        store.init().await.unwrap();
        assert!(store.seed(&SeedData::demo(now)).await.unwrap());
        store
    }

    #[tokio::test]
    async fn init_creates_every_sheet_with_headers() {
        let dir = tempfile::tempdir().unwrap();
        let store = SheetStore::open(dir.path()).unwrap();
        store.init().await.unwrap();

        for (sheet, headers) in SHEETS {
            let path = dir.path().join(format!("{sheet}.csv"));
            let contents = std::fs::read_to_string(path).unwrap();
            assert_eq!(contents.trim_end(), headers.join(","));
        }
        assert!(store.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn seeding_twice_keeps_the_first_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let store = seeded_store(dir.path(), now).await;

        assert!(!store.seed(&SeedData::demo(now)).await.unwrap());
        assert_eq!(store.list_posts().await.unwrap().len(), 2);
        assert_eq!(store.count_students().await.unwrap(), 1);
        assert_eq!(store.count_check_ins().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn past_sessions_end_strictly_before_the_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let store = seeded_store(dir.path(), now).await;

        let past_one = store.get_session("s_past_1").await.unwrap().unwrap();
        let cutoff = past_one.end_time;
        let past = store.list_past_sessions(cutoff).await.unwrap();

        assert!(past.iter().all(|s| s.end_time < cutoff));
        assert!(!past.iter().any(|s| s.id == "s_past_1"));
        assert!(past.iter().any(|s| s.id == "s_past_2"));
    }

    #[tokio::test]
    async fn check_in_is_inserted_once_per_session_and_student() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let store = seeded_store(dir.path(), now).await;
        let student = StudentId::new(DEMO_STUDENT_ID);

        let first = store
            .record_check_in("s_today_1", &student, now, 50)
            .await
            .unwrap();
        assert_eq!(
            first,
            CheckInOutcome::Recorded {
                current_streak: 15,
                current_xp: 2500
            }
        );

        let second = store
            .record_check_in("s_today_1", &student, now + Duration::minutes(1), 50)
            .await
            .unwrap();
        assert_eq!(second, CheckInOutcome::AlreadyCheckedIn);

        let user = store.get_student(&student).await.unwrap();
        assert_eq!(user.current_xp, 2500);
        assert_eq!(user.streak_days, 15);

        let records = store.list_attendance(&student).await.unwrap();
        let today: Vec<_> = records.iter().filter(|r| r.session_id == "s_today_1").collect();
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].id, 6);
    }

    #[tokio::test]
    async fn failed_users_write_leaves_check_in_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let store = seeded_store(dir.path(), now).await;
        let student = StudentId::new(DEMO_STUDENT_ID);

        // A directory in the staging slot makes the users sheet unwritable.
        let blocker = dir.path().join("users.csv.tmp");
        std::fs::create_dir(&blocker).unwrap();

        let err = store
            .record_check_in("s_today_1", &student, now, 50)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Sheet(_) | Error::Io(_)));

        assert_eq!(store.count_check_ins().await.unwrap(), 3);
        let records = store.list_attendance(&student).await.unwrap();
        assert!(!records.iter().any(|r| r.session_id == "s_today_1"));
        assert!(!dir.path().join("attendance.csv.tmp").exists());
        let user = store.get_student(&student).await.unwrap();
        assert_eq!(user.current_xp, 2450);
        assert_eq!(user.streak_days, 14);

        std::fs::remove_dir(&blocker).unwrap();
        let retry = store
            .record_check_in("s_today_1", &student, now, 50)
            .await
            .unwrap();
        assert_eq!(
            retry,
            CheckInOutcome::Recorded {
                current_streak: 15,
                current_xp: 2500
            }
        );
        assert_eq!(store.count_check_ins().await.unwrap(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_check_ins_record_once() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let store = Arc::new(seeded_store(dir.path(), now).await);
        let student = StudentId::new(DEMO_STUDENT_ID);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let student = student.clone();
                tokio::spawn(async move {
                    store.record_check_in("s_today_1", &student, now, 50).await
                })
            })
            .collect();

        let mut recorded = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                CheckInOutcome::Recorded { .. } => recorded += 1,
                CheckInOutcome::AlreadyCheckedIn => {}
            }
        }
        assert_eq!(recorded, 1);

        let user = store.get_student(&student).await.unwrap();
        assert_eq!(user.current_xp, 2500);
        assert_eq!(user.streak_days, 15);
        assert_eq!(store.count_check_ins().await.unwrap(), 4);
        let records = store.list_attendance(&student).await.unwrap();
        assert_eq!(
            records.iter().filter(|r| r.session_id == "s_today_1").count(),
            1
        );
    }

    #[tokio::test]
    async fn check_in_for_unknown_student_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), Utc::now()).await;

        let err = store
            .record_check_in("s_today_1", &StudentId::new("NOBODY"), Utc::now(), 50)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(store.count_check_ins().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn post_tags_survive_the_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), Utc::now()).await;

        let posts = store.list_posts().await.unwrap();
        let staff = posts
            .iter()
            .find(|p| p.author_role == UserRole::Staff)
            .unwrap();
        assert_eq!(staff.tags, vec!["Announcement", "Help"]);
    }

    #[test]
    fn empty_tag_cells_become_empty_lists() {
        assert!(split_tags("").is_empty());
        assert_eq!(split_tags("Social, ,Help"), vec!["Social", "Help"]);
    }
}
