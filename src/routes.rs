use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::info;

use crate::admin::{self, Dashboard};
use crate::attendance::{self, AttendanceHistory, CheckInRequest, CheckInResponse};
use crate::error::Error;
use crate::feed::{self, CommunityFeed, FeedQuery};
use crate::models::{RiskAssessment, StudentId};
use crate::risk::EngagementRiskCalculator;
use crate::store::Store;
use crate::timetable::{self, Timetable};

pub const STUDENT_HEADER: &str = "x-student-id";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub risk: EngagementRiskCalculator,
    pub default_student_id: StudentId,
}

/// The student a request acts for: the `x-student-id` header, or the
/// configured default when the client sends none.
#[derive(Debug, Clone)]
pub struct StudentContext(pub StudentId);

impl FromRequestParts<AppState> for StudentContext {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(STUDENT_HEADER) else {
            return Ok(StudentContext(state.default_student_id.clone()));
        };
        let value = value
            .to_str()
            .map_err(|_| Error::Validation(format!("{STUDENT_HEADER} header is not valid text")))?
            .trim();
        if value.is_empty() {
            return Ok(StudentContext(state.default_student_id.clone()));
        }
        Ok(StudentContext(StudentId::new(value)))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status/ping", get(get_status_ping))
        .route("/athena/v1/timetable/today", get(get_timetable_today))
        .route("/athena/v1/attendance/check-in", post(post_check_in))
        .route("/athena/v1/attendance/history", get(get_attendance_history))
        .route("/athena/v1/community/feed", get(get_community_feed))
        .route("/athena/v1/engagement/risk", get(get_engagement_risk))
        .route("/athena/v1/admin/dashboard", get(get_admin_dashboard))
        .with_state(state)
}

pub async fn get_status_ping() -> impl IntoResponse {
    info!("Status");
    StatusCode::OK
}

pub async fn get_timetable_today(
    State(state): State<AppState>,
    StudentContext(student_id): StudentContext,
) -> Result<Json<Timetable>, Error> {
    let timetable = timetable::today(state.store.as_ref(), &student_id, Utc::now()).await?;
    Ok(Json(timetable))
}

pub async fn post_check_in(
    State(state): State<AppState>,
    StudentContext(student_id): StudentContext,
    Json(request): Json<CheckInRequest>,
) -> Result<Json<CheckInResponse>, Error> {
    let response =
        attendance::check_in(state.store.as_ref(), &student_id, &request, Utc::now()).await?;
    Ok(Json(response))
}

pub async fn get_attendance_history(
    State(state): State<AppState>,
    StudentContext(student_id): StudentContext,
) -> Result<Json<AttendanceHistory>, Error> {
    let history =
        attendance::attendance_history(state.store.as_ref(), &student_id, Utc::now()).await?;
    Ok(Json(history))
}

pub async fn get_community_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<CommunityFeed>, Error> {
    let feed = feed::community_feed(state.store.as_ref(), query).await?;
    Ok(Json(feed))
}

pub async fn get_engagement_risk(
    State(state): State<AppState>,
    StudentContext(student_id): StudentContext,
) -> Result<Json<RiskAssessment>, Error> {
    let assessment = state
        .risk
        .assess(state.store.as_ref(), &student_id, Utc::now())
        .await?;
    Ok(Json(assessment))
}

pub async fn get_admin_dashboard(State(state): State<AppState>) -> Result<Json<Dashboard>, Error> {
    let stats = admin::dashboard(state.store.as_ref()).await?;
    Ok(Json(stats))
}
