use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::debug;

use crate::error::Error;
use crate::models::{
    EngagementMetric, Gamification, MetricStatus, RiskAssessment, RiskLevel, StudentId, User,
};
use crate::store::Store;

pub const NEXT_LEVEL_XP: i32 = 3000;

pub const ATTENDANCE_CATEGORY: &str = "Attendance";
pub const VLE_CATEGORY: &str = "VLE Activity";
pub const SUBMISSIONS_CATEGORY: &str = "Submissions";

/// A score (0-100) for one engagement category.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn score(&self, student: &User) -> Result<u8, Error>;
}

/// Stand-in for feeds that do not exist yet: a uniform draw from `range`.
pub struct RandomMetricSource {
    range: RangeInclusive<u8>,
}

impl RandomMetricSource {
    pub fn new(range: RangeInclusive<u8>) -> Self {
        Self { range }
    }

    pub fn vle_activity() -> Self {
        Self::new(40..=90)
    }

    pub fn submissions() -> Self {
        Self::new(60..=100)
    }
}

#[async_trait]
impl MetricSource for RandomMetricSource {
    async fn score(&self, _student: &User) -> Result<u8, Error> {
        let mut rng = rand::rng();
        Ok(rng.random_range(self.range.clone()))
    }
}

pub struct FixedMetricSource(pub u8);

#[async_trait]
impl MetricSource for FixedMetricSource {
    async fn score(&self, _student: &User) -> Result<u8, Error> {
        Ok(self.0)
    }
}

/// Percentage of past sessions attended, rounded. No past sessions counts as 100.
pub fn attendance_rate(past_sessions: usize, attended: usize) -> u8 {
    if past_sessions == 0 {
        return 100;
    }
    let rate = (100.0 * attended as f64 / past_sessions as f64).round();
    rate.clamp(0.0, 100.0) as u8
}

/// First matching band wins. At most one recommendation per band.
pub fn risk_band(rate: u8) -> (RiskLevel, Option<&'static str>) {
    match rate {
        0..=49 => (
            RiskLevel::Critical,
            Some("Book an urgent meeting with your personal tutor."),
        ),
        50..=69 => (
            RiskLevel::High,
            Some("Your attendance is dropping. Review missed lectures on Minerva."),
        ),
        70..=84 => (
            RiskLevel::Medium,
            Some("Try to attend all sessions next week to boost your streak."),
        ),
        _ => (RiskLevel::Low, None),
    }
}

// No WARNING tier: anything from 50 up reads as GOOD.
pub fn attendance_status(rate: u8) -> MetricStatus {
    if rate < 50 {
        MetricStatus::Critical
    } else {
        MetricStatus::Good
    }
}

pub fn vle_status(score: u8) -> MetricStatus {
    if score < 60 {
        MetricStatus::Warning
    } else {
        MetricStatus::Good
    }
}

pub fn submissions_status(_score: u8) -> MetricStatus {
    MetricStatus::Good
}

#[derive(Clone)]
pub struct EngagementRiskCalculator {
    vle: Arc<dyn MetricSource>,
    submissions: Arc<dyn MetricSource>,
}

impl EngagementRiskCalculator {
    pub fn new(vle: Arc<dyn MetricSource>, submissions: Arc<dyn MetricSource>) -> Self {
        Self { vle, submissions }
    }

    pub fn with_placeholder_sources() -> Self {
        Self::new(
            Arc::new(RandomMetricSource::vle_activity()),
            Arc::new(RandomMetricSource::submissions()),
        )
    }

    /// Attended/past counts for `student_id` as of `now`. Only CHECKED_IN
    /// records on sessions that already ended count as attended.
    pub async fn attendance_counts(
        store: &dyn Store,
        student_id: &StudentId,
        now: DateTime<Utc>,
    ) -> Result<(usize, usize), Error> {
        let past_sessions = store.list_past_sessions(now).await?;
        let past_ids: HashSet<&str> = past_sessions.iter().map(|s| s.id.as_str()).collect();
        let attended = store
            .list_checked_in(student_id)
            .await?
            .iter()
            .filter(|record| past_ids.contains(record.session_id.as_str()))
            .count();
        Ok((past_sessions.len(), attended))
    }

    pub async fn assess(
        &self,
        store: &dyn Store,
        student_id: &StudentId,
        now: DateTime<Utc>,
    ) -> Result<RiskAssessment, Error> {
        let student = store.get_student(student_id).await?;
        let (past, attended) = Self::attendance_counts(store, student_id, now).await?;

        let rate = attendance_rate(past, attended);
        let (risk_level, recommendation) = risk_band(rate);
        debug!(
            %student_id,
            past,
            attended,
            rate,
            risk = risk_level.as_str(),
            "assessed engagement risk"
        );

        let vle_score = self.vle.score(&student).await?;
        let submission_score = self.submissions.score(&student).await?;

        let metrics = vec![
            EngagementMetric {
                category: ATTENDANCE_CATEGORY.to_string(),
                score: rate,
                status: attendance_status(rate),
            },
            EngagementMetric {
                category: VLE_CATEGORY.to_string(),
                score: vle_score,
                status: vle_status(vle_score),
            },
            EngagementMetric {
                category: SUBMISSIONS_CATEGORY.to_string(),
                score: submission_score,
                status: submissions_status(submission_score),
            },
        ];

        Ok(RiskAssessment {
            student_id: student.id.clone(),
            risk_level,
            gamification: Gamification {
                level: student.level,
                current_xp: student.current_xp,
                next_level_xp: NEXT_LEVEL_XP,
                avatar_url: String::new(),
            },
            metrics,
            recommendations: recommendation.into_iter().map(str::to_string).collect(),
        })
    }
}
