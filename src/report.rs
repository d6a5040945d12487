use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::attendance::AttendanceHistory;
use crate::models::{AttendanceStatus, RiskAssessment};

/// Markdown summary of one student's engagement, for tutors.
pub fn build_report(
    generated_at: DateTime<Utc>,
    assessment: &RiskAssessment,
    history: &AttendanceHistory,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Engagement Report");
    let _ = writeln!(
        output,
        "Generated for {} on {}",
        assessment.student_id,
        generated_at.format("%Y-%m-%d %H:%M")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "Risk level: **{}**", assessment.risk_level.as_str());
    let _ = writeln!(
        output,
        "Level {} with {}/{} XP, {} day streak",
        assessment.gamification.level,
        assessment.gamification.current_xp,
        assessment.gamification.next_level_xp,
        history.current_streak_days
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Metrics");
    for metric in &assessment.metrics {
        let _ = writeln!(
            output,
            "- {}: {} ({})",
            metric.category,
            metric.score,
            metric.status.as_str()
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recommendations");
    if assessment.recommendations.is_empty() {
        let _ = writeln!(output, "No action needed.");
    } else {
        for recommendation in &assessment.recommendations {
            let _ = writeln!(output, "- {recommendation}");
        }
    }

    let missed = history
        .history
        .iter()
        .filter(|item| item.status == AttendanceStatus::Missed)
        .count();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Attendance");
    if history.history.is_empty() {
        let _ = writeln!(output, "No sessions have taken place yet.");
    } else {
        let _ = writeln!(
            output,
            "{:.0}% attended, {} of {} sessions missed",
            history.total_attendance_percentage,
            missed,
            history.history.len()
        );
        for item in history.history.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} {}: {}",
                item.date,
                item.session,
                item.status.as_str()
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::AttendanceHistoryItem;
    use crate::models::{EngagementMetric, Gamification, MetricStatus, RiskLevel, StudentId};

    fn assessment(recommendations: Vec<String>) -> RiskAssessment {
        RiskAssessment {
            student_id: StudentId::new("S1"),
            risk_level: RiskLevel::High,
            gamification: Gamification {
                level: 4,
                current_xp: 900,
                next_level_xp: 3000,
                avatar_url: String::new(),
            },
            metrics: vec![EngagementMetric {
                category: "Attendance".to_string(),
                score: 60,
                status: MetricStatus::Good,
            }],
            recommendations,
        }
    }

    #[test]
    fn report_lists_risk_metrics_and_history() {
        let history = AttendanceHistory {
            current_streak_days: 3,
            total_attendance_percentage: 60.0,
            history: vec![
                AttendanceHistoryItem {
                    date: "2026-02-03".to_string(),
                    session: "COMP3001 Lecture".to_string(),
                    status: AttendanceStatus::Missed,
                },
                AttendanceHistoryItem {
                    date: "2026-02-02".to_string(),
                    session: "COMP3001 Lecture".to_string(),
                    status: AttendanceStatus::CheckedIn,
                },
            ],
        };
        let report = build_report(
            Utc::now(),
            &assessment(vec!["Review missed lectures.".to_string()]),
            &history,
        );

        assert!(report.contains("Risk level: **HIGH**"));
        assert!(report.contains("- Attendance: 60 (GOOD)"));
        assert!(report.contains("- Review missed lectures."));
        assert!(report.contains("60% attended, 1 of 2 sessions missed"));
        assert!(report.contains("- 2026-02-03 COMP3001 Lecture: MISSED"));
    }

    #[test]
    fn empty_sections_say_so() {
        let history = AttendanceHistory {
            current_streak_days: 0,
            total_attendance_percentage: 100.0,
            history: vec![],
        };
        let report = build_report(Utc::now(), &assessment(vec![]), &history);

        assert!(report.contains("No action needed."));
        assert!(report.contains("No sessions have taken place yet."));
    }
}
