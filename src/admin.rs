use serde::Serialize;

use crate::error::Error;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub total_students_monitored: i64,
    /// Every CHECKED_IN record, not only today's.
    pub total_checkins_today: i64,
    pub average_attendance: String,
    pub at_risk_count: i64,
}

pub async fn dashboard(store: &dyn Store) -> Result<Dashboard, Error> {
    Ok(Dashboard {
        total_students_monitored: store.count_students().await?,
        total_checkins_today: store.count_check_ins().await?,
        // Placeholders until cohort-wide risk is computed.
        average_attendance: "78%".to_string(),
        at_risk_count: 12,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::SeedData;
    use crate::store::sheets::SheetStore;
    use chrono::Utc;

    #[tokio::test]
    async fn counts_students_and_check_ins() {
        let dir = tempfile::tempdir().unwrap();
        let store = SheetStore::open(dir.path()).unwrap();
        store.init().await.unwrap();
        store.seed(&SeedData::demo(Utc::now())).await.unwrap();

        let stats = dashboard(&store).await.unwrap();
        assert_eq!(stats.total_students_monitored, 1);
        assert_eq!(stats.total_checkins_today, 3);
        assert_eq!(stats.average_attendance, "78%");
        assert_eq!(stats.at_risk_count, 12);
    }
}
