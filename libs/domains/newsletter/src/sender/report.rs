use serde::Serialize;
use strum::Display;

/// Why a drain stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case", tag = "kind", content = "error")]
#[strum(serialize_all = "snake_case")]
pub enum DrainOutcome {
    /// No campaign was due, or the target had nothing claimable.
    NothingToSend,
    /// Sending was switched off for the site before the drain started.
    Disabled,
    /// Sending was switched off while the drain was running.
    Stopped,
    /// The variant used up its share of the audience.
    QuotaReached,
    Finished,
    /// An error escaped the loop; claimed rows are released by the next retry drain.
    Failed(String),
}

/// Summary of one drain run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub campaign_id: Option<i64>,
    pub sent: u64,
    pub failed: u64,
    pub outcome: DrainOutcome,
}

impl DrainReport {
    pub(crate) fn new(campaign_id: Option<i64>) -> Self {
        Self {
            campaign_id,
            sent: 0,
            failed: 0,
            outcome: DrainOutcome::NothingToSend,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, DrainOutcome::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_serializes_for_logs() {
        let report = DrainReport {
            campaign_id: Some(4),
            sent: 12,
            failed: 1,
            outcome: DrainOutcome::Failed("store offline".to_string()),
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["campaign_id"], 4);
        assert_eq!(value["sent"], 12);
        assert_eq!(value["outcome"]["kind"], "failed");
        assert_eq!(value["outcome"]["error"], "store offline");
        assert!(!report.is_success());
    }
}
