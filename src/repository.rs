use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{trace, warn};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::eligibility;
use crate::error::Result;
use crate::ledger::LedgerClient;
use crate::types::{Address, Prediction, PredictionId, PredictionStatus};
use crate::wallet::WalletSession;

/// Cached, view-segmented mirror of the ledger's records. Strictly an
/// invalidate-and-refetch cache: every refresh replaces a view wholesale,
/// and nothing here ever patches a record locally. The ledger stays the only
/// source of truth.
pub struct PredictionRepository {
    ledger: LedgerClient,
    page_size: u64,
    open: RwLock<Vec<Prediction>>,
    matched: RwLock<Vec<Prediction>>,
    owned: RwLock<Vec<Prediction>>,
}

impl PredictionRepository {
    pub fn new(ledger: LedgerClient, page_size: u64) -> Self {
        Self {
            ledger,
            page_size,
            open: RwLock::new(Vec::new()),
            matched: RwLock::new(Vec::new()),
            owned: RwLock::new(Vec::new()),
        }
    }

    /// Open, unexpired predictions, most recently refreshed page.
    pub async fn open(&self) -> Vec<Prediction> {
        self.open.read().await.clone()
    }
    /// Matched predictions awaiting resolution; meaningful for privileged
    /// identities only.
    pub async fn matched(&self) -> Vec<Prediction> {
        self.matched.read().await.clone()
    }
    /// Predictions the connected identity takes part in, newest first.
    pub async fn owned(&self) -> Vec<Prediction> {
        self.owned.read().await.clone()
    }

    /// Resolves ids to full records. An id that fails to resolve is dropped
    /// from the result instead of failing the whole batch.
    async fn resolve_ids(&self, ids: Vec<PredictionId>) -> Vec<Prediction> {
        let mut predictions = Vec::with_capacity(ids.len());
        for id in ids {
            match self.ledger.get_prediction(id).await {
                Ok(prediction) => predictions.push(prediction),
                Err(e) => warn!("dropping prediction {} from view: {}", id, e),
            }
        }
        predictions
    }

    pub async fn refresh_open(&self, offset: u64) -> Result<()> {
        let page = self.ledger.get_open_predictions(offset, self.page_size).await?;
        let now = Utc::now().timestamp();
        let predictions: Vec<Prediction> = self
            .resolve_ids(page.ids)
            .await
            .into_iter()
            .filter(|p| p.status == PredictionStatus::Open && !eligibility::is_expired(p, now))
            .collect();
        trace!("open view refreshed: {} records", predictions.len());
        *self.open.write().await = predictions;
        Ok(())
    }

    pub async fn refresh_matched(&self, offset: u64) -> Result<()> {
        let page = self
            .ledger
            .get_matched_predictions(offset, self.page_size)
            .await?;
        let predictions = self.resolve_ids(page.ids).await;
        trace!("matched view refreshed: {} records", predictions.len());
        *self.matched.write().await = predictions;
        Ok(())
    }

    pub async fn refresh_owned(&self, account: &Address) -> Result<()> {
        let ids = self.ledger.get_user_predictions(account).await?;
        let mut predictions = self.resolve_ids(ids).await;
        predictions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        trace!("owned view refreshed: {} records", predictions.len());
        *self.owned.write().await = predictions;
        Ok(())
    }

    /// Drops the owned view when no identity is connected anymore.
    pub async fn clear_owned(&self) {
        self.owned.write().await.clear();
    }

    /// Drops the matched view when the connected identity loses privilege.
    pub async fn clear_matched(&self) {
        self.matched.write().await.clear();
    }

    /// Refreshes every view that applies to the given identity. View
    /// refreshes are independent; one failing does not stop the others.
    pub async fn refresh_all(&self, account: Option<&Address>, is_admin: bool) {
        if let Err(e) = self.refresh_open(0).await {
            warn!("open view refresh failed: {}", e);
        }
        if is_admin {
            if let Err(e) = self.refresh_matched(0).await {
                warn!("matched view refresh failed: {}", e);
            }
        }
        if let Some(account) = account {
            if let Err(e) = self.refresh_owned(account).await {
                warn!("owned view refresh failed: {}", e);
            }
        }
    }

    /// Periodic refresh of the open view while a session is connected.
    /// Caller keeps the handle and aborts it on teardown.
    pub fn spawn_open_poll(
        self: &Arc<Self>,
        session: WalletSession,
        every: Duration,
    ) -> JoinHandle<()> {
        let repository = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !session.is_connected().await {
                    continue;
                }
                if let Err(e) = repository.refresh_open(0).await {
                    warn!("periodic open view refresh failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ledger::TestLedger;
    use crate::types::{NewPrediction, PredictionOption};

    fn seeded(status: PredictionStatus, id: PredictionId, created_at: i64) -> Prediction {
        Prediction {
            id,
            creator: Address::new("0x01"),
            opponent: if status == PredictionStatus::Open {
                None
            } else {
                Some(Address::new("0x02"))
            },
            title: format!("Prediction {}", id),
            description: String::new(),
            option_a: "Yes".to_string(),
            option_b: "No".to_string(),
            bet_amount: 1_000_000,
            creator_choice: PredictionOption::OptionA,
            opponent_choice: if status == PredictionStatus::Open {
                PredictionOption::None
            } else {
                PredictionOption::OptionB
            },
            status,
            winning_option: PredictionOption::None,
            created_at,
            expiry_time: Utc::now().timestamp() + 3_600,
        }
    }

    fn repository_with(ledger: &Arc<TestLedger>) -> PredictionRepository {
        PredictionRepository::new(LedgerClient::new(ledger.clone(), 100_000_000), 10)
    }

    #[tokio::test]
    async fn refresh_replaces_the_view_wholesale() {
        let ledger = Arc::new(TestLedger::new(Address::new("0xad")));
        let repository = repository_with(&ledger);
        ledger.seed(seeded(PredictionStatus::Open, 1, 100));
        ledger.seed(seeded(PredictionStatus::Open, 2, 200));
        repository.refresh_open(0).await.unwrap();
        assert_eq!(repository.open().await.len(), 2);

        // Record 1 leaves the open set; the stale entry must not linger.
        ledger.seed(seeded(PredictionStatus::Matched, 1, 100));
        repository.refresh_open(0).await.unwrap();
        let open = repository.open().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, 2);
    }

    #[tokio::test]
    async fn failed_record_is_dropped_not_fatal() {
        let ledger = Arc::new(TestLedger::new(Address::new("0xad")));
        let repository = repository_with(&ledger);
        ledger.seed(seeded(PredictionStatus::Open, 1, 100));
        ledger.seed(seeded(PredictionStatus::Open, 2, 200));
        ledger.fail_reads_of(1);
        repository.refresh_open(0).await.unwrap();
        let open = repository.open().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, 2);
    }

    #[tokio::test]
    async fn expired_records_leave_the_open_view() {
        let ledger = Arc::new(TestLedger::new(Address::new("0xad")));
        let repository = repository_with(&ledger);
        let mut expired = seeded(PredictionStatus::Open, 1, 100);
        expired.expiry_time = Utc::now().timestamp() - 1;
        ledger.seed(expired);
        ledger.seed(seeded(PredictionStatus::Open, 2, 200));
        repository.refresh_open(0).await.unwrap();
        let open = repository.open().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, 2);
    }

    #[tokio::test]
    async fn owned_view_is_newest_first_for_both_roles() {
        let ledger = Arc::new(TestLedger::new(Address::new("0xad")));
        let repository = repository_with(&ledger);
        // 0x01 created record 1, is opponent in record 2 and absent from 3.
        ledger.seed(seeded(PredictionStatus::Open, 1, 100));
        let mut joined = seeded(PredictionStatus::Matched, 2, 300);
        joined.creator = Address::new("0x03");
        joined.opponent = Some(Address::new("0x01"));
        ledger.seed(joined);
        let mut foreign = seeded(PredictionStatus::Open, 3, 200);
        foreign.creator = Address::new("0x04");
        ledger.seed(foreign);

        repository.refresh_owned(&Address::new("0x01")).await.unwrap();
        let owned = repository.owned().await;
        assert_eq!(owned.iter().map(|p| p.id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn matched_view_tracks_resolutions() {
        let admin = Address::new("0xad");
        let ledger = Arc::new(TestLedger::new(admin.clone()));
        let client = LedgerClient::new(ledger.clone(), 100_000_000);
        let repository = repository_with(&ledger);
        ledger.seed(seeded(PredictionStatus::Matched, 1, 100));
        repository.refresh_matched(0).await.unwrap();
        assert_eq!(repository.matched().await.len(), 1);

        ledger.impersonate(admin);
        client
            .resolve_prediction(1, PredictionOption::OptionA)
            .await
            .unwrap();
        repository.refresh_matched(0).await.unwrap();
        assert!(repository.matched().await.is_empty());
    }

    #[tokio::test]
    async fn matched_view_is_scoped_to_privileged_identities() {
        let ledger = Arc::new(TestLedger::new(Address::new("0xad")));
        let repository = repository_with(&ledger);
        ledger.seed(seeded(PredictionStatus::Matched, 1, 100));

        let viewer = Address::new("0x01");
        repository.refresh_all(Some(&viewer), false).await;
        assert!(repository.matched().await.is_empty());

        repository.refresh_all(Some(&viewer), true).await;
        assert_eq!(repository.matched().await.len(), 1);

        repository.clear_matched().await;
        assert!(repository.matched().await.is_empty());
    }

    #[tokio::test]
    async fn ledger_backed_create_lands_in_views() {
        let ledger = Arc::new(TestLedger::new(Address::new("0xad")));
        let client = LedgerClient::new(ledger.clone(), 100_000_000);
        let repository = repository_with(&ledger);
        let creator = Address::new("0x01");
        ledger.impersonate(creator.clone());
        client
            .create_prediction(&NewPrediction {
                title: "Will the build stay green".to_string(),
                description: String::new(),
                option_a: "Yes".to_string(),
                option_b: "No".to_string(),
                bet_amount: 5_000_000,
                creator_choice: PredictionOption::OptionA,
                expiry_time: Utc::now().timestamp() + 600,
            })
            .await
            .unwrap();
        repository.refresh_all(Some(&creator), false).await;
        assert_eq!(repository.open().await.len(), 1);
        assert_eq!(repository.owned().await.len(), 1);
        assert!(repository.matched().await.is_empty());
    }
}
