use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::categorizer::Classifier;
use crate::error::{Result, TallyError};
use crate::fmt::money;
use crate::models::{
    Category, Classification, ClassificationStatus, PendingClassification, PendingDirection,
    Ranking, Transaction,
};
use crate::review::batch::group_by_merchant;
use crate::review::ReviewHandler;
use crate::settings::Settings;
use crate::storage::Storage;

const FALLBACK_CATEGORY: &str = "Uncategorized";
const DIRECTION_SAMPLES: usize = 5;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub auto_accept_threshold: f64,
    pub batch_min_size: usize,
    pub direction_threshold: f64,
    pub load_timeout: Duration,
}

impl From<&Settings> for EngineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            auto_accept_threshold: settings.auto_accept_threshold,
            batch_min_size: settings.batch_min_size.max(1),
            direction_threshold: settings.direction_threshold,
            load_timeout: settings.category_timeout(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineSummary {
    pub auto_accepted: usize,
    pub reviewed: usize,
    pub saved: usize,
    pub skipped: usize,
    pub directions_confirmed: usize,
}

/// Walks every unclassified transaction, accepts confident suggestions on
/// its own and hands everything else to a [`ReviewHandler`].
pub struct ClassificationEngine {
    storage: Arc<dyn Storage>,
    classifier: Arc<dyn Classifier>,
    handler: Arc<dyn ReviewHandler>,
    config: EngineConfig,
}

impl ClassificationEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        classifier: Arc<dyn Classifier>,
        handler: Arc<dyn ReviewHandler>,
        config: EngineConfig,
    ) -> Self {
        Self {
            storage,
            classifier,
            handler,
            config,
        }
    }

    /// Storage calls are blocking; keep them off the async workers.
    async fn with_storage<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Storage) -> Result<T> + Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || f(storage.as_ref()))
            .await
            .map_err(|e| TallyError::Other(format!("storage task failed: {e}")))?
    }

    async fn load(&self) -> Result<(Vec<Transaction>, Vec<Category>)> {
        let load = async {
            let transactions = self.with_storage(|s| s.get_transactions_to_classify()).await?;
            let categories = self.with_storage(|s| s.get_categories()).await?;
            Ok::<_, TallyError>((transactions, categories))
        };
        tokio::time::timeout(self.config.load_timeout, load)
            .await
            .map_err(|_| TallyError::Timeout("loading transactions and categories".into()))?
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<EngineSummary> {
        let mut summary = EngineSummary::default();
        let (transactions, categories) = self.load().await?;
        tracing::info!(count = transactions.len(), "classification run starting");
        if transactions.is_empty() {
            return Ok(summary);
        }

        self.confirm_directions(cancel, &transactions, &mut summary)
            .await?;

        let mut needs_review = Vec::new();
        for txn in transactions {
            check_cancelled(cancel)?;
            let rankings = match self.classifier.suggest_categories(&txn, &categories).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(transaction_id = txn.id, error = %e, "no suggestions");
                    Vec::new()
                }
            };
            match rankings.first() {
                Some(top) if top.score >= self.config.auto_accept_threshold => {
                    let c = Classification::accepted(txn, &top.category, top.score);
                    tracing::debug!(
                        transaction_id = c.transaction.id,
                        category = %c.category,
                        "auto-accepted"
                    );
                    summary.auto_accepted += 1;
                    self.persist(vec![(c, top.rule_id)], &mut summary).await?;
                }
                _ => needs_review.push(pending_for(txn, rankings, &categories)),
            }
        }

        for group in group_by_merchant(&needs_review) {
            check_cancelled(cancel)?;
            let rankings: HashMap<i64, Vec<Ranking>> = group
                .transactions
                .iter()
                .map(|p| (p.transaction.id, p.category_rankings.clone()))
                .collect();
            let results = if group.transactions.len() >= self.config.batch_min_size {
                self.handler
                    .batch_confirm_classifications(cancel, group.transactions)
                    .await?
            } else {
                let mut results = Vec::with_capacity(group.transactions.len());
                for pending in group.transactions {
                    results.push(self.handler.confirm_classification(cancel, pending).await?);
                }
                results
            };
            summary.reviewed += results.len();
            let results = results
                .into_iter()
                .map(|c| {
                    let rule_id = rankings
                        .get(&c.transaction.id)
                        .and_then(|r| rule_behind(&c, r));
                    (c, rule_id)
                })
                .collect();
            self.persist(results, &mut summary).await?;
        }

        tracing::info!(
            auto_accepted = summary.auto_accepted,
            reviewed = summary.reviewed,
            saved = summary.saved,
            skipped = summary.skipped,
            "classification run finished"
        );
        Ok(summary)
    }

    /// Ask about each merchant once, and only when the classifier is unsure.
    async fn confirm_directions(
        &self,
        cancel: &CancellationToken,
        transactions: &[Transaction],
        summary: &mut EngineSummary,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        for txn in transactions {
            if !seen.insert(txn.merchant.as_str()) {
                continue;
            }
            check_cancelled(cancel)?;
            let merchant = txn.merchant.clone();
            let known = {
                let merchant = merchant.clone();
                self.with_storage(move |s| s.get_direction(&merchant)).await?
            };
            if known.is_some() {
                continue;
            }

            let (suggested, confidence) = match self.classifier.suggest_direction(txn).await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(merchant = %merchant, error = %e, "no direction suggestion");
                    continue;
                }
            };
            let direction = if confidence < self.config.direction_threshold {
                let samples: Vec<Transaction> = transactions
                    .iter()
                    .filter(|t| t.merchant == merchant)
                    .take(DIRECTION_SAMPLES)
                    .cloned()
                    .collect();
                let net: f64 = samples.iter().map(|t| t.amount).sum();
                let pending = PendingDirection {
                    merchant: merchant.clone(),
                    suggested,
                    confidence,
                    reasoning: format!(
                        "{} sample transactions, net {}",
                        samples.len(),
                        money(net)
                    ),
                    sample_transactions: samples,
                };
                let confirmed = self
                    .handler
                    .confirm_transaction_direction(cancel, pending)
                    .await?;
                summary.directions_confirmed += 1;
                confirmed
            } else {
                suggested
            };
            self.with_storage(move |s| s.save_direction(&merchant, direction))
                .await?;
        }
        Ok(())
    }

    /// Saves every decided result and credits the rule that suggested it.
    async fn persist(
        &self,
        results: Vec<(Classification, Option<i64>)>,
        summary: &mut EngineSummary,
    ) -> Result<()> {
        for (c, rule_id) in results {
            if c.status == ClassificationStatus::Unclassified {
                summary.skipped += 1;
                continue;
            }
            self.with_storage(move |s| {
                s.save_classification(&c)?;
                match rule_id {
                    Some(id) => s.record_rule_hit(id),
                    None => Ok(()),
                }
            })
            .await?;
            summary.saved += 1;
        }
        Ok(())
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(TallyError::Cancelled);
    }
    Ok(())
}

/// The rule whose ranking named the category that was finally chosen.
fn rule_behind(classification: &Classification, rankings: &[Ranking]) -> Option<i64> {
    rankings
        .iter()
        .find(|r| r.category == classification.category)
        .and_then(|r| r.rule_id)
}

fn pending_for(
    transaction: Transaction,
    rankings: Vec<Ranking>,
    categories: &[Category],
) -> PendingClassification {
    let (suggested_category, confidence) = rankings
        .first()
        .map(|r| (r.category.clone(), r.score))
        .unwrap_or_else(|| (FALLBACK_CATEGORY.to_string(), 0.0));
    let category_description = categories
        .iter()
        .find(|c| c.name == suggested_category)
        .and_then(|c| c.description.clone())
        .unwrap_or_default();
    PendingClassification {
        check_patterns: vec![transaction.merchant.to_uppercase()],
        transaction,
        suggested_category,
        category_rankings: rankings,
        confidence,
        category_description,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::categorizer::RuleClassifier;
    use crate::db;
    use crate::db::tests::{add_txn, test_db};
    use crate::models::{CompletionStats, Direction};
    use crate::storage::SqliteStorage;

    /// Accepts every suggestion, or skips everything, and records calls.
    #[derive(Default)]
    struct ScriptedHandler {
        skip: bool,
        direction: Option<Direction>,
        singles: Mutex<Vec<i64>>,
        batches: Mutex<Vec<usize>>,
        directions: Mutex<Vec<String>>,
    }

    impl ScriptedHandler {
        fn resolve(&self, p: PendingClassification) -> Classification {
            if self.skip {
                Classification::skipped(p.transaction)
            } else {
                Classification::accepted(p.transaction, &p.suggested_category, p.confidence)
            }
        }
    }

    #[async_trait]
    impl ReviewHandler for ScriptedHandler {
        async fn confirm_classification(
            &self,
            _cancel: &CancellationToken,
            pending: PendingClassification,
        ) -> Result<Classification> {
            self.singles.lock().unwrap().push(pending.transaction.id);
            Ok(self.resolve(pending))
        }

        async fn batch_confirm_classifications(
            &self,
            _cancel: &CancellationToken,
            pending: Vec<PendingClassification>,
        ) -> Result<Vec<Classification>> {
            self.batches.lock().unwrap().push(pending.len());
            Ok(pending.into_iter().map(|p| self.resolve(p)).collect())
        }

        async fn confirm_transaction_direction(
            &self,
            _cancel: &CancellationToken,
            pending: PendingDirection,
        ) -> Result<Direction> {
            self.directions.lock().unwrap().push(pending.merchant.clone());
            Ok(self.direction.unwrap_or(pending.suggested))
        }

        fn completion_stats(&self) -> CompletionStats {
            CompletionStats::default()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        storage: Arc<SqliteStorage>,
    }

    fn fixture(rules: &[(&str, &str, &str)], txns: &[(&str, &str, f64)]) -> Fixture {
        let (dir, conn) = test_db();
        for (pattern, category, match_type) in rules {
            db::add_rule(&conn, pattern, category, match_type, 0).unwrap();
        }
        for (desc, merchant, amount) in txns {
            add_txn(&conn, desc, merchant, *amount);
        }
        Fixture {
            _dir: dir,
            storage: Arc::new(SqliteStorage::new(conn)),
        }
    }

    fn engine(fx: &Fixture, handler: Arc<ScriptedHandler>) -> ClassificationEngine {
        let rules = fx.storage.get_rules().unwrap();
        ClassificationEngine::new(
            fx.storage.clone(),
            Arc::new(RuleClassifier::new(rules)),
            handler,
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_confident_matches_are_saved_without_asking() {
        let fx = fixture(
            &[("^SHELL", "Transportation", "regex")],
            &[("SHELL OIL 1", "Shell", -40.0), ("SHELL OIL 2", "Shell", -35.0)],
        );
        let handler = Arc::new(ScriptedHandler::default());
        let summary = engine(&fx, handler.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.auto_accepted, 2);
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.reviewed, 0);
        assert!(handler.batches.lock().unwrap().is_empty());
        assert!(fx.storage.get_transactions_to_classify().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auto_accepted_matches_count_as_rule_hits() {
        let fx = fixture(
            &[("^SHELL", "Transportation", "regex")],
            &[("SHELL OIL 1", "Shell", -40.0), ("SHELL OIL 2", "Shell", -35.0)],
        );
        engine(&fx, Arc::new(ScriptedHandler::default()))
            .run(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fx.storage.get_rules().unwrap()[0].hit_count, 2);
    }

    #[tokio::test]
    async fn test_reviewed_matches_count_as_rule_hits_unless_skipped() {
        let txns = [("WALMART #1", "Walmart", -20.0), ("WALMART #2", "Walmart", -30.0)];
        let rules = [("WALMART", "Groceries", "contains")];

        let accepted = fixture(&rules, &txns);
        engine(&accepted, Arc::new(ScriptedHandler::default()))
            .run(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(accepted.storage.get_rules().unwrap()[0].hit_count, 2);

        let skipped = fixture(&rules, &txns);
        let handler = Arc::new(ScriptedHandler {
            skip: true,
            ..Default::default()
        });
        engine(&skipped, handler)
            .run(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(skipped.storage.get_rules().unwrap()[0].hit_count, 0);
    }

    #[tokio::test]
    async fn test_groups_go_to_batch_and_singles_one_by_one() {
        let fx = fixture(
            &[("WALMART", "Groceries", "contains")],
            &[
                ("WALMART #1", "Walmart", -20.0),
                ("WALMART #2", "Walmart", -30.0),
                ("CORNER CAFE", "Corner Cafe", -8.0),
            ],
        );
        let handler = Arc::new(ScriptedHandler::default());
        let summary = engine(&fx, handler.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*handler.batches.lock().unwrap(), vec![2]);
        assert_eq!(handler.singles.lock().unwrap().len(), 1);
        assert_eq!(summary.reviewed, 3);
        assert_eq!(summary.saved, 3);

        let saved = fx.storage.list_classifications().unwrap();
        let cafe = saved.iter().find(|c| c.transaction.merchant == "Corner Cafe").unwrap();
        assert_eq!(cafe.category, FALLBACK_CATEGORY);
    }

    #[tokio::test]
    async fn test_skipped_results_are_not_persisted() {
        let fx = fixture(&[], &[("MYSTERY 1", "Mystery", -5.0), ("MYSTERY 2", "Mystery", -6.0)]);
        let handler = Arc::new(ScriptedHandler {
            skip: true,
            ..Default::default()
        });
        let summary = engine(&fx, handler).run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.saved, 0);
        assert_eq!(fx.storage.get_transactions_to_classify().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_uncertain_direction_is_confirmed_once_per_merchant() {
        let fx = fixture(
            &[],
            &[
                ("ZELLE TO SAM", "Zelle", -50.0),
                ("ZELLE FROM SAM", "Zelle", 20.0),
                ("GROCER 12", "Grocer", -10.0),
            ],
        );
        let handler = Arc::new(ScriptedHandler {
            direction: Some(Direction::Income),
            ..Default::default()
        });
        let summary = engine(&fx, handler.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*handler.directions.lock().unwrap(), vec!["Zelle".to_string()]);
        assert_eq!(summary.directions_confirmed, 1);
        assert_eq!(fx.storage.get_direction("Zelle").unwrap(), Some(Direction::Income));
        assert_eq!(fx.storage.get_direction("Grocer").unwrap(), Some(Direction::Expense));
    }

    #[tokio::test]
    async fn test_known_direction_is_not_asked_again() {
        let fx = fixture(&[], &[("VENMO PAYMENT", "Venmo", -12.0)]);
        fx.storage.save_direction("Venmo", Direction::Expense).unwrap();
        let handler = Arc::new(ScriptedHandler::default());
        engine(&fx, handler.clone()).run(&CancellationToken::new()).await.unwrap();
        assert!(handler.directions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_stops() {
        let fx = fixture(&[], &[("A 1", "A", -1.0)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine(&fx, Arc::new(ScriptedHandler::default()))
            .run(&cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TallyError::Cancelled));
    }

    #[test]
    fn test_pending_carries_suggestion_context() {
        let txn = Transaction {
            id: 1,
            date: "2025-01-15".into(),
            description: "NETFLIX.COM".into(),
            merchant: "Netflix".into(),
            amount: -15.99,
        };
        let cats = vec![Category {
            id: 10,
            name: "Entertainment".into(),
            category_type: "expense".into(),
            description: Some("Streaming".into()),
        }];
        let p = pending_for(txn, vec![Ranking::new("Entertainment", 0.8)], &cats);
        assert_eq!(p.suggested_category, "Entertainment");
        assert_eq!(p.confidence, 0.8);
        assert_eq!(p.check_patterns, vec!["NETFLIX".to_string()]);
        assert_eq!(p.category_description, "Streaming");
    }
}
