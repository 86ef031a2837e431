use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use crossterm::event::{self, Event};
use ratatui::DefaultTerminal;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::categorizer::{Classifier, RuleClassifier};
use crate::engine::{ClassificationEngine, EngineConfig};
use crate::error::{Result, TallyError};
use crate::export::{default_export_path, write_csv};
use crate::logging;
use crate::models::{Category, Ranking, Transaction};
use crate::review::keys::Key;
use crate::review::{Bridge, Command, Msg, Orchestrator, ReviewHandler};
use crate::settings::{load_settings, Settings};
use crate::storage::{SqliteStorage, Storage};

/// How long to wait for a key before draining background messages.
const TICK: Duration = Duration::from_millis(50);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Carries out [`Command`]s. Anything slow runs on the tokio runtime and
/// reports back with exactly one [`Msg`].
struct Executor {
    handle: Handle,
    tx: mpsc::Sender<Msg>,
    storage: Arc<dyn Storage>,
    classifier: Arc<dyn Classifier>,
    data_dir: PathBuf,
    suggestion_timeout: Duration,
    load_timeout: Duration,
}

impl Executor {
    /// Start the background work for one command. Terminal and lifecycle
    /// commands belong to the event loop and are ignored here.
    fn execute(&self, command: Command) {
        tracing::debug!(?command, "executing");
        match command {
            Command::Quit | Command::ClearScreen => {}
            Command::FetchSuggestions {
                transaction,
                categories,
            } => {
                let classifier = Arc::clone(&self.classifier);
                let tx = self.tx.clone();
                let timeout = self.suggestion_timeout;
                self.handle.spawn(async move {
                    let transaction_id = transaction.id;
                    let result =
                        fetch_suggestions(classifier.as_ref(), &transaction, &categories, timeout)
                            .await
                            .map_err(|e| e.to_string());
                    let _ = tx
                        .send(Msg::SuggestionsLoaded {
                            transaction_id,
                            result,
                        })
                        .await;
                });
            }
            Command::LoadCategories => {
                self.spawn_storage(|s| s.get_categories(), Msg::CategoriesLoaded)
            }
            Command::LoadTransactions => self.spawn_storage(
                |s| s.get_transactions_to_classify(),
                Msg::TransactionsLoaded,
            ),
            Command::Export { classifications } => {
                let path = default_export_path(&self.data_dir);
                self.spawn_storage(
                    move |_| write_csv(&path, &classifications).map(|()| path),
                    Msg::ExportFinished,
                )
            }
            Command::DeleteClassification { transaction_id } => self.spawn_storage(
                move |s| s.delete_classification(transaction_id),
                move |result| Msg::DeleteFinished {
                    transaction_id,
                    result,
                },
            ),
        }
    }

    /// Run blocking work on the blocking pool, bounded by the load timeout.
    fn spawn_storage<T, F, M>(&self, work: F, wrap: M)
    where
        T: Send + 'static,
        F: FnOnce(&dyn Storage) -> Result<T> + Send + 'static,
        M: FnOnce(std::result::Result<T, String>) -> Msg + Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        let tx = self.tx.clone();
        let timeout = self.load_timeout;
        self.handle.spawn(async move {
            let task = tokio::task::spawn_blocking(move || work(storage.as_ref()));
            let result = match tokio::time::timeout(timeout, task).await {
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(e))) => Err(e.to_string()),
                Ok(Err(e)) => Err(format!("background task failed: {e}")),
                Err(_) => Err(TallyError::Timeout("storage".into()).to_string()),
            };
            let _ = tx.send(wrap(result)).await;
        });
    }
}

async fn fetch_suggestions(
    classifier: &dyn Classifier,
    transaction: &Transaction,
    categories: &[Category],
    timeout: Duration,
) -> Result<Vec<Ranking>> {
    let fetch = classifier.suggest_categories(transaction, categories);
    match tokio::time::timeout(timeout, fetch).await {
        Ok(Ok(rankings)) => Ok(rankings),
        Ok(Err(e)) => Err(TallyError::Classifier(e.to_string())),
        Err(_) => Err(TallyError::Timeout("fetching suggestions".into())),
    }
}

/// Returns true when the session asked to quit.
fn run_command(
    command: Command,
    terminal: &mut DefaultTerminal,
    executor: &Executor,
) -> Result<bool> {
    match command {
        Command::Quit => return Ok(true),
        Command::ClearScreen => terminal.clear()?,
        other => executor.execute(other),
    }
    Ok(false)
}

fn event_loop(
    terminal: &mut DefaultTerminal,
    orchestrator: &mut Orchestrator,
    rx: &mut mpsc::Receiver<Msg>,
    executor: &Executor,
) -> Result<()> {
    for command in orchestrator.init() {
        run_command(command, terminal, executor)?;
    }

    loop {
        terminal.draw(|frame| orchestrator.draw(frame))?;

        let mut inbox = Vec::new();
        if event::poll(TICK)? {
            if let Event::Key(key_event) = event::read()? {
                if let Some(key) = Key::from_event(key_event) {
                    inbox.push(Msg::Key(key));
                }
            }
        }
        while let Ok(msg) = rx.try_recv() {
            inbox.push(msg);
        }

        for msg in inbox {
            for command in orchestrator.update(msg) {
                if run_command(command, terminal, executor)? {
                    return Ok(());
                }
            }
        }
    }
}

pub fn run() -> Result<()> {
    let settings = load_settings();
    let data_dir = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&data_dir)?;
    logging::init(&data_dir, &settings.log_level)?;

    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&settings.db_path())?);
    let classifier: Arc<dyn Classifier> = Arc::new(RuleClassifier::new(storage.get_rules()?));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let (tx, mut rx) = mpsc::channel::<Msg>(settings.request_channel_capacity.max(1));
    let bridge = Arc::new(Bridge::new(tx.clone()));
    let cancel = CancellationToken::new();

    spawn_engine(&runtime, &settings, &storage, &classifier, &bridge, &tx, &cancel);

    let executor = Executor {
        handle: runtime.handle().clone(),
        tx,
        storage,
        classifier,
        data_dir,
        suggestion_timeout: settings.suggestion_timeout(),
        load_timeout: settings.category_timeout(),
    };
    let mut orchestrator = Orchestrator::new(true);

    let hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        ratatui::restore();
        hook(info);
    }));

    let mut terminal = ratatui::init();
    let result = event_loop(&mut terminal, &mut orchestrator, &mut rx, &executor);
    ratatui::restore();

    cancel.cancel();
    drop(executor);
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result?;

    print_summary(&bridge.completion_stats(), orchestrator.session().len());
    Ok(())
}

fn spawn_engine(
    runtime: &tokio::runtime::Runtime,
    settings: &Settings,
    storage: &Arc<dyn Storage>,
    classifier: &Arc<dyn Classifier>,
    bridge: &Arc<Bridge>,
    tx: &mpsc::Sender<Msg>,
    cancel: &CancellationToken,
) {
    let engine = ClassificationEngine::new(
        Arc::clone(storage),
        Arc::clone(classifier),
        Arc::clone(bridge) as Arc<dyn ReviewHandler>,
        EngineConfig::from(settings),
    );
    let tx = tx.clone();
    let cancel = cancel.clone();
    runtime.spawn(async move {
        let result = engine.run(&cancel).await.map_err(|e| {
            tracing::warn!(error = %e, "classification engine stopped");
            e.to_string()
        });
        let _ = tx.send(Msg::EngineFinished(result)).await;
    });
}

fn print_summary(stats: &crate::models::CompletionStats, session_count: usize) {
    if stats.total == 0 && stats.directions_confirmed == 0 {
        println!("No decisions made this session.");
        return;
    }
    println!(
        "{} reviewed: {} accepted, {} chosen by hand, {} skipped ({:.0}% complete)",
        stats.total.to_string().bold(),
        stats.classified_by_ai.to_string().green(),
        stats.user_modified.to_string().green(),
        stats.skipped.to_string().yellow(),
        stats.completion_rate() * 100.0
    );
    if stats.directions_confirmed > 0 {
        println!("{} merchant directions confirmed", stats.directions_confirmed);
    }
    tracing::info!(session_count, total = stats.total, "session summary printed");
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::db::tests::{add_txn, test_db};
    use crate::models::{Classification, Direction, Rule};
    use crate::review::classifier::tests::{categories, pending};
    use crate::review::message::{Request, Responder};

    /// Never answers.
    struct StalledClassifier;

    #[async_trait]
    impl Classifier for StalledClassifier {
        async fn suggest_categories(
            &self,
            _transaction: &Transaction,
            _categories: &[Category],
        ) -> Result<Vec<Ranking>> {
            std::future::pending::<Result<Vec<Ranking>>>().await
        }

        async fn suggest_direction(&self, _transaction: &Transaction) -> Result<(Direction, f64)> {
            std::future::pending::<Result<(Direction, f64)>>().await
        }
    }

    struct OfflineClassifier;

    #[async_trait]
    impl Classifier for OfflineClassifier {
        async fn suggest_categories(
            &self,
            _transaction: &Transaction,
            _categories: &[Category],
        ) -> Result<Vec<Ranking>> {
            Err(TallyError::Other("model offline".into()))
        }

        async fn suggest_direction(&self, _transaction: &Transaction) -> Result<(Direction, f64)> {
            Err(TallyError::Other("model offline".into()))
        }
    }

    /// Answers every call with nothing, after blocking for `delay`.
    struct SlowStorage {
        delay: Duration,
    }

    impl SlowStorage {
        fn wait(&self) {
            std::thread::sleep(self.delay);
        }
    }

    impl Storage for SlowStorage {
        fn get_transactions_to_classify(&self) -> Result<Vec<Transaction>> {
            self.wait();
            Ok(vec![])
        }

        fn get_categories(&self) -> Result<Vec<Category>> {
            self.wait();
            Ok(vec![])
        }

        fn save_classification(&self, _classification: &Classification) -> Result<()> {
            self.wait();
            Ok(())
        }

        fn delete_classification(&self, _transaction_id: i64) -> Result<()> {
            self.wait();
            Ok(())
        }

        fn list_classifications(&self) -> Result<Vec<Classification>> {
            self.wait();
            Ok(vec![])
        }

        fn get_rules(&self) -> Result<Vec<Rule>> {
            self.wait();
            Ok(vec![])
        }

        fn record_rule_hit(&self, _rule_id: i64) -> Result<()> {
            self.wait();
            Ok(())
        }

        fn save_direction(&self, _merchant: &str, _direction: Direction) -> Result<()> {
            self.wait();
            Ok(())
        }

        fn get_direction(&self, _merchant: &str) -> Result<Option<Direction>> {
            self.wait();
            Ok(None)
        }
    }

    fn executor(
        storage: Arc<dyn Storage>,
        classifier: Arc<dyn Classifier>,
        data_dir: PathBuf,
    ) -> (Executor, mpsc::Receiver<Msg>) {
        let (tx, rx) = mpsc::channel(16);
        let executor = Executor {
            handle: Handle::current(),
            tx,
            storage,
            classifier,
            data_dir,
            suggestion_timeout: Duration::from_secs(30),
            load_timeout: Duration::from_secs(10),
        };
        (executor, rx)
    }

    async fn assert_quiet(rx: &mut mpsc::Receiver<Msg>) {
        let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(extra.is_err(), "unexpected extra message: {extra:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_suggestions_time_out_into_error_state() {
        let (dir, conn) = test_db();
        let (executor, mut rx) = executor(
            Arc::new(SqliteStorage::new(conn)),
            Arc::new(StalledClassifier),
            dir.path().to_path_buf(),
        );
        let mut orch = Orchestrator::new(true);
        orch.update(Msg::CategoriesLoaded(Ok(categories())));
        let (reply, _reply_rx) = tokio::sync::oneshot::channel();
        let mut commands = orch.update(Msg::Request(Request::Classify {
            pending: pending(7, "Target", "Shopping", 0.4),
            reply: Responder::new(1, reply),
        }));
        assert_eq!(commands.len(), 1);

        let started = tokio::time::Instant::now();
        executor.execute(commands.remove(0));
        let msg = rx.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
        match &msg {
            Msg::SuggestionsLoaded {
                transaction_id,
                result: Err(e),
            } => {
                assert_eq!(*transaction_id, 7);
                assert!(e.starts_with("Timed out"), "{e}");
            }
            other => panic!("unexpected message: {other:?}"),
        }

        orch.update(msg);
        assert!(orch.suggestion_error().unwrap().starts_with("Timed out"));
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn test_classifier_failure_is_reported_as_classifier_error() {
        let txn = pending(3, "Walmart", "Groceries", 0.5).transaction;
        let err = fetch_suggestions(&OfflineClassifier, &txn, &categories(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(&err, TallyError::Classifier(m) if m.contains("model offline")));
    }

    #[tokio::test]
    async fn test_slow_storage_surfaces_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(SlowStorage {
            delay: Duration::from_millis(500),
        });
        let (mut executor, mut rx) =
            executor(storage, Arc::new(StalledClassifier), dir.path().to_path_buf());
        executor.load_timeout = Duration::from_millis(50);
        let mut orch = Orchestrator::new(true);

        executor.execute(Command::LoadCategories);
        let msg = rx.recv().await.unwrap();
        assert!(matches!(&msg, Msg::CategoriesLoaded(Err(e)) if e.starts_with("Timed out")));
        orch.update(msg);
        assert!(orch.load_error().unwrap().starts_with("Could not load categories"));

        executor.execute(Command::LoadTransactions);
        let msg = rx.recv().await.unwrap();
        assert!(matches!(&msg, Msg::TransactionsLoaded(Err(e)) if e.starts_with("Timed out")));
        orch.update(msg);
        assert!(orch.load_error().unwrap().starts_with("Could not load transactions"));
        assert_eq!(orch.state(), crate::review::orchestrator::State::List);
    }

    #[tokio::test]
    async fn test_each_command_posts_exactly_one_message() {
        let (dir, conn) = test_db();
        let id = add_txn(&conn, "WALMART #1", "Walmart", -20.0);
        let storage = Arc::new(SqliteStorage::new(conn));
        let txn = storage.get_transactions_to_classify().unwrap().remove(0);
        let (executor, mut rx) = executor(
            storage,
            Arc::new(RuleClassifier::new(vec![])),
            dir.path().to_path_buf(),
        );

        executor.execute(Command::LoadCategories);
        executor.execute(Command::LoadTransactions);
        executor.execute(Command::FetchSuggestions {
            transaction: txn.clone(),
            categories: categories(),
        });
        executor.execute(Command::Export {
            classifications: vec![Classification::accepted(txn, "Groceries", 0.9)],
        });
        executor.execute(Command::DeleteClassification { transaction_id: id });
        executor.execute(Command::ClearScreen);
        executor.execute(Command::Quit);

        let mut kinds = Vec::new();
        for _ in 0..5 {
            let msg = rx.recv().await.unwrap();
            kinds.push(match msg {
                Msg::CategoriesLoaded(Ok(c)) => {
                    assert!(!c.is_empty());
                    "categories"
                }
                Msg::TransactionsLoaded(Ok(t)) => {
                    assert_eq!(t.len(), 1);
                    "transactions"
                }
                Msg::SuggestionsLoaded { result: Ok(r), .. } => {
                    assert!(r.is_empty());
                    "suggestions"
                }
                Msg::ExportFinished(Ok(path)) => {
                    assert!(path.exists());
                    "export"
                }
                Msg::DeleteFinished { result: Ok(()), .. } => "delete",
                other => panic!("unexpected message: {other:?}"),
            });
        }
        kinds.sort_unstable();
        assert_eq!(
            kinds,
            vec!["categories", "delete", "export", "suggestions", "transactions"]
        );
        assert_quiet(&mut rx).await;
    }
}
