use std::path::PathBuf;

use tokio::sync::oneshot;

use crate::engine::EngineSummary;
use crate::models::{
    Category, Classification, Direction, PendingClassification, PendingDirection, Ranking,
    Transaction,
};
use crate::review::keys::Key;

pub type RequestId = u64;

/// Single-shot reply slot for one engine request.
#[derive(Debug)]
pub struct Responder<T> {
    id: RequestId,
    tx: oneshot::Sender<T>,
}

impl<T> Responder<T> {
    pub fn new(id: RequestId, tx: oneshot::Sender<T>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns false when the requester has already given up.
    pub fn respond(self, value: T) -> bool {
        let id = self.id;
        match self.tx.send(value) {
            Ok(()) => {
                tracing::debug!(request_id = id, "reply delivered");
                true
            }
            Err(_) => {
                tracing::warn!(request_id = id, "requester went away before the reply");
                false
            }
        }
    }
}

#[derive(Debug)]
pub enum Request {
    Classify {
        pending: PendingClassification,
        reply: Responder<Classification>,
    },
    Batch {
        pending: Vec<PendingClassification>,
        reply: Responder<Vec<Classification>>,
    },
    Direction {
        pending: PendingDirection,
        reply: Responder<Direction>,
    },
}

impl Request {
    pub fn id(&self) -> RequestId {
        match self {
            Request::Classify { reply, .. } => reply.id(),
            Request::Batch { reply, .. } => reply.id(),
            Request::Direction { reply, .. } => reply.id(),
        }
    }
}

/// Everything the review session reacts to. Background tasks report back
/// with exactly one of these; they never touch session state themselves.
#[derive(Debug)]
pub enum Msg {
    Key(Key),
    Request(Request),
    SuggestionsLoaded {
        transaction_id: i64,
        result: Result<Vec<Ranking>, String>,
    },
    CategoriesLoaded(Result<Vec<Category>, String>),
    TransactionsLoaded(Result<Vec<Transaction>, String>),
    ExportFinished(Result<PathBuf, String>),
    DeleteFinished {
        transaction_id: i64,
        result: Result<(), String>,
    },
    EngineFinished(Result<EngineSummary, String>),
}

/// Side effects requested by the session, carried out by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    FetchSuggestions {
        transaction: Transaction,
        categories: Vec<Category>,
    },
    LoadCategories,
    LoadTransactions,
    Export {
        classifications: Vec<Classification>,
    },
    DeleteClassification {
        transaction_id: i64,
    },
    ClearScreen,
    Quit,
}
