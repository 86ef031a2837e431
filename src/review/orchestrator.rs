use std::collections::{HashMap, VecDeque};

use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::models::{
    Category, Classification, ClassificationStatus, Direction, PendingClassification,
    Transaction,
};
use crate::review::batch::BatchFlow;
use crate::review::classifier::ClassifierFlow;
use crate::review::direction::DirectionFlow;
use crate::review::keys::Key;
use crate::review::message::{Command, Msg, Request, Responder};
use crate::tui::{money_span, FOOTER_STYLE, HEADER_STYLE, SELECTED_STYLE};

/// Which screen is active. Exactly one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    List,
    Classifying,
    Batch,
    DirectionConfirm,
    Exporting,
    Help,
}

enum Screen {
    List,
    Classifying(Box<ClassifierFlow>),
    Batch(BatchFlow),
    DirectionConfirm(DirectionFlow),
    Exporting,
    Help { back: Box<Screen> },
}

impl Screen {
    fn state(&self) -> State {
        match self {
            Screen::List => State::List,
            Screen::Classifying(_) => State::Classifying,
            Screen::Batch(_) => State::Batch,
            Screen::DirectionConfirm(_) => State::DirectionConfirm,
            Screen::Exporting => State::Exporting,
            Screen::Help { .. } => State::Help,
        }
    }
}

/// Everything decided during this review session.
#[derive(Debug, Default)]
pub struct Session {
    classifications: HashMap<i64, Classification>,
    undo_slot: Option<Classification>,
}

impl Session {
    pub fn record(&mut self, classification: Classification) {
        self.undo_slot = Some(classification.clone());
        self.classifications
            .insert(classification.transaction.id, classification);
    }

    /// Forget the most recent classification. One level only.
    pub fn undo(&mut self) -> Option<Classification> {
        let last = self.undo_slot.take()?;
        self.classifications.remove(&last.transaction.id);
        Some(last)
    }

    pub fn get(&self, transaction_id: i64) -> Option<&Classification> {
        self.classifications.get(&transaction_id)
    }

    pub fn len(&self) -> usize {
        self.classifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classifications.is_empty()
    }

    /// Session results ordered by transaction id.
    pub fn sorted(&self) -> Vec<Classification> {
        let mut all: Vec<Classification> = self.classifications.values().cloned().collect();
        all.sort_by_key(|c| c.transaction.id);
        all
    }
}

enum Completion {
    Classified(Classification),
    Batch(Vec<Classification>),
    Direction(Direction),
}

/// The review session state machine. Fed one [`Msg`] at a time by the
/// runtime; answers with the [`Command`]s the runtime should carry out.
pub struct Orchestrator {
    screen: Screen,
    session: Session,
    pending: Vec<PendingClassification>,
    current_index: usize,
    /// Reply slots parallel to `pending` for single-item requests.
    replies: Vec<Option<Responder<Classification>>>,
    batch_reply: Option<Responder<Vec<Classification>>>,
    direction_reply: Option<Responder<Direction>>,
    /// Requests that arrived while another flow was active.
    deferred: VecDeque<Request>,
    /// Undone while the engine was still running; its save may land after
    /// our delete, so the delete is repeated once the engine finishes.
    undone_during_run: Vec<i64>,
    engine_done: bool,
    categories: Vec<Category>,
    to_classify: Vec<Transaction>,
    list_cursor: usize,
    classifier_available: bool,
    status: Option<String>,
    load_error: Option<String>,
    quitting: bool,
}

impl Orchestrator {
    pub fn new(classifier_available: bool) -> Self {
        Self {
            screen: Screen::List,
            session: Session::default(),
            pending: Vec::new(),
            current_index: 0,
            replies: Vec::new(),
            batch_reply: None,
            direction_reply: None,
            deferred: VecDeque::new(),
            undone_during_run: Vec::new(),
            engine_done: false,
            categories: Vec::new(),
            to_classify: Vec::new(),
            list_cursor: 0,
            classifier_available,
            status: None,
            load_error: None,
            quitting: false,
        }
    }

    pub fn init(&self) -> Vec<Command> {
        vec![Command::LoadCategories, Command::LoadTransactions]
    }

    pub fn state(&self) -> State {
        self.screen.state()
    }

    /// The state underneath the help overlay, if one is showing.
    pub fn base_state(&self) -> State {
        self.base_screen().state()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    #[cfg(test)]
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    #[cfg(test)]
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    #[cfg(test)]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn pending_direction(&self) -> Option<&crate::models::PendingDirection> {
        match self.base_screen() {
            Screen::DirectionConfirm(flow) => Some(flow.pending()),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    #[cfg(test)]
    pub fn is_quitting(&self) -> bool {
        self.quitting
    }

    /// Why the current single-item flow has no suggestions, if it failed.
    #[cfg(test)]
    pub fn suggestion_error(&self) -> Option<&str> {
        match self.base_screen() {
            Screen::Classifying(flow) => flow.error(),
            _ => None,
        }
    }

    fn base_screen(&self) -> &Screen {
        match &self.screen {
            Screen::Help { back } => back.as_ref(),
            s => s,
        }
    }

    fn base_screen_mut(&mut self) -> &mut Screen {
        match &mut self.screen {
            Screen::Help { back } => back.as_mut(),
            s => s,
        }
    }

    fn captures_text(&self) -> bool {
        matches!(&self.screen, Screen::Classifying(flow) if flow.captures_text())
    }

    pub fn update(&mut self, msg: Msg) -> Vec<Command> {
        let mut commands = Vec::new();
        match msg {
            Msg::Key(key) => self.handle_key(key, &mut commands),
            Msg::Request(request) => self.handle_request(request, &mut commands),
            Msg::SuggestionsLoaded {
                transaction_id,
                result,
            } => {
                if let Screen::Classifying(flow) = self.base_screen_mut() {
                    if flow.transaction_id() == transaction_id {
                        flow.suggestions_loaded(result);
                    } else {
                        tracing::debug!(transaction_id, "dropping stale suggestions");
                    }
                }
            }
            Msg::CategoriesLoaded(Ok(categories)) => {
                tracing::debug!(count = categories.len(), "categories loaded");
                if let Screen::Classifying(flow) = self.base_screen_mut() {
                    flow.set_categories(categories.clone());
                }
                self.categories = categories;
            }
            Msg::CategoriesLoaded(Err(e)) => {
                tracing::warn!(error = %e, "category load failed");
                self.load_error = Some(format!("Could not load categories: {e}"));
            }
            Msg::TransactionsLoaded(Ok(transactions)) => {
                tracing::debug!(count = transactions.len(), "transactions loaded");
                self.to_classify = transactions;
                self.list_cursor = self
                    .list_cursor
                    .min(self.to_classify.len().saturating_sub(1));
                self.load_error = None;
            }
            Msg::TransactionsLoaded(Err(e)) => {
                tracing::warn!(error = %e, "transaction load failed");
                self.load_error = Some(format!("Could not load transactions: {e}"));
            }
            Msg::ExportFinished(result) => {
                self.status = Some(match result {
                    Ok(path) => format!(
                        "Exported {} classifications to {}",
                        self.session.len(),
                        path.display()
                    ),
                    Err(e) => format!("Export failed: {e}"),
                });
                if self.base_state() == State::Exporting {
                    self.finish_to_list(&mut commands);
                }
            }
            Msg::DeleteFinished {
                transaction_id,
                result,
            } => match result {
                Ok(()) => tracing::debug!(transaction_id, "undo removed stored classification"),
                Err(e) => {
                    tracing::warn!(transaction_id, error = %e, "undo delete failed");
                    self.status = Some(format!(
                        "Undone here, but storage still has #{transaction_id}: {e}"
                    ));
                }
            },
            Msg::EngineFinished(result) => {
                self.engine_done = true;
                for transaction_id in self.undone_during_run.drain(..) {
                    commands.push(Command::DeleteClassification { transaction_id });
                }
                self.status = Some(match result {
                    Ok(summary) => format!(
                        "All done: {} auto-accepted, {} reviewed, {} saved, {} skipped",
                        summary.auto_accepted, summary.reviewed, summary.saved, summary.skipped
                    ),
                    Err(e) => format!("Classification engine stopped: {e}"),
                });
                commands.push(Command::LoadTransactions);
            }
        }
        self.poll_completion(&mut commands);
        commands
    }

    // -----------------------------------------------------------------------
    // Keys
    // -----------------------------------------------------------------------

    fn handle_key(&mut self, key: Key, commands: &mut Vec<Command>) {
        if self.quitting {
            return;
        }
        match key {
            Key::Interrupt => return self.try_quit(commands),
            Key::Redraw => return commands.push(Command::ClearScreen),
            _ => {}
        }
        if !self.captures_text() {
            match key {
                Key::Char('q') => return self.try_quit(commands),
                Key::Char('?') => return self.toggle_help(),
                Key::Char('u') | Key::Undo => return self.undo(commands),
                _ => {}
            }
        }

        match self.state() {
            State::List => return self.handle_list_key(key, commands),
            State::Help => {
                if matches!(key, Key::Esc | Key::Enter) {
                    self.toggle_help();
                }
                return;
            }
            _ => {}
        }
        match &mut self.screen {
            Screen::Classifying(flow) => flow.handle_key(key),
            Screen::Batch(flow) => flow.handle_key(key),
            Screen::DirectionConfirm(flow) => flow.handle_key(key),
            _ => {}
        }
    }

    fn handle_list_key(&mut self, key: Key, commands: &mut Vec<Command>) {
        match key {
            Key::Up | Key::Char('k') => self.list_cursor = self.list_cursor.saturating_sub(1),
            Key::Down | Key::Char('j') => {
                if !self.to_classify.is_empty() {
                    self.list_cursor = (self.list_cursor + 1).min(self.to_classify.len() - 1);
                }
            }
            Key::Char('e') => {
                if self.session.is_empty() {
                    self.status = Some("Nothing to export yet".into());
                    return;
                }
                self.screen = Screen::Exporting;
                commands.push(Command::Export {
                    classifications: self.session.sorted(),
                });
            }
            Key::Char('r') => {
                self.status = Some("Reloading...".into());
                commands.push(Command::LoadTransactions);
                commands.push(Command::LoadCategories);
            }
            _ => {}
        }
    }

    fn try_quit(&mut self, commands: &mut Vec<Command>) {
        if matches!(self.base_state(), State::Classifying | State::Batch) {
            self.status = Some("Finish or skip the current items before quitting".into());
            return;
        }
        tracing::info!(classified = self.session.len(), "review session quitting");
        self.quitting = true;
        commands.push(Command::Quit);
    }

    fn toggle_help(&mut self) {
        let current = std::mem::replace(&mut self.screen, Screen::List);
        self.screen = match current {
            Screen::Help { back } => *back,
            other => Screen::Help {
                back: Box::new(other),
            },
        };
    }

    fn undo(&mut self, commands: &mut Vec<Command>) {
        let Some(last) = self.session.undo() else {
            self.status = Some("Nothing to undo".into());
            return;
        };
        let transaction_id = last.transaction.id;
        tracing::info!(transaction_id, "undoing classification");
        commands.push(Command::DeleteClassification { transaction_id });
        if !self.engine_done {
            self.undone_during_run.push(transaction_id);
        }
        self.status = Some(format!("Undid: {}", last.transaction.description));
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    fn handle_request(&mut self, request: Request, commands: &mut Vec<Command>) {
        let request_id = request.id();
        match (self.base_state(), request) {
            (State::Classifying, Request::Classify { pending, reply }) => {
                tracing::debug!(
                    request_id,
                    queued = self.pending.len() + 1,
                    "queued classification"
                );
                self.pending.push(pending);
                self.replies.push(Some(reply));
            }
            (State::List, request) => self.start(request, commands),
            (state, request) => {
                tracing::debug!(request_id, ?state, "deferring request");
                self.deferred.push_back(request);
            }
        }
    }

    fn start(&mut self, request: Request, commands: &mut Vec<Command>) {
        tracing::info!(request_id = request.id(), "starting review request");
        match request {
            Request::Classify { pending, reply } => {
                self.pending = vec![pending];
                self.replies = vec![Some(reply)];
                self.current_index = 0;
                // Adjacent single-item requests join the same queue.
                while matches!(self.deferred.front(), Some(Request::Classify { .. })) {
                    if let Some(Request::Classify { pending, reply }) = self.deferred.pop_front() {
                        self.pending.push(pending);
                        self.replies.push(Some(reply));
                    }
                }
                self.enter_classifier(commands);
            }
            Request::Batch { pending, reply } => {
                self.pending = pending.clone();
                self.replies.clear();
                self.current_index = 0;
                self.batch_reply = Some(reply);
                *self.base_screen_mut() = Screen::Batch(BatchFlow::new(pending));
            }
            Request::Direction { pending, reply } => {
                self.direction_reply = Some(reply);
                *self.base_screen_mut() = Screen::DirectionConfirm(DirectionFlow::new(pending));
            }
        }
    }

    fn enter_classifier(&mut self, commands: &mut Vec<Command>) {
        let flow = ClassifierFlow::new(
            self.pending[self.current_index].clone(),
            self.categories.clone(),
            self.classifier_available,
        );
        if let Some(cmd) = flow.init() {
            commands.push(cmd);
        }
        *self.base_screen_mut() = Screen::Classifying(Box::new(flow));
    }

    fn finish_to_list(&mut self, commands: &mut Vec<Command>) {
        self.pending.clear();
        self.replies.clear();
        self.current_index = 0;
        *self.base_screen_mut() = Screen::List;
        if let Some(next) = self.deferred.pop_front() {
            self.start(next, commands);
        }
    }

    fn poll_completion(&mut self, commands: &mut Vec<Command>) {
        loop {
            let done = match self.base_screen() {
                Screen::Classifying(flow) => flow.result().cloned().map(Completion::Classified),
                Screen::Batch(flow) => flow.results().map(Completion::Batch),
                Screen::DirectionConfirm(flow) => flow.result().map(Completion::Direction),
                _ => None,
            };
            let Some(done) = done else { break };

            match done {
                Completion::Classified(classification) => {
                    let reply = self
                        .replies
                        .get_mut(self.current_index)
                        .and_then(Option::take);
                    self.session.record(classification.clone());
                    if let Some(reply) = reply {
                        reply.respond(classification);
                    }
                    self.current_index += 1;
                    if self.current_index < self.pending.len() {
                        self.enter_classifier(commands);
                    } else {
                        self.finish_to_list(commands);
                    }
                }
                Completion::Batch(results) => {
                    tracing::info!(count = results.len(), "batch review finished");
                    for c in &results {
                        self.session.record(c.clone());
                    }
                    if let Some(reply) = self.batch_reply.take() {
                        reply.respond(results);
                    }
                    self.finish_to_list(commands);
                }
                Completion::Direction(direction) => {
                    if let Some(reply) = self.direction_reply.take() {
                        reply.respond(direction);
                    }
                    self.finish_to_list(commands);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Drawing
    // -----------------------------------------------------------------------

    pub fn draw(&self, frame: &mut Frame) {
        let [header_area, banner_area, body_area] = Layout::vertical([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Fill(1),
        ])
        .areas(frame.area());

        let label = match self.base_state() {
            State::List => "Waiting",
            State::Classifying => "Classifying",
            State::Batch => "Batch review",
            State::DirectionConfirm => "Direction",
            State::Exporting => "Exporting",
            State::Help => "Help",
        };
        frame.render_widget(
            Paragraph::new(format!(
                " tally \u{2502} {label} \u{2502} {} decided this session",
                self.session.len()
            ))
            .style(HEADER_STYLE),
            header_area,
        );

        let banner = match (&self.load_error, &self.status) {
            (Some(err), _) => Line::from(Span::styled(
                format!(" {err}"),
                Style::default().fg(Color::Red),
            )),
            (None, Some(status)) => Line::from(Span::styled(
                format!(" {status}"),
                Style::default().fg(Color::Yellow),
            )),
            (None, None) => Line::from(""),
        };
        frame.render_widget(Paragraph::new(banner), banner_area);

        match &self.screen {
            Screen::Help { back } => self.draw_help(frame, body_area, back.state()),
            Screen::List => self.draw_list(frame, body_area),
            Screen::Classifying(flow) => {
                flow.draw(frame, body_area, (self.current_index, self.pending.len()))
            }
            Screen::Batch(flow) => flow.draw(frame, body_area),
            Screen::DirectionConfirm(flow) => flow.draw(frame, body_area),
            Screen::Exporting => frame.render_widget(Paragraph::new("  Exporting..."), body_area),
        }
    }

    fn draw_list(&self, frame: &mut Frame, area: Rect) {
        let [list_area, hints_area] =
            Layout::vertical([Constraint::Fill(1), Constraint::Length(1)]).areas(area);

        if self.to_classify.is_empty() {
            frame.render_widget(
                Paragraph::new("  Nothing waiting. Requests from the classifier will show up here.")
                    .style(FOOTER_STYLE),
                list_area,
            );
        } else {
            let visible = list_area.height.max(1) as usize;
            let start = self.list_cursor.saturating_sub(visible.saturating_sub(1));
            let lines: Vec<Line> = self
                .to_classify
                .iter()
                .enumerate()
                .skip(start)
                .take(visible)
                .map(|(i, txn)| {
                    let decided = match self.session.get(txn.id) {
                        Some(c) if c.status == ClassificationStatus::Unclassified => {
                            "(skipped)".to_string()
                        }
                        Some(c) => c.category.clone(),
                        None => String::new(),
                    };
                    let style = if i == self.list_cursor {
                        SELECTED_STYLE
                    } else {
                        Style::default()
                    };
                    Line::from(vec![
                        Span::styled(format!("  {}  {:<40} ", txn.date, txn.description), style),
                        money_span(txn.amount),
                        Span::styled(format!("  {decided}"), FOOTER_STYLE),
                    ])
                })
                .collect();
            frame.render_widget(Paragraph::new(lines), list_area);
        }

        frame.render_widget(
            Paragraph::new("Up/Down  e=export  r=reload  u=undo  ?=help  q=quit")
                .style(FOOTER_STYLE),
            hints_area,
        );
    }

    fn draw_help(&self, frame: &mut Frame, area: Rect, under: State) {
        let mut lines = vec![
            Line::from(Span::styled("  Keys", HEADER_STYLE)),
            Line::from(""),
            Line::from("  ?          toggle this help"),
            Line::from("  u, Ctrl-Z  undo the last classification"),
            Line::from("  Ctrl-L     redraw the screen"),
            Line::from("  q, Ctrl-C  quit (not while items are being classified)"),
            Line::from(""),
        ];
        let specific: &[&str] = match under {
            State::Classifying => &[
                "  Enter      accept the highlighted suggestion",
                "  1-5        accept a suggestion by number",
                "  l, Tab     pick from every category",
                "  c          type a category name or ID",
                "  s          skip for now",
            ],
            State::Batch => &[
                "  a          accept every item's own suggestion",
                "  s          skip every item",
                "  r          review items one by one",
                "  Tab        switch between groups and items",
                "  Esc        leave; items not yet decided are skipped",
            ],
            State::DirectionConfirm => &[
                "  Up/Down    move between expense, income, transfer",
                "  1-3        choose directly",
                "  Enter      confirm",
            ],
            _ => &[
                "  e          export this session's classifications to CSV",
                "  r          reload transactions and categories",
            ],
        };
        lines.extend(specific.iter().map(|s| Line::from(*s)));
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled("  Esc or Enter to close", FOOTER_STYLE)));
        frame.render_widget(Paragraph::new(lines), area);
    }
}
