use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::models::{Category, Classification, PendingClassification, Ranking};
use crate::review::keys::Key;
use crate::review::message::Command;
use crate::tui::{money_span, FOOTER_STYLE, SELECTED_STYLE};

/// Number of rankings offered for one-key acceptance.
pub const TOP_RANKINGS: usize = 5;
const CATEGORY_PAGE_SIZE: usize = 10;

pub const CUSTOM_NOTE: &str = "Custom category";
pub const CATEGORY_ID_NOTE: &str = "Selected by category ID";
pub const CATEGORY_LIST_NOTE: &str = "Selected from category list";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierMode {
    SelectingSuggestion,
    EnteringCustom,
    SelectingCategory,
}

/// Drives one transaction to exactly one [`Classification`].
pub struct ClassifierFlow {
    pending: PendingClassification,
    rankings: Vec<Ranking>,
    categories: Vec<Category>,
    /// Indices into `categories`, by AI score then name.
    category_order: Vec<usize>,
    mode: ClassifierMode,
    cursor: usize,
    category_cursor: usize,
    custom_input: String,
    loading: bool,
    error: Option<String>,
    result: Option<Classification>,
}

impl ClassifierFlow {
    /// A flow built without rankings starts loading suggestions when a
    /// classifier is available; see [`ClassifierFlow::init`].
    pub fn new(
        pending: PendingClassification,
        categories: Vec<Category>,
        classifier_available: bool,
    ) -> Self {
        let rankings = pending.category_rankings.clone();
        let loading = rankings.is_empty() && classifier_available;
        let mut flow = Self {
            pending,
            rankings,
            categories,
            category_order: Vec::new(),
            mode: ClassifierMode::SelectingSuggestion,
            cursor: 0,
            category_cursor: 0,
            custom_input: String::new(),
            loading,
            error: None,
            result: None,
        };
        flow.sort_categories();
        flow
    }

    pub fn init(&self) -> Option<Command> {
        if !self.loading {
            return None;
        }
        Some(Command::FetchSuggestions {
            transaction: self.pending.transaction.clone(),
            categories: self.categories.clone(),
        })
    }

    pub fn transaction_id(&self) -> i64 {
        self.pending.transaction.id
    }

    #[cfg(test)]
    pub fn pending(&self) -> &PendingClassification {
        &self.pending
    }

    #[cfg(test)]
    pub fn mode(&self) -> ClassifierMode {
        self.mode
    }

    #[cfg(test)]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    #[cfg(test)]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[cfg(test)]
    pub fn rankings(&self) -> &[Ranking] {
        &self.rankings
    }

    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }

    pub fn result(&self) -> Option<&Classification> {
        self.result.as_ref()
    }

    pub fn captures_text(&self) -> bool {
        self.mode == ClassifierMode::EnteringCustom
    }

    fn top_rankings(&self) -> &[Ranking] {
        let n = self.rankings.len().min(TOP_RANKINGS);
        &self.rankings[..n]
    }

    fn score_for(&self, category: &str) -> f64 {
        self.rankings
            .iter()
            .find(|r| r.category == category)
            .map(|r| r.score)
            .unwrap_or(0.0)
    }

    fn sort_categories(&mut self) {
        let mut order: Vec<usize> = (0..self.categories.len()).collect();
        order.sort_by(|&a, &b| {
            let (ca, cb) = (&self.categories[a], &self.categories[b]);
            self.score_for(&cb.name)
                .partial_cmp(&self.score_for(&ca.name))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ca.name.cmp(&cb.name))
        });
        self.category_order = order;
        self.category_cursor = 0;
    }

    /// Category names in the order `SelectingCategory` lists them.
    #[cfg(test)]
    pub fn sorted_category_names(&self) -> Vec<&str> {
        self.category_order
            .iter()
            .map(|&i| self.categories[i].name.as_str())
            .collect()
    }

    pub fn set_categories(&mut self, categories: Vec<Category>) {
        self.categories = categories;
        self.sort_categories();
    }

    pub fn suggestions_loaded(&mut self, result: Result<Vec<Ranking>, String>) {
        if !self.loading || self.is_complete() {
            return;
        }
        self.loading = false;
        match result {
            Ok(rankings) => {
                self.rankings = rankings;
                self.cursor = 0;
                self.sort_categories();
            }
            Err(e) => {
                tracing::warn!(
                    transaction_id = self.transaction_id(),
                    error = %e,
                    "suggestion fetch failed"
                );
                self.error = Some(e);
            }
        }
    }

    pub fn handle_key(&mut self, key: Key) {
        if self.is_complete() {
            return;
        }
        match self.mode {
            ClassifierMode::SelectingSuggestion => self.handle_suggestion_key(key),
            ClassifierMode::EnteringCustom => self.handle_custom_key(key),
            ClassifierMode::SelectingCategory => self.handle_category_key(key),
        }
    }

    fn handle_suggestion_key(&mut self, key: Key) {
        // While loading or after a failed fetch only skip and custom entry work.
        let blocked = self.loading || self.error.is_some();
        match key {
            Key::Char('s') => self.skip(),
            Key::Char('c') => {
                self.custom_input.clear();
                self.mode = ClassifierMode::EnteringCustom;
            }
            _ if blocked => {}
            Key::Up | Key::Char('k') => self.cursor = self.cursor.saturating_sub(1),
            Key::Down | Key::Char('j') => {
                let n = self.top_rankings().len();
                if n > 0 {
                    self.cursor = (self.cursor + 1).min(n - 1);
                }
            }
            Key::Enter => self.accept(self.cursor),
            Key::Tab | Key::Char('l') => {
                if !self.categories.is_empty() {
                    self.category_cursor = 0;
                    self.mode = ClassifierMode::SelectingCategory;
                }
            }
            _ => {
                if let Some(d) = key.digit() {
                    if (1..=TOP_RANKINGS as u32).contains(&d) {
                        self.accept(d as usize - 1);
                    }
                }
            }
        }
    }

    fn handle_custom_key(&mut self, key: Key) {
        match key {
            Key::Char(c) => self.custom_input.push(c),
            Key::Backspace => {
                self.custom_input.pop();
            }
            Key::Esc => {
                self.custom_input.clear();
                self.mode = ClassifierMode::SelectingSuggestion;
            }
            Key::Enter => self.submit_custom(),
            _ => {}
        }
    }

    fn handle_category_key(&mut self, key: Key) {
        let len = self.category_order.len();
        if len == 0 {
            self.mode = ClassifierMode::SelectingSuggestion;
            return;
        }
        match key {
            Key::Up | Key::Char('k') => {
                self.category_cursor = self.category_cursor.saturating_sub(1)
            }
            Key::Down | Key::Char('j') => {
                self.category_cursor = (self.category_cursor + 1).min(len - 1)
            }
            Key::PageUp => {
                self.category_cursor = self.category_cursor.saturating_sub(CATEGORY_PAGE_SIZE)
            }
            Key::PageDown => {
                self.category_cursor = (self.category_cursor + CATEGORY_PAGE_SIZE).min(len - 1)
            }
            Key::Home | Key::Char('g') => self.category_cursor = 0,
            Key::End | Key::Char('G') => self.category_cursor = len - 1,
            Key::Esc => self.mode = ClassifierMode::SelectingSuggestion,
            Key::Enter => {
                let name = self.categories[self.category_order[self.category_cursor]].name.clone();
                self.finish(Classification::custom(
                    self.pending.transaction.clone(),
                    &name,
                    CATEGORY_LIST_NOTE,
                ));
            }
            Key::Char(c) if c.is_ascii_digit() => {
                // Quick-jump by ID shares the custom input field.
                self.custom_input = c.to_string();
                self.mode = ClassifierMode::EnteringCustom;
            }
            _ => {}
        }
    }

    fn accept(&mut self, index: usize) {
        let Some(ranking) = self.top_rankings().get(index).cloned() else {
            return;
        };
        self.finish(Classification::accepted(
            self.pending.transaction.clone(),
            &ranking.category,
            ranking.score,
        ));
    }

    fn skip(&mut self) {
        self.finish(Classification::skipped(self.pending.transaction.clone()));
    }

    /// Numeric input is tried as a category ID first; anything else, or an
    /// ID that matches nothing, is taken literally as a category name.
    fn submit_custom(&mut self) {
        let text = self.custom_input.trim().to_string();
        if text.is_empty() {
            return;
        }
        let by_id = text
            .parse::<i64>()
            .ok()
            .and_then(|id| self.categories.iter().find(|c| c.id == id))
            .map(|c| c.name.clone());
        let classification = match by_id {
            Some(name) => {
                Classification::custom(self.pending.transaction.clone(), &name, CATEGORY_ID_NOTE)
            }
            None => Classification::custom(self.pending.transaction.clone(), &text, CUSTOM_NOTE),
        };
        self.finish(classification);
    }

    fn finish(&mut self, classification: Classification) {
        tracing::info!(
            transaction_id = self.transaction_id(),
            category = %classification.category,
            status = classification.status.as_str(),
            "transaction classified"
        );
        self.result = Some(classification);
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect, position: (usize, usize)) {
        let txn = &self.pending.transaction;
        let [detail_area, interaction_area, hints_area] = Layout::vertical([
            Constraint::Length(7),
            Constraint::Fill(1),
            Constraint::Length(1),
        ])
        .areas(area);

        let detail_lines = vec![
            Line::from(Span::styled(
                format!("  Transaction {} of {}", position.0 + 1, position.1),
                FOOTER_STYLE,
            )),
            Line::from(format!("  Date:        {}", txn.date)),
            Line::from(format!("  Description: {}", txn.description)),
            Line::from(format!("  Merchant:    {}", txn.merchant)),
            Line::from(vec![Span::raw("  Amount:      "), money_span(txn.amount)]),
            Line::from(format!(
                "  Suggested:   {} ({:.0}%)  {}",
                self.pending.suggested_category,
                self.pending.confidence * 100.0,
                self.pending.category_description
            )),
            Line::from(Span::styled(
                format!("  Patterns:    {}", self.pending.check_patterns.join(", ")),
                FOOTER_STYLE,
            )),
        ];
        frame.render_widget(Paragraph::new(detail_lines), detail_area);

        let lines: Vec<Line> = match self.mode {
            ClassifierMode::SelectingSuggestion => {
                if self.loading {
                    vec![Line::from("  Fetching suggestions...")]
                } else if let Some(err) = &self.error {
                    vec![Line::from(Span::styled(
                        format!("  Could not get suggestions: {err}"),
                        Style::default().fg(Color::Red),
                    ))]
                } else if self.rankings.is_empty() {
                    vec![Line::from(Span::styled("  (no suggestions)", FOOTER_STYLE))]
                } else {
                    self.top_rankings()
                        .iter()
                        .enumerate()
                        .map(|(i, r)| {
                            let text = format!(
                                "  {}. {:<32} {:>4.0}%",
                                i + 1,
                                r.category,
                                r.score * 100.0
                            );
                            if i == self.cursor {
                                Line::from(Span::styled(text, SELECTED_STYLE))
                            } else {
                                Line::from(text)
                            }
                        })
                        .collect()
                }
            }
            ClassifierMode::EnteringCustom => vec![Line::from(format!(
                "  Category name or ID: {}\u{2588}",
                self.custom_input
            ))],
            ClassifierMode::SelectingCategory => {
                let visible = interaction_area.height.max(1) as usize;
                let start = self.category_cursor.saturating_sub(visible.saturating_sub(1));
                self.category_order
                    .iter()
                    .enumerate()
                    .skip(start)
                    .take(visible)
                    .map(|(pos, &i)| {
                        let cat = &self.categories[i];
                        let score = self.score_for(&cat.name);
                        let text = if score > 0.0 {
                            format!("  [{:>3}] {:<32} {:>4.0}%", cat.id, cat.name, score * 100.0)
                        } else {
                            format!("  [{:>3}] {}", cat.id, cat.name)
                        };
                        if pos == self.category_cursor {
                            Line::from(Span::styled(text, SELECTED_STYLE))
                        } else {
                            Line::from(text)
                        }
                    })
                    .collect()
            }
        };
        frame.render_widget(Paragraph::new(lines), interaction_area);

        let hints = match self.mode {
            ClassifierMode::SelectingSuggestion if self.loading || self.error.is_some() => {
                "s=skip  c=custom"
            }
            ClassifierMode::SelectingSuggestion => {
                "Up/Down  Enter=accept  1-5=quick accept  l=all categories  c=custom  s=skip  u=undo  ?=help"
            }
            ClassifierMode::EnteringCustom => "Type a name or category ID, Enter=confirm, Esc=back",
            ClassifierMode::SelectingCategory => {
                "Up/Down  PgUp/PgDn  g/G=first/last  0-9=jump by ID  Enter=select  Esc=back"
            }
        };
        frame.render_widget(Paragraph::new(hints).style(FOOTER_STYLE), hints_area);
    }
}
