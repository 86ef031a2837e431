use ratatui::{
    layout::{Constraint, Layout, Rect},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::models::{Direction, PendingDirection};
use crate::review::keys::Key;
use crate::tui::{money_span, wrap_text, FOOTER_STYLE, SELECTED_STYLE};

/// Three-way expense/income/transfer decision for one merchant.
pub struct DirectionFlow {
    pending: PendingDirection,
    cursor: usize,
    result: Option<Direction>,
}

impl DirectionFlow {
    pub fn new(pending: PendingDirection) -> Self {
        let cursor = pending.suggested.index();
        Self {
            pending,
            cursor,
            result: None,
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> &PendingDirection {
        &self.pending
    }

    pub fn selected(&self) -> Direction {
        Direction::ALL[self.cursor]
    }

    pub fn result(&self) -> Option<Direction> {
        self.result
    }

    pub fn handle_key(&mut self, key: Key) {
        if self.result.is_some() {
            return;
        }
        let n = Direction::ALL.len();
        match key {
            Key::Up | Key::Char('k') => self.cursor = (self.cursor + n - 1) % n,
            Key::Down | Key::Char('j') => self.cursor = (self.cursor + 1) % n,
            Key::Enter => self.commit(),
            // Esc commits too, through whatever the cursor currently points at.
            Key::Esc => self.commit(),
            _ => {
                if let Some(d) = key.digit() {
                    if (1..=n as u32).contains(&d) {
                        self.cursor = d as usize - 1;
                        self.commit();
                    }
                }
            }
        }
    }

    fn commit(&mut self) {
        let direction = self.selected();
        tracing::info!(
            merchant = %self.pending.merchant,
            direction = direction.as_str(),
            "direction confirmed"
        );
        self.result = Some(direction);
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect) {
        let (reasoning, reasoning_lines) =
            wrap_text(&self.pending.reasoning, area.width.saturating_sub(16) as usize);
        let samples = self.pending.sample_transactions.len().min(5) as u16;
        let [detail_area, options_area, hints_area] = Layout::vertical([
            Constraint::Length(3 + reasoning_lines + samples),
            Constraint::Fill(1),
            Constraint::Length(1),
        ])
        .areas(area);

        let mut detail = vec![
            Line::from(format!("  Merchant:   {}", self.pending.merchant)),
            Line::from(format!(
                "  Suggested:  {} ({:.0}%)",
                self.pending.suggested,
                self.pending.confidence * 100.0
            )),
        ];
        for (i, line) in reasoning.lines().enumerate() {
            let label = if i == 0 { "Why:" } else { "" };
            detail.push(Line::from(format!("  {label:<11} {line}")));
        }
        detail.push(Line::from(""));
        for txn in self.pending.sample_transactions.iter().take(5) {
            detail.push(Line::from(vec![
                Span::raw(format!("    {}  {:<40} ", txn.date, txn.description)),
                money_span(txn.amount),
            ]));
        }
        frame.render_widget(Paragraph::new(detail), detail_area);

        let options: Vec<Line> = Direction::ALL
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let text = format!("  {}. {d}", i + 1);
                if i == self.cursor {
                    Line::from(Span::styled(text, SELECTED_STYLE))
                } else {
                    Line::from(text)
                }
            })
            .collect();
        frame.render_widget(Paragraph::new(options), options_area);
        frame.render_widget(
            Paragraph::new("Up/Down  1-3=select  Enter=confirm  Esc=keep selection")
                .style(FOOTER_STYLE),
            hints_area,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(suggested: Direction) -> PendingDirection {
        PendingDirection {
            merchant: "Venmo".into(),
            suggested,
            confidence: 0.55,
            reasoning: "Looks like a peer payment".into(),
            sample_transactions: vec![],
        }
    }

    #[test]
    fn test_cursor_starts_on_suggestion() {
        let flow = DirectionFlow::new(pending(Direction::Transfer));
        assert_eq!(flow.selected(), Direction::Transfer);
    }

    #[test]
    fn test_navigation_wraps() {
        let mut flow = DirectionFlow::new(pending(Direction::Expense));
        flow.handle_key(Key::Up);
        assert_eq!(flow.selected(), Direction::Transfer);
        flow.handle_key(Key::Down);
        assert_eq!(flow.selected(), Direction::Expense);
        flow.handle_key(Key::Down);
        flow.handle_key(Key::Down);
        flow.handle_key(Key::Down);
        assert_eq!(flow.selected(), Direction::Expense);
    }

    #[test]
    fn test_enter_commits_selection() {
        let mut flow = DirectionFlow::new(pending(Direction::Expense));
        flow.handle_key(Key::Down);
        flow.handle_key(Key::Enter);
        assert_eq!(flow.result(), Some(Direction::Income));
    }

    #[test]
    fn test_quick_select() {
        let mut flow = DirectionFlow::new(pending(Direction::Expense));
        flow.handle_key(Key::Char('3'));
        assert_eq!(flow.result(), Some(Direction::Transfer));
    }

    #[test]
    fn test_escape_commits_cursor_not_suggestion() {
        let mut flow = DirectionFlow::new(pending(Direction::Income));
        flow.handle_key(Key::Down);
        flow.handle_key(Key::Esc);
        assert_eq!(flow.result(), Some(Direction::Transfer));
    }

    #[test]
    fn test_result_frozen_after_commit() {
        let mut flow = DirectionFlow::new(pending(Direction::Income));
        flow.handle_key(Key::Enter);
        flow.handle_key(Key::Char('1'));
        flow.handle_key(Key::Down);
        assert_eq!(flow.result(), Some(Direction::Income));
    }
}
