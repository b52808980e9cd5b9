use std::{
    io::stdout,
    time::{Duration, Instant},
};

use crate::gui::error::MonitorError;
use crate::shutdown::Shutdown;
use crate::stats::StatsSnapshot;

use crossterm::{
    event::{self, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};

use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
    Terminal,
};

const REDRAW: Duration = Duration::from_millis(250);

/// What the monitor shows on each redraw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct MonitorView {
    pub elapsed: Duration,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub stats: StatsSnapshot,
}

/// `HH:MM:SS`, hours not wrapping at 24.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

/// The label/value rows of the monitor body.
pub fn status_rows(view: &MonitorView) -> Vec<(&'static str, String)> {
    let s = &view.stats;
    vec![
        ("Recording", format_elapsed(view.elapsed)),
        (
            "Queue",
            format!("{} / {}", view.queue_depth, view.queue_capacity),
        ),
        ("Queued", s.enqueued.to_string()),
        ("Dropped (queue full)", s.dropped.to_string()),
        ("Throttled", s.throttled.to_string()),
        ("Rows written", s.rows_written.to_string()),
        ("Rows lost", s.rows_lost.to_string()),
        ("Frames captured", s.frames_captured.to_string()),
    ]
}

struct RawTerminal;

impl RawTerminal {
    fn enter() -> Result<Self, MonitorError> {
        enable_raw_mode()?;
        stdout().execute(EnterAlternateScreen)?;
        Ok(RawTerminal)
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = stdout().execute(LeaveAlternateScreen);
    }
}

/// Shows the session status until the operator presses `q`/`Esc`, which
/// raises `shutdown`, or until `shutdown` is raised some other way.
///
/// `view` is polled once per redraw with the elapsed recording time.
pub fn session_monitor<F>(shutdown: &Shutdown, mut view: F) -> Result<(), MonitorError>
where
    F: FnMut(Duration) -> MonitorView,
{
    let started = Instant::now();
    let _raw = RawTerminal::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    while !shutdown.is_triggered() {
        let current = view(started.elapsed());
        let title = Title::from(" Recording Session ".magenta().bold());
        let instructions = Title::from(Line::from(vec![" Stop ".into(), "<Q> ".magenta().bold()]));
        let block = Block::default()
            .title(title.alignment(Alignment::Center))
            .title(
                instructions
                    .alignment(Alignment::Center)
                    .position(Position::Bottom),
            )
            .borders(Borders::ALL);
        let lines: Vec<Line> = status_rows(&current)
            .into_iter()
            .map(|(label, value)| Line::from(vec![format!(" {label:<22}").into(), value.bold()]))
            .collect();
        let text = Paragraph::new(lines).block(block);

        terminal.draw(|frame| {
            frame.render_widget(text, frame.size());
        })?;

        if event::poll(REDRAW)? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press
                    && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                {
                    shutdown.trigger("stop requested from monitor");
                }
            }
        }
    }

    terminal.show_cursor()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_hours_minutes_seconds() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_elapsed(Duration::from_millis(61_900)), "00:01:01");
        assert_eq!(format_elapsed(Duration::from_secs(3 * 3600 + 7)), "03:00:07");
        assert_eq!(format_elapsed(Duration::from_secs(30 * 3600)), "30:00:00");
    }

    #[test]
    fn rows_show_queue_and_counters() {
        let view = MonitorView {
            elapsed: Duration::from_secs(5),
            queue_depth: 12,
            queue_capacity: 5000,
            stats: StatsSnapshot {
                dropped: 3,
                frames_captured: 99,
                ..StatsSnapshot::default()
            },
        };
        let rows = status_rows(&view);
        assert_eq!(rows[0], ("Recording", "00:00:05".to_string()));
        assert!(rows.contains(&("Queue", "12 / 5000".to_string())));
        assert!(rows.contains(&("Dropped (queue full)", "3".to_string())));
        assert!(rows.contains(&("Frames captured", "99".to_string())));
    }
}
