pub mod state;

use chrono::Utc;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, BorderType, Borders, List, ListItem, ListState, Paragraph, Tabs},
    Frame,
};

use crate::app::{Mode, UiApp};
use crate::models::{Entity, ServerState, SystemStats};
use crate::sync::format_time_since;
use crate::transcript::PaneTranscript;

use self::state::count_lines_u16;

pub fn draw(frame: &mut Frame, app: &UiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(frame.area());

    let main_area = chunks[0];
    let status_area = chunks[1];

    match app.mode {
        Mode::Browse => {
            // Main layout: server list | detail
            let panels = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
                .split(main_area);
            draw_server_list(frame, app, panels[0]);
            draw_detail(frame, app, panels[1]);
        }
        Mode::Zoom => draw_detail(frame, app, main_area),
    }
    draw_status_bar(frame, app, status_area);
}

fn state_color(state: ServerState) -> Color {
    match state {
        ServerState::Active => Color::Green,
        ServerState::Stale => Color::Yellow,
        ServerState::Dead => Color::Red,
        ServerState::Unknown => Color::DarkGray,
    }
}

fn display_name<'a>(id: &'a str, entity: &'a Entity) -> &'a str {
    if entity.name.is_empty() {
        id
    } else {
        &entity.name
    }
}

fn format_stats(stats: &SystemStats) -> String {
    format!(
        "C{:>3.0}% M{:>3.0}% D{:>3.0}%",
        stats.cpu_percent, stats.memory.percent, stats.disk.percent
    )
}

pub fn draw_server_list(frame: &mut Frame, app: &UiApp, area: Rect) {
    let items: Vec<ListItem> = app
        .servers()
        .enumerate()
        .map(|(i, (id, entity))| {
            let is_selected = i == app.selected;
            let marker = if is_selected { ">> " } else { "   " };
            let name_style = if is_selected {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let mut spans = vec![
                Span::styled(marker, name_style),
                Span::styled("● ", Style::default().fg(state_color(entity.state))),
                Span::styled(display_name(id, entity).to_string(), name_style),
            ];
            if let Some(latest) = entity.latest() {
                let stats = &latest.system_stats;
                let stats_style = if stats.is_hot() {
                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::DarkGray)
                };
                spans.push(Span::styled(format!("  {}", format_stats(stats)), stats_style));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let title = format!(" Servers ({}) ", app.server_count());
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .highlight_style(Style::default()) // selection handled manually via ">>"
        .highlight_symbol("");

    let mut state = ListState::default();
    if app.server_count() > 0 {
        state.select(Some(app.selected));
    }
    frame.render_stateful_widget(list, area, &mut state);
}

pub fn draw_detail(frame: &mut Frame, app: &UiApp, area: Rect) {
    let border_style = match app.mode {
        Mode::Zoom => Style::default()
            .fg(Color::LightGreen)
            .add_modifier(Modifier::BOLD),
        Mode::Browse => Style::default().fg(Color::Cyan),
    };
    let border_type = match app.mode {
        Mode::Zoom => BorderType::Thick,
        Mode::Browse => BorderType::Plain,
    };

    let (Some(id), Some(entity)) = (app.selected_id(), app.selected_entity()) else {
        let placeholder = if app.snapshot.connection.connected {
            "Waiting for servers..."
        } else {
            "Not connected"
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(border_style)
            .title(" Detail ");
        frame.render_widget(Paragraph::new(placeholder).block(block), area);
        return;
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(border_type)
        .border_style(border_style)
        .title(format!(" {} ", display_name(id, entity)));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let windows = app.windows();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(if windows.is_empty() { 0 } else { 1 }),
            Constraint::Min(1),
        ])
        .split(inner);

    frame.render_widget(Paragraph::new(summary_line(entity)), rows[0]);

    if windows.is_empty() {
        frame.render_widget(
            Paragraph::new("No tmux content").style(Style::default().fg(Color::DarkGray)),
            rows[2],
        );
        return;
    }

    let titles: Vec<String> = windows.iter().map(|w| format!(" {} ", w.window_id)).collect();
    let tabs = Tabs::new(titles)
        .select(app.window_index)
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_widget(tabs, rows[1]);

    if let Some(window) = windows.get(app.window_index) {
        draw_panes(frame, app, &window.panes, rows[2]);
    }
}

fn summary_line(entity: &Entity) -> Line<'static> {
    let mut spans = vec![Span::styled(
        entity.state.to_string(),
        Style::default().fg(state_color(entity.state)),
    )];
    if let Some(latest) = entity.latest() {
        if !latest.session_name.is_empty() {
            spans.push(Span::raw(format!("  session {}", latest.session_name)));
        }
        spans.push(Span::raw(format!("  {}", format_stats(&latest.system_stats))));
    }
    if let Some(seen) = entity.last_seen {
        spans.push(Span::raw(format!(
            "  seen {}",
            format_time_since(seen, Utc::now())
        )));
    }
    Line::from(spans)
}

fn draw_panes(frame: &mut Frame, app: &UiApp, panes: &[&PaneTranscript], area: Rect) {
    let count = panes.len().max(1) as u32;
    let constraints: Vec<Constraint> = panes.iter().map(|_| Constraint::Ratio(1, count)).collect();
    let areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    for (pane, pane_area) in panes.iter().zip(areas.iter()) {
        let title = if pane.active {
            format!(" {} * ", pane.key.pane_id)
        } else {
            format!(" {} ", pane.key.pane_id)
        };
        let block = Block::default()
            .borders(Borders::TOP)
            .title(title)
            .border_style(Style::default().fg(Color::DarkGray));

        let inner_height = pane_area.height.saturating_sub(1);
        let scroll_y = app
            .view
            .scroll_row(count_lines_u16(&pane.merged), inner_height);
        let text = ansi_to_tui::IntoText::into_text(&pane.merged)
            .unwrap_or_else(|_| Text::raw(pane.merged.clone()));

        frame.render_widget(
            Paragraph::new(text).block(block).scroll((scroll_y, 0)),
            *pane_area,
        );
    }
}

fn draw_status_bar(frame: &mut Frame, app: &UiApp, area: Rect) {
    let snapshot = &app.snapshot;
    let (indicator, bg) = if snapshot.connection.connected {
        ("● connected", Color::Green)
    } else {
        ("○ disconnected", Color::Red)
    };

    let help_text = match app.mode {
        Mode::Browse => "j/k: select  Tab: window  Enter: zoom  r: reconnect  q: quit",
        Mode::Zoom => "j/k: scroll  Tab: window  Esc: back  r: reconnect  q: quit",
    };

    let mut status = format!(" {indicator} | {}", snapshot.sync.describe(Utc::now()));
    if snapshot.dropped_frames > 0 {
        status.push_str(&format!(" | dropped {}", snapshot.dropped_frames));
    }
    if let Some(msg) = &app.status_message {
        status.push_str(&format!(" | {msg}"));
    }
    status.push_str(&format!(" | {help_text}"));

    let bar = Paragraph::new(Line::from(Span::styled(
        status,
        Style::default()
            .fg(Color::Black)
            .bg(bg)
            .add_modifier(Modifier::BOLD),
    )));
    frame.render_widget(bar, area);
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use ratatui::{backend::TestBackend, Terminal};

    use crate::app::{ConnectionStatus, Mode, StateSnapshot, UiApp};
    use crate::models::{Entity, ServerData, ServerState, SystemStats, TmuxPane};
    use crate::sync::{SyncError, SyncStatus};
    use crate::transcript::accumulate;

    fn buffer_to_string(terminal: &Terminal<TestBackend>) -> String {
        let buf = terminal.backend().buffer();
        let mut output = String::new();
        for y in 0..buf.area.height {
            for x in 0..buf.area.width {
                let cell = &buf[(x, y)];
                output.push_str(cell.symbol());
            }
            let trimmed = output.trim_end();
            output = trimmed.to_string();
            output.push('\n');
        }
        output
    }

    fn render(app: &UiApp) -> String {
        let backend = TestBackend::new(100, 24);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|f| super::draw(f, app)).unwrap();
        buffer_to_string(&terminal)
    }

    fn entity(name: &str, cpu: f64, chunks: &[&str]) -> Entity {
        let data_history = chunks
            .iter()
            .map(|c| ServerData {
                session_name: "main".to_string(),
                system_stats: SystemStats {
                    cpu_percent: cpu,
                    ..SystemStats::default()
                },
                tmux_panes: vec![TmuxPane {
                    id: "%1".to_string(),
                    window_id: "@1".to_string(),
                    content: c.to_string(),
                    active: true,
                    ..TmuxPane::default()
                }],
                ..ServerData::default()
            })
            .collect();
        Entity {
            name: name.to_string(),
            state: ServerState::Active,
            data_history,
            ..Entity::default()
        }
    }

    fn app_with(servers: Vec<(&str, Entity)>, connected: bool, sync: SyncStatus) -> UiApp {
        let replica: BTreeMap<String, Entity> = servers
            .into_iter()
            .map(|(id, e)| (id.to_string(), e))
            .collect();
        let transcripts = replica
            .iter()
            .map(|(id, e)| (id.clone(), Arc::new(accumulate(&e.data_history))))
            .collect();
        let mut app = UiApp::new_test();
        app.apply_snapshot(Arc::new(StateSnapshot {
            replica: Arc::new(replica),
            transcripts: Arc::new(transcripts),
            connection: ConnectionStatus {
                connected,
                ..ConnectionStatus::default()
            },
            sync,
            dropped_frames: 0,
        }));
        app
    }

    #[test]
    fn empty_disconnected_dashboard() {
        let app = app_with(vec![], false, SyncStatus::default());
        let output = render(&app);
        assert!(output.contains("Servers (0)"));
        assert!(output.contains("Not connected"));
        assert!(output.contains("disconnected"));
        assert!(output.contains("waiting for first sync"));
    }

    #[test]
    fn lists_servers_and_selected_transcript() {
        let app = app_with(
            vec![
                ("web-1", entity("web-1", 12.0, &["$ ls", "$ ls", "src"])),
                ("db-1", entity("db-1", 91.0, &["psql"])),
            ],
            true,
            SyncStatus::default(),
        );
        let output = render(&app);
        assert!(output.contains("Servers (2)"));
        assert!(output.contains("web-1"));
        assert!(output.contains("C 91%"));
        // BTreeMap order puts db-1 first, so it is selected.
        assert!(output.contains(">> ● db-1"));
        assert!(output.contains("psql"));
        assert!(output.contains("@1"));
        assert!(output.contains("● connected"));
    }

    #[test]
    fn transcript_shows_deduplicated_history() {
        let app = app_with(
            vec![("a", entity("a", 1.0, &["first", "first", "second"]))],
            true,
            SyncStatus::default(),
        );
        let output = render(&app);
        assert_eq!(output.matches("first").count(), 1);
        assert!(output.contains("second"));
    }

    #[test]
    fn server_without_panes_says_so() {
        let bare = Entity {
            name: "bare".to_string(),
            ..Entity::default()
        };
        let app = app_with(vec![("bare", bare)], true, SyncStatus::default());
        assert!(render(&app).contains("No tmux content"));
    }

    #[test]
    fn status_bar_shows_sync_progress_and_errors() {
        let syncing = SyncStatus {
            running: true,
            received: 2,
            expected: 5,
            ..SyncStatus::default()
        };
        let app = app_with(vec![], true, syncing);
        assert!(render(&app).contains("Syncing 2/5"));

        let failed = SyncStatus {
            error: Some(SyncError::CountMismatch {
                received: 1,
                expected: 2,
            }),
            ..SyncStatus::default()
        };
        let app = app_with(vec![], true, failed);
        assert!(render(&app).contains("Sync incomplete: received 1/2 servers"));
    }

    #[test]
    fn zoom_hides_server_list() {
        let mut app = app_with(
            vec![("a", entity("a", 1.0, &["zoomed"]))],
            true,
            SyncStatus::default(),
        );
        app.mode = Mode::Zoom;
        let output = render(&app);
        assert!(!output.contains("Servers ("));
        assert!(output.contains("zoomed"));
        assert!(output.contains("Esc: back"));
    }

    #[test]
    fn tiny_terminal_does_not_panic() {
        let app = app_with(
            vec![("a", entity("a", 1.0, &["x"]))],
            true,
            SyncStatus::default(),
        );
        let backend = TestBackend::new(10, 3);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|f| super::draw(f, &app)).unwrap();
    }
}
