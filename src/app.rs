use std::collections::BTreeMap;
use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::models::Entity;
use crate::sync::{Replica, SyncStatus};
use crate::transcript::{group_windows, PaneTranscript, WindowGroup};
use crate::ui::state::TranscriptView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Browse,
    /// Detail pane fills the screen.
    Zoom,
}

/// Command from UI → Backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCommand {
    /// Drop the current connection and go through the normal reconnect path.
    Reconnect,
    Quit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// Bumped on every successful connect.
    pub epoch: u64,
    pub endpoint: String,
    pub last_error: Option<String>,
}

/// Pane transcripts per server id, rebuilt only for servers that changed.
pub type TranscriptMap = Arc<BTreeMap<String, Arc<Vec<PaneTranscript>>>>;

/// Snapshot of backend state sent to UI for rendering.
/// Uses latest-value semantics via `watch` channel.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub replica: Replica,
    pub transcripts: TranscriptMap,
    pub connection: ConnectionStatus,
    pub sync: SyncStatus,
    pub dropped_frames: u64,
}

impl StateSnapshot {
    pub fn replica(&self) -> Replica {
        Arc::clone(&self.replica)
    }

    pub fn connection_status(&self) -> &ConnectionStatus {
        &self.connection
    }

    pub fn sync_status(&self) -> &SyncStatus {
        &self.sync
    }
}

/// UI-only application state, separated from I/O.
/// Receives state snapshots from the Backend actor via channels.
pub struct UiApp {
    pub snapshot: Arc<StateSnapshot>,

    // Local UI state
    pub selected: usize,
    pub window_index: usize,
    pub mode: Mode,
    pub view: TranscriptView,
    pub should_quit: bool,
    pub needs_redraw: bool,
    pub status_message: Option<String>,
    seen_epoch: u64,

    // Channels
    cmd_tx: tokio::sync::mpsc::Sender<BackendCommand>,
    state_rx: tokio::sync::watch::Receiver<Arc<StateSnapshot>>,
}

impl UiApp {
    pub fn new(
        state_rx: tokio::sync::watch::Receiver<Arc<StateSnapshot>>,
        cmd_tx: tokio::sync::mpsc::Sender<BackendCommand>,
    ) -> Self {
        let snapshot = Arc::clone(&*state_rx.borrow());
        Self {
            seen_epoch: snapshot.connection.epoch,
            snapshot,
            selected: 0,
            window_index: 0,
            mode: Mode::Browse,
            view: TranscriptView::new(),
            should_quit: false,
            needs_redraw: true,
            status_message: None,
            cmd_tx,
            state_rx,
        }
    }

    /// Test constructor with dummy channels.
    #[cfg(test)]
    pub fn new_test() -> Self {
        let (cmd_tx, _cmd_rx) = tokio::sync::mpsc::channel(1);
        let (_state_tx, state_rx) = tokio::sync::watch::channel(Arc::new(StateSnapshot::default()));
        Self::new(state_rx, cmd_tx)
    }

    /// Poll for new state from the backend. Call once per tick.
    pub fn poll_state(&mut self) {
        if self.state_rx.has_changed().unwrap_or(false) {
            let snapshot = Arc::clone(&*self.state_rx.borrow_and_update());
            self.apply_snapshot(snapshot);
        }
    }

    /// Adopt a new snapshot, keeping the selection on the same server id.
    /// A new connection epoch resets all local view state.
    pub fn apply_snapshot(&mut self, snapshot: Arc<StateSnapshot>) {
        let previous_id = self.selected_id().map(str::to_owned);
        let epoch = snapshot.connection.epoch;
        self.snapshot = snapshot;
        self.needs_redraw = true;

        if epoch != self.seen_epoch {
            self.seen_epoch = epoch;
            self.reset_view();
            self.status_message = None;
            return;
        }

        match previous_id.and_then(|id| self.snapshot.replica.keys().position(|k| *k == id)) {
            Some(index) => self.selected = index,
            None => self.clamp_selection(),
        }
        self.clamp_window();
    }

    fn reset_view(&mut self) {
        self.selected = 0;
        self.window_index = 0;
        self.mode = Mode::Browse;
        self.view.reset();
    }

    fn clamp_selection(&mut self) {
        let len = self.snapshot.replica.len();
        if self.selected >= len {
            self.selected = len.saturating_sub(1);
        }
    }

    fn clamp_window(&mut self) {
        let windows = self.windows().len();
        if self.window_index >= windows {
            self.window_index = windows.saturating_sub(1);
        }
    }

    pub fn server_count(&self) -> usize {
        self.snapshot.replica.len()
    }

    pub fn servers(&self) -> impl Iterator<Item = (&String, &Entity)> {
        self.snapshot.replica.iter()
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.snapshot
            .replica
            .keys()
            .nth(self.selected)
            .map(String::as_str)
    }

    pub fn selected_entity(&self) -> Option<&Entity> {
        self.snapshot.replica.values().nth(self.selected)
    }

    pub fn selected_transcripts(&self) -> &[PaneTranscript] {
        self.selected_id()
            .and_then(|id| self.snapshot.transcripts.get(id))
            .map(|panes| panes.as_slice())
            .unwrap_or(&[])
    }

    pub fn windows(&self) -> Vec<WindowGroup<'_>> {
        group_windows(self.selected_transcripts())
    }

    fn queue_command(&mut self, command: BackendCommand) {
        match self.cmd_tx.try_send(command) {
            Ok(()) => {}
            Err(tokio::sync::mpsc::error::TrySendError::Full(command)) => {
                let tx = self.cmd_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(command).await;
                });
            }
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                self.status_message = Some("Backend disconnected".to_string());
                self.should_quit = true;
            }
        }
    }

    /// Handle a key event. Synchronous; I/O goes out as a BackendCommand.
    pub fn handle_key(&mut self, key: KeyEvent) {
        self.needs_redraw = true;
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.quit();
            return;
        }
        match (self.mode, key.code) {
            (_, KeyCode::Char('q')) => self.quit(),
            (_, KeyCode::Char('r')) => {
                self.status_message = Some("Reconnecting...".to_string());
                self.queue_command(BackendCommand::Reconnect);
            }
            (Mode::Browse, KeyCode::Char('j') | KeyCode::Down) => self.select_next(),
            (Mode::Browse, KeyCode::Char('k') | KeyCode::Up) => self.select_prev(),
            (Mode::Browse, KeyCode::Enter) => {
                if self.selected_entity().is_some() {
                    self.mode = Mode::Zoom;
                }
            }
            (Mode::Zoom, KeyCode::Esc | KeyCode::Enter) => self.mode = Mode::Browse,
            (Mode::Zoom, KeyCode::Char('k') | KeyCode::Up) => self.view.scroll_up(),
            (Mode::Zoom, KeyCode::Char('j') | KeyCode::Down) => self.view.scroll_down(),
            (_, KeyCode::Tab | KeyCode::Char('l') | KeyCode::Right) => self.next_window(),
            (_, KeyCode::BackTab | KeyCode::Char('h') | KeyCode::Left) => self.prev_window(),
            (_, KeyCode::PageUp) => self.view.scroll_page_up(),
            (_, KeyCode::PageDown) => self.view.scroll_page_down(),
            (_, KeyCode::Char('g') | KeyCode::Home) => self.view.scroll_to_top(),
            (_, KeyCode::Char('G') | KeyCode::End) => self.view.scroll_to_bottom(),
            _ => {}
        }
    }

    fn quit(&mut self) {
        self.queue_command(BackendCommand::Quit);
        self.should_quit = true;
    }

    pub fn select_next(&mut self) {
        let len = self.server_count();
        if len > 0 {
            self.selected = (self.selected + 1) % len;
            self.on_selection_change();
        }
    }

    pub fn select_prev(&mut self) {
        let len = self.server_count();
        if len > 0 {
            self.selected = if self.selected == 0 {
                len - 1
            } else {
                self.selected - 1
            };
            self.on_selection_change();
        }
    }

    fn on_selection_change(&mut self) {
        self.window_index = 0;
        self.view.reset();
    }

    pub fn next_window(&mut self) {
        let len = self.windows().len();
        if len > 0 {
            self.window_index = (self.window_index + 1) % len;
            self.view.reset();
        }
    }

    pub fn prev_window(&mut self) {
        let len = self.windows().len();
        if len > 0 {
            self.window_index = (self.window_index + len - 1) % len;
            self.view.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ServerData, ServerState, TmuxPane};
    use crate::transcript::accumulate;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn entity_with_windows(name: &str, windows: &[&str]) -> Entity {
        let panes = windows
            .iter()
            .map(|w| TmuxPane {
                id: "%1".to_string(),
                window_id: w.to_string(),
                content: format!("{name} {w}"),
                ..TmuxPane::default()
            })
            .collect();
        Entity {
            name: name.to_string(),
            state: ServerState::Active,
            data_history: vec![ServerData {
                tmux_panes: panes,
                ..ServerData::default()
            }],
            ..Entity::default()
        }
    }

    fn snapshot(ids: &[&str], epoch: u64) -> Arc<StateSnapshot> {
        let replica: BTreeMap<String, Entity> = ids
            .iter()
            .map(|id| (id.to_string(), entity_with_windows(id, &["@1", "@2"])))
            .collect();
        let transcripts = replica
            .iter()
            .map(|(id, e)| (id.clone(), Arc::new(accumulate(&e.data_history))))
            .collect();
        Arc::new(StateSnapshot {
            replica: Arc::new(replica),
            transcripts: Arc::new(transcripts),
            connection: ConnectionStatus {
                connected: true,
                epoch,
                ..ConnectionStatus::default()
            },
            ..StateSnapshot::default()
        })
    }

    #[test]
    fn navigation_wraps() {
        let mut app = UiApp::new_test();
        app.apply_snapshot(snapshot(&["a", "b", "c"], 0));
        app.handle_key(key(KeyCode::Char('k')));
        assert_eq!(app.selected_id(), Some("c"));
        app.handle_key(key(KeyCode::Char('j')));
        assert_eq!(app.selected_id(), Some("a"));
    }

    #[test]
    fn navigation_on_empty_replica_is_noop() {
        let mut app = UiApp::new_test();
        app.handle_key(key(KeyCode::Down));
        app.handle_key(key(KeyCode::Tab));
        assert_eq!(app.selected, 0);
        assert_eq!(app.window_index, 0);
        assert!(app.selected_transcripts().is_empty());
    }

    #[test]
    fn selection_follows_server_id() {
        let mut app = UiApp::new_test();
        app.apply_snapshot(snapshot(&["b", "c"], 0));
        app.select_next();
        assert_eq!(app.selected_id(), Some("c"));

        // "a" sorts before "c", shifting its index.
        app.apply_snapshot(snapshot(&["a", "b", "c"], 0));
        assert_eq!(app.selected_id(), Some("c"));
        assert_eq!(app.selected, 2);
    }

    #[test]
    fn removed_selection_is_clamped() {
        let mut app = UiApp::new_test();
        app.apply_snapshot(snapshot(&["a", "b", "c"], 0));
        app.selected = 2;
        app.apply_snapshot(snapshot(&["a"], 0));
        assert_eq!(app.selected_id(), Some("a"));
    }

    #[test]
    fn new_epoch_resets_view() {
        let mut app = UiApp::new_test();
        app.apply_snapshot(snapshot(&["a", "b"], 1));
        app.select_next();
        app.next_window();
        app.handle_key(key(KeyCode::Enter));
        app.view.scroll_page_up();
        assert_eq!(app.mode, Mode::Zoom);

        app.apply_snapshot(snapshot(&["a", "b"], 2));
        assert_eq!(app.selected, 0);
        assert_eq!(app.window_index, 0);
        assert_eq!(app.mode, Mode::Browse);
        assert_eq!(app.view.scroll_offset, 0);
    }

    #[test]
    fn windows_cycle_both_ways() {
        let mut app = UiApp::new_test();
        app.apply_snapshot(snapshot(&["a"], 0));
        assert_eq!(app.windows().len(), 2);
        app.handle_key(key(KeyCode::BackTab));
        assert_eq!(app.window_index, 1);
        app.handle_key(key(KeyCode::Tab));
        assert_eq!(app.window_index, 0);
    }

    #[test]
    fn zoom_requires_selection_and_esc_leaves() {
        let mut app = UiApp::new_test();
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.mode, Mode::Browse);

        app.apply_snapshot(snapshot(&["a"], 0));
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.mode, Mode::Zoom);
        app.handle_key(key(KeyCode::Char('k')));
        assert_eq!(app.view.scroll_offset, 3);
        app.handle_key(key(KeyCode::Esc));
        assert_eq!(app.mode, Mode::Browse);
    }

    #[tokio::test]
    async fn quit_sends_command() {
        let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::channel(4);
        let (_state_tx, state_rx) = tokio::sync::watch::channel(Arc::new(StateSnapshot::default()));
        let mut app = UiApp::new(state_rx, cmd_tx);
        app.handle_key(key(KeyCode::Char('q')));
        assert!(app.should_quit);
        assert_eq!(cmd_rx.recv().await, Some(BackendCommand::Quit));
    }

    #[tokio::test]
    async fn reconnect_key_sends_command() {
        let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::channel(4);
        let (_state_tx, state_rx) = tokio::sync::watch::channel(Arc::new(StateSnapshot::default()));
        let mut app = UiApp::new(state_rx, cmd_tx);
        app.handle_key(key(KeyCode::Char('r')));
        assert!(!app.should_quit);
        assert_eq!(app.status_message.as_deref(), Some("Reconnecting..."));
        assert_eq!(cmd_rx.recv().await, Some(BackendCommand::Reconnect));
    }

    #[test]
    fn closed_backend_forces_quit() {
        let mut app = UiApp::new_test();
        app.handle_key(key(KeyCode::Char('r')));
        assert!(app.should_quit);
        assert_eq!(app.status_message.as_deref(), Some("Backend disconnected"));
    }

    #[test]
    fn poll_state_picks_up_new_snapshot() {
        let (cmd_tx, _cmd_rx) = tokio::sync::mpsc::channel(1);
        let (state_tx, state_rx) = tokio::sync::watch::channel(Arc::new(StateSnapshot::default()));
        let mut app = UiApp::new(state_rx, cmd_tx);
        app.needs_redraw = false;
        app.poll_state();
        assert!(!app.needs_redraw);

        state_tx.send_replace(snapshot(&["a"], 0));
        app.poll_state();
        assert!(app.needs_redraw);
        assert_eq!(app.server_count(), 1);
    }
}
