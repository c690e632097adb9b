//! Folds a server's snapshot history into per-pane transcripts.
//!
//! Each pane keeps the distinct chunks it has shown over time. A chunk equal
//! to the previous one is an idle re-broadcast and is not stored again, so a
//! quiet pane does not grow.

use std::collections::HashMap;

use crate::models::ServerData;

/// Panes are unique per (window, pane) within one server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaneKey {
    pub window_id: String,
    pub pane_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneTranscript {
    pub key: PaneKey,
    pub session_id: String,
    pub active: bool,
    /// Raw content of the most recent sighting.
    pub latest: String,
    /// Distinct chunks in arrival order; never two equal neighbours.
    pub history: Vec<String>,
    /// `history` joined with newlines, ready for display.
    pub merged: String,
}

impl PaneTranscript {
    const SEPARATOR: &'static str = "\n";

    fn seed(key: PaneKey, session_id: &str, active: bool, content: &str) -> Self {
        Self {
            key,
            session_id: session_id.to_string(),
            active,
            latest: content.to_string(),
            history: vec![content.to_string()],
            merged: content.to_string(),
        }
    }

    /// Append `content` unless it is empty or repeats the last chunk.
    /// Returns true when the transcript grew.
    fn push_chunk(&mut self, content: &str) -> bool {
        self.latest = content.to_string();
        if content.is_empty() || self.history.last().map(String::as_str) == Some(content) {
            return false;
        }
        self.history.push(content.to_string());
        self.merged = self.history.join(Self::SEPARATOR);
        true
    }
}

/// Accumulate pane transcripts from `history` (oldest snapshot first).
///
/// Output order is first appearance. Re-running over the same history yields
/// identical transcripts.
pub fn accumulate(history: &[ServerData]) -> Vec<PaneTranscript> {
    let mut panes: Vec<PaneTranscript> = Vec::new();
    let mut index: HashMap<PaneKey, usize> = HashMap::new();

    for snapshot in history {
        for pane in &snapshot.tmux_panes {
            let key = PaneKey {
                window_id: pane.window_id.clone(),
                pane_id: pane.id.clone(),
            };
            match index.get(&key) {
                Some(&slot) => {
                    let transcript = &mut panes[slot];
                    transcript.active = pane.active;
                    transcript.session_id.clone_from(&pane.session_id);
                    transcript.push_chunk(&pane.content);
                }
                None => {
                    index.insert(key.clone(), panes.len());
                    panes.push(PaneTranscript::seed(
                        key,
                        &pane.session_id,
                        pane.active,
                        &pane.content,
                    ));
                }
            }
        }
    }

    panes
}

/// Panes of one tmux window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowGroup<'a> {
    pub window_id: &'a str,
    pub panes: Vec<&'a PaneTranscript>,
}

/// Group panes by window, windows ordered by first appearance.
pub fn group_windows(panes: &[PaneTranscript]) -> Vec<WindowGroup<'_>> {
    let mut groups: Vec<WindowGroup<'_>> = Vec::new();
    for pane in panes {
        let window_id = pane.key.window_id.as_str();
        match groups.iter_mut().find(|g| g.window_id == window_id) {
            Some(group) => group.panes.push(pane),
            None => groups.push(WindowGroup {
                window_id,
                panes: vec![pane],
            }),
        }
    }
    groups
}
