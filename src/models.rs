use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Liveness of a monitored server as judged by the central server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Active,
    Stale,
    Dead,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ServerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerState::Active => "active",
            ServerState::Stale => "stale",
            ServerState::Dead => "dead",
            ServerState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monitors written in Go encode an empty slice as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemStats {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskStats {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemStats {
    pub timestamp: Option<DateTime<Utc>>,
    pub cpu_percent: f64,
    pub memory: MemStats,
    pub disk: DiskStats,
}

impl SystemStats {
    const HOT_CPU_PERCENT: f64 = 80.0;
    const HOT_MEMORY_PERCENT: f64 = 60.0;
    const HOT_DISK_PERCENT: f64 = 95.0;

    /// True when any resource is above its warning threshold.
    pub fn is_hot(&self) -> bool {
        self.cpu_percent > Self::HOT_CPU_PERCENT
            || self.memory.percent > Self::HOT_MEMORY_PERCENT
            || self.disk.percent > Self::HOT_DISK_PERCENT
    }
}

/// One terminal pane as captured by the remote monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TmuxPane {
    pub id: String,
    pub window_id: String,
    pub session_id: String,
    pub content: String,
    pub active: bool,
}

/// A single point-in-time snapshot of a server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerData {
    pub server_name: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub system_stats: SystemStats,
    #[serde(deserialize_with = "null_as_default")]
    pub tmux_panes: Vec<TmuxPane>,
    pub session_name: String,
}

/// A monitored remote node and its bounded snapshot history (oldest first).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entity {
    pub name: String,
    pub state: ServerState,
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "null_as_default")]
    pub data_history: Vec<ServerData>,
}

impl Entity {
    /// Most recent snapshot, if any history has been received.
    pub fn latest(&self) -> Option<&ServerData> {
        self.data_history.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_decodes_server_payload() {
        let raw = r#"{
            "name": "web-1",
            "state": "stale",
            "last_seen": "2024-05-01T12:00:00Z",
            "data_history": [{
                "server_name": "web-1",
                "timestamp": "2024-05-01T12:00:00Z",
                "system_stats": {
                    "timestamp": "2024-05-01T12:00:00Z",
                    "cpu_percent": 12.5,
                    "memory": {"total": 100, "available": 40, "used": 60, "percent": 60.0},
                    "disk": {"total": 10, "free": 5, "used": 5, "percent": 50.0}
                },
                "tmux_panes": [{"id": "%1", "window_id": "@1", "session_id": "$0", "content": "hi", "active": true}],
                "session_name": "main"
            }]
        }"#;
        let entity: Entity = serde_json::from_str(raw).unwrap();
        assert_eq!(entity.name, "web-1");
        assert_eq!(entity.state, ServerState::Stale);
        let latest = entity.latest().unwrap();
        assert_eq!(latest.session_name, "main");
        assert_eq!(latest.tmux_panes[0].content, "hi");
        assert_eq!(latest.system_stats.memory.used, 60);
    }

    #[test]
    fn entity_tolerates_missing_fields() {
        let entity: Entity = serde_json::from_str(r#"{"state":"dead"}"#).unwrap();
        assert_eq!(entity.state, ServerState::Dead);
        assert!(entity.name.is_empty());
        assert!(entity.latest().is_none());
    }

    #[test]
    fn null_sequences_decode_as_empty() {
        let entity: Entity = serde_json::from_str(
            r#"{"name":"a","state":"active","data_history":[{"server_name":"a","tmux_panes":null}]}"#,
        )
        .unwrap();
        let latest = entity.latest().unwrap();
        assert_eq!(latest.server_name, "a");
        assert!(latest.tmux_panes.is_empty());

        let entity: Entity =
            serde_json::from_str(r#"{"name":"b","data_history":null}"#).unwrap();
        assert!(entity.data_history.is_empty());
    }

    #[test]
    fn unrecognized_state_is_unknown() {
        let entity: Entity = serde_json::from_str(r#"{"state":"rebooting"}"#).unwrap();
        assert_eq!(entity.state, ServerState::Unknown);
    }

    #[test]
    fn hot_thresholds() {
        let mut stats = SystemStats::default();
        assert!(!stats.is_hot());
        stats.memory.percent = 60.5;
        assert!(stats.is_hot());
        stats.memory.percent = 10.0;
        stats.disk.percent = 95.0;
        assert!(!stats.is_hot());
        stats.cpu_percent = 81.0;
        assert!(stats.is_hot());
    }
}
