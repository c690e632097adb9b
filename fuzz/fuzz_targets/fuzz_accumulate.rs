#![no_main]
use fleetview::models::ServerData;
use fleetview::transcript::{accumulate, group_windows};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(history) = serde_json::from_slice::<Vec<ServerData>>(data) else {
        return;
    };
    let panes = accumulate(&history);
    for pane in &panes {
        assert!(pane.history.windows(2).all(|w| w[0] != w[1]));
    }
    let _ = group_windows(&panes);
});
