//! Terminal input merged with the dashboard's two timers.
//!
//! `Poll` fires often and pulls the latest backend snapshot. `Clock` fires
//! about once a second so relative times in the status line ("12s ago") keep
//! moving while the feed is quiet.

use crossterm::event::{Event as CrosstermEvent, EventStream, KeyEvent, KeyEventKind};
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Bounded event queue capacity.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum Event {
    /// A key press. Releases and repeats are not forwarded.
    Key(KeyEvent),
    Resize,
    Poll,
    Clock,
}

/// Periods of the two timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub poll: Duration,
    pub clock: Duration,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(50),
            clock: Duration::from_secs(1),
        }
    }
}

pub struct EventHandler {
    rx: mpsc::Receiver<Event>,
    _task: tokio::task::JoinHandle<()>,
}

impl EventHandler {
    pub fn new(cadence: Cadence) -> Self {
        Self::from_stream(EventStream::new(), cadence)
    }

    /// Drive the handler from any crossterm-shaped input stream.
    pub fn from_stream<S>(input: S, cadence: Cadence) -> Self
    where
        S: Stream<Item = Result<CrosstermEvent, std::io::Error>> + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let task = tokio::spawn(pump(input, cadence, tx));
        Self { rx, _task: task }
    }

    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// First tick lands one full period out so pending input wins the race.
fn timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

async fn pump<S>(mut input: S, cadence: Cadence, tx: mpsc::Sender<Event>)
where
    S: Stream<Item = Result<CrosstermEvent, std::io::Error>> + Unpin,
{
    let mut poll = timer(cadence.poll);
    let mut clock = timer(cadence.clock);

    loop {
        let event = tokio::select! {
            _ = poll.tick() => Event::Poll,
            _ = clock.tick() => Event::Clock,
            next = input.next() => match next {
                Some(Ok(raw)) => match translate(raw) {
                    Some(event) => event,
                    None => continue,
                },
                Some(Err(_)) | None => break,
            },
        };

        let open = match event {
            // Timer events are dropped rather than queued behind a slow UI.
            Event::Poll | Event::Clock => !matches!(
                tx.try_send(event),
                Err(mpsc::error::TrySendError::Closed(_))
            ),
            _ => tx.send(event).await.is_ok(),
        };
        if !open {
            break;
        }
    }
}

fn translate(raw: CrosstermEvent) -> Option<Event> {
    match raw {
        CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => Some(Event::Key(key)),
        CrosstermEvent::Resize(_, _) => Some(Event::Resize),
        _ => None,
    }
}
