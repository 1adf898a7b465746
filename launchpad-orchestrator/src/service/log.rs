//! Log Service
//!
//! Fans out live `LogEvent`s from running pipelines to any number of
//! observers. Each run gets its own bounded broadcast channel; an observer
//! that falls behind loses the oldest events instead of slowing the pipeline.

use launchpad_core::domain::log::LogEvent;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Per-run live event channels
pub struct LogBroadcaster {
    capacity: usize,
    channels: Mutex<HashMap<Uuid, broadcast::Sender<LogEvent>>>,
}

/// What an observer receives next
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(LogEvent),
    /// The observer fell behind and this many events were dropped for it
    Lagged(u64),
}

/// An observer's view of one run's events
pub struct LogSubscription {
    rx: broadcast::Receiver<LogEvent>,
}

impl LogSubscription {
    /// Next event, or `None` once the run's channel is closed and drained
    pub async fn next(&mut self) -> Option<Delivery> {
        match self.rx.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Some(Delivery::Lagged(skipped)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

impl LogBroadcaster {
    /// Creates a broadcaster buffering `capacity` events per observer
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Opens the channel for a run; events published before this are dropped
    pub fn open(&self, run_id: Uuid) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
    }

    /// Publishes an event to every current observer of its run
    ///
    /// Never blocks. Returns how many observers the event reached.
    pub fn publish(&self, event: LogEvent) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        match channels.get(&event.run_id) {
            // No receivers is not an error: nobody is watching
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribes to events published from now on
    ///
    /// Returns `None` when the run has no open channel (never started, or
    /// already finished).
    pub fn subscribe(&self, run_id: Uuid) -> Option<LogSubscription> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(&run_id)
            .map(|tx| LogSubscription { rx: tx.subscribe() })
    }

    /// Closes a run's channel; observers drain what is buffered, then end
    pub fn close(&self, run_id: Uuid) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if channels.remove(&run_id).is_some() {
            tracing::debug!("Closed event channel for run {}", run_id);
        }
    }

    pub fn is_open(&self, run_id: Uuid) -> bool {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.contains_key(&run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_core::domain::log::{LogEventKind, LogLevel, OutputStream};
    use launchpad_core::domain::run::RunStatus;
    use launchpad_core::domain::stage::StageName;

    fn output(run_id: Uuid, text: &str) -> LogEvent {
        LogEvent::output(run_id, StageName::Git, OutputStream::Stdout, text)
    }

    #[tokio::test]
    async fn test_every_observer_receives_events_in_order() {
        let broadcaster = LogBroadcaster::new(16);
        let run_id = Uuid::new_v4();
        broadcaster.open(run_id);

        let mut first = broadcaster.subscribe(run_id).unwrap();
        let mut second = broadcaster.subscribe(run_id).unwrap();

        assert_eq!(broadcaster.publish(output(run_id, "a")), 2);
        assert_eq!(broadcaster.publish(output(run_id, "b")), 2);
        broadcaster.close(run_id);

        for sub in [&mut first, &mut second] {
            let mut texts = Vec::new();
            while let Some(Delivery::Event(event)) = sub.next().await {
                if let LogEventKind::Output { text, .. } = event.kind {
                    texts.push(text);
                }
            }
            assert_eq!(texts, vec!["a", "b"]);
        }
    }

    #[tokio::test]
    async fn test_late_observer_sees_only_new_events() {
        let broadcaster = LogBroadcaster::new(16);
        let run_id = Uuid::new_v4();
        broadcaster.open(run_id);

        broadcaster.publish(output(run_id, "early"));
        let mut late = broadcaster.subscribe(run_id).unwrap();
        let terminal = LogEvent::run_transition(run_id, RunStatus::Succeeded);
        broadcaster.publish(terminal.clone());
        broadcaster.close(run_id);

        assert_eq!(late.next().await, Some(Delivery::Event(terminal)));
        assert_eq!(late.next().await, None);
    }

    #[tokio::test]
    async fn test_slow_observer_is_told_it_lagged() {
        let broadcaster = LogBroadcaster::new(4);
        let run_id = Uuid::new_v4();
        broadcaster.open(run_id);
        let mut slow = broadcaster.subscribe(run_id).unwrap();

        for i in 0..10 {
            broadcaster.publish(output(run_id, &i.to_string()));
        }

        assert_eq!(slow.next().await, Some(Delivery::Lagged(6)));
        match slow.next().await {
            Some(Delivery::Event(event)) => assert_eq!(event.kind, output(run_id, "6").kind),
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_observers_or_channel() {
        let broadcaster = LogBroadcaster::new(4);
        let run_id = Uuid::new_v4();

        let note = LogEvent::message(run_id, LogLevel::Info, None, "nobody listens");
        assert_eq!(broadcaster.publish(note.clone()), 0);

        broadcaster.open(run_id);
        assert_eq!(broadcaster.publish(note), 0);
        assert!(broadcaster.subscribe(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_closed_run_cannot_be_subscribed() {
        let broadcaster = LogBroadcaster::new(4);
        let run_id = Uuid::new_v4();
        broadcaster.open(run_id);
        assert!(broadcaster.is_open(run_id));

        broadcaster.close(run_id);
        assert!(!broadcaster.is_open(run_id));
        assert!(broadcaster.subscribe(run_id).is_none());
    }
}
