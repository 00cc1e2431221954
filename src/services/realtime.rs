use tokio::sync::broadcast;

use crate::{constants::WORLD_HUB_CAPACITY, models::RealtimeEvent};

/// In-process fan-out of world events to realtime subscribers.
/// Delivery is at-most-once and publishing never blocks or fails.
#[derive(Clone)]
pub struct WorldHub {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl Default for WorldHub {
    fn default() -> Self {
        Self::new(WORLD_HUB_CAPACITY)
    }
}

impl WorldHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish(&self, event: RealtimeEvent) {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receivers) => {
                tracing::debug!("Broadcast {} to {} subscribers", event_type, receivers)
            }
            Err(_) => tracing::debug!("Broadcast {} dropped: no subscribers", event_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn season(n: i64) -> RealtimeEvent {
        RealtimeEvent::SeasonChange {
            season: n,
            phase: "dawn".to_string(),
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let hub = WorldHub::default();
        hub.publish(season(1));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let hub = WorldHub::default();
        let mut rx = hub.subscribe();
        hub.publish(season(3));
        match rx.recv().await.expect("event") {
            RealtimeEvent::SeasonChange { season, .. } => assert_eq!(season, 3),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() {
        let hub = WorldHub::new(2);
        let mut rx = hub.subscribe();
        for n in 1..=4 {
            hub.publish(season(n));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        match rx.recv().await.expect("event after lag") {
            RealtimeEvent::SeasonChange { season, .. } => assert_eq!(season, 3),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
