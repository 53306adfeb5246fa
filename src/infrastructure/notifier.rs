use crate::domain::events::LedgerEvent;
use crate::domain::ports::EventNotifier;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl EventNotifier for TracingNotifier {
    fn publish(&self, event: LedgerEvent) {
        info!(event = event.name(), wallet_id = %event.wallet_id(), "ledger event");
    }
}

/// Fans events out to any number of in-process subscribers.
///
/// Slow subscribers lose the oldest events rather than blocking the ledger.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<LedgerEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }
}

impl EventNotifier for BroadcastNotifier {
    fn publish(&self, event: LedgerEvent) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            debug!(event = name, "no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wallet::{Balances, WalletId};

    fn event() -> LedgerEvent {
        LedgerEvent::BalanceChanged {
            wallet_id: WalletId::new("alice").unwrap(),
            balances: Balances::default(),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_events() {
        let notifier = BroadcastNotifier::new(8);
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.publish(event());
        assert_eq!(first.recv().await.unwrap(), event());
        assert_eq!(second.recv().await.unwrap(), event());
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        BroadcastNotifier::new(1).publish(event());
        TracingNotifier.publish(event());
    }
}
