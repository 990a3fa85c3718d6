//! In-process event fan-out.
//!
//! Published link events are delivered to every live subscriber (IPC
//! `Subscribe` connections). Publishing never blocks and does not require a
//! subscriber.

use crate::collaborators::{EventBus, LinkEvent};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Events buffered per subscriber before it starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct BroadcastBus {
    sender: broadcast::Sender<LinkEvent>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, event: LinkEvent) {
        info!("Broadcasting {}", event.name());
        if self.sender.send(event).is_err() {
            debug!("No subscribers for link event");
        }
    }
}
