//! Event plumbing between the engine and its collaborators.
//!
//! Outbound [`AiEvent`]s are published on a bounded, non-blocking bus read by
//! visibility, scripting and quest tracking. Inbound [`ZoneNotice`]s arrive
//! from other threads and are drained at the start of every tick.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use hostile_common::{LockId, UnitId};

use crate::behavior::StateTag;
use crate::modules::ModuleKind;
use crate::targeting::LockState;

/// Notifications produced by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AiEvent {
    /// An agent died
    UnitDied {
        /// Unit credited with the kill
        killer: Option<UnitId>,
        /// Agent that died
        victim: UnitId,
    },
    /// A hostile's accumulated threat changed
    ThreatChanged {
        /// Agent owning the ledger
        agent: UnitId,
        /// Hostile whose record changed
        hostile: UnitId,
        /// New accumulated value
        value: f64,
    },
    /// A lock changed state or primary flag
    LockStateChanged {
        /// Agent owning the lock
        agent: UnitId,
        /// Lock identity
        lock: LockId,
        /// Locked unit
        target: UnitId,
        /// New state
        state: LockState,
        /// Whether the lock is primary after the change
        primary: bool,
    },
    /// A module fired
    ModuleActivated {
        /// Agent owning the module
        agent: UnitId,
        /// Module kind
        module: ModuleKind,
        /// Target, for targeted modules
        target: Option<UnitId>,
    },
    /// The top of an agent's behavior stack changed
    StateChanged {
        /// Agent
        agent: UnitId,
        /// Previous top state
        from: StateTag,
        /// New top state
        to: StateTag,
    },
    /// An agent mirrored its threat onto groupmates
    CallForHelp {
        /// Agent that called
        caller: UnitId,
        /// Agents that answered
        helpers: Vec<UnitId>,
    },
    /// Scripted boss line
    BossMessage {
        /// Boss agent
        agent: UnitId,
        /// Message text
        text: String,
    },
}

/// Notifications consumed by the engine, posted from any thread.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneNotice {
    /// A lock held by an agent was broken by the world (target cloaked, jammed...)
    LockLost {
        /// Agent owning the lock
        agent: UnitId,
        /// Unit that was locked
        target: UnitId,
    },
    /// A unit left the zone
    UnitLeft {
        /// Unit that left
        unit: UnitId,
    },
    /// An agent took damage (drives boss damage hooks)
    Damaged {
        /// Agent hit
        agent: UnitId,
        /// Attacker
        attacker: UnitId,
        /// Raw damage
        amount: f64,
    },
}

/// Event bus for broadcasting engine events to subscribers.
#[derive(Debug)]
pub struct EventBus {
    /// Sender for broadcasting events
    sender: Sender<AiEvent>,
    /// Receiver for collecting events
    receiver: Receiver<AiEvent>,
    /// Channel capacity
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl EventBus {
    /// Creates a new event bus with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Publishes an event to the bus.
    pub fn publish(&self, event: AiEvent) {
        // Non-blocking send - if full, event is dropped
        let _ = self.sender.try_send(event);
    }

    /// Drains all pending events.
    pub fn drain(&self) -> Vec<AiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Returns the number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Returns the channel capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Creates a new publisher handle usable from other threads.
    #[must_use]
    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            sender: self.sender.clone(),
        }
    }
}

/// Cloneable publishing side of an [`EventBus`].
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: Sender<AiEvent>,
}

impl EventPublisher {
    /// Publishes an event, dropping it if the bus is full.
    pub fn publish(&self, event: AiEvent) {
        let _ = self.sender.try_send(event);
    }
}

/// Unbounded inbox for [`ZoneNotice`]s.
#[derive(Debug)]
pub struct NoticeQueue {
    sender: Sender<ZoneNotice>,
    receiver: Receiver<ZoneNotice>,
}

impl Default for NoticeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl NoticeQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Sender handle for other threads.
    #[must_use]
    pub fn sender(&self) -> Sender<ZoneNotice> {
        self.sender.clone()
    }

    /// Drains everything posted so far without blocking.
    pub fn drain(&self) -> Vec<ZoneNotice> {
        self.receiver.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_drain() {
        let bus = EventBus::new(8);
        bus.publish(AiEvent::UnitDied {
            killer: None,
            victim: UnitId::from_raw(1),
        });
        bus.publisher().publish(AiEvent::BossMessage {
            agent: UnitId::from_raw(1),
            text: "ha".into(),
        });

        assert_eq!(bus.pending_count(), 2);
        assert_eq!(bus.drain().len(), 2);
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn test_full_bus_drops_instead_of_blocking() {
        let bus = EventBus::new(1);
        for _ in 0..3 {
            bus.publish(AiEvent::UnitDied {
                killer: None,
                victim: UnitId::from_raw(1),
            });
        }
        assert_eq!(bus.drain().len(), 1);
    }

    #[test]
    fn test_notice_queue_cross_thread() {
        let queue = NoticeQueue::new();
        let sender = queue.sender();
        let handle = std::thread::spawn(move || {
            let _ = sender.send(ZoneNotice::UnitLeft {
                unit: UnitId::from_raw(5),
            });
        });
        handle.join().expect("sender thread panicked");

        assert_eq!(
            queue.drain(),
            vec![ZoneNotice::UnitLeft {
                unit: UnitId::from_raw(5)
            }]
        );
    }
}
