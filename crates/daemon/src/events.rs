//! Typed fan-out event bus: the process-wide (but explicitly constructed and
//! injected, never a singleton) channel lifecycle transitions are published
//! on.
//!
//! Each event kind keeps its own ordered list of subscribers behind a
//! read-write lock. Emission takes the read lock and calls every subscriber
//! synchronously, in subscription order, on the emitter's own task — a slow
//! subscriber is the subscriber's problem, not the bus's.

use parking_lot::RwLock;
use std::sync::Arc;

/// One lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started {
        network: String,
    },
    Stopped {
        network: String,
    },
    PeerDiscovered {
        network: String,
        node: Option<String>,
        address: String,
    },
    PeerJoined {
        network: String,
        node: String,
        address: String,
    },
    PeerLeft {
        network: String,
        node: Option<String>,
        address: String,
    },
}

impl Event {
    /// The event kind as a stable lowercase string, used by [`Bus::sink`].
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Started { .. } => "started",
            Event::Stopped { .. } => "stopped",
            Event::PeerDiscovered { .. } => "peer_discovered",
            Event::PeerJoined { .. } => "peer_joined",
            Event::PeerLeft { .. } => "peer_left",
        }
    }
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Per-kind subscriber list. Five lists, one per [`Event`] variant, each
/// guarded independently so a subscribe on one kind never blocks emission
/// of another.
#[derive(Default)]
pub struct Bus {
    started: RwLock<Vec<Handler>>,
    stopped: RwLock<Vec<Handler>>,
    peer_discovered: RwLock<Vec<Handler>>,
    peer_joined: RwLock<Vec<Handler>>,
    peer_left: RwLock<Vec<Handler>>,
}

impl Bus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn list_for(&self, event: &Event) -> &RwLock<Vec<Handler>> {
        match event {
            Event::Started { .. } => &self.started,
            Event::Stopped { .. } => &self.stopped,
            Event::PeerDiscovered { .. } => &self.peer_discovered,
            Event::PeerJoined { .. } => &self.peer_joined,
            Event::PeerLeft { .. } => &self.peer_left,
        }
    }

    /// Subscribe to `Started` events.
    pub fn on_started<F>(&self, f: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.started.write().push(Arc::new(f));
    }

    /// Subscribe to `Stopped` events.
    pub fn on_stopped<F>(&self, f: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.stopped.write().push(Arc::new(f));
    }

    /// Subscribe to `PeerDiscovered` events.
    pub fn on_peer_discovered<F>(&self, f: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.peer_discovered.write().push(Arc::new(f));
    }

    /// Subscribe to `PeerJoined` events.
    pub fn on_peer_joined<F>(&self, f: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.peer_joined.write().push(Arc::new(f));
    }

    /// Subscribe to `PeerLeft` events.
    pub fn on_peer_left<F>(&self, f: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.peer_left.write().push(Arc::new(f));
    }

    /// Subscribe a single closure to every kind; it receives the kind name
    /// alongside the event. No replay: a sink registered after an emission
    /// never sees it.
    pub fn sink<F>(&self, f: F)
    where
        F: Fn(&str, &Event) + Send + Sync + Clone + 'static,
    {
        let f1 = f.clone();
        self.on_started(move |e| f1(e.kind(), e));
        let f2 = f.clone();
        self.on_stopped(move |e| f2(e.kind(), e));
        let f3 = f.clone();
        self.on_peer_discovered(move |e| f3(e.kind(), e));
        let f4 = f.clone();
        self.on_peer_joined(move |e| f4(e.kind(), e));
        self.on_peer_left(move |e| f(e.kind(), e));
    }

    /// Publish `event` to every subscriber of its kind, in subscription
    /// order.
    pub fn emit(&self, event: Event) {
        let handlers = self.list_for(&event).read();
        for handler in handlers.iter() {
            handler(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscribers_invoked_in_subscription_order() {
        let bus = Bus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            bus.on_started(move |_| order.lock().push(i));
        }
        bus.emit(Event::Started {
            network: "office".to_string(),
        });
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn late_subscriber_misses_prior_events() {
        let bus = Bus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.emit(Event::Started {
            network: "office".to_string(),
        });
        let count2 = count.clone();
        bus.on_started(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(Event::Started {
            network: "office".to_string(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_only_invokes_matching_kind() {
        let bus = Bus::new();
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let s1 = started.clone();
        bus.on_started(move |_| {
            s1.fetch_add(1, Ordering::SeqCst);
        });
        let s2 = stopped.clone();
        bus.on_stopped(move |_| {
            s2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(Event::Started {
            network: "office".to_string(),
        });
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(stopped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sink_receives_every_kind() {
        let bus = Bus::new();
        let kinds = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let kinds2 = kinds.clone();
        bus.sink(move |kind, _| kinds2.lock().push(kind.to_string()));

        bus.emit(Event::Started {
            network: "office".to_string(),
        });
        bus.emit(Event::PeerDiscovered {
            network: "office".to_string(),
            node: None,
            address: "10.0.0.5:2655".to_string(),
        });
        bus.emit(Event::Stopped {
            network: "office".to_string(),
        });

        assert_eq!(
            *kinds.lock(),
            vec!["started", "peer_discovered", "stopped"]
        );
    }
}
