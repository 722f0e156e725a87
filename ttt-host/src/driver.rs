//! Fixed-interval session driver: feeds overlay events into the registry and ticks it.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use ttt_core::{ExtensionRegistry, Transport, TransportError, TransportEvent};

/// Where the overlay's receive callbacks push their events.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Owns the registry and the transport. Single-threaded: run it on the task that owns the overlay.
pub struct SessionDriver<T: Transport> {
    registry: ExtensionRegistry,
    transport: T,
    events: EventReceiver,
    cadence: Duration,
    ticks: u64,
}

impl<T: Transport> SessionDriver<T> {
    /// Register every extension with `transport`.
    pub fn start(
        mut registry: ExtensionRegistry,
        mut transport: T,
        events: EventReceiver,
        cadence: Duration,
    ) -> Result<Self, TransportError> {
        registry.register(&mut transport)?;
        info!(extensions = ?registry.names(), cadence_ms = cadence.as_millis() as u64, "session driver started");
        Ok(Self {
            registry,
            transport,
            events,
            cadence,
            ticks: 0,
        })
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// One tick: move whatever the overlay queued into the registry, then tick it.
    pub fn step(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.registry.push_event(event);
        }
        self.registry.tick(&mut self.transport);
        self.ticks += 1;
    }

    /// Tick every `cadence` until `shutdown` resolves, then deregister all extensions.
    pub async fn run<F>(mut self, shutdown: F) -> Self
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("shutdown requested");
                    break;
                }
                _ = ticker.tick() => self.step(),
            }
        }

        self.registry.deregister(&mut self.transport);
        info!(ticks = self.ticks, "session driver stopped");
        self
    }
}
