use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex as RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::waitqueue::MultiWakerRegistration;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::{SCAN_POINTS, TELEMETRY_POLICY, TELEMETRY_QUEUE_DEPTH};
use crate::packet::MeasurementPacket;

/// What the producer does when the telemetry queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnqueuePolicy {
    /// Wait for the consumer. Nothing is lost; acquisition stalls.
    Block,
    /// Discard the new packet and count it.
    DropNewest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Enqueued {
    Accepted,
    Dropped,
}

/// Bounded FIFO of finished packets between acquisition and transmission.
/// Packets move by value, so the producer never waits on the transport
/// while holding one.
pub struct TelemetryQueue<const P: usize, const N: usize> {
    channel: Channel<RawMutex, MeasurementPacket<P>, N>,
    policy: EnqueuePolicy,
    dropped: AtomicU32,
}

impl<const P: usize, const N: usize> TelemetryQueue<P, N> {
    pub const fn new(policy: EnqueuePolicy) -> Self {
        Self {
            channel: Channel::new(),
            policy,
            dropped: AtomicU32::new(0),
        }
    }

    pub fn policy(&self) -> EnqueuePolicy {
        self.policy
    }

    pub async fn enqueue(&self, packet: MeasurementPacket<P>) -> Enqueued {
        match self.policy {
            EnqueuePolicy::Block => {
                self.channel.send(packet).await;
                Enqueued::Accepted
            }
            EnqueuePolicy::DropNewest => match self.channel.try_send(packet) {
                Ok(()) => Enqueued::Accepted,
                Err(_) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!("Telemetry queue full, packet dropped ({} total)", dropped);
                    Enqueued::Dropped
                }
            },
        }
    }

    /// Waits for the oldest packet.
    pub async fn dequeue(&self) -> MeasurementPacket<P> {
        self.channel.receive().await
    }

    pub fn try_dequeue(&self) -> Option<MeasurementPacket<P>> {
        self.channel.try_receive().ok()
    }

    pub fn dropped_count(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub fn capacity(&self) -> usize {
        N
    }
}

/// Tasks that may wait on one [`Shutdown`] at the same time.
pub const SHUTDOWN_WAITERS: usize = 4;

/// Cooperative stop request shared by both tasks.
pub struct Shutdown {
    requested: AtomicBool,
    waiters: Mutex<RawMutex, RefCell<MultiWakerRegistration<SHUTDOWN_WAITERS>>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            waiters: Mutex::new(RefCell::new(MultiWakerRegistration::new())),
        }
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
        self.waiters.lock(|w| w.borrow_mut().wake());
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Resolves once a stop has been requested. Every waiter keeps its own
    /// waker and is only woken by [`request`](Self::request).
    pub async fn wait(&self) {
        poll_fn(|cx| {
            self.waiters.lock(|w| {
                if self.is_requested() {
                    return Poll::Ready(());
                }
                w.borrow_mut().register(cx.waker());
                Poll::Pending
            })
        })
        .await
    }
}

/*  board-level instances */
pub type BoardQueue = TelemetryQueue<SCAN_POINTS, TELEMETRY_QUEUE_DEPTH>;

pub static TELEMETRY: BoardQueue = TelemetryQueue::new(TELEMETRY_POLICY);
pub static SHUTDOWN: Shutdown = Shutdown::new();
