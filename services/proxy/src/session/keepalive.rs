//! Keepalive monitor for sessions in play.
//!
//! Every interval the monitor checks how long the client has been silent.
//! Past the timeout it cancels the session; otherwise it queues a clientbound
//! KeepAlive with a fresh random id, skipping the tick if the queue is full. Replies are matched by the relay via
//! [`KeepaliveClock::acknowledge`], which refreshes the clock.
//!
//! Without replies the timeout measures time since play was entered.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use lodestone_protocol::packets::KeepAliveClientbound;
use lodestone_protocol::Packet;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::KeepaliveSettings;

/// Outstanding challenges remembered for reply matching.
const MAX_OUTSTANDING: usize = 16;

/// Last-seen timestamp shared between the monitor and the relay.
#[derive(Debug)]
pub struct KeepaliveClock {
    origin: Instant,
    last_seen_ms: AtomicU64,
    outstanding: Mutex<VecDeque<i64>>,
}

impl KeepaliveClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
            outstanding: Mutex::new(VecDeque::with_capacity(MAX_OUTSTANDING)),
        }
    }

    /// Mark the client as alive now.
    pub fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_seen_ms.store(now, Ordering::Relaxed);
    }

    /// Time since the client was last seen alive.
    pub fn silence(&self) -> Duration {
        let last = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }

    pub fn record_challenge(&self, id: i64) {
        let mut outstanding = self.outstanding.lock().unwrap_or_else(PoisonError::into_inner);
        if outstanding.len() == MAX_OUTSTANDING {
            outstanding.pop_front();
        }
        outstanding.push_back(id);
    }

    /// Match a client reply against our challenges. A match refreshes the
    /// clock and is consumed.
    pub fn acknowledge(&self, id: i64) -> bool {
        let mut outstanding = self.outstanding.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(index) = outstanding.iter().position(|&c| c == id) else {
            return false;
        };
        outstanding.remove(index);
        drop(outstanding);
        self.touch();
        true
    }
}

impl Default for KeepaliveClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the monitor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// Stopped by its session.
    Stopped,
    /// Client went silent; the session was cancelled.
    TimedOut,
    /// The outbound queue closed under it.
    ClientGone,
}

/// Handle to a running monitor. Dropping it stops the monitor.
pub struct KeepaliveMonitor {
    stop: CancellationToken,
    handle: Option<JoinHandle<MonitorExit>>,
}

impl KeepaliveMonitor {
    /// Start monitoring. `session` is cancelled on timeout.
    pub fn spawn(
        clock: Arc<KeepaliveClock>,
        outbound: mpsc::Sender<Bytes>,
        settings: KeepaliveSettings,
        session: CancellationToken,
    ) -> Self {
        let stop = session.child_token();
        let handle = tokio::spawn(run_monitor(clock, outbound, settings, stop.clone(), session));
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the monitor and wait for it to finish.
    pub async fn stop(mut self) -> MonitorExit {
        self.stop.cancel();
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or(MonitorExit::Stopped),
            None => MonitorExit::Stopped,
        }
    }
}

impl Drop for KeepaliveMonitor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn run_monitor(
    clock: Arc<KeepaliveClock>,
    outbound: mpsc::Sender<Bytes>,
    settings: KeepaliveSettings,
    stop: CancellationToken,
    session: CancellationToken,
) -> MonitorExit {
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return MonitorExit::Stopped,
            _ = ticker.tick() => {}
        }

        let silence = clock.silence();
        if silence > settings.timeout {
            warn!(silence_ms = silence.as_millis() as u64, "Keepalive timeout, closing session");
            session.cancel();
            return MonitorExit::TimedOut;
        }

        let id = rand::random::<i64>();
        clock.record_challenge(id);
        let frame = KeepAliveClientbound { id }.to_frame();
        match outbound.try_send(frame) {
            Ok(()) => {}
            // A stalled writer must not stall the timeout check.
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue full, skipping keepalive");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Outbound queue closed, stopping keepalive");
                return MonitorExit::ClientGone;
            }
        }
    }
}
