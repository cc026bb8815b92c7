//! Transport adapters
//!
//! `QueuedTransport` puts a bounded drop-oldest queue and a sender thread in
//! front of any `TransportSink`, so encoder callback threads only ever pay
//! for a lock and a clone of a reference-counted unit. Track formats travel
//! in a separate lane that is never dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::errors::{PipelineError, PipelineResult};
use crate::pipeline::{ConnectionReporter, OpenRequest, TransportSink};
use crate::types::{AccessUnit, TrackFormat};

/// Default number of units buffered ahead of the sender thread
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

const POP_TIMEOUT: Duration = Duration::from_millis(100);
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum Outgoing {
    Format(TrackFormat),
    Unit(AccessUnit),
}

struct Queue<T> {
    inner: Mutex<QueueInner<T>>,
    cv: Condvar,
}

struct QueueInner<T> {
    /// Sent ahead of `items`, exempt from capacity and eviction
    priority: VecDeque<T>,
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

impl<T> Queue<T> {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                priority: VecDeque::new(),
                items: VecDeque::with_capacity(capacity.min(1024)),
                capacity: capacity.max(1),
                dropped: 0,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn push_drop_oldest(&self, item: T) {
        let mut g = self.inner.lock();
        if g.closed {
            return;
        }

        if g.items.len() >= g.capacity {
            g.items.pop_front();
            g.dropped = g.dropped.saturating_add(1);
        }
        g.items.push_back(item);
        self.cv.notify_one();
    }

    fn push_priority(&self, item: T) {
        let mut g = self.inner.lock();
        if g.closed {
            return;
        }
        g.priority.push_back(item);
        self.cv.notify_one();
    }

    /// `Err(())` once the queue is closed and drained
    fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, ()> {
        let mut g = self.inner.lock();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = g.next() {
                return Ok(Some(item));
            }
            if g.closed {
                return Err(());
            }
            if self.cv.wait_until(&mut g, deadline).timed_out() {
                return Ok(g.next());
            }
        }
    }

    fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    fn len(&self) -> usize {
        let g = self.inner.lock();
        g.priority.len() + g.items.len()
    }

    /// Close and discard whatever has not been sent
    fn close(&self) -> usize {
        let mut g = self.inner.lock();
        g.closed = true;
        let discarded = g.priority.len() + g.items.len();
        g.priority.clear();
        g.items.clear();
        self.cv.notify_all();
        discarded
    }

    fn reopen(&self) {
        let mut g = self.inner.lock();
        g.priority.clear();
        g.items.clear();
        g.closed = false;
    }
}

impl<T> QueueInner<T> {
    fn next(&mut self) -> Option<T> {
        self.priority.pop_front().or_else(|| self.items.pop_front())
    }
}

/// Non-blocking front for a transport whose `push` may block on the network
pub struct QueuedTransport {
    inner: Arc<dyn TransportSink>,
    queue: Arc<Queue<Outgoing>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    sent: Arc<AtomicU64>,
}

impl QueuedTransport {
    pub fn new(inner: Arc<dyn TransportSink>) -> Self {
        Self::with_capacity(inner, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn TransportSink>, capacity: usize) -> Self {
        Self {
            inner,
            queue: Arc::new(Queue::new(capacity)),
            worker: Mutex::new(None),
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Units discarded because the sender thread fell behind
    pub fn dropped_units(&self) -> u64 {
        self.queue.dropped()
    }

    /// Units handed to the wrapped transport
    pub fn sent_units(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn join_worker(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        let start = Instant::now();
        while !handle.is_finished() {
            if start.elapsed() >= JOIN_TIMEOUT {
                log::warn!("Transport sender did not stop within {:?}", JOIN_TIMEOUT);
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let _ = handle.join();
    }
}

fn sender_loop(queue: Arc<Queue<Outgoing>>, inner: Arc<dyn TransportSink>, sent: Arc<AtomicU64>) {
    loop {
        match queue.pop_timeout(POP_TIMEOUT) {
            Ok(Some(Outgoing::Unit(unit))) => {
                inner.push(&unit);
                sent.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Some(Outgoing::Format(format))) => inner.announce(&format),
            Ok(None) => continue,
            Err(()) => break,
        }
    }
}

impl TransportSink for QueuedTransport {
    fn open(&self, request: OpenRequest, reporter: ConnectionReporter) -> PipelineResult<()> {
        // A previous session may still have a sender winding down
        self.queue.close();
        self.join_worker();
        self.queue.reopen();

        self.inner.open(request, reporter)?;

        let queue = self.queue.clone();
        let inner = self.inner.clone();
        let sent = self.sent.clone();
        let handle = std::thread::Builder::new()
            .name("crabstream-transport-sender".to_string())
            .spawn(move || sender_loop(queue, inner, sent))
            .map_err(|e| {
                self.inner.close();
                PipelineError::TransportFailure(format!("spawn failed: {e}"))
            })?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    fn announce(&self, format: &TrackFormat) {
        self.queue.push_priority(Outgoing::Format(format.clone()));
    }

    fn push(&self, unit: &AccessUnit) {
        self.queue.push_drop_oldest(Outgoing::Unit(unit.clone()));
    }

    fn close(&self) {
        let discarded = self.queue.close();
        if discarded > 0 {
            log::debug!("Discarded {} queued units on close", discarded);
        }
        self.join_worker();
        self.inner.close();
    }
}

impl Drop for QueuedTransport {
    fn drop(&mut self) {
        self.queue.close();
        self.join_worker();
    }
}

/// Transport that only logs what it would send. Used by the CLI demo.
#[derive(Debug, Default)]
pub struct LogTransport {
    units: AtomicU64,
    bytes: AtomicU64,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn units(&self) -> u64 {
        self.units.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl TransportSink for LogTransport {
    fn open(&self, request: OpenRequest, reporter: ConnectionReporter) -> PipelineResult<()> {
        log::info!(
            "Opening {} with {} track(s){}",
            request.url,
            request.formats.len(),
            if request.credentials.is_some() {
                " and credentials"
            } else {
                ""
            }
        );
        if request.credentials.is_some() {
            reporter.auth_succeeded();
        }
        reporter.connected();
        Ok(())
    }

    fn announce(&self, format: &TrackFormat) {
        log::info!("Late {} track: {}", format.kind().as_str(), format.mime);
    }

    fn push(&self, unit: &AccessUnit) {
        self.units.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(unit.len() as u64, Ordering::Relaxed);
        log::trace!(
            "{} unit pts={}us key={} len={}",
            unit.kind.as_str(),
            unit.pts_us,
            unit.keyframe,
            unit.len()
        );
    }

    fn close(&self) {
        log::info!(
            "Closed after {} units ({} bytes)",
            self.units(),
            self.bytes()
        );
    }
}
