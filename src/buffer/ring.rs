//! Durable, capacity-bounded FIFO for one priority class.
//!
//! ```text
//!   send() ──▶ empty && sender attached? ──yes──▶ Sender (direct)
//!                     │ no / transport error
//!                     ▼
//!               PageQueue (disk) ──▶ delivery loop ──▶ Sender
//!                     ▲
//!                     └──────────── reclaim loop (evict oldest, compact)
//! ```
//!
//! Ordering: a message goes straight to the sender only while nothing is
//! queued, so nothing ever overtakes an older queued entry. An entry leaves the
//! queue after it was handed to the sender, after it turned out to be
//! unreadable, or when the reclaim loop evicts it to stay under capacity.
//!
//! Locking: `store` guards every individual store call; `maintenance` keeps a
//! delivery batch and an eviction/compaction pass from running at the same
//! time; `submit` makes a producer's empty-check and hand-off one step.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::buffer::Buffer;
use crate::config::RingOptions;
use crate::error::{BufferError, SendError, StoreError, StoreResult};
use crate::protocol::{AgentResponse, Envelope, Outgoing, RequestPayload, ServerResponse, codec};
use crate::sender::{Sender, SenderSlot};
use crate::signal::Signal;
use crate::store::{INDEX_ENTRY_SIZE, PageQueue, StoreStatus};

/// Counters of what happened to buffered messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Entries replayed from disk to a sender.
    pub delivered: u64,
    /// Entries dropped undelivered to stay under capacity.
    pub evicted: u64,
    /// Entries discarded because they could not be read back.
    pub corrupted: u64,
    /// Messages never queued (unencodable, too large, store failure, shutdown).
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    evicted: AtomicU64,
    corrupted: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> RingStats {
        RingStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            corrupted: self.corrupted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// One durable priority queue with its delivery and reclaim loops.
pub struct Ring {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    name: String,
    capacity: u64,
    reclaim_margin: u64,
    reclaim_interval: Duration,

    store: Mutex<Option<PageQueue>>,
    maintenance: tokio::sync::Mutex<()>,
    submit: tokio::sync::Mutex<()>,

    sender: SenderSlot,
    new_data: Signal,
    sender_ready: Signal,
    reclaim_requested: Signal,
    compact_requested: Signal,

    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    counters: Counters,
}

impl Ring {
    /// Open or create the ring stored in `dir` and start its loops.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(dir: impl AsRef<Path>, options: RingOptions) -> Result<Self, BufferError> {
        let dir = dir.as_ref();
        options.validate()?;

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        let store = PageQueue::open(dir, options.pages)?;
        let pending = store.len();

        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            name,
            capacity: options.capacity_bytes,
            reclaim_margin: options.reclaim_margin,
            reclaim_interval: options.reclaim_interval,
            store: Mutex::new(Some(store)),
            maintenance: tokio::sync::Mutex::new(()),
            submit: tokio::sync::Mutex::new(()),
            sender: SenderSlot::new(),
            new_data: Signal::new(),
            sender_ready: Signal::new(),
            reclaim_requested: Signal::new(),
            compact_requested: Signal::new(),
            shutdown,
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let tasks = vec![
            tokio::spawn(Arc::clone(&shared).reclaim_loop(shared.shutdown.subscribe())),
            tokio::spawn(Arc::clone(&shared).delivery_loop(shared.shutdown.subscribe())),
        ];

        if pending > 0 {
            shared.new_data.notify();
        }

        tracing::info!(
            ring = %shared.name,
            "Opened buffer at {} with {} pending entries (capacity {} bytes)",
            dir.display(),
            pending,
            shared.capacity
        );

        Ok(Self {
            shared,
            tasks: Mutex::new(tasks),
        })
    }

    /// Send a response, or queue it for later delivery.
    ///
    /// Once queued the message is owned by the ring: later failures are only
    /// logged.
    pub async fn send(&self, response: AgentResponse) -> Result<(), SendError> {
        let _submit = self.shared.submit.lock().await;
        if self.shared.is_shutting_down() {
            self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        if let Some(sender) = self.shared.sender.load()
            && self.shared.is_empty()
        {
            match sender.send(response.clone()).await {
                Err(err) if err.is_transport() => self.shared.release_sender(&sender, &err),
                other => return other,
            }
        }

        self.shared.push(&response.into());
        Ok(())
    }

    /// Send a request and wait for the reply, or queue it.
    ///
    /// A queued request gets [`ServerResponse::Queued`] right away; the real
    /// reply is never seen by the caller.
    pub async fn send_and_wait(&self, request: RequestPayload) -> Result<ServerResponse, SendError> {
        let _submit = self.shared.submit.lock().await;
        if self.shared.is_shutting_down() {
            self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(ServerResponse::Queued);
        }

        if let Some(sender) = self.shared.sender.load()
            && self.shared.is_empty()
        {
            match sender.send_and_wait(request.clone()).await {
                Err(err) if err.is_transport() => self.shared.release_sender(&sender, &err),
                other => return other,
            }
        }

        self.shared.push(&request.into());
        Ok(ServerResponse::Queued)
    }

    /// Attach a sender and resume delivery.
    pub fn set_sender(&self, sender: Arc<dyn Sender>) {
        self.shared.sender.store(sender);
        self.shared.sender_ready.notify();
        if !self.shared.is_empty() {
            self.shared.new_data.notify();
        }
        tracing::debug!(ring = %self.shared.name, "Sender set");
    }

    /// Ask the reclaim loop to check the footprint now.
    pub fn request_reclaim(&self) {
        self.shared.reclaim_requested.notify();
    }

    /// Stop both loops, reclaim once more and close the store. Idempotent.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.shutdown.send_replace(true);

        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(ring = %self.shared.name, "Buffer task failed: {}", e);
            }
        }

        let store = self
            .shared
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(store) = store
            && let Err(e) = store.close()
        {
            tracing::error!(ring = %self.shared.name, "Closing buffer: {}", e);
        }
        tracing::info!(ring = %self.shared.name, "Buffer closed");
    }

    /// Name used in log lines, taken from the directory name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> RingStats {
        self.shared.counters.snapshot()
    }

    /// Entries waiting for delivery.
    pub fn len(&self) -> u64 {
        self.shared.with_store(|q| Ok(q.len())).unwrap_or(0)
    }

    /// Whether nothing is waiting for delivery.
    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
    }

    /// Current on-disk footprint in bytes.
    pub fn disk_size(&self) -> u64 {
        self.shared.disk_size().unwrap_or(0)
    }

    /// Occupancy of the store, or `None` once closed.
    pub fn status(&self) -> Option<StoreStatus> {
        self.shared.with_store(|q| Ok(q.status())).ok()
    }

    /// Whether a sender is currently attached.
    pub fn is_sender_attached(&self) -> bool {
        self.shared.sender.is_attached()
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        if !self.shared.closed.load(Ordering::SeqCst) {
            tracing::warn!(ring = %self.shared.name, "Buffer dropped without close()");
            self.shared.shutdown.send_replace(true);
        }
    }
}

#[async_trait]
impl Buffer for Ring {
    async fn send(&self, response: AgentResponse) -> Result<(), SendError> {
        Ring::send(self, response).await
    }

    async fn send_and_wait(&self, request: RequestPayload) -> Result<ServerResponse, SendError> {
        Ring::send_and_wait(self, request).await
    }

    fn set_sender(&self, sender: Arc<dyn Sender>) {
        Ring::set_sender(self, sender)
    }

    async fn close(&self) {
        Ring::close(self).await
    }
}

impl Shared {
    fn with_store<T>(&self, f: impl FnOnce(&mut PageQueue) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(queue) => f(queue),
            None => Err(StoreError::Closed),
        }
    }

    fn is_empty(&self) -> bool {
        self.with_store(|q| Ok(q.is_empty())).unwrap_or(true)
    }

    fn disk_size(&self) -> StoreResult<u64> {
        self.with_store(|q| Ok(q.disk_size()))
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Detach a sender that just failed, unless it was already replaced.
    fn release_sender(&self, failed: &Arc<dyn Sender>, err: &SendError) {
        if self.sender.clear_if(failed) {
            self.sender_ready.release();
            tracing::debug!(ring = %self.name, "Sender released: {}", err);
        }
    }

    fn push(&self, envelope: &Envelope) {
        let bytes = match codec::encode(envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(ring = %self.name, "Encoding message for buffer: {}", e);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let size = bytes.len() as u64 + INDEX_ENTRY_SIZE;
        if size > self.capacity {
            tracing::error!(
                ring = %self.name,
                "Data size '{}' overflows free buffer space '{}'",
                size,
                self.capacity
            );
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if self.is_shutting_down() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match self.with_store(|q| q.enqueue(&bytes)) {
            Ok(_) => self.new_data.notify(),
            Err(e) => {
                tracing::error!(ring = %self.name, "Inserting into buffer: {}", e);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn delivery_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => return,
                _ = self.new_data.wait() => {}
            }
            self.drain_to_sender(&mut shutdown).await;
        }
    }

    /// Replay queued entries in order until the queue is empty or the sender fails.
    async fn drain_to_sender(&self, shutdown: &mut watch::Receiver<bool>) {
        let sender = loop {
            if let Some(sender) = self.sender.load() {
                break sender;
            }
            tokio::select! {
                _ = stopped(shutdown) => return,
                _ = self.sender_ready.wait() => {}
            }
        };

        let _maintenance = self.maintenance.lock().await;
        let mut drained = 0u64;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let bytes = match self.with_store(|q| q.peek()) {
                Ok(Some(bytes)) => Some(bytes),
                Ok(None) => break,
                Err(StoreError::Corrupted { index, reason }) => {
                    tracing::error!(ring = %self.name, "Discarding unreadable entry {}: {}", index, reason);
                    None
                }
                Err(e) => {
                    tracing::error!(ring = %self.name, "Reading entry from buffer: {}", e);
                    break;
                }
            };

            match bytes.map(|b| codec::decode(&b)) {
                None => {
                    self.counters.corrupted.fetch_add(1, Ordering::Relaxed);
                }
                Some(Err(e)) => {
                    tracing::error!(ring = %self.name, "Decoding entry from buffer: {}", e);
                    self.counters.corrupted.fetch_add(1, Ordering::Relaxed);
                }
                Some(Ok(envelope)) => match deliver(sender.as_ref(), envelope).await {
                    Err(err) if err.is_transport() => {
                        self.release_sender(&sender, &err);
                        // Entries remain; resume once a sender is attached again.
                        self.new_data.notify();
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(ring = %self.name, "Server refused buffered message: {}", err);
                        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(()) => {
                        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                },
            }

            if let Err(e) = self.with_store(|q| q.skip(1)) {
                tracing::error!(ring = %self.name, "Removing entry from buffer: {}", e);
                break;
            }
            drained += 1;
        }

        if drained > 0 {
            tracing::debug!(ring = %self.name, "Drained {} entries", drained);
            self.compact_requested.notify();
        }
    }

    async fn reclaim_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.reclaim_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => {
                    self.reclaim_overflow().await;
                    return;
                }
                _ = self.reclaim_requested.wait() => self.reclaim_overflow().await,
                _ = ticker.tick() => self.reclaim_overflow().await,
                _ = self.compact_requested.wait() => {
                    let _maintenance = self.maintenance.lock().await;
                    self.compact();
                }
            }
        }
    }

    /// Evict the oldest entries if the footprint is within the margin of the
    /// capacity, then compact.
    async fn reclaim_overflow(&self) {
        let size = match self.disk_size() {
            Ok(size) => size,
            Err(StoreError::Closed) => return,
            Err(e) => {
                tracing::error!(ring = %self.name, "Reading buffer size: {}", e);
                return;
            }
        };

        let overflow = (size + self.reclaim_margin).saturating_sub(self.capacity);
        if overflow == 0 {
            return;
        }

        let _maintenance = self.maintenance.lock().await;
        self.evict(overflow);
        self.compact();
    }

    /// Drop entries from the front until at least `amount` bytes are freed.
    fn evict(&self, amount: u64) {
        let mut freed = 0u64;
        let mut evicted = 0u64;
        while freed < amount {
            match self.with_store(|q| q.dequeue()) {
                Ok(Some(bytes)) => {
                    freed += bytes.len() as u64 + INDEX_ENTRY_SIZE;
                    evicted += 1;
                }
                Ok(None) => break,
                Err(StoreError::Corrupted { .. }) => {
                    freed += INDEX_ENTRY_SIZE;
                    evicted += 1;
                }
                Err(e) => {
                    tracing::error!(ring = %self.name, "Evicting from buffer: {}", e);
                    break;
                }
            }
        }

        if evicted > 0 {
            self.counters.evicted.fetch_add(evicted, Ordering::Relaxed);
            tracing::warn!(
                ring = %self.name,
                "Evicted {} oldest entries ({} bytes) to stay under {} bytes",
                evicted,
                freed,
                self.capacity
            );
        }
    }

    fn compact(&self) {
        match self.with_store(|q| q.compact()) {
            Ok(stats) if stats.bytes > 0 => {
                tracing::debug!(
                    ring = %self.name,
                    "Compacted {} index and {} data pages ({} bytes)",
                    stats.index_pages,
                    stats.data_pages,
                    stats.bytes
                );
            }
            Ok(_) | Err(StoreError::Closed) => {}
            Err(e) => tracing::error!(ring = %self.name, "Compacting buffer: {}", e),
        }
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // A closed channel means the ring is gone; treat it as shutdown too.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn deliver(sender: &dyn Sender, envelope: Envelope) -> Result<(), SendError> {
    match Outgoing::from(envelope) {
        Outgoing::Response(response) => sender.send(response).await,
        Outgoing::Request(request) => sender.send_and_wait(request).await.map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::protocol::ResponsePayload;
    use crate::store::PageOptions;

    /// Records everything it is given; fails with a transport error while
    /// `failures` is positive.
    #[derive(Default)]
    struct RecordingSender {
        responses: Mutex<Vec<AgentResponse>>,
        requests: Mutex<Vec<RequestPayload>>,
        failures: AtomicUsize,
        reject: AtomicBool,
    }

    impl RecordingSender {
        fn failing(times: usize) -> Self {
            let sender = Self::default();
            sender.failures.store(times, Ordering::SeqCst);
            sender
        }

        fn response_ids(&self) -> Vec<u32> {
            self.responses.lock().unwrap().iter().map(|r| r.id).collect()
        }

        fn check(&self) -> Result<(), SendError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SendError::ConnectionLost {
                    reason: "broken pipe".to_string(),
                });
            }
            if self.reject.load(Ordering::SeqCst) {
                return Err(SendError::Rejected {
                    reason: "unknown action".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Sender for RecordingSender {
        async fn send(&self, response: AgentResponse) -> Result<(), SendError> {
            self.check()?;
            self.responses.lock().unwrap().push(response);
            Ok(())
        }

        async fn send_and_wait(&self, request: RequestPayload) -> Result<ServerResponse, SendError> {
            self.check()?;
            self.requests.lock().unwrap().push(request);
            Ok(ServerResponse::Ack)
        }
    }

    fn response(id: u32) -> AgentResponse {
        AgentResponse::new(
            id,
            ResponsePayload::JobProgress {
                job_id: "backup".to_string(),
                message: format!("step {}", id),
            },
        )
    }

    fn small_options() -> RingOptions {
        RingOptions::with_capacity(64 * 1024)
            .with_pages(PageOptions {
                data_page_size: 1024,
                index_page_size: 256,
            })
            .with_reclaim_margin(0)
            .with_reclaim_interval(Duration::from_millis(50))
    }

    async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    // ==================== Direct and queued delivery ====================

    #[tokio::test]
    async fn test_queues_without_sender_then_drains_in_order() {
        let dir = tempdir().unwrap();
        let ring = Ring::open(dir.path().join("prioritized"), small_options()).unwrap();
        assert_eq!(ring.name(), "prioritized");

        for id in 1..=5 {
            ring.send(response(id)).await.unwrap();
        }
        assert_eq!(ring.len(), 5);

        let sender = Arc::new(RecordingSender::default());
        ring.set_sender(sender.clone());

        eventually("drain", || ring.is_empty()).await;
        assert_eq!(sender.response_ids(), vec![1, 2, 3, 4, 5]);
        assert_eq!(ring.stats().delivered, 5);

        ring.close().await;
    }

    #[tokio::test]
    async fn test_sends_directly_when_empty() {
        let dir = tempdir().unwrap();
        let ring = Ring::open(dir.path().join("ring"), small_options()).unwrap();
        let sender = Arc::new(RecordingSender::default());
        ring.set_sender(sender.clone());

        ring.send(response(7)).await.unwrap();
        let reply = ring.send_and_wait(RequestPayload::Ping).await.unwrap();

        assert_eq!(reply, ServerResponse::Ack);
        assert_eq!(sender.response_ids(), vec![7]);
        assert!(ring.is_empty());
        assert_eq!(ring.stats().delivered, 0);

        ring.close().await;
    }

    #[tokio::test]
    async fn test_queued_request_gets_synthetic_reply() {
        let dir = tempdir().unwrap();
        let ring = Ring::open(dir.path().join("ring"), small_options()).unwrap();

        let reply = ring
            .send_and_wait(RequestPayload::StateChanged {
                agent_id: "agent-1".to_string(),
                status: crate::protocol::AgentStatus::Running,
                listen_port: 7777,
            })
            .await
            .unwrap();
        assert_eq!(reply, ServerResponse::Queued);
        assert_eq!(ring.len(), 1);

        let sender = Arc::new(RecordingSender::default());
        ring.set_sender(sender.clone());
        eventually("request replay", || sender.requests.lock().unwrap().len() == 1).await;

        ring.close().await;
    }

    #[tokio::test]
    async fn test_direct_rejection_is_returned_and_not_queued() {
        let dir = tempdir().unwrap();
        let ring = Ring::open(dir.path().join("ring"), small_options()).unwrap();
        let sender = Arc::new(RecordingSender::default());
        sender.reject.store(true, Ordering::SeqCst);
        ring.set_sender(sender.clone());

        let err = ring.send(response(1)).await.unwrap_err();
        assert!(matches!(err, SendError::Rejected { .. }));
        assert!(ring.is_empty());
        assert!(ring.is_sender_attached());

        ring.close().await;
    }

    // ==================== Transport failures ====================

    #[tokio::test]
    async fn test_direct_transport_failure_queues_and_releases_sender() {
        let dir = tempdir().unwrap();
        let ring = Ring::open(dir.path().join("ring"), small_options()).unwrap();
        let broken = Arc::new(RecordingSender::failing(usize::MAX));
        ring.set_sender(broken.clone());

        ring.send(response(1)).await.unwrap();
        assert!(!ring.is_sender_attached());
        assert_eq!(ring.len(), 1);

        let healthy = Arc::new(RecordingSender::default());
        ring.set_sender(healthy.clone());
        eventually("redelivery", || ring.is_empty()).await;
        assert_eq!(healthy.response_ids(), vec![1]);

        ring.close().await;
    }

    #[tokio::test]
    async fn test_replay_failure_keeps_entry_for_next_sender() {
        let dir = tempdir().unwrap();
        let ring = Ring::open(dir.path().join("ring"), small_options()).unwrap();
        for id in 1..=3 {
            ring.send(response(id)).await.unwrap();
        }

        let flaky = Arc::new(RecordingSender::failing(1));
        ring.set_sender(flaky.clone());
        eventually("sender release", || !ring.is_sender_attached()).await;
        assert_eq!(ring.len(), 3);

        ring.set_sender(flaky.clone());
        eventually("drain", || ring.is_empty()).await;
        assert_eq!(flaky.response_ids(), vec![1, 2, 3]);

        ring.close().await;
    }

    #[tokio::test]
    async fn test_replay_rejection_removes_entry() {
        let dir = tempdir().unwrap();
        let ring = Ring::open(dir.path().join("ring"), small_options()).unwrap();
        ring.send(response(1)).await.unwrap();

        let sender = Arc::new(RecordingSender::default());
        sender.reject.store(true, Ordering::SeqCst);
        ring.set_sender(sender.clone());

        eventually("drain", || ring.is_empty()).await;
        assert!(ring.is_sender_attached());
        assert!(sender.response_ids().is_empty());

        ring.close().await;
    }

    // ==================== Capacity ====================

    #[tokio::test]
    async fn test_oversized_message_is_dropped() {
        let dir = tempdir().unwrap();
        let options = RingOptions::with_capacity(24 + 32 + 32)
            .with_pages(PageOptions {
                data_page_size: 32,
                index_page_size: 32,
            })
            .with_reclaim_margin(0);
        let ring = Ring::open(dir.path().join("ring"), options).unwrap();

        let big = AgentResponse::new(
            1,
            ResponsePayload::AgentLogs {
                lines: vec!["x".repeat(200)],
            },
        );
        ring.send(big).await.unwrap();

        assert!(ring.is_empty());
        assert_eq!(ring.stats().dropped, 1);
        ring.close().await;
    }

    #[tokio::test]
    async fn test_reclaim_evicts_oldest_to_fit() {
        let dir = tempdir().unwrap();
        let pages = PageOptions {
            data_page_size: 64,
            index_page_size: 32,
        };
        let options = RingOptions::with_capacity(pages.minimum_footprint())
            .with_pages(pages)
            .with_reclaim_margin(0)
            .with_reclaim_interval(Duration::from_secs(3600));
        let ring = Ring::open(dir.path().join("ring"), options).unwrap();

        for id in 1..=6 {
            ring.send(response(id)).await.unwrap();
        }
        assert!(ring.disk_size() > pages.minimum_footprint());

        ring.request_reclaim();
        eventually("eviction", || ring.disk_size() <= pages.minimum_footprint()).await;

        let stats = ring.stats();
        assert!(stats.evicted > 0);
        assert!(ring.len() >= 1);

        let sender = Arc::new(RecordingSender::default());
        ring.set_sender(sender.clone());
        eventually("drain", || ring.is_empty()).await;
        assert_eq!(sender.response_ids().last(), Some(&6));

        ring.close().await;
    }

    // ==================== Lifecycle ====================

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ring");
        {
            let ring = Ring::open(&path, small_options()).unwrap();
            ring.send(response(1)).await.unwrap();
            ring.send(response(2)).await.unwrap();
            ring.close().await;
        }

        let ring = Ring::open(&path, small_options()).unwrap();
        assert_eq!(ring.len(), 2);
        let sender = Arc::new(RecordingSender::default());
        ring.set_sender(sender.clone());
        eventually("drain", || ring.is_empty()).await;
        assert_eq!(sender.response_ids(), vec![1, 2]);
        ring.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_drops_later_sends() {
        let dir = tempdir().unwrap();
        let ring = Ring::open(dir.path().join("ring"), small_options()).unwrap();
        ring.close().await;
        ring.close().await;

        ring.send(response(1)).await.unwrap();
        assert_eq!(ring.stats().dropped, 1);
        assert!(ring.status().is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_skips_attached_sender() {
        let dir = tempdir().unwrap();
        let ring = Ring::open(dir.path().join("ring"), small_options()).unwrap();
        let sender = Arc::new(RecordingSender::default());
        ring.set_sender(sender.clone());
        ring.close().await;

        ring.send(response(1)).await.unwrap();
        let reply = ring.send_and_wait(RequestPayload::Ping).await.unwrap();

        assert_eq!(reply, ServerResponse::Queued);
        assert!(sender.response_ids().is_empty());
        assert!(sender.requests.lock().unwrap().is_empty());
        assert_eq!(ring.stats().dropped, 2);
    }

    #[tokio::test]
    async fn test_reopened_backlog_drains_without_new_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ring");
        {
            let ring = Ring::open(&path, small_options()).unwrap();
            ring.send(response(1)).await.unwrap();
            ring.send(response(2)).await.unwrap();
            ring.close().await;
        }

        let ring = Ring::open(&path, small_options()).unwrap();
        assert!(ring.shared.new_data.is_pending());

        // Attach without the extra wake-up `set_sender` gives a non-empty ring.
        let sender = Arc::new(RecordingSender::default());
        ring.shared.sender.store(sender.clone());
        ring.shared.sender_ready.notify();

        eventually("drain", || ring.is_empty()).await;
        assert_eq!(sender.response_ids(), vec![1, 2]);
        ring.close().await;
    }

    #[tokio::test]
    async fn test_empty_open_has_no_pending_delivery() {
        let dir = tempdir().unwrap();
        let ring = Ring::open(dir.path().join("ring"), small_options()).unwrap();
        assert!(!ring.shared.new_data.is_pending());
        ring.close().await;
    }

    #[tokio::test]
    async fn test_rejects_capacity_below_one_entry() {
        let dir = tempdir().unwrap();
        let result = Ring::open(dir.path().join("ring"), RingOptions::with_capacity(1024));
        assert!(matches!(
            result,
            Err(BufferError::Config(crate::error::ConfigError::CapacityTooSmall { .. }))
        ));
    }
}
