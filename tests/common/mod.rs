#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ironclaw_outbox::protocol::{AgentResponse, RequestPayload, ResponsePayload, ServerResponse};
use ironclaw_outbox::store::PageOptions;
use ironclaw_outbox::{RingOptions, SendError, Sender};

/// Sender that records what it delivers and fails the first `failures` calls
/// with a lost connection.
#[derive(Default)]
pub struct RecordingSender {
    pub responses: Mutex<Vec<AgentResponse>>,
    pub requests: Mutex<Vec<RequestPayload>>,
    failures: AtomicUsize,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(times: usize) -> Arc<Self> {
        let sender = Self::default();
        sender.failures.store(times, Ordering::SeqCst);
        Arc::new(sender)
    }

    pub fn ids(&self) -> Vec<u32> {
        self.responses.lock().unwrap().iter().map(|r| r.id).collect()
    }

    fn fail_once(&self) -> Result<(), SendError> {
        match self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(_) => Err(SendError::ConnectionLost {
                reason: "stream closed".to_string(),
            }),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(&self, response: AgentResponse) -> Result<(), SendError> {
        self.fail_once()?;
        self.responses.lock().unwrap().push(response);
        Ok(())
    }

    async fn send_and_wait(&self, request: RequestPayload) -> Result<ServerResponse, SendError> {
        self.fail_once()?;
        self.requests.lock().unwrap().push(request);
        Ok(ServerResponse::Ack)
    }
}

pub fn response(id: u32) -> AgentResponse {
    AgentResponse::new(id, ResponsePayload::StopJob)
}

/// Ring settings with tiny pages so a handful of entries spans several pages.
pub fn tiny_ring(capacity: u64) -> RingOptions {
    RingOptions::with_capacity(capacity)
        .with_pages(PageOptions {
            data_page_size: 32,
            index_page_size: 32,
        })
        .with_reclaim_margin(0)
        .with_reclaim_interval(Duration::from_secs(3600))
}

pub fn roomy_ring() -> RingOptions {
    RingOptions::with_capacity(256 * 1024)
        .with_pages(PageOptions {
            data_page_size: 4096,
            index_page_size: 1024,
        })
        .with_reclaim_margin(0)
        .with_reclaim_interval(Duration::from_millis(100))
}

pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Total size of all regular files below `dir`, excluding the lock file.
pub fn footprint(dir: &Path) -> u64 {
    let mut total = 0;
    for entry in std::fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let meta = entry.metadata().unwrap();
        if meta.is_dir() {
            total += footprint(&entry.path());
        } else if entry.file_name() != "lock" {
            total += meta.len();
        }
    }
    total
}

/// In-memory log sink for asserting on emitted events.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Route this thread's events here until the guard is dropped.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
