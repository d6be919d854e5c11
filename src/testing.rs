//! Test doubles for the bridge.
//!
//! - [`MockTransport`]: scripted scan results and connect outcomes
//! - [`MockLink`]: scripted reads, recorded writes, idle heartbeat frames
//! - [`MockPipes`]: in-memory pipe paths with queued command lines
//! - [`Harness`]: a [`BridgeContext`] wired to the mocks plus its event stream

use crate::bridge::session::SessionManager;
use crate::bridge::BridgeContext;
use crate::domain::models::{Advertisement, BleAddress, BridgeEvent, StopReason};
use crate::domain::registry::DeviceRegistry;
use crate::domain::settings::{DeviceSettings, Settings};
use crate::infrastructure::bluetooth::{BleError, BleTransport, GattLink};
use crate::infrastructure::pipe::{LineSink, LineSource, PipeChannels};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default telemetry characteristic.
pub const RX: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);
/// Default command characteristic.
pub const TX: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);

pub fn advert(name: &str, address: &str) -> Advertisement {
    Advertisement {
        name: name.to_string(),
        address: address.parse().unwrap(),
    }
}

/// Virtual-clock timers may land a tick late.
pub fn assert_near(actual: Duration, expected: Duration) {
    let slack = Duration::from_millis(50);
    assert!(
        actual >= expected && actual <= expected + slack,
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

/// Operation log shared by a transport and the links it hands out.
#[derive(Debug, Default)]
pub struct OpLog {
    ops: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl OpLog {
    fn record(&self, op: &str) {
        self.ops.lock().unwrap().push(op.to_string());
    }

    fn opened(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockLink {
    log: Arc<OpLog>,
    reads: Mutex<VecDeque<Result<Vec<u8>, BleError>>>,
    read_counts: Mutex<HashMap<Uuid, usize>>,
    hang_reads: AtomicBool,
    write_results: Mutex<VecDeque<Result<(), BleError>>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>, bool)>>,
    disconnected: AtomicBool,
    late_ops: Mutex<Vec<String>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::with_log(Arc::default())
    }

    fn with_log(log: Arc<OpLog>) -> Self {
        Self {
            log,
            reads: Mutex::default(),
            read_counts: Mutex::default(),
            hang_reads: AtomicBool::new(false),
            write_results: Mutex::default(),
            writes: Mutex::default(),
            disconnected: AtomicBool::new(false),
            late_ops: Mutex::default(),
        }
    }

    /// Queue a read result. With the queue empty, reads return an all-zero frame.
    pub fn push_read(&self, result: Result<Vec<u8>, BleError>) {
        self.reads.lock().unwrap().push_back(result);
    }

    /// Reads with an empty queue never complete.
    pub fn hang_reads(&self) {
        self.hang_reads.store(true, Ordering::SeqCst);
    }

    /// Queue a write result. With the queue empty, writes succeed.
    pub fn push_write_result(&self, result: Result<(), BleError>) {
        self.write_results.lock().unwrap().push_back(result);
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>, bool)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn reads_of(&self, characteristic: Uuid) -> usize {
        self.read_counts
            .lock()
            .unwrap()
            .get(&characteristic)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Attribute accesses made after `disconnect`.
    pub fn late_ops(&self) -> Vec<String> {
        self.late_ops.lock().unwrap().clone()
    }

    fn touch(&self, op: &str) {
        if self.is_disconnected() {
            self.late_ops.lock().unwrap().push(op.to_string());
        }
        self.log.record(op);
    }
}

#[async_trait]
impl GattLink for MockLink {
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, BleError> {
        self.touch("read");
        *self
            .read_counts
            .lock()
            .unwrap()
            .entry(characteristic)
            .or_default() += 1;

        let next = self.reads.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None if self.hang_reads.load(Ordering::SeqCst) => std::future::pending().await,
            None => Ok(vec![0u8; 12]),
        }
    }

    async fn write(
        &self,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), BleError> {
        self.touch("write");
        let result = self
            .write_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        if result.is_ok() {
            self.writes
                .lock()
                .unwrap()
                .push((characteristic, data.to_vec(), with_response));
        }
        result
    }

    async fn disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            self.log.record("disconnect");
            self.log.closed();
        }
    }
}

#[derive(Default)]
pub struct MockTransport {
    log: Arc<OpLog>,
    scans: Mutex<VecDeque<Result<Vec<Advertisement>, BleError>>>,
    scan_calls: AtomicUsize,
    connects: Mutex<VecDeque<Result<Arc<MockLink>, BleError>>>,
    connected: Mutex<Vec<BleAddress>>,
    connect_calls: AtomicUsize,
    hang_connects: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A link that reports into this transport's operation log.
    pub fn link(&self) -> Arc<MockLink> {
        Arc::new(MockLink::with_log(Arc::clone(&self.log)))
    }

    /// Queue a scan result. With the queue empty, scans find nothing.
    pub fn push_scan(&self, result: Result<Vec<Advertisement>, BleError>) {
        self.scans.lock().unwrap().push_back(result);
    }

    /// Queue a connect outcome. With the queue empty, connects are refused.
    pub fn push_connect(&self, result: Result<Arc<MockLink>, BleError>) {
        self.connects.lock().unwrap().push_back(result);
    }

    pub fn hang_connects(&self) {
        self.hang_connects.store(true, Ordering::SeqCst);
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Addresses of successful connects, in order.
    pub fn connected(&self) -> Vec<BleAddress> {
        self.connected.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.log.max_active.load(Ordering::SeqCst)
    }

    pub fn ops(&self) -> Vec<String> {
        self.log.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    async fn scan(&self) -> Result<Vec<Advertisement>, BleError> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.scans.lock().unwrap().pop_front();
        next.unwrap_or(Ok(Vec::new()))
    }

    async fn connect(&self, address: BleAddress) -> Result<Arc<dyn GattLink>, BleError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_connects.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }

        let next = self.connects.lock().unwrap().pop_front();
        match next {
            Some(Ok(link)) => {
                self.log.record("connect");
                self.log.opened();
                self.connected.lock().unwrap().push(address);
                Ok(link as Arc<dyn GattLink>)
            }
            Some(Err(e)) => Err(e),
            None => Err(BleError::Connect {
                address,
                reason: "refused".into(),
            }),
        }
    }
}

#[derive(Default)]
pub struct MockPipes {
    paths: Mutex<HashSet<String>>,
    queued: Mutex<HashMap<String, VecDeque<Option<String>>>>,
    written: Arc<Mutex<HashMap<String, Vec<String>>>>,
    failing_writes: Mutex<HashMap<String, usize>>,
    failing_reads: Mutex<HashMap<String, usize>>,
    hanging_writes: Mutex<HashSet<String>>,
}

impl MockPipes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_path(&self, path: &str) {
        self.paths.lock().unwrap().insert(path.to_string());
    }

    pub fn remove_path(&self, path: &str) {
        self.paths.lock().unwrap().remove(path);
    }

    /// Queue a line for the next `open_read` of `path`.
    pub fn push_line(&self, path: &str, line: &str) {
        self.push(path, Some(line.to_string()));
    }

    /// Queue an end-of-data for the next `open_read` of `path`.
    pub fn push_eof(&self, path: &str) {
        self.push(path, None);
    }

    fn push(&self, path: &str, item: Option<String>) {
        self.queued
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(item);
    }

    /// Make the next `count` opens for write on `path` fail.
    pub fn fail_writes(&self, path: &str, count: usize) {
        self.failing_writes
            .lock()
            .unwrap()
            .insert(path.to_string(), count);
    }

    /// Make the next `count` opens for read on `path` fail.
    pub fn fail_reads(&self, path: &str, count: usize) {
        self.failing_reads
            .lock()
            .unwrap()
            .insert(path.to_string(), count);
    }

    /// Opens for write on `path` never complete, like a host that stopped accepting.
    pub fn hang_writes(&self, path: &str) {
        self.hanging_writes.lock().unwrap().insert(path.to_string());
    }

    pub fn written(&self, path: &str) -> Vec<String> {
        self.written
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    fn check(&self, path: &str) -> io::Result<()> {
        if self.exists(path) {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, path.to_string()))
        }
    }
}

/// Consume one pending failure for `path`, if any are left.
fn take_failure(failures: &Mutex<HashMap<String, usize>>, path: &str) -> bool {
    match failures.lock().unwrap().get_mut(path) {
        Some(left) if *left > 0 => {
            *left -= 1;
            true
        }
        _ => false,
    }
}

struct QueuedSource(Option<Option<String>>);

#[async_trait]
impl LineSource for QueuedSource {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        match self.0.take() {
            Some(item) => Ok(item),
            // Nothing queued: block like an idle pipe
            None => std::future::pending().await,
        }
    }
}

struct RecordingSink {
    path: String,
    written: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

#[async_trait]
impl LineSink for RecordingSink {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.written
            .lock()
            .unwrap()
            .entry(self.path.clone())
            .or_default()
            .push(line.to_string());
        Ok(())
    }
}

#[async_trait]
impl PipeChannels for MockPipes {
    fn exists(&self, path: &str) -> bool {
        self.paths.lock().unwrap().contains(path)
    }

    async fn open_read(&self, path: &str) -> io::Result<Box<dyn LineSource>> {
        self.check(path)?;
        if take_failure(&self.failing_reads, path) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "no writer"));
        }
        let next = self
            .queued
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(VecDeque::pop_front);
        Ok(Box::new(QueuedSource(next)))
    }

    async fn open_write(&self, path: &str) -> io::Result<Box<dyn LineSink>> {
        self.check(path)?;
        if take_failure(&self.failing_writes, path) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "no reader"));
        }
        let hang = self.hanging_writes.lock().unwrap().contains(path);
        if hang {
            return std::future::pending().await;
        }
        Ok(Box::new(RecordingSink {
            path: path.to_string(),
            written: Arc::clone(&self.written),
        }))
    }
}

/// Bridge context over mocks with the default two glove roles, all pipes present.
pub struct Harness {
    pub ctx: Arc<BridgeContext>,
    pub transport: Arc<MockTransport>,
    pub pipes: Arc<MockPipes>,
    pub events: mpsc::UnboundedReceiver<BridgeEvent>,
}

impl Harness {
    pub fn new() -> Self {
        let settings = Settings::default();
        let registry = Arc::new(DeviceRegistry::from_devices(&settings.devices).unwrap());
        let transport = Arc::new(MockTransport::new());
        let pipes = Arc::new(MockPipes::new());
        for device in &settings.devices {
            pipes.add_path(&device.inbound_pipe);
            pipes.add_path(&device.outbound_pipe);
        }

        let (tx, events) = mpsc::unbounded_channel();
        let ctx = Arc::new(BridgeContext::new(
            &settings,
            registry,
            Arc::clone(&transport) as Arc<dyn BleTransport>,
            Arc::clone(&pipes) as Arc<dyn PipeChannels>,
            tx,
            CancellationToken::new(),
        ));

        Self {
            ctx,
            transport,
            pipes,
            events,
        }
    }

    pub fn device(&self, role: &str) -> DeviceSettings {
        self.ctx.registry.entry(role).unwrap().device.clone()
    }

    pub fn spawn_manager(&self, role: &str) -> JoinHandle<StopReason> {
        tokio::spawn(SessionManager::new(Arc::clone(&self.ctx), role.to_string()).run())
    }

    /// Skip events until one matches; fails after ten virtual minutes.
    pub async fn next_event(&mut self, pred: impl Fn(&BridgeEvent) -> bool) -> BridgeEvent {
        let wait = async {
            loop {
                let event = self.events.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(600), wait)
            .await
            .expect("expected event was not published")
    }
}
