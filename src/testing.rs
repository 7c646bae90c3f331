//! Scripted drivers shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::connectivity::{LinkStatus, Radio, WifiCredentials};
use crate::delivery::{DeliveryRequest, Transport, TransportResponse};
use crate::error::{ConnectionError, SensorFault, StorageError, TransportError};
use crate::sampler::{RawSample, Sensor};
use crate::storage::{Record, Storage, ERASED_BYTE, RECORD_SIZE};

/// In-memory slot device. Clones of `shared()` observe the same slots, which
/// lets a test "reboot" onto the same media.
pub struct MemoryStorage {
    records: Arc<Mutex<Vec<Record>>>,
}

impl MemoryStorage {
    pub fn new(slots: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(vec![[ERASED_BYTE; RECORD_SIZE]; slots])),
        }
    }

    pub fn shared(&self) -> Arc<Mutex<Vec<Record>>> {
        Arc::clone(&self.records)
    }

    pub fn from_shared(records: Arc<Mutex<Vec<Record>>>) -> Self {
        Self { records }
    }

    fn check(&self, slot: usize, slots: usize) -> Result<(), StorageError> {
        if slot >= slots {
            return Err(StorageError::SlotOutOfRange {
                slot,
                capacity: slots,
            });
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn slots(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    fn read(&mut self, slot: usize) -> Result<Record, StorageError> {
        let records = self.records.lock().unwrap();
        self.check(slot, records.len())?;
        Ok(records[slot])
    }

    fn write(&mut self, slot: usize, record: &Record) -> Result<(), StorageError> {
        let mut records = self.records.lock().unwrap();
        self.check(slot, records.len())?;
        records[slot] = *record;
        Ok(())
    }

    fn erase(&mut self, slot: usize) -> Result<(), StorageError> {
        self.write(slot, &[ERASED_BYTE; RECORD_SIZE])
    }
}

pub enum SensorStep {
    Sample(RawSample),
    Fault(SensorFault),
    /// Never completes
    Hang,
}

/// Sensor that plays back a fixed script. Once the script is exhausted
/// every read reports a bus fault.
pub struct ScriptedSensor {
    steps: VecDeque<SensorStep>,
}

impl ScriptedSensor {
    pub fn new(steps: Vec<SensorStep>) -> Self {
        Self {
            steps: steps.into(),
        }
    }
}

#[async_trait]
impl Sensor for ScriptedSensor {
    async fn read(&mut self, _timeout: Duration) -> Result<RawSample, SensorFault> {
        match self.steps.pop_front() {
            Some(SensorStep::Sample(raw)) => Ok(raw),
            Some(SensorStep::Fault(fault)) => Err(fault),
            Some(SensorStep::Hang) => std::future::pending().await,
            None => Err(SensorFault::Bus("script exhausted".to_string())),
        }
    }
}

/// Sensor returning the same sample forever.
pub struct SteadySensor(RawSample);

impl SteadySensor {
    pub fn new(temperature: f32, humidity: f32) -> Self {
        Self(RawSample {
            temperature,
            humidity,
        })
    }
}

#[async_trait]
impl Sensor for SteadySensor {
    async fn read(&mut self, _timeout: Duration) -> Result<RawSample, SensorFault> {
        Ok(self.0)
    }
}

enum Association {
    After(Duration),
    Never,
    Refuse(String),
}

#[derive(Clone, Copy)]
enum Link {
    Down,
    Associating,
    UpAt(Instant),
}

/// Radio whose association behaviour is fixed up front.
pub struct ScriptedRadio {
    association: Association,
    link: Mutex<Link>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl ScriptedRadio {
    fn with(association: Association) -> Self {
        Self {
            association,
            link: Mutex::new(Link::Down),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    /// Link comes up `delay` after each connect call.
    pub fn connecting_after(delay: Duration) -> Self {
        Self::with(Association::After(delay))
    }

    /// Associates forever without the link coming up.
    pub fn never_connects() -> Self {
        Self::with(Association::Never)
    }

    /// Rejects every connect call immediately.
    pub fn refusing(reason: &str) -> Self {
        Self::with(Association::Refuse(reason.to_string()))
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Simulate losing the access point.
    pub fn drop_link(&self) {
        *self.link.lock().unwrap() = Link::Down;
    }
}

#[async_trait]
impl Radio for ScriptedRadio {
    async fn connect(&mut self, _credentials: &WifiCredentials) -> Result<(), ConnectionError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let (link, result) = match &self.association {
            Association::After(delay) => (Link::UpAt(Instant::now() + *delay), Ok(())),
            Association::Never => (Link::Associating, Ok(())),
            Association::Refuse(reason) => {
                (Link::Down, Err(ConnectionError::Refused(reason.clone())))
            }
        };
        *self.link.get_mut().unwrap() = link;
        result
    }

    async fn disconnect(&mut self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        *self.link.get_mut().unwrap() = Link::Down;
    }

    fn status(&self) -> LinkStatus {
        match *self.link.lock().unwrap() {
            Link::Down => LinkStatus::Down,
            Link::Associating => LinkStatus::Associating,
            Link::UpAt(at) if Instant::now() >= at => LinkStatus::Up,
            Link::UpAt(_) => LinkStatus::Associating,
        }
    }
}

type ScriptedResult = Result<TransportResponse, TransportError>;

/// Transport that records every request and plays back scripted results.
///
/// Once the script runs out it keeps answering with the fallback status.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedResult>>,
    fallback: u16,
    requests: Mutex<Vec<(Instant, DeliveryRequest)>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<ScriptedResult>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: 200,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with `status` and an empty body.
    pub fn always(status: u16) -> Self {
        Self {
            fallback: status,
            ..Self::new(Vec::new())
        }
    }

    /// Requests seen so far, with the instant each was sent.
    pub fn requests(&self) -> Vec<(Instant, DeliveryRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: &DeliveryRequest,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((Instant::now(), request.clone()));

        match self.script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(TransportResponse {
                status: self.fallback,
                body: String::new(),
            }),
        }
    }
}
