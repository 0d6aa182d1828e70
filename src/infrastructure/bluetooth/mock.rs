//! Scripted in-memory transport for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::infrastructure::bluetooth::error::{ControlError, ControlResult};
use crate::infrastructure::bluetooth::transport::{
    CharacteristicInfo, DiscoveredDevice, Transport,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub connection: usize,
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
    pub acknowledge: bool,
}

#[derive(Debug, Clone)]
pub struct MockConnection {
    pub id: usize,
    pub address: String,
}

#[derive(Default)]
struct Script {
    devices: Vec<DiscoveredDevice>,
    characteristics: Vec<CharacteristicInfo>,
    empty_polls: usize,
    discover_error: Option<ControlError>,
    open_error: Option<ControlError>,
    close_error: Option<ControlError>,
    list_error: Option<ControlError>,
    write_errors: usize,
    open_delay: Duration,
    close_delay: Duration,
    write_delay: Duration,
}

#[derive(Default)]
struct Calls {
    discover: usize,
    open: usize,
    close: usize,
    list: usize,
    writes: Vec<WriteRecord>,
}

#[derive(Default)]
pub struct MockTransport {
    script: Mutex<Script>,
    calls: Mutex<Calls>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a MockTransport);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single robot advertising the well-known command characteristic.
    pub fn with_device(name: &str, characteristics: Vec<CharacteristicInfo>) -> Self {
        let mock = Self::new();
        mock.add_device(Some(name), "AA:BB:CC:DD:EE:01");
        mock.set_characteristics(characteristics);
        mock
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn add_device(&self, name: Option<&str>, address: &str) {
        self.script.lock().unwrap().devices.push(DiscoveredDevice {
            name: name.map(str::to_string),
            address: address.to_string(),
        });
    }

    pub fn set_characteristics(&self, characteristics: Vec<CharacteristicInfo>) {
        self.script.lock().unwrap().characteristics = characteristics;
    }

    /// Report an empty characteristic list for the next `polls` queries.
    pub fn set_empty_polls(&self, polls: usize) {
        self.script.lock().unwrap().empty_polls = polls;
    }

    pub fn fail_discover(&self, error: ControlError) {
        self.script.lock().unwrap().discover_error = Some(error);
    }

    pub fn fail_open(&self, error: ControlError) {
        self.script.lock().unwrap().open_error = Some(error);
    }

    pub fn fail_close(&self, error: ControlError) {
        self.script.lock().unwrap().close_error = Some(error);
    }

    pub fn fail_list(&self, error: ControlError) {
        self.script.lock().unwrap().list_error = Some(error);
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.script.lock().unwrap().write_errors = count;
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.script.lock().unwrap().open_delay = delay;
    }

    pub fn set_close_delay(&self, delay: Duration) {
        self.script.lock().unwrap().close_delay = delay;
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.script.lock().unwrap().write_delay = delay;
    }

    pub fn discover_calls(&self) -> usize {
        self.calls.lock().unwrap().discover
    }

    pub fn open_calls(&self) -> usize {
        self.calls.lock().unwrap().open
    }

    pub fn close_calls(&self) -> usize {
        self.calls.lock().unwrap().close
    }

    pub fn list_calls(&self) -> usize {
        self.calls.lock().unwrap().list
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.calls.lock().unwrap().writes.clone()
    }

    /// Highest number of transport operations ever running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Connection = MockConnection;

    async fn discover(&self, _timeout: Duration) -> ControlResult<Vec<DiscoveredDevice>> {
        let _guard = self.enter();
        self.calls.lock().unwrap().discover += 1;
        let script = self.script.lock().unwrap();
        match &script.discover_error {
            Some(error) => Err(error.clone()),
            None => Ok(script.devices.clone()),
        }
    }

    async fn open(&self, address: &str) -> ControlResult<MockConnection> {
        let _guard = self.enter();
        let (delay, error) = {
            let script = self.script.lock().unwrap();
            (script.open_delay, script.open_error.clone())
        };
        let id = {
            let mut calls = self.calls.lock().unwrap();
            calls.open += 1;
            calls.open
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match error {
            Some(error) => Err(error),
            None => Ok(MockConnection {
                id,
                address: address.to_string(),
            }),
        }
    }

    async fn close(&self, _connection: &MockConnection) -> ControlResult<()> {
        let _guard = self.enter();
        self.calls.lock().unwrap().close += 1;
        let delay = self.script.lock().unwrap().close_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.script.lock().unwrap().close_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn list_characteristics(
        &self,
        _connection: &MockConnection,
    ) -> ControlResult<Vec<CharacteristicInfo>> {
        let _guard = self.enter();
        self.calls.lock().unwrap().list += 1;
        let mut script = self.script.lock().unwrap();
        if let Some(error) = &script.list_error {
            return Err(error.clone());
        }
        if script.empty_polls > 0 {
            script.empty_polls -= 1;
            return Ok(Vec::new());
        }
        Ok(script.characteristics.clone())
    }

    async fn write(
        &self,
        connection: &MockConnection,
        characteristic: Uuid,
        payload: &[u8],
        acknowledge: bool,
    ) -> ControlResult<()> {
        let _guard = self.enter();
        let delay = self.script.lock().unwrap().write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().writes.push(WriteRecord {
            connection: connection.id,
            characteristic,
            payload: payload.to_vec(),
            acknowledge,
        });
        let mut script = self.script.lock().unwrap();
        if script.write_errors > 0 {
            script.write_errors -= 1;
            return Err(ControlError::WriteFailed("GATT write rejected".into()));
        }
        Ok(())
    }
}
