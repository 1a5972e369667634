#![allow(dead_code)]
use std::sync::{Arc, Mutex};
use std::time::Duration;

use robo_shell_lib::serial::mock::{MockDevice, MockPorts};
use robo_shell_lib::serial::LogSink;
use robo_shell_lib::{Transport, TransportConfig};

/// Collects device log text for assertions.
#[derive(Default)]
pub struct RecordingSink(Mutex<Vec<String>>);

impl RecordingSink {
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl LogSink for RecordingSink {
    fn device_text(&self, text: &str) {
        self.0.lock().unwrap().push(text.to_string());
    }
}

pub struct Rig {
    pub device: Arc<MockDevice>,
    pub transport: Arc<Transport>,
    pub sink: Arc<RecordingSink>,
}

/// A transport wired to an in-memory device, not yet started.
pub fn rig(config: TransportConfig) -> Rig {
    let (device, opener) = MockDevice::pair(Duration::from_millis(20));
    let sink = Arc::new(RecordingSink::default());
    let ports = MockPorts::single(config.vid, config.pid);
    let transport = Transport::with_io(config, Arc::new(ports), Arc::new(opener))
        .with_sink(sink.clone());
    Rig { device, transport: Arc::new(transport), sink }
}

pub async fn started_rig() -> Rig {
    let rig = rig(TransportConfig::default());
    rig.transport.start().await.expect("start mock transport");
    rig
}
