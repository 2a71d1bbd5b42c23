use std::io;
use std::net::{SocketAddr, UdpSocket};

use thiserror::Error;

use crate::encoder;
use crate::light::Light;
use crate::processor::{brightness_scale, FrameProcessor};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot encode packet: {0}")]
    Encode(String),
    #[error("subscriber is gone")]
    Closed,
}

/// A live stream subscriber. Delivery is best-effort; an error drops the
/// subscriber.
pub trait FrameSink {
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;
}

/// Keeps the destination host across restarts.
pub trait HostStore {
    fn load(&self) -> Result<Option<String>, TransportError>;
    fn store(&self, host: &str) -> Result<(), TransportError>;
}

/// The output side as seen by the runner.
pub trait Strand {
    fn emit(&mut self, lights: &[Light], fade: f64);
    fn set_host(&mut self, host: &str) -> Result<(), TransportError>;
    fn add_subscriber(&mut self, sink: Box<dyn FrameSink + Send>);
}

pub struct StrandTransport {
    sock: UdpSocket,
    host: String,
    port: u16,
    subscribers: Vec<Box<dyn FrameSink + Send>>,
    processor: FrameProcessor,
    store: Box<dyn HostStore + Send>,
}

impl StrandTransport {
    pub fn new(
        host: &str,
        port: u16,
        store: Box<dyn HostStore + Send>,
    ) -> Result<StrandTransport, TransportError> {
        let our_addr = SocketAddr::from(([0, 0, 0, 0], 0));
        let sock = UdpSocket::bind(our_addr)?;

        Ok(StrandTransport {
            sock,
            host: host.to_string(),
            port,
            subscribers: Vec::new(),
            processor: FrameProcessor::new(),
            store,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn send_legacy(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.sock
            .send_to(payload, (self.host.as_str(), self.port))?;
        Ok(())
    }

    fn broadcast(&mut self, payload: &[u8]) {
        self.subscribers.retain_mut(|sink| match sink.send(payload) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Dropping stream subscriber: {err}");
                false
            }
        });
    }
}

impl Strand for StrandTransport {
    fn emit(&mut self, lights: &[Light], fade: f64) {
        let lights = self.processor.mix(lights, fade).into_owned();
        let scale = brightness_scale(&lights);

        let legacy = encoder::encode_legacy(&lights, scale);
        if let Err(err) = self.send_legacy(&legacy) {
            log::warn!("Network error sending to {}:{}: {err}", self.host, self.port);
        }

        let ws2812 = encoder::encode_ws2812(&lights);
        self.broadcast(&ws2812);
    }

    fn set_host(&mut self, host: &str) -> Result<(), TransportError> {
        log::info!("Strand host is now {host}");
        self.host = host.to_string();
        self.store.store(host)
    }

    fn add_subscriber(&mut self, sink: Box<dyn FrameSink + Send>) {
        self.subscribers.push(sink);
        log::info!("{} stream subscriber(s)", self.subscribers.len());
    }
}
