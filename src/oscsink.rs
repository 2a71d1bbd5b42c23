use std::net::{SocketAddr, UdpSocket};

use rosc::{encoder, OscMessage, OscPacket, OscType};

use crate::transport::{FrameSink, TransportError};

pub const FRAME_ADDR: &str = "/strand/frame";

/// Stream subscriber that forwards every WS2812 payload as an OSC blob.
pub struct OscStreamSink {
    sock: UdpSocket,
    target_addr: SocketAddr,
}

impl OscStreamSink {
    pub fn new(target_addr: SocketAddr) -> Result<Self, TransportError> {
        let our_addr = SocketAddr::from(([0, 0, 0, 0], 0));
        let sock = UdpSocket::bind(our_addr)?;

        Ok(OscStreamSink { sock, target_addr })
    }
}

impl FrameSink for OscStreamSink {
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let msg_buf = encoder::encode(&OscPacket::Message(OscMessage {
            addr: FRAME_ADDR.to_string(),
            args: vec![OscType::Blob(payload.to_vec())],
        }))
        .map_err(|err| TransportError::Encode(format!("{:?}", err)))?;
        self.sock.send_to(&msg_buf, self.target_addr)?;
        Ok(())
    }
}
