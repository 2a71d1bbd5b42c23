use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::rc::Rc;

use rosc::{encoder, OscMessage, OscPacket, OscType};

use crate::transport::TransportError;

/// Outbound OSC connection handed to scripts for real-time messaging.
/// Clones share the socket.
#[derive(Clone)]
pub struct OscSender {
    sock: Rc<UdpSocket>,
    dst_addr: SocketAddr,
}

impl OscSender {
    pub fn new(dst: &str) -> Result<Self, TransportError> {
        let dst_addr = match dst.to_socket_addrs()?.next() {
            Some(addr) => addr,
            None => {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{dst} did not resolve to an address"),
                )))
            }
        };

        let src_addr = SocketAddr::from(([0, 0, 0, 0], 0));
        let sock = UdpSocket::bind(src_addr)?;

        Ok(OscSender {
            sock: Rc::new(sock),
            dst_addr,
        })
    }

    pub fn dst_addr(&self) -> SocketAddr {
        self.dst_addr
    }

    pub fn send(&self, addr: &str, args: Vec<OscType>) -> Result<(), TransportError> {
        let msg_buf = encoder::encode(&OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        }))
        .map_err(|err| TransportError::Encode(format!("{:?}", err)))?;
        self.sock.send_to(&msg_buf, self.dst_addr)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rosc::decoder;

    use super::*;

    #[test]
    fn float_message_reaches_target() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let target = receiver.local_addr().unwrap().to_string();
        let sender = OscSender::new(&target).unwrap();

        sender
            .send("/main/masterIntensity", vec![OscType::Float(0.5)])
            .unwrap();

        let mut buf = [0u8; decoder::MTU];
        let (size, _) = receiver.recv_from(&mut buf).unwrap();
        match decoder::decode(&buf[..size]).unwrap() {
            OscPacket::Message(msg) => {
                assert_eq!(msg.addr, "/main/masterIntensity");
                match &msg.args[..] {
                    [OscType::Float(v)] => assert_eq!(*v, 0.5),
                    other => panic!("Unexpected OSC arguments: {:?}", other),
                }
            }
            OscPacket::Bundle(bundle) => panic!("Unexpected bundle: {:?}", bundle),
        }
    }

    #[test]
    fn bad_target_is_rejected() {
        assert!(OscSender::new("not an address").is_err());
    }
}
