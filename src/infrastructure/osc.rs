//! OSC UDP emitter
//!
//! One datagram per parameter, fire-and-forget. The socket is non-blocking so
//! a full send buffer drops the message instead of stalling the session.

use crate::domain::error::EmitError;
use crate::domain::parameters::{OscParameter, OscValue, ParameterSnapshot};
use crate::session::ParameterSink;
use rosc::{encoder, OscMessage, OscPacket, OscType};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use tracing::{debug, info, warn};

impl From<OscValue> for OscType {
    fn from(value: OscValue) -> Self {
        match value {
            OscValue::Float(v) => OscType::Float(v),
            OscValue::Int(v) => OscType::Int(v),
            OscValue::Bool(v) => OscType::Bool(v),
        }
    }
}

/// Encode one parameter as a single-argument OSC message
pub fn encode_parameter(parameter: &OscParameter) -> Result<Vec<u8>, EmitError> {
    let packet = OscPacket::Message(OscMessage {
        addr: parameter.address.to_string(),
        args: vec![parameter.value.into()],
    });
    encoder::encode(&packet).map_err(|e| EmitError::Encode(format!("{:?}", e)))
}

pub struct OscEmitter {
    socket: Option<UdpSocket>,
    target: SocketAddr,
}

impl OscEmitter {
    /// Bind an ephemeral local port for sending to `target` ("host:port")
    pub fn new(target: &str) -> Result<Self, EmitError> {
        let target = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("OSC target {} did not resolve", target),
                )
            })?;

        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;

        info!("OSC emitter sending to {}", target);
        Ok(Self {
            socket: Some(socket),
            target,
        })
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn send(&self, socket: &UdpSocket, parameter: &OscParameter) -> Result<(), EmitError> {
        let bytes = encode_parameter(parameter)?;
        socket.send_to(&bytes, self.target)?;
        Ok(())
    }
}

impl ParameterSink for OscEmitter {
    fn emit(&mut self, snapshot: &ParameterSnapshot) -> Result<(), EmitError> {
        let Some(socket) = &self.socket else {
            return Err(EmitError::Closed);
        };

        let mut first_error = None;
        for parameter in &snapshot.parameters {
            match self.send(socket, parameter) {
                Ok(()) => debug!("OSC {} = {:?}", parameter.address, parameter.value),
                Err(e) => {
                    warn!("Failed to send {}: {}", parameter.address, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            info!("OSC socket closed");
        }
    }
}
