// ABOUTME: Typed form of the direct-tcpip relay request carried when opening a sub-channel.
// ABOUTME: Encodes to and decodes from the SSH wire layout (string, uint32, string, uint32).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Originator address reported for locally accepted connections.
pub const LOCAL_ORIGINATOR: &str = "127.0.0.1";

/// Request to open a sub-channel to `host:port` on the far side of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub host: String,
    pub port: u16,
    pub originator_address: String,
    pub originator_port: u16,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayDecodeError {
    #[error("relay request truncated while reading {0}")]
    Truncated(&'static str),

    #[error("relay request field {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("relay request {field} {value} is not a valid port")]
    PortOutOfRange { field: &'static str, value: u32 },

    #[error("relay request has {0} trailing bytes")]
    TrailingBytes(usize),
}

impl RelayRequest {
    /// Request for a connection accepted on the local listener. The originator
    /// port is unknown and reported as 0.
    pub fn from_local(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            originator_address: LOCAL_ORIGINATOR.to_string(),
            originator_port: 0,
        }
    }

    /// Serialize the channel-specific part of a `direct-tcpip` open message.
    ///
    /// Live channels are opened through russh, which writes these same fields
    /// itself from [`Session::open_relay`](super::Session::open_relay); this
    /// routine and [`RelayRequest::decode`] give the exact payload for inspection
    /// and for checking requests captured off the wire.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            16 + self.host.len() + self.originator_address.len(),
        );
        put_string(&mut buf, &self.host);
        buf.put_u32(u32::from(self.port));
        put_string(&mut buf, &self.originator_address);
        buf.put_u32(u32::from(self.originator_port));
        buf.freeze()
    }

    /// Parse a payload produced by [`RelayRequest::encode`], rejecting truncated
    /// input, non-UTF-8 strings, ports above 65535 and trailing bytes.
    pub fn decode(mut data: &[u8]) -> Result<Self, RelayDecodeError> {
        let host = get_string(&mut data, "host")?;
        let port = get_port(&mut data, "port")?;
        let originator_address = get_string(&mut data, "originator address")?;
        let originator_port = get_port(&mut data, "originator port")?;

        if data.has_remaining() {
            return Err(RelayDecodeError::TrailingBytes(data.remaining()));
        }

        Ok(Self {
            host,
            port,
            originator_address,
            originator_port,
        })
    }
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn get_string(data: &mut &[u8], field: &'static str) -> Result<String, RelayDecodeError> {
    if data.remaining() < 4 {
        return Err(RelayDecodeError::Truncated(field));
    }
    let len = data.get_u32() as usize;
    if data.remaining() < len {
        return Err(RelayDecodeError::Truncated(field));
    }
    let raw = data.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| RelayDecodeError::InvalidUtf8(field))
}

fn get_port(data: &mut &[u8], field: &'static str) -> Result<u16, RelayDecodeError> {
    if data.remaining() < 4 {
        return Err(RelayDecodeError::Truncated(field));
    }
    let value = data.get_u32();
    u16::try_from(value).map_err(|_| RelayDecodeError::PortOutOfRange { field, value })
}
