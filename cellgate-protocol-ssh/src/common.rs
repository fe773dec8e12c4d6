use std::fmt::{Display, Formatter};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ChannelError;

/// Channel-open payload of a `direct-tcpip` channel (RFC 4254 section 7.2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectTcpipParams {
    pub host_to_connect: String,
    pub port_to_connect: u32,
    pub originator_address: String,
    pub originator_port: u32,
}

fn read_string(buf: &mut &[u8], field: &'static str) -> Result<String, ChannelError> {
    if buf.remaining() < 4 {
        return Err(ChannelError::MalformedOpenPayload(field));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(ChannelError::MalformedOpenPayload(field));
    }
    let data: &[u8] = *buf;
    let (value, rest) = data.split_at(len);
    let value = std::str::from_utf8(value)
        .map_err(|_| ChannelError::MalformedOpenPayload(field))?
        .to_owned();
    *buf = rest;
    Ok(value)
}

fn read_u32(buf: &mut &[u8], field: &'static str) -> Result<u32, ChannelError> {
    if buf.remaining() < 4 {
        return Err(ChannelError::MalformedOpenPayload(field));
    }
    Ok(buf.get_u32())
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

impl DirectTcpipParams {
    pub fn parse(payload: &[u8]) -> Result<Self, ChannelError> {
        let mut buf = payload;
        let params = Self {
            host_to_connect: read_string(&mut buf, "host to connect")?,
            port_to_connect: read_u32(&mut buf, "port to connect")?,
            originator_address: read_string(&mut buf, "originator address")?,
            originator_port: read_u32(&mut buf, "originator port")?,
        };
        if buf.has_remaining() {
            return Err(ChannelError::MalformedOpenPayload("trailing data"));
        }
        Ok(params)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            16 + self.host_to_connect.len() + self.originator_address.len(),
        );
        put_string(&mut buf, &self.host_to_connect);
        buf.put_u32(self.port_to_connect);
        put_string(&mut buf, &self.originator_address);
        buf.put_u32(self.originator_port);
        buf.freeze()
    }
}

impl Display for DirectTcpipParams {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} (from {}:{})",
            self.host_to_connect, self.port_to_connect, self.originator_address, self.originator_port
        )
    }
}

/// Channel-open failure reason codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    AdministrativelyProhibited = 1,
    ConnectFailed = 2,
    UnknownChannelType = 3,
    ResourceShortage = 4,
}

impl RejectReason {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RejectReason::AdministrativelyProhibited => "administratively prohibited",
            RejectReason::ConnectFailed => "connect failed",
            RejectReason::UnknownChannelType => "unknown channel type",
            RejectReason::ResourceShortage => "resource shortage",
        };
        f.write_str(name)
    }
}

impl From<russh::ChannelOpenFailure> for RejectReason {
    fn from(value: russh::ChannelOpenFailure) -> Self {
        match value {
            russh::ChannelOpenFailure::AdministrativelyProhibited => {
                RejectReason::AdministrativelyProhibited
            }
            russh::ChannelOpenFailure::UnknownChannelType => RejectReason::UnknownChannelType,
            russh::ChannelOpenFailure::ResourceShortage => RejectReason::ResourceShortage,
            #[allow(unreachable_patterns)]
            _ => RejectReason::ConnectFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DirectTcpipParams {
        DirectTcpipParams {
            host_to_connect: "10.0.16.4".to_owned(),
            port_to_connect: 8080,
            originator_address: "127.0.0.1".to_owned(),
            originator_port: 54321,
        }
    }

    #[test]
    fn test_parse_wire_layout() {
        let mut payload = vec![];
        payload.extend_from_slice(&9u32.to_be_bytes());
        payload.extend_from_slice(b"10.0.16.4");
        payload.extend_from_slice(&8080u32.to_be_bytes());
        payload.extend_from_slice(&9u32.to_be_bytes());
        payload.extend_from_slice(b"127.0.0.1");
        payload.extend_from_slice(&54321u32.to_be_bytes());

        assert_eq!(DirectTcpipParams::parse(&payload).unwrap(), sample());
        assert_eq!(&sample().encode()[..], &payload[..]);
    }

    #[test]
    fn test_parse_rejects_truncated_payload() {
        let payload = sample().encode();
        for len in [0, 3, 8, 13, payload.len() - 1] {
            assert!(
                DirectTcpipParams::parse(&payload[..len]).is_err(),
                "accepted {len} bytes"
            );
        }
    }

    #[test]
    fn test_parse_rejects_oversized_length_prefix() {
        let mut payload = vec![];
        payload.extend_from_slice(&u32::MAX.to_be_bytes());
        payload.extend_from_slice(b"host");
        assert!(matches!(
            DirectTcpipParams::parse(&payload),
            Err(ChannelError::MalformedOpenPayload("host to connect"))
        ));
    }

    #[test]
    fn test_parse_rejects_trailing_bytes() {
        let mut payload = sample().encode().to_vec();
        payload.push(0);
        assert!(DirectTcpipParams::parse(&payload).is_err());
    }

    #[test]
    fn test_reject_reason_codes() {
        assert_eq!(RejectReason::AdministrativelyProhibited.code(), 1);
        assert_eq!(RejectReason::ConnectFailed.code(), 2);
        assert_eq!(RejectReason::UnknownChannelType.code(), 3);
        assert_eq!(RejectReason::ResourceShortage.code(), 4);
    }
}
