//! PROXY protocol v2 decoding and encoding.
//!
//! # Wire Layout
//! ```text
//! ┌──────────────┬─────────┬─────────┬──────────┬───────────────────┐
//! │ signature 12 │ ver/cmd │ fam/prt │ len BE16 │ address block len │
//! └──────────────┴─────────┴─────────┴──────────┴───────────────────┘
//! IPv4 block: src(4) dst(4) src_port(2) dst_port(2), then optional TLVs
//! IPv6 block: src(16) dst(16) src_port(2) dst_port(2), then optional TLVs
//! ```
//!
//! The decoder reads no further than the announced header. Streams that do
//! not start with the signature are treated as direct connections; the bytes
//! consumed while probing are handed back for replay into the pipeline.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Fixed v2 signature.
pub const SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

const VERSION: u8 = 0x2;
const FAMILY_UNSPEC: u8 = 0x0;
const FAMILY_INET: u8 = 0x1;
const FAMILY_INET6: u8 = 0x2;
const FAMILY_UNIX: u8 = 0x3;
const TRANSPORT_STREAM: u8 = 0x1;
const INET_BLOCK_LEN: usize = 12;
const INET6_BLOCK_LEN: usize = 36;

#[derive(Debug, Error)]
pub enum ProxyProtocolError {
    #[error("failed reading proxy header: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported proxy protocol version {0:#x}")]
    UnsupportedVersion(u8),

    #[error("invalid proxy command {0:#x}")]
    InvalidCommand(u8),

    #[error("unsupported address family {0:#x}")]
    UnsupportedFamily(u8),

    #[error("address block of {actual} bytes is too short for family {family:#x} (need {expected})")]
    AddressBlockTooShort {
        family: u8,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyCommand {
    /// Health check or proxy-originated connection; keep the socket address.
    Local,
    /// Relayed connection; the header carries the real client.
    Proxy,
}

/// A decoded (or to-be-encoded) v2 header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyHeader {
    pub command: ProxyCommand,
    /// Original client endpoint, absent for UNSPEC.
    pub source: Option<SocketAddr>,
    /// Endpoint the client connected to on the proxy, absent for UNSPEC.
    pub destination: Option<SocketAddr>,
}

impl ProxyHeader {
    /// A PROXY header relaying `source` through `destination`.
    pub fn proxy(source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            command: ProxyCommand::Proxy,
            source: Some(source),
            destination: Some(destination),
        }
    }

    /// A LOCAL header with no address block.
    pub fn local() -> Self {
        Self {
            command: ProxyCommand::Local,
            source: None,
            destination: None,
        }
    }

    /// Serialize to wire form. Mixed address families are encoded as IPv6.
    pub fn encode(&self) -> Bytes {
        let command = match self.command {
            ProxyCommand::Local => 0x0,
            ProxyCommand::Proxy => 0x1,
        };

        let mut buf = BytesMut::with_capacity(SIGNATURE.len() + 4 + INET6_BLOCK_LEN);
        buf.put_slice(&SIGNATURE);
        buf.put_u8((VERSION << 4) | command);

        match (self.source, self.destination) {
            (Some(SocketAddr::V4(src)), Some(SocketAddr::V4(dst))) => {
                buf.put_u8((FAMILY_INET << 4) | TRANSPORT_STREAM);
                buf.put_u16(INET_BLOCK_LEN as u16);
                buf.put_slice(&src.ip().octets());
                buf.put_slice(&dst.ip().octets());
                buf.put_u16(src.port());
                buf.put_u16(dst.port());
            }
            (Some(src), Some(dst)) => {
                buf.put_u8((FAMILY_INET6 << 4) | TRANSPORT_STREAM);
                buf.put_u16(INET6_BLOCK_LEN as u16);
                buf.put_slice(&as_ipv6(src.ip()).octets());
                buf.put_slice(&as_ipv6(dst.ip()).octets());
                buf.put_u16(src.port());
                buf.put_u16(dst.port());
            }
            _ => {
                buf.put_u8(FAMILY_UNSPEC << 4);
                buf.put_u16(0);
            }
        }

        buf.freeze()
    }
}

/// Result of probing a freshly accepted stream.
#[derive(Debug)]
pub struct ProxyOutcome {
    /// Effective remote endpoint for the session.
    pub remote: SocketAddr,
    /// The decoded header, when one was present.
    pub header: Option<ProxyHeader>,
    /// Bytes consumed while probing that belong to the application stream.
    pub replay: Bytes,
}

/// Decode an optional v2 header from the front of `reader`.
///
/// `peer` is the socket-reported address, used for direct connections,
/// LOCAL commands and UNSPEC families.
pub async fn read_proxy_header<R>(
    reader: &mut R,
    peer: SocketAddr,
) -> Result<ProxyOutcome, ProxyProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut probe = [0u8; SIGNATURE.len()];
    let mut filled = 0;

    while filled < SIGNATURE.len() {
        let n = reader.read(&mut probe[filled..]).await?;
        if n == 0 || probe[filled..filled + n] != SIGNATURE[filled..filled + n] {
            return Ok(ProxyOutcome {
                remote: peer,
                header: None,
                replay: Bytes::copy_from_slice(&probe[..filled + n]),
            });
        }
        filled += n;
    }

    let mut fixed = [0u8; 4];
    reader.read_exact(&mut fixed).await?;

    let version = fixed[0] >> 4;
    if version != VERSION {
        return Err(ProxyProtocolError::UnsupportedVersion(version));
    }
    let command = match fixed[0] & 0x0F {
        0x0 => ProxyCommand::Local,
        0x1 => ProxyCommand::Proxy,
        other => return Err(ProxyProtocolError::InvalidCommand(other)),
    };
    let family = fixed[1] >> 4;
    let block_len = u16::from_be_bytes([fixed[2], fixed[3]]) as usize;

    let mut block = vec![0u8; block_len];
    reader.read_exact(&mut block).await?;

    let (source, destination) = match family {
        FAMILY_UNSPEC => (None, None),
        FAMILY_INET => {
            require_len(family, INET_BLOCK_LEN, &block)?;
            let src = Ipv4Addr::new(block[0], block[1], block[2], block[3]);
            let dst = Ipv4Addr::new(block[4], block[5], block[6], block[7]);
            let src_port = u16::from_be_bytes([block[8], block[9]]);
            let dst_port = u16::from_be_bytes([block[10], block[11]]);
            (
                Some(SocketAddr::new(IpAddr::V4(src), src_port)),
                Some(SocketAddr::new(IpAddr::V4(dst), dst_port)),
            )
        }
        FAMILY_INET6 => {
            require_len(family, INET6_BLOCK_LEN, &block)?;
            let src = ipv6_at(&block[0..16]);
            let dst = ipv6_at(&block[16..32]);
            let src_port = u16::from_be_bytes([block[32], block[33]]);
            let dst_port = u16::from_be_bytes([block[34], block[35]]);
            (
                Some(SocketAddr::new(src.to_canonical(), src_port)),
                Some(SocketAddr::new(dst.to_canonical(), dst_port)),
            )
        }
        FAMILY_UNIX => return Err(ProxyProtocolError::UnsupportedFamily(family)),
        other => return Err(ProxyProtocolError::UnsupportedFamily(other)),
    };

    let remote = match (command, source) {
        (ProxyCommand::Proxy, Some(source)) => source,
        _ => peer,
    };

    Ok(ProxyOutcome {
        remote,
        header: Some(ProxyHeader {
            command,
            source,
            destination,
        }),
        replay: Bytes::new(),
    })
}

fn require_len(family: u8, expected: usize, block: &[u8]) -> Result<(), ProxyProtocolError> {
    if block.len() < expected {
        return Err(ProxyProtocolError::AddressBlockTooShort {
            family,
            expected,
            actual: block.len(),
        });
    }
    Ok(())
}

fn ipv6_at(bytes: &[u8]) -> IpAddr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(bytes);
    IpAddr::V6(Ipv6Addr::from(octets))
}

fn as_ipv6(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}
