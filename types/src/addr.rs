//! Service address of a masternode (IP + port).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use crate::{NetworkId, TypeError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceAddr {
    pub ip: IpAddr,
    pub port: u16,
}

impl ServiceAddr {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn v4(a: u8, b: u8, c: u8, d: u8, port: u16) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::new(a, b, c, d)), port)
    }

    pub fn is_ipv4(&self) -> bool {
        self.ip.is_ipv4()
    }

    pub fn is_local(&self) -> bool {
        self.ip.is_loopback() || self.ip.is_unspecified()
    }

    /// Private-range (RFC 1918) or local address.
    pub fn is_lan(&self) -> bool {
        match self.ip {
            IpAddr::V4(v4) => v4.is_private() || self.is_local(),
            IpAddr::V6(_) => self.is_local(),
        }
    }

    /// Publicly routable: not private, loopback, link-local, broadcast,
    /// documentation or unspecified.
    pub fn is_routable(&self) -> bool {
        match self.ip {
            IpAddr::V4(v4) => {
                !(v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_broadcast()
                    || v4.is_documentation()
                    || v4.is_unspecified())
            }
            IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified()),
        }
    }

    /// Address rule for announcing a masternode. The dev network accepts
    /// anything.
    pub fn is_valid_for(&self, network: NetworkId) -> bool {
        network == NetworkId::Dev || (self.is_ipv4() && self.is_routable())
    }

    /// Serialized form used inside signing payloads.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = match self.ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        out.extend_from_slice(&self.port.to_be_bytes());
        out
    }
}

impl From<SocketAddr> for ServiceAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for ServiceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", SocketAddr::new(self.ip, self.port))
    }
}

impl FromStr for ServiceAddr {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>()
            .map(Self::from)
            .map_err(|_| TypeError::InvalidAddress(s.to_string()))
    }
}
