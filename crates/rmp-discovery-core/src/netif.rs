//! Local network interface lookup.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::debug;

use crate::types::normalize_hw_address;

/// An IPv4 interface address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Interface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub broadcast: Option<Ipv4Addr>,
    pub loopback: bool,
}

/// All IPv4 addresses configured on this host.
pub fn ipv4_interfaces() -> io::Result<Vec<Ipv4Interface>> {
    let interfaces = if_addrs::get_if_addrs()?
        .into_iter()
        .filter_map(|iface| {
            let loopback = iface.is_loopback();
            match iface.addr {
                if_addrs::IfAddr::V4(v4) => Some(Ipv4Interface {
                    name: iface.name,
                    ip: v4.ip,
                    broadcast: v4.broadcast,
                    loopback,
                }),
                if_addrs::IfAddr::V6(_) => None,
            }
        })
        .collect();
    Ok(interfaces)
}

/// Non-loopback IPv4 addresses, for service advertisement.
pub fn routable_ipv4_addrs() -> io::Result<Vec<Ipv4Addr>> {
    Ok(ipv4_interfaces()?
        .into_iter()
        .filter(|iface| !iface.loopback)
        .map(|iface| iface.ip)
        .collect())
}

/// Source address the kernel would pick to reach `target`.
///
/// Connecting a UDP socket sends nothing; it only resolves the route.
pub fn route_source_ip(target: SocketAddr) -> io::Result<IpAddr> {
    let bind: SocketAddr = match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind)?;
    socket.connect(target)?;
    Ok(socket.local_addr()?.ip())
}

/// Interface owning `ip`, if any.
pub fn interface_for_ip(ip: IpAddr) -> io::Result<Option<Ipv4Interface>> {
    let IpAddr::V4(ip) = ip else {
        return Ok(None);
    };
    Ok(ipv4_interfaces()?.into_iter().find(|iface| iface.ip == ip))
}

/// Hardware address of the named interface, normalized.
pub fn hardware_address(interface: &str) -> Option<String> {
    match mac_address::mac_address_by_name(interface) {
        Ok(Some(mac)) => Some(normalize_hw_address(&mac.to_string())),
        Ok(None) => {
            debug!("No MAC found for interface: {}", interface);
            None
        }
        Err(e) => {
            debug!("Error getting MAC for {}: {}", interface, e);
            None
        }
    }
}

/// Hardware address of the first interface that has one.
pub fn any_hardware_address() -> Option<String> {
    match mac_address::get_mac_address() {
        Ok(Some(mac)) => Some(normalize_hw_address(&mac.to_string())),
        _ => None,
    }
}
