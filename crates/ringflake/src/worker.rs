use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use tracing::debug;

/// Assigns the worker identity of this process instance.
///
/// Called once at generator construction, and again when an intolerable
/// clock regression forces the minter to adopt a fresh identity. The
/// returned value must be non-negative and should already fit the
/// configured worker-id field; the minter still reduces oversized values
/// modulo the field maximum as a last resort.
pub trait WorkerIdAssigner {
    fn assign_worker_id(&self) -> i64;
}

/// Derives a worker id from the local IPv4 address and a service port.
///
/// The 32-bit address is concatenated with the 16-bit port into a 48-bit
/// value, then truncated to the low `worker_bits` bits. Distinct hosts (or
/// distinct ports on one host) map to distinct worker ids as long as their
/// low address/port bits differ within the field width. When no routable
/// IPv4 address can be determined the assigner yields `0`.
#[derive(Debug, Clone)]
pub struct InetWorkerIdAssigner {
    inet4_port: Option<i64>,
    worker_bits: u32,
}

impl InetWorkerIdAssigner {
    /// Resolves the local IPv4 address and captures `service_port`.
    pub fn new(worker_bits: u32, service_port: u16) -> Self {
        let inet4_port = local_ipv4()
            .map(|addr| (i64::from(u32::from(addr)) << 16) | i64::from(service_port));
        Self {
            inet4_port,
            worker_bits,
        }
    }

    /// Builds an assigner from an explicit address and port, bypassing
    /// interface discovery.
    pub fn with_address(worker_bits: u32, addr: Ipv4Addr, service_port: u16) -> Self {
        Self {
            inet4_port: Some((i64::from(u32::from(addr)) << 16) | i64::from(service_port)),
            worker_bits,
        }
    }
}

impl WorkerIdAssigner for InetWorkerIdAssigner {
    fn assign_worker_id(&self) -> i64 {
        let Some(raw) = self.inet4_port else {
            return 0;
        };
        let shift = u64::from(64 - self.worker_bits);
        let worker_id = (((raw as u64) << shift) >> shift) as i64;
        debug!(worker_id, "assigned inet worker id");
        worker_id
    }
}

/// A constant worker id, for embedders that coordinate identities
/// externally (and for tests).
#[derive(Debug, Clone, Copy)]
pub struct FixedWorkerIdAssigner(pub i64);

impl WorkerIdAssigner for FixedWorkerIdAssigner {
    fn assign_worker_id(&self) -> i64 {
        self.0
    }
}

// Learns the preferred outbound IPv4 address by opening a UDP socket
// towards a public address. No datagram is sent; the OS just picks the
// route and binds the local endpoint.
fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("198.51.100.1:80").ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(v4) if !v4.ip().is_loopback() => Some(*v4.ip()),
        _ => None,
    }
}
