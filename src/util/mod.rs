use std::net::IpAddr;

use systemstat::{Platform, System};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber.
///
/// Verbosity follows `RUST_LOG` and falls back to `info`. Calling it twice is
/// harmless; the second install is ignored.
pub fn init_log() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Pick an IPv4 address that can be shared with a remote ICE peer.
///
/// Iterates over all network interfaces provided by `systemstat`, skipping any
/// loopback, link-local or broadcast addresses. Returns `None` if the host
/// exposes no usable IPv4 address.
pub fn select_host_address() -> Option<IpAddr> {
    let system = System::new();
    let networks = match system.networks() {
        Ok(networks) => networks,
        Err(e) => {
            warn!("Could not list network interfaces: {}", e);
            return None;
        }
    };

    for net in networks.values() {
        for n in &net.addrs {
            if let systemstat::IpAddr::V4(v) = n.addr {
                if !v.is_loopback() && !v.is_link_local() && !v.is_broadcast() {
                    debug!(interface = %net.name, "Selected host address {}", v);
                    return Some(IpAddr::V4(v));
                }
            }
        }
    }

    None
}
