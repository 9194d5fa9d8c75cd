/*!
 * Host Connectivity Probe
 *
 * Production `ConnectivitySource` backed by sysinfo's network interface
 * list. An interface counts as active when it carries at least one
 * routable address (not loopback, not link-local). Interfaces are
 * classified by name; container bridges and veth pairs are ignored since
 * they say nothing about reaching the backend.
 *
 * Kiosk images rarely ship a connectivity daemon, so changes are detected
 * by re-scanning every `interval` and emitting only when the set differs.
 */

use super::{ConnectivitySource, InterfaceClass};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::net::IpAddr;
use std::time::Duration;
use sysinfo::Networks;
use tracing::warn;

/// Polls the host's network interfaces
#[derive(Debug, Clone)]
pub struct SysinfoConnectivity {
    interval: Duration,
}

impl SysinfoConnectivity {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for SysinfoConnectivity {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl ConnectivitySource for SysinfoConnectivity {
    async fn check(&self) -> Vec<InterfaceClass> {
        scan().await
    }

    fn changes(&self) -> BoxStream<'static, Vec<InterfaceClass>> {
        let interval = self.interval;

        stream::unfold(None::<Vec<InterfaceClass>>, move |last| async move {
            loop {
                tokio::time::sleep(interval).await;
                let current = scan().await;
                if last.as_ref() != Some(&current) {
                    return Some((current.clone(), Some(current)));
                }
            }
        })
        .boxed()
    }
}

async fn scan() -> Vec<InterfaceClass> {
    match tokio::task::spawn_blocking(scan_blocking).await {
        Ok(classes) => classes,
        Err(e) => {
            // Unknown is treated as reachable so a broken probe never blocks connecting
            warn!(error = %e, "Interface scan failed");
            vec![InterfaceClass::Other]
        }
    }
}

fn scan_blocking() -> Vec<InterfaceClass> {
    let networks = Networks::new_with_refreshed_list();

    let mut classes: Vec<InterfaceClass> = networks
        .list()
        .iter()
        .filter(|(_, data)| {
            data.ip_networks()
                .iter()
                .any(|network| is_routable(&network.addr))
        })
        .filter_map(|(name, _)| classify(name))
        .collect();

    classes.sort();
    classes.dedup();

    if classes.is_empty() {
        classes.push(InterfaceClass::Unavailable);
    }
    classes
}

fn is_routable(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_link_local() && !v4.is_unspecified(),
        IpAddr::V6(v6) => {
            let link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            !v6.is_loopback() && !link_local && !v6.is_unspecified()
        }
    }
}

/// Classify an interface by name. `None` for interfaces that do not
/// indicate external connectivity (loopback, container plumbing).
pub fn classify(name: &str) -> Option<InterfaceClass> {
    let lower = name.to_ascii_lowercase();
    let starts = |prefixes: &[&str]| prefixes.iter().any(|p| lower.starts_with(p));

    let loopback = lower == "lo" || lower.starts_with("lo0") || lower.contains("loopback");
    if loopback || starts(&["docker", "veth", "br-", "virbr", "cni", "flannel"]) {
        return None;
    }

    let class = if starts(&["wl", "wi-fi", "wifi", "ath", "ra"]) || lower.contains("wireless") {
        InterfaceClass::Wifi
    } else if starts(&["eth", "en", "em", "ethernet"]) {
        InterfaceClass::Ethernet
    } else if starts(&["wwan", "rmnet", "ppp", "ccmni", "pdp_ip", "cellular"]) {
        InterfaceClass::Mobile
    } else if starts(&["tun", "tap", "wg", "utun", "ipsec", "zt", "tailscale"]) {
        InterfaceClass::Vpn
    } else {
        InterfaceClass::Other
    };

    Some(class)
}
