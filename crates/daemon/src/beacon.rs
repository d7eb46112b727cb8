//! UDP link-local beacon: advertise membership on the mesh interface and
//! learn the set of reachable peers.
//!
//! Standardizes on subnet-broadcast (`SO_BROADCAST` on a UDP4 socket,
//! destination = the interface's computed broadcast address) rather than
//! multicast — see SPEC_FULL.md Open Question 1. This requires no multicast
//! routing configuration on the host and matches the majority of deployments
//! this was modeled on.

use meshd_common::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Resolve the IPv4 address and broadcast address of the named interface.
pub fn interface_addresses(interface: &str) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let addrs = if_addrs::get_if_addrs()
        .map_err(|e| Error::Transient(format!("enumerating interfaces failed: {e}")))?;
    for iface in addrs {
        if iface.name != interface {
            continue;
        }
        if let if_addrs::IfAddr::V4(v4) = iface.addr {
            let broadcast = v4.broadcast.unwrap_or_else(|| {
                let ip = u32::from(v4.ip);
                let mask = u32::from(v4.netmask);
                Ipv4Addr::from(ip | !mask)
            });
            return Ok((v4.ip, broadcast));
        }
    }
    Err(Error::Transient(format!(
        "interface {interface} has no IPv4 address"
    )))
}

/// Bind a UDP4 socket on `bind_ip:port` with `SO_BROADCAST` and
/// `SO_REUSEADDR` set, retrying forever with a fixed back-off until the bind
/// succeeds or `token` is cancelled.
async fn bind_with_retry(
    bind_ip: Ipv4Addr,
    port: u16,
    token: &CancellationToken,
) -> Result<UdpSocket> {
    let backoff = Duration::from_secs(2);
    loop {
        match try_bind(bind_ip, port) {
            Ok(socket) => return Ok(socket),
            Err(e) => {
                warn!(%e, %bind_ip, port, "beacon socket bind failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => continue,
                    _ = token.cancelled() => {
                        return Err(Error::Transient("beacon bind cancelled".to_string()));
                    }
                }
            }
        }
    }
}

fn try_bind(bind_ip: Ipv4Addr, port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(bind_ip, port).into())?;
    UdpSocket::from_std(socket.into()).map_err(Error::Io)
}

/// Spawn the announce + listen loop for one mesh interface. Returns a
/// channel of beacon source addresses, already filtered against `payload`.
/// The channel closes when `token` is cancelled.
pub async fn run(
    interface: &str,
    port: u16,
    payload: &'static [u8],
    keepalive: Duration,
    buffer_size: usize,
    token: CancellationToken,
) -> Result<mpsc::Receiver<SocketAddr>> {
    let (bind_ip, broadcast_ip) = interface_addresses(interface)?;
    let socket = bind_with_retry(bind_ip, port, &token).await?;
    let socket = std::sync::Arc::new(socket);
    let dest = SocketAddr::V4(SocketAddrV4::new(broadcast_ip, port));

    let (tx, rx) = mpsc::channel(64);

    let announce_socket = socket.clone();
    let announce_token = token.clone();
    tokio::spawn(async move {
        loop {
            if let Err(e) = announce_socket.send_to(payload, dest).await {
                warn!(%e, "beacon announce send failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(keepalive) => {}
                _ = announce_token.cancelled() => return,
            }
        }
    });

    let listen_socket = socket;
    let listen_token = token;
    tokio::spawn(async move {
        let mut buf = vec![0u8; buffer_size];
        loop {
            tokio::select! {
                result = listen_socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, src)) => {
                            if &buf[..n] == payload {
                                if tx.send(src).await.is_err() {
                                    return;
                                }
                            } else {
                                debug!(%src, "dropped non-matching beacon payload");
                            }
                        }
                        Err(e) => warn!(%e, "beacon recv failed"),
                    }
                }
                _ = listen_token.cancelled() => return,
            }
        }
    });

    Ok(rx)
}

/// A discovery transition derived from the raw beacon stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Discovered(SocketAddr),
    Updated(SocketAddr),
    Removed(SocketAddr),
}

/// Turn a raw beacon-address stream into discovery transitions, tracking
/// last-seen time per address and sweeping stale entries every half
/// keepalive.
pub fn discover(
    mut beacons: mpsc::Receiver<SocketAddr>,
    keepalive: Duration,
    token: CancellationToken,
) -> mpsc::Receiver<DiscoveryEvent> {
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let mut last_seen: HashMap<SocketAddr, tokio::time::Instant> = HashMap::new();
        let mut sweep = tokio::time::interval(keepalive / 2);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_addr = beacons.recv() => {
                    let Some(addr) = maybe_addr else { return };
                    let now = tokio::time::Instant::now();
                    let event = if last_seen.insert(addr, now).is_some() {
                        DiscoveryEvent::Updated(addr)
                    } else {
                        DiscoveryEvent::Discovered(addr)
                    };
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                _ = sweep.tick() => {
                    let now = tokio::time::Instant::now();
                    let stale: Vec<SocketAddr> = last_seen
                        .iter()
                        .filter(|(_, seen)| now.duration_since(**seen) >= keepalive)
                        .map(|(addr, _)| *addr)
                        .collect();
                    for addr in stale {
                        last_seen.remove(&addr);
                        if tx.send(DiscoveryEvent::Removed(addr)).await.is_err() {
                            return;
                        }
                    }
                }
                _ = token.cancelled() => return,
            }
        }
    });

    rx
}

/// Spawn one task per `Discovered` address via `spawn_fn`, cancel it on
/// `Removed`, and guarantee at most one task per address at a time.
pub fn track_peers<F>(
    mut events: mpsc::Receiver<DiscoveryEvent>,
    token: CancellationToken,
    spawn_fn: F,
) where
    F: Fn(SocketAddr, CancellationToken) + Send + 'static,
{
    tokio::spawn(async move {
        let mut tasks: HashMap<SocketAddr, CancellationToken> = HashMap::new();
        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else { break };
                    match event {
                        DiscoveryEvent::Discovered(addr) => {
                            if tasks.contains_key(&addr) {
                                continue;
                            }
                            let child = token.child_token();
                            spawn_fn(addr, child.clone());
                            tasks.insert(addr, child);
                        }
                        DiscoveryEvent::Updated(_) => {}
                        DiscoveryEvent::Removed(addr) => {
                            if let Some(child) = tasks.remove(&addr) {
                                child.cancel();
                            }
                        }
                    }
                }
                _ = token.cancelled() => break,
            }
        }
        for (_, child) in tasks {
            child.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(octet: u8) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, octet), 2655))
    }

    #[tokio::test]
    async fn discovery_lifecycle_discovered_updated_removed() {
        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let mut events = discover(rx, Duration::from_millis(120), token.clone());

        let a = addr(5);
        tx.send(a).await.unwrap();
        assert_eq!(events.recv().await, Some(DiscoveryEvent::Discovered(a)));

        tx.send(a).await.unwrap();
        assert_eq!(events.recv().await, Some(DiscoveryEvent::Updated(a)));

        let removed = tokio::time::timeout(Duration::from_millis(500), events.recv())
            .await
            .expect("expected a Removed event before the timeout");
        assert_eq!(removed, Some(DiscoveryEvent::Removed(a)));

        token.cancel();
    }

    #[tokio::test]
    async fn removed_never_precedes_discovered() {
        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let mut events = discover(rx, Duration::from_millis(100), token.clone());
        drop(tx);

        let mut seen_discovered = false;
        while let Some(event) = events.recv().await {
            match event {
                DiscoveryEvent::Discovered(_) => seen_discovered = true,
                DiscoveryEvent::Removed(_) => assert!(seen_discovered, "Removed before Discovered"),
                DiscoveryEvent::Updated(_) => {}
            }
        }
    }

    #[tokio::test]
    async fn track_peers_spawns_once_and_cancels_on_remove() {
        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let spawned = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let cancelled = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let spawned2 = spawned.clone();
        let cancelled2 = cancelled.clone();
        track_peers(rx, token.clone(), move |_addr, child| {
            spawned2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let cancelled3 = cancelled2.clone();
            tokio::spawn(async move {
                child.cancelled().await;
                cancelled3.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });
        });

        let a = addr(9);
        tx.send(DiscoveryEvent::Discovered(a)).await.unwrap();
        tx.send(DiscoveryEvent::Discovered(a)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(spawned.load(std::sync::atomic::Ordering::SeqCst), 1);

        tx.send(DiscoveryEvent::Removed(a)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cancelled.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
