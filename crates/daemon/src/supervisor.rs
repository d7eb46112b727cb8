//! Network Supervisor: the per-network lifecycle engine.
//!
//! `Start`/`Stop` drive a `Idle -> Starting -> Running -> Stopping -> Idle`
//! state machine. The root task configures and prepares the network, then
//! races five sibling tasks (engine runner, control API, beacon/discovery/
//! peer-manager, periodic nodes scrape, privilege-drop fix-up) under one
//! child cancellation scope: whichever sibling returns first cancels the
//! rest, and the run ends.

use crate::beacon::{self, DiscoveryEvent};
use crate::config::DaemonConfig;
use crate::control_api::{self, ControlApiState};
use crate::events::{Bus, Event};
use crate::peer::{PeerManager, PeerRequest};
use crate::platform;
use crate::store::Store;
use meshd_common::model::ConfigFile;
use meshd_common::Result;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Current lifecycle state, per §4.F.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Starting,
    Running,
    Stopping,
}

struct RunHandle {
    token: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

/// Owns one network's running vpn-engine process and all sibling tasks.
/// Supervisors exclusively own their [`Store`] handle and beacon/peer-
/// manager/control-api instances (see SPEC_FULL.md §9 ownership notes).
pub struct Supervisor {
    name: String,
    store: Store,
    bus: Arc<Bus>,
    engine_binary: PathBuf,
    control_port: u16,
    beacon_port: u16,
    beacon_keepalive: Duration,
    beacon_buffer_size: usize,
    nodes_list_interval: Duration,
    status: parking_lot::RwLock<Status>,
    run: AsyncMutex<Option<RunHandle>>,
    peer_manager: parking_lot::RwLock<Option<Arc<PeerManager>>>,
}

impl Supervisor {
    pub fn new(name: String, store: Store, bus: Arc<Bus>, engine_binary: PathBuf, config: &DaemonConfig) -> Arc<Self> {
        Arc::new(Self {
            name,
            store,
            bus,
            engine_binary,
            control_port: config.control_port,
            beacon_port: config.beacon.port,
            beacon_keepalive: Duration::from_secs(config.beacon.keepalive_secs),
            beacon_buffer_size: config.beacon.buffer_size,
            nodes_list_interval: Duration::from_secs(config.nodes_list_interval_secs),
            status: parking_lot::RwLock::new(Status::Idle),
            run: AsyncMutex::new(None),
            peer_manager: parking_lot::RwLock::new(None),
        })
    }

    /// Current peers of the active run, or an empty list if not running.
    pub async fn peers(&self) -> Vec<crate::peer::PeerState> {
        let pm = self.peer_manager.read().clone();
        match pm {
            Some(pm) => pm.list().await,
            None => Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> Status {
        *self.status.read()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status(), Status::Starting | Status::Running)
    }

    /// Drive any previous run through `Stopping`, then spawn a fresh root
    /// task under a new child cancellation token.
    pub async fn start(self: &Arc<Self>, subnet: String) -> Result<()> {
        let mut slot = self.run.lock().await;
        if let Some(prev) = slot.take() {
            *self.status.write() = Status::Stopping;
            prev.token.cancel();
            let _ = prev.join.await;
        }

        *self.status.write() = Status::Starting;
        let token = CancellationToken::new();
        let child = token.clone();
        let this = self.clone();
        let join = tokio::spawn(async move {
            this.run_root(subnet, child).await;
        });
        *slot = Some(RunHandle { token, join });
        Ok(())
    }

    /// Cancel the current run's token and wait for it to finish. A no-op if
    /// already Idle.
    pub async fn stop(&self) {
        let mut slot = self.run.lock().await;
        if let Some(prev) = slot.take() {
            *self.status.write() = Status::Stopping;
            prev.token.cancel();
            let _ = prev.join.await;
        }
        *self.status.write() = Status::Idle;
    }

    async fn run_root(self: Arc<Self>, subnet: String, token: CancellationToken) {
        let mut started = false;
        let net = self.store.get(&self.name);

        if !net.is_configured().await {
            if let Err(e) = self.store.configure(&self.name, &subnet).await {
                warn!(network = %self.name, %e, "configure failed, aborting run");
                *self.status.write() = Status::Idle;
                return;
            }
        }
        if let Err(e) = self.store.prepare(&self.name).await {
            warn!(network = %self.name, %e, "prepare failed, aborting run");
            *self.status.write() = Status::Idle;
            return;
        }

        let config = match net.read_config().await {
            Ok(c) => c,
            Err(e) => {
                warn!(network = %self.name, %e, "failed to read config, aborting run");
                *self.status.write() = Status::Idle;
                return;
            }
        };
        let interface = platform::resolve_interface_name(&config);
        let mesh_ip = match Ipv4Addr::from_str(&config.ip) {
            Ok(ip) => ip,
            Err(e) => {
                warn!(network = %self.name, %e, "invalid mesh IP in config, aborting run");
                *self.status.write() = Status::Idle;
                return;
            }
        };

        let peer_manager = PeerManager::new(self.name.clone(), self.control_port, self.store.clone(), self.bus.clone());
        let (peer_tx, peer_rx) = mpsc::channel::<PeerRequest>(64);

        let rt = token.child_token();
        let ctx = Arc::new(RunContext {
            name: self.name.clone(),
            store: self.store.clone(),
            bus: self.bus.clone(),
            engine_binary: self.engine_binary.clone(),
            control_port: self.control_port,
            beacon_port: self.beacon_port,
            beacon_keepalive: self.beacon_keepalive,
            beacon_buffer_size: self.beacon_buffer_size,
            nodes_list_interval: self.nodes_list_interval,
            config,
            interface,
            mesh_ip,
            peer_manager: peer_manager.clone(),
            peer_tx: peer_tx.clone(),
        });

        *self.peer_manager.write() = Some(peer_manager.clone());

        let h1 = tokio::spawn(engine_runner(ctx.clone(), rt.clone()));
        let h2 = tokio::spawn(control_api_task(ctx.clone(), rt.clone(), peer_tx.clone()));
        let h3 = tokio::spawn(beacon_task(ctx.clone(), rt.clone()));
        let h4 = tokio::spawn(peer_manager_task(peer_manager, peer_rx, rt.clone()));
        let h5 = tokio::spawn(scrape_task(ctx.clone(), rt.clone()));
        let h6 = tokio::spawn(privilege_drop_task(ctx.clone(), rt.clone()));

        self.bus.emit(Event::Started {
            network: self.name.clone(),
        });
        started = true;
        *self.status.write() = Status::Running;

        let (_res, _idx, remaining) =
            futures::future::select_all(vec![h1, h2, h3, h4, h5, h6]).await;
        rt.cancel();
        futures::future::join_all(remaining).await;
        *self.peer_manager.write() = None;

        if started {
            self.bus.emit(Event::Stopped {
                network: self.name.clone(),
            });
        }
        *self.status.write() = Status::Idle;
    }
}

/// Shared, read-only context for the five sibling tasks of one run.
struct RunContext {
    name: String,
    store: Store,
    bus: Arc<Bus>,
    engine_binary: PathBuf,
    control_port: u16,
    beacon_port: u16,
    beacon_keepalive: Duration,
    beacon_buffer_size: usize,
    nodes_list_interval: Duration,
    config: ConfigFile,
    interface: String,
    mesh_ip: Ipv4Addr,
    peer_manager: Arc<PeerManager>,
    peer_tx: mpsc::Sender<PeerRequest>,
}

/// Execute the vpn engine subprocess; its exit ends the run.
async fn engine_runner(ctx: Arc<RunContext>, rt: CancellationToken) {
    let net = ctx.store.get(&ctx.name);
    let mut child = match tokio::process::Command::new(&ctx.engine_binary)
        .arg("-D")
        .arg("-d")
        .arg("-d")
        .arg("-d")
        .arg("--pidfile")
        .arg(net.pid_path())
        .arg("--logfile")
        .arg(net.log_path())
        .arg("-c")
        .arg(net.dir())
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::inherit())
        .stderr(std::process::Stdio::inherit())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            warn!(network = %ctx.name, %e, "failed to spawn vpn engine");
            return;
        }
    };

    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(s) => warn!(network = %ctx.name, status = %s, "vpn engine exited"),
                Err(e) => warn!(network = %ctx.name, %e, "error waiting on vpn engine"),
            }
        }
        _ = rt.cancelled() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

/// Bind and serve the Control API on the network's mesh IP, retrying the
/// bind indefinitely with a fixed back-off.
async fn control_api_task(ctx: Arc<RunContext>, rt: CancellationToken, peer_tx: mpsc::Sender<PeerRequest>) {
    let addr = SocketAddr::new(IpAddr::V4(ctx.mesh_ip), ctx.control_port);
    let state = Arc::new(ControlApiState {
        network: ctx.name.clone(),
        store: ctx.store.clone(),
        peer_tx,
        control_port: ctx.control_port,
    });
    let app = control_api::router(state);

    let backoff = Duration::from_secs(2);
    let listener = loop {
        match TcpListener::bind(addr).await {
            Ok(l) => break l,
            Err(e) => {
                warn!(network = %ctx.name, %addr, %e, "control API bind failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => continue,
                    _ = rt.cancelled() => return,
                }
            }
        }
    };

    info!(network = %ctx.name, %addr, "control API listening");
    let serve = axum::serve(listener, app).with_graceful_shutdown(rt.clone().cancelled_owned());
    if let Err(e) = serve.await {
        warn!(network = %ctx.name, %e, "control API server error");
    }
}

/// Run beacon announce/listen + discovery, translating discovery
/// transitions into peer manager add/remove requests. Restarts the beacon
/// with a 1s back-off if it fails.
async fn beacon_task(ctx: Arc<RunContext>, rt: CancellationToken) {
    loop {
        if rt.is_cancelled() {
            return;
        }
        match beacon::run(
            &ctx.interface,
            ctx.beacon_port,
            meshd_common::BEACON_PAYLOAD,
            ctx.beacon_keepalive,
            ctx.beacon_buffer_size,
            rt.child_token(),
        )
        .await
        {
            Ok(beacon_rx) => {
                let mut disc_rx = beacon::discover(beacon_rx, ctx.beacon_keepalive, rt.child_token());
                loop {
                    tokio::select! {
                        maybe_event = disc_rx.recv() => {
                            let Some(event) = maybe_event else { break };
                            forward_discovery(&ctx, event).await;
                        }
                        _ = rt.cancelled() => return,
                    }
                }
            }
            Err(e) => warn!(network = %ctx.name, %e, "beacon failed"),
        }
        if rt.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = rt.cancelled() => return,
        }
    }
}

async fn forward_discovery(ctx: &Arc<RunContext>, event: DiscoveryEvent) {
    let req = match event {
        DiscoveryEvent::Discovered(addr) => {
            Some(PeerRequest::Add(SocketAddr::new(addr.ip(), ctx.control_port)))
        }
        DiscoveryEvent::Removed(addr) => {
            Some(PeerRequest::Remove(SocketAddr::new(addr.ip(), ctx.control_port)))
        }
        DiscoveryEvent::Updated(_) => None,
    };
    if let Some(req) = req {
        if ctx.peer_tx.send(req).await.is_err() {
            warn!(network = %ctx.name, "peer manager channel closed, dropping discovery event");
        }
    }
}

/// Drive the peer manager's own add/remove request loop.
async fn peer_manager_task(pm: Arc<PeerManager>, rx: mpsc::Receiver<PeerRequest>, rt: CancellationToken) {
    pm.run(rx, rt).await;
}

/// Every `nodes_list_interval`, poll each currently-fetched peer's
/// `/rpc/nodes` and apply the results through the store.
async fn scrape_task(ctx: Arc<RunContext>, rt: CancellationToken) {
    let mut tick = tokio::time::interval(ctx.nodes_list_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                for addr in ctx.peer_manager.fetched_addresses().await {
                    ctx.peer_manager.scrape_nodes(addr).await;
                }
            }
            _ = rt.cancelled() => return,
        }
    }
}

/// Two seconds after start, fix ownership of the log/pid files if the
/// process was invoked via privilege elevation, then idle until cancelled —
/// this sibling must never return on its own, since any sibling returning
/// ends the whole run (see DESIGN.md).
async fn privilege_drop_task(ctx: Arc<RunContext>, rt: CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(2)) => {
            if platform::was_elevated() {
                let net = ctx.store.get(&ctx.name);
                if let Err(e) = platform::fix_owner(&net.log_path()) {
                    warn!(network = %ctx.name, %e, "privilege-drop fix-up failed for log file");
                }
                if let Err(e) = platform::fix_owner(&net.pid_path()) {
                    warn!(network = %ctx.name, %e, "privilege-drop fix-up failed for pid file");
                }
            }
        }
        _ = rt.cancelled() => return,
    }
    rt.cancelled().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn daemon_config() -> DaemonConfig {
        let mut c = DaemonConfig::default();
        c.beacon.keepalive_secs = 1;
        c
    }

    /// A stand-in "vpn engine" binary: exits immediately for `-K` (key
    /// generation, invoked once by `prepare()`) and sleeps indefinitely for
    /// anything else (the long-running `-D` engine invocation), so `Stop()`
    /// has a real process to wait on without ever letting the engine exit
    /// on its own.
    fn fake_engine_script(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("fake-engine.sh");
        std::fs::write(
            &path,
            "#!/bin/sh\ncase \"$1\" in\n  -K) exit 0 ;;\n  *) sleep 600 ;;\nesac\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn stop_waits_for_engine_and_fires_stopped_once() {
        let tmp = TempDir::new().unwrap();
        let engine = fake_engine_script(tmp.path());
        let store = Store::new(tmp.path().join("store"), engine.clone());
        let bus = Bus::new();
        let stopped_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let sc = stopped_count.clone();
        bus.on_stopped(move |_| {
            sc.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        let sup = Supervisor::new("office".to_string(), store, bus, engine, &daemon_config());
        let start = sup.start("10.155.0.0/16".to_string()).await;
        assert!(start.is_ok());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(sup.is_running());

        sup.stop().await;
        assert!(!sup.is_running());
        assert_eq!(stopped_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn status_transitions_are_idle_initially() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path().to_path_buf(), PathBuf::from("/bin/true"));
        let bus = Bus::new();
        let sup = Supervisor::new(
            "office".to_string(),
            store,
            bus,
            PathBuf::from("/bin/true"),
            &daemon_config(),
        );
        assert_eq!(sup.status(), Status::Idle);
        assert!(!sup.is_running());
    }
}
