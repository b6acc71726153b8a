//! listener construction, the accept loop and graceful shutdown.

use std::{
    io,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use tokio::{net::TcpStream, sync::watch, task::LocalSet, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    body::ResponseBody,
    config::{ConfigError, ServerConfig},
    date::DateTimeService,
    h1::{self, DispatchConfig},
    page,
    pool::{BufferPool, round_to_pow2},
    service::HttpService,
};

// grace period for in-flight requests once shutdown begins.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// A bound server, ready to run.
///
/// Binding and running are split so a launcher can report bind failures
/// before committing worker threads, and so tests can learn the bound
/// address of an ephemeral port.
pub struct Server {
    listener: std::net::TcpListener,
    config: ServerConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Clonable handle that triggers server shutdown from anywhere.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl ServerHandle {
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Server {
    /// Bind the listening socket described by the configuration.
    pub fn bind(config: ServerConfig) -> io::Result<Self> {
        let port = config
            .port
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, ConfigError::MissingPort))?;

        let ip = config
            .address
            .parse::<IpAddr>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let addr = SocketAddr::new(ip, port);

        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        if config.reuseaddress {
            socket.set_reuse_address(true)?;
        }
        socket.set_recv_buffer_size(config.rcvbuf)?;
        socket.bind(&SockAddr::from(addr))?;
        socket.listen(config.backlog.min(i32::MAX as u32) as i32)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            listener: socket.into(),
            config,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Serve until ctrl-c or a [ServerHandle::stop], then drain open
    /// connections and return.
    ///
    /// One accept loop runs per worker thread, each on its own
    /// current-thread runtime so connection state stays thread local.
    pub fn run<S>(self, service: S) -> io::Result<()>
    where
        S: HttpService + Send + Sync + 'static,
    {
        let service = Arc::new(service);
        let open = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(BufferPool::new(
            round_to_pow2(self.config.buffercache),
            self.config.rcvbuf,
        ));

        let dispatch = DispatchConfig {
            timeout: self.config.timeout,
            max_head_size: self.config.rcvbuf,
            write_buf_limit: self.config.sndbuf,
            keep_alive_budget: self.config.max_connection_time,
        };

        let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        info!(
            "listening on {:?} with {workers} workers",
            self.listener.local_addr().ok()
        );

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let listener = self.listener.try_clone()?;
            let service = service.clone();
            let open = open.clone();
            let pool = pool.clone();
            let shutdown = self.shutdown_rx.clone();
            let config = self.config.clone();

            let handle = thread::Builder::new()
                .name(format!("ksah-worker-{i}"))
                .spawn(move || {
                    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                        Ok(rt) => rt,
                        Err(e) => {
                            error!("worker runtime failed to start: {e}");
                            return;
                        }
                    };
                    let local = LocalSet::new();
                    rt.block_on(local.run_until(accept_loop(
                        listener, config, dispatch, service, pool, open, shutdown,
                    )));
                })?;

            handles.push(handle);
        }

        // the calling thread waits for a stop signal and relays it.
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let mut shutdown_rx = self.shutdown_rx.clone();
        rt.block_on(async {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
                _ = shutdown_rx.wait_for(|stopped| *stopped) => {}
            }
        });
        let _ = self.shutdown_tx.send(true);

        for handle in handles {
            let _ = handle.join();
        }

        info!("shut down");
        Ok(())
    }
}

async fn accept_loop<S>(
    listener: std::net::TcpListener,
    config: ServerConfig,
    dispatch: DispatchConfig,
    service: Arc<S>,
    pool: Arc<BufferPool>,
    open: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: HttpService + 'static,
{
    let listener = match tokio::net::TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            error!("worker listener registration failed: {e}");
            return;
        }
    };

    let date = DateTimeService::new();

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stopped| *stopped) => break,
            res = listener.accept() => res,
        };

        match accepted {
            Ok((stream, addr)) => {
                apply_socket_options(&stream, &config);

                let guard = OpenGuard::acquire(&open);
                let at_capacity = guard.count() > config.max_connections;

                let service = service.clone();
                let pool = pool.clone();
                let date = date.handle();

                tokio::task::spawn_local(async move {
                    let _guard = guard;
                    let res = if at_capacity {
                        h1::run(stream, addr, dispatch, pool, &Overloaded, &date).await
                    } else {
                        h1::run(stream, addr, dispatch, pool, &*service, &date).await
                    };
                    if let Err(e) = res {
                        debug!(target: "ksah_server", "connection {addr} failed: {e}");
                    }
                });
            }
            Err(ref e) if transient_error(e) => continue,
            Err(e) => {
                error!("error accepting connection: {e}");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }

    // keep driving in-flight connections until they finish or the grace
    // period runs out. dropping the local set afterwards cancels stragglers.
    let deadline = tokio::time::Instant::now() + SHUTDOWN_TIMEOUT;
    while open.load(Ordering::SeqCst) != 0 && tokio::time::Instant::now() < deadline {
        sleep(Duration::from_millis(500)).await;
    }
}

fn apply_socket_options(stream: &TcpStream, config: &ServerConfig) {
    let sock = SockRef::from(stream);
    if config.keepalive {
        if let Err(e) = sock.set_keepalive(true) {
            warn!("failed to enable keep-alive: {e}");
        }
    }
    if let Err(e) = sock.set_send_buffer_size(config.sndbuf) {
        warn!("failed to size send buffer: {e}");
    }
    if let Err(e) = stream.set_nodelay(config.nodelay) {
        warn!("failed to set nodelay: {e}");
    }
}

/// Errors from `accept` that concern the connection rather than the
/// listener. The next accept may well succeed immediately.
fn transient_error(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::ConnectionRefused
        || e.kind() == io::ErrorKind::ConnectionAborted
        || e.kind() == io::ErrorKind::ConnectionReset
}

// open socket accounting. the count covers accept through connection
// teardown, cancelled tasks included.
struct OpenGuard {
    open: Arc<AtomicUsize>,
    count: usize,
}

impl OpenGuard {
    fn acquire(open: &Arc<AtomicUsize>) -> Self {
        let count = open.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            open: open.clone(),
            count,
        }
    }

    fn count(&self) -> usize {
        self.count
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Stand-in handler for connections accepted beyond the connection cap.
struct Overloaded;

impl HttpService for Overloaded {
    async fn call(&self, _: http::Request<h1::RequestBody>) -> http::Response<ResponseBody> {
        page::service_unavailable()
    }
}
