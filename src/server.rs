use std::{
    error::Error as StdError,
    io::{self, Cursor},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, LazyLock,
    },
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, error, warn};

use crate::{
    pwrstat::StatusSource,
    shutdown::{ShutdownError, ShutdownSignal},
};

pub type HttpResponse = Response<Cursor<Vec<u8>>>;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10); // Wait for in-flight requests.

static JSON_CONTENT_TYPE: LazyLock<Header> = LazyLock::new(|| {
    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap()
});

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("failed to start worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

enum Route {
    Status,
    Health,
}

/// Serves the UPS status as JSON.
///
/// Every request to `/` runs the status source once; nothing is cached
/// between requests. `/healthz` only says the process is up.
pub struct StatusServer<S> {
    server: Arc<Server>,
    source: Arc<S>,
    workers: usize,
    shutdown_timeout: Duration,
}

// Reports a worker as finished when dropped, panics included.
struct Finished(mpsc::Sender<()>);

impl Drop for Finished {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

impl<S: StatusSource + 'static> StatusServer<S> {
    pub fn bind(addr: &str, source: S, workers: usize) -> Result<StatusServer<S>, ServerError> {
        let server = Server::http(addr).map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        Ok(StatusServer {
            server: Arc::new(server),
            source: Arc::new(source),
            workers: workers.max(1),
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        })
    }

    /// How long shutdown waits for in-flight requests before giving up on
    /// them.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> StatusServer<S> {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Handles requests until `shutdown` returns, then gives in-flight
    /// requests up to the shutdown timeout to finish. Workers still busy
    /// after that are left behind.
    pub fn run(self, shutdown: impl ShutdownSignal) -> Result<(), ServerError> {
        let stopping = Arc::new(AtomicBool::new(false));
        let (finished_tx, finished_rx) = mpsc::channel();

        let mut handles = Vec::with_capacity(self.workers);
        let mut spawned = Ok(());
        for i in 0..self.workers {
            let server = Arc::clone(&self.server);
            let source = Arc::clone(&self.source);
            let stopping = Arc::clone(&stopping);
            let finished = Finished(finished_tx.clone());
            let handle = thread::Builder::new()
                .name(format!("http-worker-{i}"))
                .spawn(move || {
                    let _finished = finished;
                    serve(&server, source.as_ref(), &stopping)
                });
            match handle {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    spawned = Err(ServerError::Spawn(err));
                    break;
                }
            }
        }

        let result = spawned.and_then(|()| shutdown.wait().map_err(ServerError::from));

        // Each unblock wakes exactly one worker.
        stopping.store(true, Ordering::SeqCst);
        for _ in &handles {
            self.server.unblock();
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        let mut running = handles.len();
        while running > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            if finished_rx.recv_timeout(left).is_err() {
                break;
            }
            running -= 1;
        }
        if running > 0 {
            warn!(
                workers = running,
                timeout_ms = self.shutdown_timeout.as_millis(),
                "shutdown timed out, leaving busy workers behind"
            );
        }

        for handle in handles.into_iter().filter(|h| h.is_finished()) {
            if handle.join().is_err() {
                error!("http worker panicked");
            }
        }

        result
    }
}

fn serve<S: StatusSource + ?Sized>(server: &Server, source: &S, stopping: &AtomicBool) {
    loop {
        match server.recv() {
            Ok(request) => handle(request, source),
            Err(_) if stopping.load(Ordering::SeqCst) => break,
            Err(err) => warn!(error = %err, "failed to accept request"),
        }
    }
}

fn handle<S: StatusSource + ?Sized>(request: Request, source: &S) {
    let method = request.method().clone();
    let path = request.url().split('?').next().unwrap_or_default().to_string();

    let response = respond(&method, &path, source);
    debug!(%method, %path, status = response.status_code().0, "handled request");

    if let Err(err) = request.respond(response) {
        warn!(error = %err, "failed to write response");
    }
}

/// Picks the response for one request. Failures never leak into the body;
/// they are only logged.
pub fn respond<S: StatusSource + ?Sized>(method: &Method, path: &str, source: &S) -> HttpResponse {
    let route = match path {
        "/" => Route::Status,
        "/healthz" => Route::Health,
        _ => return empty(404),
    };

    if !matches!(method, Method::Get | Method::Head) {
        return empty(405);
    }

    match route {
        Route::Health => empty(200),
        Route::Status => status(source),
    }
}

fn status<S: StatusSource + ?Sized>(source: &S) -> HttpResponse {
    let status = match source.status() {
        Ok(status) => status,
        Err(err) => {
            error!(error = %err, "error getting status");
            return empty(500);
        }
    };

    match serde_json::to_vec(&status) {
        Ok(body) => Response::from_data(body).with_header(JSON_CONTENT_TYPE.clone()),
        Err(err) => {
            error!(error = %err, "error encoding status");
            empty(500)
        }
    }
}

fn empty(code: u16) -> HttpResponse {
    Response::from_data(Vec::new()).with_status_code(code)
}
