//! TCP Server
//!
//! Accepts connections and dispatches them to a worker thread pool.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{EmberError, Result};

use super::Connection;

/// Message sent to worker threads
enum WorkerMessage {
    /// New client connection to handle
    NewConnection(TcpStream),
    /// Signal to shut down
    Shutdown,
}

/// RESP server over one shared engine
///
/// The acceptor thread hands sockets to a fixed pool of workers over a
/// bounded channel; each worker runs one connection at a time to
/// completion.
pub struct Server {
    config: Config,
    engine: Arc<Engine>,
    listener: Option<TcpListener>,
    work_sender: Option<Sender<WorkerMessage>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    active_connections: Arc<AtomicUsize>,
}

impl Server {
    /// Create a new server with the given config and engine
    pub fn new(config: Config, engine: Arc<Engine>) -> Self {
        Self {
            config,
            engine,
            listener: None,
            work_sender: None,
            workers: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind, spawn the worker pool, and serve until shutdown (blocking).
    pub fn run(&mut self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).map_err(|e| {
            EmberError::Network(format!(
                "failed to bind to {}: {e}",
                self.config.listen_addr
            ))
        })?;

        // Non-blocking so the accept loop can observe the shutdown flag
        listener.set_nonblocking(true)?;

        tracing::info!("server listening on {}", self.config.listen_addr);
        self.listener = Some(listener);

        let num_workers = worker_count();
        let (sender, receiver) = bounded::<WorkerMessage>(self.config.max_connections);
        self.work_sender = Some(sender);

        tracing::info!(workers = num_workers, "starting worker threads");
        for worker_id in 0..num_workers {
            let worker = Worker {
                id: worker_id,
                receiver: receiver.clone(),
                engine: Arc::clone(&self.engine),
                active_connections: Arc::clone(&self.active_connections),
                read_timeout_ms: self.config.read_timeout_ms,
                write_timeout_ms: self.config.write_timeout_ms,
            };
            let handle = thread::Builder::new()
                .name(format!("emberkv-worker-{worker_id}"))
                .spawn(move || worker.run())
                .map_err(|e| EmberError::Network(format!("failed to spawn worker: {e}")))?;
            self.workers.push(handle);
        }

        self.accept_loop()?;
        self.cleanup();
        Ok(())
    }

    fn accept_loop(&mut self) -> Result<()> {
        let listener = self.listener.as_ref().unwrap();
        let sender = self.work_sender.as_ref().unwrap();

        while !self.shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    let current = self.active_connections.load(Ordering::Relaxed);
                    if current >= self.config.max_connections {
                        tracing::warn!(
                            "connection limit reached ({current}/{}), rejecting {addr}",
                            self.config.max_connections
                        );
                        drop(stream);
                        continue;
                    }

                    tracing::debug!("accepted connection from {addr}");
                    if let Err(e) = sender.send(WorkerMessage::NewConnection(stream)) {
                        tracing::error!("failed to dispatch connection: {e}");
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    if !self.shutdown.load(Ordering::Relaxed) {
                        tracing::error!("accept error: {e}");
                    }
                }
            }
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        tracing::info!("shutting down server");

        if let Some(sender) = &self.work_sender {
            for _ in 0..self.workers.len() {
                let _ = sender.send(WorkerMessage::Shutdown);
            }
        }
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                tracing::error!("worker thread panicked: {e:?}");
            }
        }

        tracing::info!("server shutdown complete");
    }

    /// Signal the server to shut down gracefully
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Whether the server is still accepting connections
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed)
    }

    /// Number of connections currently being served
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bound address, once running
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

/// Worker thread that serves connections handed to it by the acceptor
struct Worker {
    id: usize,
    receiver: Receiver<WorkerMessage>,
    engine: Arc<Engine>,
    active_connections: Arc<AtomicUsize>,
    read_timeout_ms: u64,
    write_timeout_ms: u64,
}

impl Worker {
    fn run(self) {
        tracing::debug!("worker {} started", self.id);

        loop {
            match self.receiver.recv() {
                Ok(WorkerMessage::NewConnection(stream)) => self.serve(stream),
                Ok(WorkerMessage::Shutdown) | Err(_) => break,
            }
        }

        tracing::debug!("worker {} stopped", self.id);
    }

    fn serve(&self, stream: TcpStream) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);

        let mut conn = Connection::new(stream, Arc::clone(&self.engine));
        if let Err(e) = conn.set_timeouts(self.read_timeout_ms, self.write_timeout_ms) {
            tracing::warn!("failed to set connection timeouts: {e}");
        }
        if let Err(e) = conn.handle() {
            tracing::debug!("connection {} ended with error: {e}", conn.peer_addr());
        }

        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Worker pool size: one thread per CPU
fn worker_count() -> usize {
    thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
