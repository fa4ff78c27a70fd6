//! TCP transport to the runner.
//!
//! The runner is the client (`CLIENTSOCK`): the connector listens on the
//! bound port, accepts the runner's connection, turns each incoming line
//! into a [`TorxAction`] on the bound input channel, and writes outgoing
//! actions one per line. A dropped connection returns the connector to
//! accepting, so the runner may reconnect.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model_file::ChannelBinding;
use crate::wire::TorxAction;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const READ_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("failed to bind runner socket on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("connector already started")]
    AlreadyStarted,
    #[error("runner is not connected")]
    NotConnected,
    #[error("failed to write to the runner socket: {source}")]
    Write {
        #[source]
        source: io::Error,
    },
}

/// Callbacks raised by the connector from its reader thread.
pub trait RunnerListener: Send + Sync {
    /// The runner has connected.
    fn started(&self) {}
    /// One action arrived on the input channel.
    fn input_received(&self, action: TorxAction);
}

struct Shared {
    binding: ChannelBinding,
    listener: Mutex<Option<Arc<dyn RunnerListener>>>,
    writer: Mutex<Option<TcpStream>>,
    running: AtomicBool,
    local_port: AtomicU16,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(mut writer) = self.writer.lock() {
            if let Some(stream) = writer.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }
}

/// Handle to the runner transport. Clones share one connection.
#[derive(Clone)]
pub struct RunnerConnector {
    shared: Arc<Shared>,
}

impl RunnerConnector {
    pub fn new(binding: ChannelBinding) -> Self {
        RunnerConnector {
            shared: Arc::new(Shared {
                binding,
                listener: Mutex::new(None),
                writer: Mutex::new(None),
                running: AtomicBool::new(false),
                local_port: AtomicU16::new(0),
                thread: Mutex::new(None),
            }),
        }
    }

    pub fn binding(&self) -> &ChannelBinding {
        &self.shared.binding
    }

    /// Register the callback target. Must be set before `start`.
    pub fn set_listener(&self, listener: Arc<dyn RunnerListener>) {
        *lock(&self.shared.listener) = Some(listener);
    }

    /// Bind the socket and spawn the accept/reader thread.
    pub fn start(&self) -> Result<(), ConnectorError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(ConnectorError::AlreadyStarted);
        }
        let port = self.shared.binding.port;
        let socket = match TcpListener::bind(("127.0.0.1", port)) {
            Ok(socket) => socket,
            Err(source) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(ConnectorError::Bind { port, source });
            }
        };
        if let Err(source) = socket.set_nonblocking(true) {
            self.shared.running.store(false, Ordering::SeqCst);
            return Err(ConnectorError::Bind { port, source });
        }
        let bound = socket
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(port);
        self.shared.local_port.store(bound, Ordering::SeqCst);
        info!(port = bound, channel = %self.shared.binding.input, "runner connector listening");

        let weak = Arc::downgrade(&self.shared);
        let handle = thread::spawn(move || accept_loop(socket, weak));
        *lock(&self.shared.thread) = Some(handle);
        Ok(())
    }

    /// The actually bound port (relevant when the binding used port 0).
    pub fn local_port(&self) -> u16 {
        self.shared.local_port.load(Ordering::SeqCst)
    }

    /// Shut the transport down. Idempotent and safe to call from a drop
    /// path; a second call returns immediately.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(stream) = lock(&self.shared.writer).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(handle) = lock(&self.shared.thread).take() {
            let _ = handle.join();
        }
        info!("runner connector stopped");
    }

    /// Write one action as a line on the runner socket.
    pub fn send_output(&self, action: &TorxAction) -> Result<(), ConnectorError> {
        let mut writer = lock(&self.shared.writer);
        let stream = writer.as_mut().ok_or(ConnectorError::NotConnected)?;
        writeln!(stream, "{}", action.data)
            .and_then(|_| stream.flush())
            .map_err(|source| ConnectorError::Write { source })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn accept_loop(socket: TcpListener, shared: Weak<Shared>) {
    loop {
        let Some(strong) = shared.upgrade() else {
            return;
        };
        if !strong.running.load(Ordering::SeqCst) {
            return;
        }
        drop(strong);

        match socket.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "runner connected");
                serve_connection(stream, &shared);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn serve_connection(stream: TcpStream, shared: &Weak<Shared>) {
    {
        let Some(strong) = shared.upgrade() else {
            return;
        };
        if stream.set_read_timeout(Some(READ_POLL)).is_err() {
            return;
        }
        match stream.try_clone() {
            Ok(writer) => *lock(&strong.writer) = Some(writer),
            Err(e) => {
                warn!(error = %e, "could not clone runner stream");
                return;
            }
        }
        let listener = lock(&strong.listener).clone();
        if let Some(listener) = listener {
            listener.started();
        }
    }

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        let Some(strong) = shared.upgrade() else {
            return;
        };
        if !strong.running.load(Ordering::SeqCst) {
            return;
        }

        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => {
                debug!("runner disconnected");
                *lock(&strong.writer) = None;
                return;
            }
            Ok(_) => {
                let data = line.trim_end_matches(['\r', '\n']);
                if data.is_empty() {
                    continue;
                }
                let action = TorxAction::input(strong.binding.input.clone(), data);
                if let Some(listener) = lock(&strong.listener).clone() {
                    listener.input_received(action);
                } else {
                    debug!(%data, "no listener registered; dropping runner input");
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                warn!(error = %e, "runner read failed");
                *lock(&strong.writer) = None;
                return;
            }
        }
    }
}
