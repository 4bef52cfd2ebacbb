//! `SerialDeviceLink`: the real [`DeviceLink`] over any [`Connector`].
//!
//! One reader thread per session decodes lines and routes them: responses
//! to the caller waiting on that correlation id, push events to every
//! subscriber.  Writes are serialised by the session mutex.  The heartbeat
//! loop owns reconnection.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use super::codec::{LineDecoder, encode_line};
use super::protocol::{Command, CorrelationId, DeviceInfo, Inbound, PushEvent, Request, Response, classify};
use super::session::DeviceSession;
use super::transport::Connector;
use super::{LinkState, LinkStatus, PushEvents, Sleeper, ThreadSleeper, lock, sleep_while};
use crate::app::ports::DeviceLink;
use crate::config::LinkConfig;
use crate::error::{ProtocolError, TransportError};

pub struct SerialDeviceLink<C: Connector + 'static> {
    shared: Arc<Shared<C>>,
}

struct Shared<C> {
    connector: C,
    config: LinkConfig,
    sleeper: Box<dyn Sleeper>,
    /// Next correlation id.  Never rewound, not even across sessions.
    next_id: AtomicU64,
    /// Bumped on every connect and teardown; reader threads of older
    /// sessions see the change and exit.
    epoch: AtomicU64,
    /// Set by the reader when the port reports EOF or an I/O error.
    broken: AtomicBool,
    closed: AtomicBool,
    state: Mutex<LinkState>,
    session: Mutex<DeviceSession>,
    pending: Mutex<HashMap<CorrelationId, Sender<Response>>>,
    subscribers: Mutex<Vec<Sender<PushEvent>>>,
}

impl<C: Connector + 'static> SerialDeviceLink<C> {
    /// Open the link and attempt one connection.  A failed first attempt
    /// leaves the link `Reconnecting`; `run_heartbeat` takes it from there.
    pub fn open(connector: C, config: LinkConfig) -> Self {
        Self::with_sleeper(connector, config, Box::new(ThreadSleeper))
    }

    pub fn with_sleeper(connector: C, config: LinkConfig, sleeper: Box<dyn Sleeper>) -> Self {
        let session = DeviceSession::new(&config);
        let shared = Arc::new(Shared {
            connector,
            config,
            sleeper,
            next_id: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
            broken: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            state: Mutex::new(LinkState::Reconnecting),
            session: Mutex::new(session),
            pending: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
        });

        match shared.open_session() {
            Ok(info) => info!(
                "link: connected to {} (firmware '{}', rfid={}, lights={})",
                shared.connector.describe(),
                info.firmware_version,
                info.rfid_enabled,
                info.lights_enabled
            ),
            Err(e) => warn!(
                "link: initial connect to {} failed: {}; will retry",
                shared.connector.describe(),
                e
            ),
        }

        Self { shared }
    }
}

impl<C: Connector + 'static> Drop for SerialDeviceLink<C> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.teardown();
    }
}

impl<C: Connector + 'static> DeviceLink for SerialDeviceLink<C> {
    fn send(&self, request: Request, timeout: Duration) -> Result<Response, TransportError> {
        self.shared.send(request, timeout)
    }

    fn subscribe(&self) -> PushEvents {
        self.shared.subscribe()
    }

    fn run_heartbeat(&self, running: &AtomicBool) {
        self.shared.heartbeat_loop(running);
    }

    fn status(&self) -> LinkStatus {
        self.shared.status()
    }
}

impl<C: Connector + 'static> Shared<C> {
    fn state(&self) -> LinkState {
        *lock(&self.state)
    }

    fn set_state(&self, state: LinkState) {
        *lock(&self.state) = state;
    }

    fn status(&self) -> LinkStatus {
        let state = self.state();
        let session = lock(&self.session);
        LinkStatus {
            state,
            consecutive_misses: session.heartbeat.misses(),
            device: session.device.clone(),
        }
    }

    fn subscribe(&self) -> PushEvents {
        if self.state() == LinkState::Degraded {
            return PushEvents::closed();
        }
        let (tx, rx) = channel::unbounded();
        lock(&self.subscribers).push(tx);
        PushEvents::new(rx)
    }

    fn send(&self, request: Request, timeout: Duration) -> Result<Response, TransportError> {
        if self.state() == LinkState::Degraded {
            return Err(TransportError::Unavailable);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let command = Command { id, request };
        let line = encode_line(&command).map_err(|_| TransportError::Encode)?;

        let (tx, rx) = channel::bounded(1);
        lock(&self.pending).insert(id, tx);

        let written = {
            let mut session = lock(&self.session);
            match session.writer.as_mut() {
                None => Err(TransportError::NotConnected),
                Some(w) => w
                    .write_all(&line)
                    .and_then(|()| w.flush())
                    .map_err(TransportError::from),
            }
        };
        if let Err(e) = written {
            lock(&self.pending).remove(&id);
            if matches!(e, TransportError::Io(_)) {
                warn!("link: write failed: {}", e);
                self.broken.store(true, Ordering::Release);
            }
            return Err(e);
        }
        debug!("link: -> #{} {:?}", id, command.request.command);

        match rx.recv_timeout(timeout) {
            Ok(response) => Ok(response),
            Err(RecvTimeoutError::Timeout) => {
                lock(&self.pending).remove(&id);
                debug!("link: #{} timed out after {:?}", id, timeout);
                Err(TransportError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    /// Connect, start the reader, and handshake with `get_status`.
    fn open_session(self: &Arc<Self>) -> Result<DeviceInfo, TransportError> {
        let pair = self.connector.connect()?;
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.broken.store(false, Ordering::Release);
        {
            let mut session = lock(&self.session);
            session.writer = Some(pair.writer);
            session.heartbeat.reset();
        }

        let shared = Arc::clone(self);
        let reader = pair.reader;
        let spawned = thread::Builder::new()
            .name("link-reader".into())
            .spawn(move || shared.read_loop(epoch, reader));
        if let Err(e) = spawned {
            self.teardown();
            return Err(e.into());
        }

        if self.config.settle_delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.settle_delay_ms));
        }

        match self.send(Request::get_status(), self.config.command_timeout()) {
            Ok(response) => {
                if !response.is_ok() {
                    warn!(
                        "link: handshake status error: {}",
                        response.message.as_deref().unwrap_or("unspecified")
                    );
                }
                let info = DeviceInfo::from_result(&response.result);
                {
                    let mut session = lock(&self.session);
                    session.device = Some(info.clone());
                    session.heartbeat.record_success(Instant::now());
                }
                self.set_state(LinkState::Connected);
                Ok(info)
            }
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    /// Close the session.  Pending callers fail with `Disconnected`.
    fn teardown(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        lock(&self.session).writer = None;
        let dropped: Vec<_> = lock(&self.pending).drain().collect();
        if !dropped.is_empty() {
            debug!("link: failing {} pending command(s)", dropped.len());
        }
    }

    fn session_lost(&self) -> bool {
        self.broken.load(Ordering::Acquire) || !lock(&self.session).is_open()
    }

    fn read_loop(&self, epoch: u64, mut reader: Box<dyn Read + Send>) {
        let mut decoder = LineDecoder::new();
        let mut buf = [0u8; 512];
        loop {
            if self.epoch.load(Ordering::Acquire) != epoch {
                break;
            }
            match reader.read(&mut buf) {
                Ok(0) => {
                    warn!("link: device closed the connection");
                    self.mark_broken(epoch);
                    break;
                }
                Ok(n) => decoder.feed(&buf[..n], |line| self.dispatch(line)),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    warn!("link: read failed: {}", e);
                    self.mark_broken(epoch);
                    break;
                }
            }
        }
        debug!("link: reader for session {} exiting", epoch);
    }

    fn mark_broken(&self, epoch: u64) {
        if self.epoch.load(Ordering::Acquire) == epoch {
            self.broken.store(true, Ordering::Release);
        }
    }

    fn dispatch(&self, line: Result<&str, ProtocolError>) {
        match line.and_then(classify) {
            Ok(Inbound::Response(response)) => {
                let waiter = lock(&self.pending).remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.try_send(response);
                    }
                    None => warn!("link: discarding uncorrelated response #{}", response.id),
                }
            }
            Ok(Inbound::Push(event)) => {
                debug!("link: <- event '{}'", event.event);
                lock(&self.subscribers).retain(|s| s.send(event.clone()).is_ok());
            }
            Err(e) => warn!("link: discarding inbound line: {}", e),
        }
    }

    fn heartbeat_loop(self: &Arc<Self>, running: &AtomicBool) {
        let interval = self.config.heartbeat_interval();
        while running.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire) {
            if self.state() == LinkState::Degraded {
                return;
            }
            if self.session_lost() {
                if !self.reconnect(running) {
                    return;
                }
                continue;
            }
            if !sleep_while(interval, running) {
                return;
            }
            if self.session_lost() {
                continue;
            }

            let outcome = self.send(Request::get_status(), self.config.heartbeat_timeout());
            let mut session = lock(&self.session);
            match outcome {
                Ok(_) => session.heartbeat.record_success(Instant::now()),
                Err(e) => {
                    let tripped = session.heartbeat.record_miss();
                    warn!(
                        "link: heartbeat missed ({}/{}): {}",
                        session.heartbeat.misses(),
                        session.heartbeat.threshold(),
                        e
                    );
                    if tripped {
                        drop(session);
                        warn!("link: device unresponsive, dropping session");
                        self.teardown();
                    }
                }
            }
        }
    }

    /// Backoff and reconnect.  `false` when the link degraded or shutdown
    /// was requested.
    fn reconnect(self: &Arc<Self>, running: &AtomicBool) -> bool {
        self.set_state(LinkState::Reconnecting);
        self.teardown();

        let policy = lock(&self.session).backoff;
        for (attempt, delay) in policy.delays().enumerate() {
            let attempt = attempt + 1;
            info!(
                "link: reconnect attempt {}/{} in {:?}",
                attempt, policy.max_attempts, delay
            );
            self.sleeper.sleep(delay, running);
            if !running.load(Ordering::Acquire) || self.closed.load(Ordering::Acquire) {
                return false;
            }
            match self.open_session() {
                Ok(info) => {
                    info!(
                        "link: reconnected to {} (firmware '{}')",
                        self.connector.describe(),
                        info.firmware_version
                    );
                    return true;
                }
                Err(e) => warn!("link: reconnect attempt {} failed: {}", attempt, e),
            }
        }

        error!(
            "link: {} unreachable after {} attempts; continuing without device",
            self.connector.describe(),
            policy.max_attempts
        );
        self.set_state(LinkState::Degraded);
        lock(&self.subscribers).clear();
        false
    }
}
