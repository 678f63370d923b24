use std::{
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{sleep, spawn, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, info, trace, warn};

use crate::{
    errors::Error,
    wire::{encode, encode_command, Packet, PacketDecoder, PacketType},
    Result,
};

pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_millis(500);

/// serial read timeout, bounds how long `close` waits for the reader
const READ_TIMEOUT: Duration = Duration::from_millis(10);
const STATUS_QUEUE_CAPACITY: usize = 256;
const RESP_QUEUE_CAPACITY: usize = 16;

/// Anything that hands out unsolicited status packets.
pub trait StatusSource: Send + Sync {
    /// Next pending status packet, waiting at most `timeout`.
    fn poll_status(&self, timeout: Duration) -> Option<Packet>;

    /// Drops status packets queued before this call and returns how many.
    fn discard_pending(&self) -> usize {
        0
    }
}

/// Request/response link to the hand controller.
///
/// A reader thread splits incoming traffic: responses go to whoever is in
/// `send_and_await`, status packets queue up for `poll_status`.
pub struct DeviceLink {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    /// one request in flight at a time
    request: Mutex<()>,
    resp_rx: Receiver<Packet>,
    status_rx: Receiver<Packet>,
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("open", &self.is_open())
            .field("pending_status", &self.status_rx.len())
            .finish()
    }
}

impl DeviceLink {
    pub fn open_serial(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| {
                warn!(%path, "uart open fail: {e}, check permissions on the port");
                Error::DeviceNotOpen
            })?;
        let reader = port.try_clone()?;
        info!(%path, baud, "device link open");
        Ok(Self::from_transport(Box::new(reader), Box::new(port)))
    }

    /// `reader` must return periodically (timeout or data) so the link can
    /// shut down.
    pub fn from_transport(reader: Box<dyn Read + Send>, writer: Box<dyn Write + Send>) -> Self {
        let (resp_tx, resp_rx) = bounded(RESP_QUEUE_CAPACITY);
        let (status_tx, status_rx) = bounded(STATUS_QUEUE_CAPACITY);
        let (close_tx, close_rx) = bounded(0);
        let running = Arc::new(AtomicBool::new(true));
        let status = StatusQueue {
            tx: status_tx,
            rx: status_rx.clone(),
        };
        let handle = run_reader(reader, running.clone(), resp_tx, status);
        Self {
            writer: Mutex::new(Some(writer)),
            request: Mutex::new(()),
            resp_rx,
            status_rx,
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            running,
            reader: Mutex::new(Some(handle)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer
            .lock()
            .map(|w| w.is_some())
            .unwrap_or(false)
    }

    fn write_packet(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock()?;
        let writer = writer.as_mut().ok_or(Error::DeviceNotOpen)?;
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Fire-and-forget packet, no response expected.
    pub fn send(&self, kind: PacketType, cmd: u16, payload: &[u8]) -> Result<()> {
        self.write_packet(&encode(kind, cmd, 0, payload)?)
    }

    /// Sends `cmd` and blocks until the response with the same command id
    /// arrives. Returns the device error code and the response payload.
    pub fn send_and_await(
        &self,
        cmd: u16,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(u16, Vec<u8>)> {
        let _request = self.request.lock()?;
        // leftovers from a request that already timed out
        while let Ok(stale) = self.resp_rx.try_recv() {
            debug!(cmd = stale.cmd, "discarding stale response");
        }
        self.write_packet(&encode_command(cmd, payload)?)?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            select! {
                recv(self.resp_rx) -> msg => match msg {
                    Ok(resp) if resp.cmd == cmd => return Ok((resp.err, resp.data)),
                    Ok(resp) => debug!(expected = cmd, got = resp.cmd, "unmatched response"),
                    Err(_) => return Err(Error::RxTimeout),
                },
                recv(self.close_rx) -> _ => return Err(Error::RxTimeout),
                default(remaining) => return Err(Error::RxTimeout),
            }
        }
    }

    /// Stops the reader and releases the port. Outstanding waits end with
    /// `RxTimeout`, later requests fail with `DeviceNotOpen`.
    pub fn close(&self) {
        self.close_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let was_open = self
            .writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some();
        self.running.store(false, Ordering::Release);
        let handle = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("link reader panicked");
            }
        }
        if was_open {
            info!("device link closed");
        }
    }
}

impl StatusSource for DeviceLink {
    fn poll_status(&self, timeout: Duration) -> Option<Packet> {
        match self.status_rx.recv_timeout(timeout) {
            Ok(packet) => Some(packet),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                // reader gone, keep the caller's pacing
                sleep(timeout);
                None
            }
        }
    }

    fn discard_pending(&self) -> usize {
        let stale = self.status_rx.try_iter().take(self.status_rx.len()).count();
        if stale > 0 {
            debug!(stale, "discarded queued status packets");
        }
        stale
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_reader(
    mut reader: Box<dyn Read + Send>,
    running: Arc<AtomicBool>,
    resp_tx: Sender<Packet>,
    status: StatusQueue,
) -> JoinHandle<()> {
    spawn(move || {
        let mut decoder = PacketDecoder::new();
        let mut buf = [0u8; 512];
        while running.load(Ordering::Acquire) {
            let n = match reader.read(&mut buf) {
                Ok(0) => {
                    debug!("link reached end of stream");
                    break;
                }
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    warn!("link read failed: {e}");
                    break;
                }
            };
            for res in decoder.feed(&buf[..n]) {
                match res {
                    Ok(packet) => route(packet, &resp_tx, &status),
                    Err(e) => warn!("dropping packet: {e}"),
                }
            }
        }
    })
}

/// Status backlog that keeps the newest packets when full.
struct StatusQueue {
    tx: Sender<Packet>,
    rx: Receiver<Packet>,
}

impl StatusQueue {
    fn push(&self, mut packet: Packet) {
        loop {
            match self.tx.try_send(packet) {
                Err(TrySendError::Full(p)) => {
                    if let Ok(old) = self.rx.try_recv() {
                        trace!(cmd = old.cmd, "status queue full, evicting oldest");
                    }
                    packet = p;
                }
                _ => return,
            }
        }
    }
}

fn route(packet: Packet, resp_tx: &Sender<Packet>, status: &StatusQueue) {
    match packet.kind {
        PacketType::Resp => {
            if let Err(TrySendError::Full(p)) = resp_tx.try_send(packet) {
                trace!(cmd = p.cmd, "response queue full, dropping packet");
            }
        }
        PacketType::Status => status.push(packet),
        kind => debug!(?kind, cmd = packet.cmd, "ignoring packet from device"),
    }
}
