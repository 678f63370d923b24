use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{spawn, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, trace, warn};

use crate::{
    device_link::StatusSource,
    errors::Error,
    tactile::{is_known_sensor, CalibrationOffsetTable, TactileReading, TactileSnapshot, TactileTable},
    wire::decode_tactile_status,
    Result,
};

/// Background reader keeping the latest reading of every sensor.
pub struct TactilePoller {
    table: Arc<TactileTable>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<usize>>,
}

impl TactilePoller {
    /// Starts polling `source`. Readings are stamped relative to
    /// `session_start`; `offsets` are subtracted before publishing.
    pub fn spawn(
        source: Arc<dyn StatusSource>,
        offsets: Option<CalibrationOffsetTable>,
        session_start: Instant,
        poll_interval: Duration,
    ) -> Self {
        let table = Arc::new(TactileTable::new());
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let table = table.clone();
            let stop = stop.clone();
            spawn(move || {
                let offsets = offsets.unwrap_or_default();
                let mut published = 0;
                while !stop.load(Ordering::Acquire) {
                    let Some(packet) = source.poll_status(poll_interval) else {
                        continue;
                    };
                    if !packet.is_sensor_bypass() {
                        trace!(cmd = packet.cmd, "ignoring status packet");
                        continue;
                    }
                    let (id, raw) = match decode_tactile_status(&packet) {
                        Ok(decoded) => decoded,
                        Err(e) => {
                            warn!("skipping tactile packet: {e}");
                            continue;
                        }
                    };
                    if !is_known_sensor(id) {
                        trace!(id, "unknown sensor id");
                        continue;
                    }
                    table.update(
                        id,
                        TactileReading {
                            data: offsets.apply(id, raw),
                            timestamp: session_start.elapsed().as_secs_f64(),
                        },
                    );
                    published += 1;
                }
                published
            })
        };
        debug!("tactile poller started");
        Self {
            table,
            stop,
            handle: Some(handle),
        }
    }

    pub fn snapshot(&self) -> TactileSnapshot {
        self.table.snapshot()
    }

    /// Signals the loop and waits for it. Returns how many readings were
    /// published.
    pub fn stop(mut self) -> Result<usize> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<usize> {
        self.stop.store(true, Ordering::Release);
        match self.handle.take() {
            Some(handle) => {
                let published = handle.join().map_err(|_| Error::WorkerPanicked)?;
                debug!(published, "tactile poller stopped");
                Ok(published)
            }
            None => Ok(0),
        }
    }
}

impl Drop for TactilePoller {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("tactile poller: {e}");
        }
    }
}
