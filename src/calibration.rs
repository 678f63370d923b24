use std::{
    sync::Arc,
    thread::sleep,
    time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::{
    config::TactileConfig,
    device_link::StatusSource,
    errors::Error,
    tactile::{all_sensor_ids, CalibrationOffsetTable, SensorId, TactileSnapshot},
    tactile_poller::TactilePoller,
    Result,
};

/// Pre-recording check of the tactile link.
#[derive(Debug, Clone)]
pub struct CalibrationGate {
    pub window: Duration,
    pub threshold: i16,
    /// only these sensors get offsets; by default one hand
    pub calibrated_ids: Vec<SensorId>,
    pub poll_interval: Duration,
}

impl From<&TactileConfig> for CalibrationGate {
    fn from(cfg: &TactileConfig) -> Self {
        Self {
            window: cfg.validation_window(),
            threshold: cfg.threshold,
            calibrated_ids: cfg.calibrated_ids.clone(),
            poll_interval: cfg.poll_interval(),
        }
    }
}

impl CalibrationGate {
    /// Listens for `window`, then validates and derives offsets from what
    /// was seen. The validation poller is joined before returning.
    pub fn run(&self, source: Arc<dyn StatusSource>) -> Result<CalibrationOffsetTable> {
        info!(window = ?self.window, "validating tactile sensors");
        // only packets sent inside the window count
        source.discard_pending();
        let poller = TactilePoller::spawn(source, None, Instant::now(), self.poll_interval);
        sleep(self.window);
        let observed = poller.snapshot();
        poller.stop()?;
        self.evaluate(&observed)
    }

    pub fn evaluate(&self, observed: &TactileSnapshot) -> Result<CalibrationOffsetTable> {
        let missing_ids: Vec<SensorId> = all_sensor_ids()
            .filter(|id| !observed.contains_key(id))
            .collect();
        if !missing_ids.is_empty() {
            warn!(?missing_ids, "tactile sensors missing");
            return Err(Error::ValidationFailed { missing_ids });
        }

        let mut offsets = CalibrationOffsetTable::default();
        for id in &self.calibrated_ids {
            let Some(reading) = observed.get(id) else {
                continue;
            };
            if reading.data.exceeds(self.threshold) {
                info!(id, "storing calibration offset");
                offsets.insert(*id, reading.data);
            }
        }
        info!(offsets = offsets.len(), "tactile sensors validated");
        Ok(offsets)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        device_link::tests::pipe_link,
        tactile::{TactileReading, TactileSample, LEFT_HAND_IDS, RIGHT_HAND_IDS},
        wire::{bypass_payload, Packet, PacketType, CMD_SENSOR_BYPASS},
    };

    fn gate() -> CalibrationGate {
        CalibrationGate {
            window: Duration::from_millis(80),
            threshold: 10,
            calibrated_ids: RIGHT_HAND_IDS.to_vec(),
            poll_interval: Duration::from_millis(1),
        }
    }

    fn reading(v: i16) -> TactileReading {
        TactileReading {
            data: TactileSample([[v; 3]; 16]),
            timestamp: 0.0,
        }
    }

    fn full(v: i16) -> TactileSnapshot {
        all_sensor_ids().map(|id| (id, reading(v))).collect()
    }

    #[test]
    fn missing_sensor_fails_validation() {
        let mut observed = full(0);
        observed.remove(&135);
        observed.remove(&129);
        match gate().evaluate(&observed) {
            Err(Error::ValidationFailed { missing_ids }) => assert_eq!(missing_ids, vec![129, 135]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn quiet_sensors_get_no_offset() {
        assert!(gate().evaluate(&full(10)).unwrap().is_empty());
    }

    #[test]
    fn only_calibrated_hand_gets_offsets() {
        let mut observed = full(0);
        let mut loaded = TactileSample::zeros();
        loaded.0[7][1] = -30;
        observed.get_mut(&131).unwrap().data = loaded;
        observed.insert(LEFT_HAND_IDS[0], reading(40));

        let offsets = gate().evaluate(&observed).unwrap();
        assert_eq!(offsets.len(), 1);
        assert_eq!(offsets.get(131), Some(&loaded));
        assert!(offsets.get(LEFT_HAND_IDS[0]).is_none());
    }

    struct Repeating(Vec<Packet>, Mutex<usize>);

    impl StatusSource for Repeating {
        fn poll_status(&self, timeout: Duration) -> Option<Packet> {
            if self.0.is_empty() {
                sleep(timeout);
                return None;
            }
            let mut i = self.1.lock().unwrap();
            *i = (*i + 1) % self.0.len();
            sleep(Duration::from_micros(200));
            Some(self.0[*i].clone())
        }
    }

    fn stream(ids: impl Iterator<Item = SensorId>, v: i8) -> Arc<Repeating> {
        let packets = ids
            .map(|id| Packet {
                kind: PacketType::Status,
                cmd: CMD_SENSOR_BYPASS,
                err: 0,
                data: bypass_payload(id, &[[v; 3]; 16]),
            })
            .collect();
        Arc::new(Repeating(packets, Mutex::new(0)))
    }

    #[test]
    fn run_over_live_stream() {
        let offsets = gate().run(stream(all_sensor_ids(), 8)).unwrap();
        assert_eq!(offsets.len(), RIGHT_HAND_IDS.len());
        assert_eq!(offsets.get(128), Some(&TactileSample([[16; 3]; 16])));
    }

    #[test]
    fn run_reports_silent_sensors() {
        let res = gate().run(stream(all_sensor_ids().filter(|id| *id != 137), 0));
        assert!(matches!(
            res,
            Err(Error::ValidationFailed { missing_ids }) if missing_ids == vec![137]
        ));
    }

    #[test]
    fn backlog_from_before_the_window_does_not_validate() {
        let (link, device, _written) = pipe_link();
        let backlog: Vec<u8> = all_sensor_ids()
            .flat_map(|id| {
                crate::wire::encode(
                    PacketType::Status,
                    CMD_SENSOR_BYPASS,
                    0,
                    &bypass_payload(id, &[[0; 3]; 16]),
                )
                .unwrap()
            })
            .collect();
        device.send(backlog).unwrap();
        sleep(Duration::from_millis(200));

        // device went silent after the backlog
        let res = gate().run(Arc::new(link));
        match res {
            Err(Error::ValidationFailed { missing_ids }) => {
                assert_eq!(missing_ids, all_sensor_ids().collect::<Vec<_>>())
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
