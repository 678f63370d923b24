use std::{
    collections::{BTreeMap, HashMap},
    ops::Sub,
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

pub type SensorId = u8;

pub const TAXEL_COUNT: usize = 16;
pub const AXIS_COUNT: usize = 3;

/// thumb, index, middle, ring, pinky, palm
pub const RIGHT_HAND_IDS: [SensorId; 6] = [128, 129, 130, 131, 132, 133];
pub const LEFT_HAND_IDS: [SensorId; 6] = [134, 135, 136, 137, 138, 139];

pub fn is_known_sensor(id: SensorId) -> bool {
    RIGHT_HAND_IDS.contains(&id) || LEFT_HAND_IDS.contains(&id)
}

pub fn all_sensor_ids() -> impl Iterator<Item = SensorId> {
    RIGHT_HAND_IDS.into_iter().chain(LEFT_HAND_IDS)
}

/// 16 taxels x 3 force axes, already scaled by the wire factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TactileSample(pub [[i16; AXIS_COUNT]; TAXEL_COUNT]);

impl TactileSample {
    pub fn zeros() -> Self {
        Self([[0; AXIS_COUNT]; TAXEL_COUNT])
    }

    pub fn exceeds(&self, threshold: i16) -> bool {
        self.0
            .iter()
            .flatten()
            .any(|v| v.unsigned_abs() > threshold.unsigned_abs())
    }
}

impl Sub for TactileSample {
    type Output = TactileSample;

    fn sub(self, rhs: Self) -> Self::Output {
        let mut out = self;
        for (row, off) in out.0.iter_mut().zip(rhs.0.iter()) {
            for (v, o) in row.iter_mut().zip(off) {
                *v -= o;
            }
        }
        out
    }
}

/// Per-sensor bias; a missing entry means the sensor is used as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationOffsetTable {
    offsets: HashMap<SensorId, TactileSample>,
}

impl CalibrationOffsetTable {
    pub fn insert(&mut self, id: SensorId, offset: TactileSample) {
        self.offsets.insert(id, offset);
    }

    pub fn get(&self, id: SensorId) -> Option<&TactileSample> {
        self.offsets.get(&id)
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn apply(&self, id: SensorId, raw: TactileSample) -> TactileSample {
        match self.offsets.get(&id) {
            Some(offset) => raw - *offset,
            None => raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TactileReading {
    pub data: TactileSample,
    /// seconds since session start
    pub timestamp: f64,
}

/// Latest reading per sensor. Different ids may come from different
/// instants.
pub type TactileSnapshot = BTreeMap<SensorId, TactileReading>;

/// Latest-reading table shared between the poller and the capture loop.
///
/// The map itself is never handed out; writers replace one entry, readers
/// get a copy.
#[derive(Debug, Default)]
pub struct TactileTable {
    latest: Mutex<TactileSnapshot>,
}

impl TactileTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, id: SensorId, reading: TactileReading) {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        latest.insert(id, reading);
    }

    pub fn snapshot(&self) -> TactileSnapshot {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
