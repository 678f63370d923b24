use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Arc, Mutex},
    thread::sleep,
    time::Duration,
};

use teleop_record::{
    config::CameraConfig,
    tactile::{all_sensor_ids, SensorId},
    usb_camera::split_stereo,
    wire::{bypass_payload, Packet, PacketType, CMD_SENSOR_BYPASS},
    DataFile, EpisodeStore, Error, Frame, FramePair, FrameSource, RecorderConfig, Result,
    Session, StatusSource, VideoDesc,
};

/// Cycles through one bypass packet per sensor, like a streaming hand.
struct HandStream {
    packets: Vec<Packet>,
    next: Mutex<usize>,
}

impl HandStream {
    fn new(ids: impl Iterator<Item = SensorId>, value: impl Fn(SensorId) -> i8) -> Arc<Self> {
        let packets = ids
            .map(|id| Packet {
                kind: PacketType::Status,
                cmd: CMD_SENSOR_BYPASS,
                err: 0,
                data: bypass_payload(id, &[[value(id); 3]; 16]),
            })
            .collect();
        Arc::new(Self {
            packets,
            next: Mutex::new(0),
        })
    }
}

impl StatusSource for HandStream {
    fn poll_status(&self, timeout: Duration) -> Option<Packet> {
        if self.packets.is_empty() {
            sleep(timeout);
            return None;
        }
        sleep(Duration::from_micros(300));
        let mut next = self.next.lock().unwrap();
        let packet = self.packets[*next].clone();
        *next = (*next + 1) % self.packets.len();
        Some(packet)
    }
}

struct SyntheticCamera {
    captured: usize,
    fail_at: Option<usize>,
}

impl FrameSource for SyntheticCamera {
    fn capture_one(&mut self) -> Result<FramePair> {
        if self.fail_at == Some(self.captured) {
            return Err(Error::FrameReadError("usb disconnected".into()));
        }
        self.captured += 1;
        split_stereo(&[self.captured as u8; 8 * 2 * 3], 8, 2)
    }
}

fn camera(fail_at: Option<usize>) -> impl FnOnce(&CameraConfig) -> Result<SyntheticCamera> {
    move |_| {
        Ok(SyntheticCamera {
            captured: 0,
            fail_at,
        })
    }
}

/// Frames written per video path.
#[derive(Clone, Default)]
struct VideoLog(Arc<Mutex<HashMap<String, (VideoDesc, usize)>>>);

struct LoggedVideo {
    log: VideoLog,
    path: Option<String>,
}

impl DataFile for LoggedVideo {
    fn is_started(&self) -> bool {
        self.path.is_some()
    }

    fn start_new(&mut self, path: &str, param: VideoDesc) -> Result<()> {
        fs::write(path, b"")?;
        self.log.0.lock().unwrap().insert(path.into(), (param, 0));
        self.path = Some(path.into());
        Ok(())
    }

    fn record(&mut self, frame: &Frame) -> Result<()> {
        assert_eq!((frame.width, frame.height), (4, 2));
        let path = self.path.as_ref().unwrap();
        self.log.0.lock().unwrap().get_mut(path).unwrap().1 += 1;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        Ok(())
    }
}

impl VideoLog {
    fn sink(&self) -> impl Fn() -> Result<LoggedVideo> + '_ {
        move || {
            Ok(LoggedVideo {
                log: self.clone(),
                path: None,
            })
        }
    }

    fn frames(&self, dir: &Path, name: &str) -> usize {
        let key = dir.join(name).to_string_lossy().into_owned();
        self.0.lock().unwrap()[&key].1
    }
}

fn config(dataset: &Path, duration: f64) -> RecorderConfig {
    let mut cfg = RecorderConfig {
        dataset_path: dataset.into(),
        record_duration: duration,
        ..Default::default()
    };
    cfg.tactile.validation_window = 0.3;
    cfg.tactile.poll_interval_ms = 1;
    cfg
}

fn episode_dirs(dataset: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dataset)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn four_second_session_at_twenty_hz() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), 4.0);
    let store = EpisodeStore::new(&cfg.dataset_path).unwrap();
    let videos = VideoLog::default();

    let report = Session::new(&cfg, &store)
        .record(
            camera(None),
            HandStream::new(all_sensor_ids(), |_| 3),
            videos.sink(),
        )
        .unwrap();

    assert_eq!(report.index, 0);
    assert_eq!(report.offsets, 0);
    assert!((79..=80).contains(&report.frames), "{} frames", report.frames);

    let dir = store.path(0);
    assert_eq!(videos.frames(&dir, "left_video.mp4"), report.frames);
    assert_eq!(videos.frames(&dir, "right_video.mp4"), report.frames);

    let json: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.join("tactile.json")).unwrap()).unwrap();
    let records = json.as_array().unwrap();
    assert_eq!(records.len(), report.frames);

    let known: Vec<String> = all_sensor_ids().map(|id| id.to_string()).collect();
    let mut last = 0.0;
    for record in records {
        let ts: f64 = record["timestamp"].as_str().unwrap().parse().unwrap();
        assert!(ts >= last && ts <= 4.0, "timestamp {ts} after {last}");
        last = ts;
        for (id, reading) in record["tactile"].as_object().unwrap() {
            assert!(known.contains(id), "unexpected sensor {id}");
            assert_eq!(reading["data"][0], serde_json::json!([6, 6, 6]));
        }
    }
    // the stream is warm well before the end
    assert_eq!(
        records.last().unwrap()["tactile"].as_object().unwrap().len(),
        12
    );
}

#[test]
fn loaded_sensors_are_zeroed_during_recording() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), 0.5);
    let store = EpisodeStore::new(&cfg.dataset_path).unwrap();
    let videos = VideoLog::default();

    // 128 and 135 rest under load; only the calibrated hand is corrected
    let stream = HandStream::new(all_sensor_ids(), |id| match id {
        128 | 135 => 20,
        _ => 1,
    });
    let report = Session::new(&cfg, &store)
        .record(camera(None), stream, videos.sink())
        .unwrap();
    assert_eq!(report.offsets, 1);

    let json: serde_json::Value =
        serde_json::from_slice(&fs::read(store.path(0).join("tactile.json")).unwrap()).unwrap();
    let last = &json.as_array().unwrap().last().unwrap()["tactile"];
    assert_eq!(last["128"]["data"][5], serde_json::json!([0, 0, 0]));
    assert_eq!(last["135"]["data"][5], serde_json::json!([40, 40, 40]));
    assert_eq!(last["129"]["data"][5], serde_json::json!([2, 2, 2]));
}

#[test]
fn zero_fps_is_rejected_before_the_camera_opens() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = config(tmp.path(), 1.0);
    cfg.fps = 0.0;
    let store = EpisodeStore::new(&cfg.dataset_path).unwrap();
    let videos = VideoLog::default();

    let res = Session::new(&cfg, &store).record(
        |_: &CameraConfig| -> Result<SyntheticCamera> { panic!("camera opened") },
        HandStream::new(all_sensor_ids(), |_| 0),
        videos.sink(),
    );
    assert!(matches!(res, Err(Error::InvalidConfig(_))));
    assert!(episode_dirs(tmp.path()).is_empty());
}

#[test]
fn missing_camera_creates_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), 1.0);
    let store = EpisodeStore::new(&cfg.dataset_path).unwrap();
    let videos = VideoLog::default();

    let res = Session::new(&cfg, &store).record(
        |_: &CameraConfig| -> Result<SyntheticCamera> { Err(Error::CameraNotFound) },
        HandStream::new(all_sensor_ids(), |_| 0),
        videos.sink(),
    );
    assert!(matches!(res, Err(Error::CameraNotFound)));
    assert!(episode_dirs(tmp.path()).is_empty());
}

#[test]
fn silent_sensor_stops_the_episode_before_recording() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), 1.0);
    let store = EpisodeStore::new(&cfg.dataset_path).unwrap();
    let videos = VideoLog::default();

    let res = Session::new(&cfg, &store).record(
        camera(None),
        HandStream::new(all_sensor_ids().filter(|id| *id != 133), |_| 0),
        videos.sink(),
    );
    match res {
        Err(Error::ValidationFailed { missing_ids }) => assert_eq!(missing_ids, vec![133]),
        other => panic!("unexpected {other:?}"),
    }
    assert!(episode_dirs(tmp.path()).is_empty());
    assert!(videos.0.lock().unwrap().is_empty());
}

#[test]
fn frame_failure_removes_only_the_failed_episode() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), 0.5);
    let store = EpisodeStore::new(&cfg.dataset_path).unwrap();
    let videos = VideoLog::default();
    let session = Session::new(&cfg, &store);

    let first = session
        .record(
            camera(None),
            HandStream::new(all_sensor_ids(), |_| 0),
            videos.sink(),
        )
        .unwrap();
    assert_eq!(first.index, 0);
    let saved = fs::read(store.path(0).join("tactile.json")).unwrap();

    let res = session.record(
        camera(Some(3)),
        HandStream::new(all_sensor_ids(), |_| 0),
        videos.sink(),
    );
    assert!(matches!(res, Err(Error::FrameReadError(_))));
    assert_eq!(episode_dirs(tmp.path()), vec!["epi_000000".to_string()]);
    assert_eq!(fs::read(store.path(0).join("tactile.json")).unwrap(), saved);
    assert_eq!(store.next_index(), 1);
}
