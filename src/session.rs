use std::{sync::Arc, time::Instant};

use tracing::{info, info_span, warn};

use crate::{
    calibration::CalibrationGate,
    config::{CameraConfig, RecorderConfig},
    data_saver::{DataFile, FrameWriter, VideoPaths},
    device_link::StatusSource,
    episode::{EpisodeRecord, EpisodeStore, LEFT_VIDEO, RIGHT_VIDEO, TACTILE_JSON},
    errors::Error,
    pacer::Pacer,
    tactile_poller::TactilePoller,
    usb_camera::FrameSource,
    Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub index: usize,
    pub frames: usize,
    pub offsets: usize,
}

/// Records episodes into a dataset. Every failed episode leaves the
/// dataset as it was.
pub struct Session<'a> {
    cfg: &'a RecorderConfig,
    store: &'a EpisodeStore,
}

impl<'a> Session<'a> {
    pub fn new(cfg: &'a RecorderConfig, store: &'a EpisodeStore) -> Self {
        Self { cfg, store }
    }

    /// Camera, then calibration, then the episode directory; a failure at
    /// any step releases what was acquired so far.
    pub fn record<FS, DF>(
        &self,
        open_camera: impl FnOnce(&CameraConfig) -> Result<FS>,
        source: Arc<dyn StatusSource>,
        make_sink: impl Fn() -> Result<DF>,
    ) -> Result<SessionReport>
    where
        FS: FrameSource,
        DF: DataFile,
    {
        self.cfg.validate()?;
        let mut camera = open_camera(&self.cfg.camera)?;

        let offsets = CalibrationGate::from(&self.cfg.tactile).run(source.clone())?;
        let offset_count = offsets.len();

        let dir = self.store.create()?;
        let _span = info_span!("episode", index = dir.index()).entered();
        let paths = VideoPaths {
            left: dir.file(LEFT_VIDEO),
            right: dir.file(RIGHT_VIDEO),
        };
        let writer = FrameWriter::spawn(
            make_sink()?,
            make_sink()?,
            paths,
            self.cfg.fps,
            self.cfg.frame_queue_capacity,
        );

        source.discard_pending();
        let start = Instant::now();
        let poller = TactilePoller::spawn(
            source,
            Some(offsets),
            start,
            self.cfg.tactile.poll_interval(),
        );
        let mut pacer = Pacer::starting_at(start, self.cfg.fps, self.cfg.record_duration());
        let mut record = EpisodeRecord::with_capacity(pacer.expected_ticks() as usize);
        info!(fps = self.cfg.fps, duration = ?pacer.duration(), "recording");

        let captured = capture_loop(&mut pacer, &mut camera, &writer, &poller, &mut record);
        let polled = poller.stop();
        drop(camera);
        // a dead writer also shows up as a failed push, report its own error
        let frames = writer.finish().and_then(|frames| captured.map(|()| frames))?;
        let published = polled?;

        if frames != record.len() {
            warn!(frames, records = record.len(), "frame and record counts differ");
        }
        record.write_json(&dir.file(TACTILE_JSON))?;
        info!(frames, records = record.len(), published, "episode recorded");

        Ok(SessionReport {
            index: dir.commit(),
            frames,
            offsets: offset_count,
        })
    }
}

fn capture_loop<FS: FrameSource>(
    pacer: &mut Pacer,
    camera: &mut FS,
    writer: &FrameWriter,
    poller: &TactilePoller,
    record: &mut EpisodeRecord,
) -> Result<()> {
    while pacer.wait_next().is_some() {
        let pair = camera.capture_one().map_err(|e| match e {
            e @ Error::FrameReadError(_) => e,
            other => Error::FrameReadError(other.to_string()),
        })?;
        let timestamp = pacer.elapsed().as_secs_f64();
        writer.push(pair)?;
        record.push(timestamp, poller.snapshot());
    }
    Ok(())
}
