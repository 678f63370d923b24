use std::{
    path::PathBuf,
    thread::{spawn, JoinHandle},
};

use crossbeam::channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::{
    errors::Error,
    usb_camera::{Frame, FramePair},
    Result,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoDesc {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// A sink that is opened once, fed frames in order, then finalized.
pub trait DataFile: Send + 'static {
    fn is_started(&self) -> bool;
    fn start_new(&mut self, path: &str, param: VideoDesc) -> Result<()>;
    fn record(&mut self, frame: &Frame) -> Result<()>;
    fn end(&mut self) -> Result<()>;
}

#[cfg(feature = "hardware")]
mod opencv_writer {
    use opencv::{
        core::{Mat, Size, CV_8UC3},
        videoio::{VideoWriter, VideoWriterTrait, VideoWriterTraitConst},
    };

    use super::{DataFile, VideoDesc};
    use crate::{errors::Error, usb_camera::Frame, Result};

    /// mp4v encoder.
    pub struct Mp4Writer(VideoWriter);

    impl Mp4Writer {
        pub fn new() -> Result<Self> {
            Ok(Self(VideoWriter::default()?))
        }
    }

    impl DataFile for Mp4Writer {
        fn is_started(&self) -> bool {
            self.0.is_opened().unwrap_or(false)
        }

        fn start_new(&mut self, path: &str, param: VideoDesc) -> Result<()> {
            let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
            let opened = self.0.open(
                path,
                fourcc,
                param.fps,
                Size::new(param.width as i32, param.height as i32),
                true,
            )?;
            if !opened {
                return Err(Error::OpenCV(format!("cannot open video writer for {path}")));
            }
            Ok(())
        }

        fn record(&mut self, frame: &Frame) -> Result<()> {
            // the Mat borrows `frame.data` only for the duration of the write
            let img = unsafe {
                Mat::new_rows_cols_with_data_unsafe_def(
                    frame.height as i32,
                    frame.width as i32,
                    CV_8UC3,
                    frame.data.as_ptr() as *mut _,
                )
            }?;
            self.0.write(&img)?;
            Ok(())
        }

        fn end(&mut self) -> Result<()> {
            self.0.release()?;
            Ok(())
        }
    }
}

#[cfg(feature = "hardware")]
pub use opencv_writer::Mp4Writer;

/// Where the two eyes are written.
#[derive(Debug, Clone)]
pub struct VideoPaths {
    pub left: PathBuf,
    pub right: PathBuf,
}

/// Background encoder for frame pairs.
///
/// The queue is bounded: when the encoder falls behind, `push` blocks the
/// capture loop instead of dropping frames.
pub struct FrameWriter {
    tx: Option<Sender<Option<FramePair>>>,
    handle: Option<JoinHandle<Result<usize>>>,
    capacity: usize,
}

impl FrameWriter {
    /// Encoders are opened on the first pair, sized from its resolution.
    pub fn spawn<DF: DataFile>(
        mut left: DF,
        mut right: DF,
        paths: VideoPaths,
        fps: f64,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = bounded(capacity);
        let handle = spawn(move || {
            let res = write_loop(&rx, &mut left, &mut right, &paths, fps);
            for sink in [&mut left, &mut right] {
                if sink.is_started() {
                    if let Err(e) = sink.end() {
                        warn!("closing video failed: {e}");
                    }
                }
            }
            res
        });
        Self {
            tx: Some(tx),
            handle: Some(handle),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queues a pair, blocking while the queue is full.
    pub fn push(&self, pair: FramePair) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::ChannelSend)?;
        tx.send(Some(pair)).map_err(|_| Error::ChannelSend)
    }

    pub fn queued(&self) -> usize {
        self.tx.as_ref().map(|tx| tx.len()).unwrap_or(0)
    }

    /// Sends end-of-stream, waits until every queued pair is written and
    /// returns how many pairs were written.
    pub fn finish(mut self) -> Result<usize> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<usize> {
        if let Some(tx) = self.tx.take() {
            // the worker may already be gone after a write error
            let _ = tx.send(None);
        }
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| Error::WorkerPanicked)?,
            None => Ok(0),
        }
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("frame writer: {e}");
        }
    }
}

fn write_loop<DF: DataFile>(
    rx: &Receiver<Option<FramePair>>,
    left: &mut DF,
    right: &mut DF,
    paths: &VideoPaths,
    fps: f64,
) -> Result<usize> {
    let mut written = 0;
    while let Ok(Some(pair)) = rx.recv() {
        if !left.is_started() {
            let (width, height) = pair.resolution();
            let desc = VideoDesc { width, height, fps };
            debug!(?desc, "opening video writers");
            left.start_new(&paths.left.to_string_lossy(), desc)?;
            right.start_new(&paths.right.to_string_lossy(), desc)?;
        }
        left.record(&pair.left)?;
        right.record(&pair.right)?;
        written += 1;
    }
    debug!(written, "frame writer drained");
    Ok(written)
}
