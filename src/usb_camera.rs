use crate::{errors::Error, Result};

const CHANNELS: usize = 3;

/// Packed BGR8 image.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePair {
    pub left: Frame,
    pub right: Frame,
}

impl FramePair {
    /// (width, height) of one eye
    pub fn resolution(&self) -> (u32, u32) {
        (self.left.width, self.left.height)
    }
}

/// Produces one stereo capture per call.
pub trait FrameSource {
    fn capture_one(&mut self) -> Result<FramePair>;
}

/// Splits a side-by-side frame at the horizontal midpoint.
pub fn split_stereo(data: &[u8], width: u32, height: u32) -> Result<FramePair> {
    if width == 0 || width % 2 != 0 {
        return Err(Error::FrameReadError(format!(
            "stereo width {width} cannot be split evenly"
        )));
    }
    let row = width as usize * CHANNELS;
    if data.len() != row * height as usize {
        return Err(Error::FrameReadError(format!(
            "frame is {} bytes, expected {}",
            data.len(),
            row * height as usize
        )));
    }
    let half = row / 2;
    let mut left = Vec::with_capacity(half * height as usize);
    let mut right = Vec::with_capacity(half * height as usize);
    for line in data.chunks_exact(row) {
        let (l, r) = line.split_at(half);
        left.extend_from_slice(l);
        right.extend_from_slice(r);
    }
    let eye = |data| Frame {
        width: width / 2,
        height,
        data,
    };
    Ok(FramePair {
        left: eye(left),
        right: eye(right),
    })
}

#[cfg(feature = "hardware")]
pub use hardware::StereoCamera;

#[cfg(feature = "hardware")]
mod hardware {
    use std::fmt::Debug;

    use tracing::{debug, info};
    use v4l::{
        frameinterval::FrameIntervalEnum,
        framesize::FrameSizeEnum,
        io::traits::CaptureStream,
        prelude::MmapStream,
        video::{capture::Parameters, Capture},
        Device, Format, FourCC, Fraction,
    };
    use zune_jpeg::JpegDecoder;

    use super::{split_stereo, FramePair, FrameSource, CHANNELS};
    use crate::{config::CameraConfig, errors::Error, Result};

    /// Side-by-side UVC stereo camera delivering MJPEG.
    pub struct StereoCamera<'a> {
        stream: MmapStream<'a>,
        _device: Device,
        index: usize,
        fps: u32,
        width: u32,
        height: u32,
        rgb_buffer: Vec<u8>,
    }

    impl Debug for StereoCamera<'_> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("StereoCamera")
                .field("index", &self.index)
                .field("fps", &self.fps)
                .field("width", &self.width)
                .field("height", &self.height)
                .finish()
        }
    }

    /// MJPEG mode with the requested width; exact height and rate win.
    fn choose_format(device: &Device, cfg: &CameraConfig) -> Option<(u32, u32)> {
        let mjpg = FourCC::new(b"MJPG");
        let mut fallback = None;
        let formats = device.enum_formats().ok()?;
        if !formats.iter().any(|f| f.fourcc == mjpg) {
            return None;
        }
        for frame_size in device.enum_framesizes(mjpg).ok()? {
            let FrameSizeEnum::Discrete(size) = frame_size.size else {
                continue;
            };
            if size.width != cfg.width {
                continue;
            }
            fallback.get_or_insert((size.width, size.height));
            let Ok(intervals) = device.enum_frameintervals(mjpg, size.width, size.height) else {
                continue;
            };
            for fi in intervals {
                if let FrameIntervalEnum::Discrete(fraction) = fi.interval {
                    if size.height == cfg.height && fraction.denominator == cfg.fps {
                        return Some((size.width, size.height));
                    }
                }
            }
        }
        fallback
    }

    impl StereoCamera<'_> {
        /// Opens the first device among `0..probe_count` offering the
        /// combined stereo width.
        pub fn open(cfg: &CameraConfig) -> Result<Self> {
            for index in 0..cfg.probe_count {
                let Ok(device) = Device::new(index) else {
                    debug!(index, "no video device");
                    continue;
                };
                let Some((width, height)) = choose_format(&device, cfg) else {
                    debug!(index, "no mode with width {}", cfg.width);
                    continue;
                };
                match Self::start(device, index, width, height, cfg.fps) {
                    Ok(cam) => {
                        info!(?cam, "stereo camera open");
                        return Ok(cam);
                    }
                    Err(e) => debug!(index, "camera probe failed: {e}"),
                }
            }
            Err(Error::CameraNotFound)
        }

        fn start(device: Device, index: usize, width: u32, height: u32, fps: u32) -> Result<Self> {
            let real_format = device.set_format(&Format::new(width, height, FourCC::new(b"MJPG")))?;
            if real_format.width != width {
                return Err(Error::CameraNotFound);
            }
            let real_params = device.set_params(&Parameters::new(Fraction::new(1, fps)))?;
            let stream = MmapStream::new(&device, v4l::buffer::Type::VideoCapture)?;
            Ok(StereoCamera {
                stream,
                _device: device,
                index,
                fps: real_params.interval.denominator,
                width: real_format.width,
                height: real_format.height,
                rgb_buffer: vec![0u8; real_format.height as usize * real_format.width as usize * CHANNELS],
            })
        }
    }

    impl FrameSource for StereoCamera<'_> {
        fn capture_one(&mut self) -> Result<FramePair> {
            let (raw_mjpeg, _) = self
                .stream
                .next()
                .map_err(|e| Error::FrameReadError(e.to_string()))?;
            let mut decoder = JpegDecoder::new(raw_mjpeg);
            decoder
                .decode_into(&mut self.rgb_buffer)
                .map_err(|e| Error::FrameReadError(format!("{e:?}")))?;
            // encoders take BGR
            for px in self.rgb_buffer.chunks_exact_mut(CHANNELS) {
                px.swap(0, 2);
            }
            split_stereo(&self.rgb_buffer, self.width, self.height)
        }
    }
}
