//! Camera capture: pull frames from a stream, store them upright and at a
//! fixed size in a video file, and log one metadata row per stored frame.
//!
//! The pieces are split so that the capture loop in [capture] only ever
//! talks to the traits in [source]. The built-in backend knows about the
//! synthetic camera and writes the raw [frame_file] container; the OpenCV
//! backend (behind the `opencv` feature) adds network streams and XVID.

use crate::store::StoreError;
use std::{borrow::Cow, fmt, io};

pub mod capture;
pub mod frame;
pub mod frame_file;
#[cfg(feature = "opencv")]
pub mod opencv_backend;
pub mod source;
pub mod synthetic;

/// Anything that can go wrong between the camera and the video file.
#[derive(Debug)]
pub enum VideoError {
    /// Returned when io fails on the video file or its directory.
    Io(io::Error),
    /// Returned when a frame file header cannot be written.
    Ron(ron::Error),
    /// Returned when a frame file header cannot be read.
    RonSpanned(ron::error::SpannedError),
    /// Returned when a frame file has no header delimiter.
    NoDelimiter,
    /// Returned when a frame file ends halfway through a frame.
    Truncated,
    /// Returned when a frame's buffer does not match its dimensions.
    FrameSize {
        /// Bytes a frame of that size needs.
        expected: usize,
        /// Bytes actually given.
        got: usize,
    },
    /// Returned when the backend cannot handle this kind of source.
    Unsupported(String),
    /// Returned when the camera refuses to open or stops answering.
    Camera(String),
    /// Returned when the frame table cannot be set up.
    Store(StoreError),
    /// Returned by OpenCV itself.
    #[cfg(feature = "opencv")]
    OpenCv(opencv::Error),
}

impl fmt::Display for VideoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            VideoError::Io(error) => Cow::from(format!("io error: {error}")),
            VideoError::Ron(error) => Cow::from(format!("ron error: {error}")),
            VideoError::RonSpanned(error) => Cow::from(format!("ron spanning error: {error}")),
            VideoError::NoDelimiter => Cow::from("no delimiter in frame file"),
            VideoError::Truncated => Cow::from("frame file ends mid-frame"),
            VideoError::FrameSize { expected, got } => {
                Cow::from(format!("frame buffer holds {got} bytes, expected {expected}"))
            }
            VideoError::Unsupported(what) => Cow::from(format!("unsupported source: {what}")),
            VideoError::Camera(why) => Cow::from(format!("camera error: {why}")),
            VideoError::Store(error) => Cow::from(format!("{error}")),
            #[cfg(feature = "opencv")]
            VideoError::OpenCv(error) => Cow::from(format!("opencv error: {error}")),
        };
        write!(f, "{msg}")
    }
}

impl std::error::Error for VideoError {}

impl From<io::Error> for VideoError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<StoreError> for VideoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for VideoError {
    fn from(value: opencv::Error) -> Self {
        Self::OpenCv(value)
    }
}
