//! Network cameras through OpenCV's FFmpeg reader, written out as XVID AVI.
//! Frames stay in OpenCV's own [Mat] from the camera to the file; synthetic
//! sources still come from the built-in camera and are converted once.

use super::frame::Frame;
use super::source::{CameraBackend, CameraSource, FrameSource, VideoSink};
use super::synthetic::SyntheticCamera;
use super::VideoError;
use log::{debug, info};
use opencv::{
    core::{self, Mat, Size, Vec3b},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter, CAP_FFMPEG},
};
use std::path::Path;

/// OpenCV capture and XVID output.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpencvBackend;

impl CameraBackend for OpencvBackend {
    type Frame = Mat;
    type Source = OpencvSource;
    type Sink = OpencvSink;

    fn extension(&self) -> &'static str {
        "avi"
    }

    fn open_source(&self, source: &CameraSource) -> Result<OpencvSource, VideoError> {
        match source {
            CameraSource::Synthetic(spec) => Ok(OpencvSource::Synthetic(SyntheticCamera::new(*spec))),
            CameraSource::Stream(url) => {
                let mut cap = VideoCapture::from_file(url, CAP_FFMPEG)?;
                if !cap.is_opened()? {
                    return Err(VideoError::Camera(format!("cannot open stream {url}")));
                }
                // Keep only the newest frame so it is stamped when it arrives.
                if !cap.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)? {
                    debug!("Stream {url} ignores the buffer size setting");
                }
                let fps = cap.get(videoio::CAP_PROP_FPS)?;
                info!("Opened stream {url}, reported fps {fps}");
                Ok(OpencvSource::Stream { cap, fps })
            }
        }
    }

    fn open_sink(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<OpencvSink, VideoError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| VideoError::Camera(format!("non-utf8 path {}", path.display())))?;
        let fourcc = VideoWriter::fourcc('X', 'V', 'I', 'D')?;
        let writer = VideoWriter::new(
            path_str,
            fourcc,
            fps,
            Size::new(width as i32, height as i32),
            true,
        )?;
        if !writer.is_opened()? {
            return Err(VideoError::Camera(format!(
                "cannot open video writer at {path_str}"
            )));
        }
        Ok(OpencvSink { writer })
    }

    fn upright(&self, frame: Mat, width: u32, height: u32) -> Result<Mat, VideoError> {
        upright_mat(&frame, width, height)
    }
}

/// A camera as OpenCV sees it.
pub enum OpencvSource {
    /// A stream opened through FFmpeg, with the rate it reported.
    Stream {
        #[allow(missing_docs)]
        cap: VideoCapture,
        #[allow(missing_docs)]
        fps: f64,
    },
    /// The built-in test pattern.
    Synthetic(SyntheticCamera),
}

impl FrameSource for OpencvSource {
    type Frame = Mat;

    fn fps(&self) -> Option<f64> {
        match self {
            OpencvSource::Stream { fps, .. } => (fps.is_finite() && *fps > 0.0).then_some(*fps),
            OpencvSource::Synthetic(camera) => camera.fps(),
        }
    }

    fn read_frame(&mut self) -> Result<Option<Mat>, VideoError> {
        match self {
            OpencvSource::Stream { cap, .. } => {
                let mut mat = Mat::default();
                if !cap.read(&mut mat)? || mat.empty() {
                    return Ok(None);
                }
                to_bgr(mat).map(Some)
            }
            OpencvSource::Synthetic(camera) => camera
                .read_frame()?
                .map(|frame| frame_to_mat(&frame))
                .transpose(),
        }
    }
}

/// An XVID file being written.
pub struct OpencvSink {
    writer: VideoWriter,
}

impl VideoSink for OpencvSink {
    type Frame = Mat;

    fn write_frame(&mut self, frame: &Mat) -> Result<(), VideoError> {
        self.writer.write(frame)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), VideoError> {
        self.writer.release()?;
        Ok(())
    }
}

/// Brings a decoded frame to 3-channel BGR, the layout the writer expects.
fn to_bgr(mat: Mat) -> Result<Mat, VideoError> {
    let code = match mat.channels() {
        3 => return Ok(mat),
        4 => imgproc::COLOR_BGRA2BGR,
        1 => imgproc::COLOR_GRAY2BGR,
        n => return Err(VideoError::Camera(format!("unexpected {n}-channel frame"))),
    };
    let mut converted = Mat::default();
    imgproc::cvt_color_def(&mat, &mut converted, code)?;
    Ok(converted)
}

/// Rotates 180 degrees, then resizes by pixel area.
fn upright_mat(frame: &Mat, width: u32, height: u32) -> Result<Mat, VideoError> {
    let mut turned = Mat::default();
    core::rotate(frame, &mut turned, core::ROTATE_180)?;

    let target = Size::new(width as i32, height as i32);
    if turned.size()? == target {
        return Ok(turned);
    }
    let mut resized = Mat::default();
    imgproc::resize(&turned, &mut resized, target, 0.0, 0.0, imgproc::INTER_AREA)?;
    Ok(resized)
}

/// An RGB frame as a BGR [Mat].
fn frame_to_mat(frame: &Frame) -> Result<Mat, VideoError> {
    let pixels: Vec<Vec3b> = frame
        .pixels()
        .map(|p| Vec3b::from([p[2], p[1], p[0]]))
        .collect();
    let mat = Mat::new_rows_cols_with_data(frame.height() as i32, frame.width() as i32, &pixels)?
        .try_clone()?;
    Ok(mat)
}

#[cfg(all(test, feature = "opencv"))]
mod tests {
    use super::*;
    use crate::video::frame::solid;
    use image::Rgb;
    use opencv::core::{Rect, Scalar, CV_8UC1, CV_8UC3, CV_8UC4};
    use tempfile::TempDir;

    fn bgr_at(mat: &Mat, col: i32, row: i32) -> [u8; 3] {
        let px = mat.at_2d::<Vec3b>(row, col).unwrap();
        [px[0], px[1], px[2]]
    }

    #[test]
    fn rgb_frames_become_bgr_mats() {
        let mut frame = solid(4, 2, [10, 20, 30]);
        frame.put_pixel(3, 1, Rgb([1, 2, 3]));
        let mat = frame_to_mat(&frame).unwrap();

        assert_eq!(mat.size().unwrap(), Size::new(4, 2));
        assert_eq!(mat.typ(), CV_8UC3);
        assert_eq!(bgr_at(&mat, 0, 0), [30, 20, 10]);
        assert_eq!(bgr_at(&mat, 3, 1), [3, 2, 1]);
    }

    #[test]
    fn decoded_frames_are_brought_to_bgr() {
        let bgra =
            Mat::new_rows_cols_with_default(2, 3, CV_8UC4, Scalar::new(1.0, 2.0, 3.0, 255.0))
                .unwrap();
        let bgr = to_bgr(bgra).unwrap();
        assert_eq!(bgr.typ(), CV_8UC3);
        assert_eq!(bgr_at(&bgr, 2, 1), [1, 2, 3]);

        let gray = Mat::new_rows_cols_with_default(2, 3, CV_8UC1, Scalar::all(9.0)).unwrap();
        assert_eq!(bgr_at(&to_bgr(gray).unwrap(), 0, 0), [9, 9, 9]);

        let already = Mat::new_rows_cols_with_default(2, 3, CV_8UC3, Scalar::all(4.0)).unwrap();
        assert_eq!(to_bgr(already).unwrap().typ(), CV_8UC3);
    }

    #[test]
    fn upright_rotates_and_area_resizes() {
        let mut frame = solid(8, 4, [0, 0, 0]);
        frame.put_pixel(0, 0, Rgb([0, 0, 200]));
        let mat = frame_to_mat(&frame).unwrap();

        let same = upright_mat(&mat, 8, 4).unwrap();
        assert_eq!(bgr_at(&same, 7, 3), [200, 0, 0]);
        assert_eq!(bgr_at(&same, 0, 0), [0, 0, 0]);

        let halved = upright_mat(&mat, 4, 2).unwrap();
        assert_eq!(halved.size().unwrap(), Size::new(4, 2));
        // One bright pixel averaged over its 2x2 block.
        assert_eq!(bgr_at(&halved, 3, 1), [50, 0, 0]);
    }

    #[test]
    fn upright_accepts_cropped_views() {
        let mut frame = solid(8, 8, [0, 0, 0]);
        frame.put_pixel(2, 2, Rgb([0, 90, 0]));
        let full = frame_to_mat(&frame).unwrap();
        let view = Mat::roi(&full, Rect::new(2, 2, 4, 4)).unwrap();
        assert!(!view.is_continuous());

        let turned = upright_mat(&view, 4, 4).unwrap();
        assert_eq!(bgr_at(&turned, 3, 3), [0, 90, 0]);
    }

    #[test]
    fn written_video_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.avi");
        let backend = OpencvBackend;

        let mut sink = backend.open_sink(&path, 64, 48, 10.0).unwrap();
        for shade in [0u8, 60, 120, 180, 240] {
            let frame = frame_to_mat(&solid(64, 48, [shade, shade, shade])).unwrap();
            sink.write_frame(&frame).unwrap();
        }
        sink.finish().unwrap();

        let source = CameraSource::Stream(path.to_str().unwrap().to_string());
        let mut camera = backend.open_source(&source).unwrap();
        assert_eq!(camera.fps(), Some(10.0));

        let mut frames = Vec::new();
        while let Some(mat) = camera.read_frame().unwrap() {
            frames.push(mat);
        }
        assert_eq!(frames.len(), 5);
        assert!(frames
            .iter()
            .all(|mat| mat.size().unwrap() == Size::new(64, 48) && mat.typ() == CV_8UC3));
    }
}
