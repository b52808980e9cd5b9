//! The raw frame file, the built-in video container. Files have the
//! following structure:
//!
//! - A header with the frame geometry and rate, encoded with [ron]:
//!
//! ```text
//! (width:A,height:B,fps:C,pixel_format:Rgb24)
//! ```
//!
//! - A separator, a single `0xFF` byte. It never occurs in UTF-8 text, so
//!   the first one always ends the header.
//! - The frames, `width * height * 3` bytes each, back to back.
//!
//! Frames are streamed to disk as they arrive, so a file cut short by a
//! crash is still readable up to its last whole frame.

use super::frame::{byte_len, Frame};
use super::source::VideoSink;
use super::VideoError;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
};

/// Extension of raw frame files.
pub const EXTENSION: &str = "rvf";

const DELIMITER: u8 = 0xFF;

/// Layout of each frame's bytes.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit red, green, blue.
    Rgb24,
}

/// The header of a raw frame file.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[allow(missing_docs)]
pub struct FrameFileHeader {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub pixel_format: PixelFormat,
}

/// Streams frames into a raw frame file.
pub struct FrameFileWriter {
    header: FrameFileHeader,
    out: BufWriter<File>,
    frames: u64,
}

impl FrameFileWriter {
    /// Creates the file and writes its header.
    pub fn create(
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Self, VideoError> {
        let header = FrameFileHeader {
            width,
            height,
            fps,
            pixel_format: PixelFormat::Rgb24,
        };
        let mut out = BufWriter::new(File::create(path)?);
        let h_str = ron::ser::to_string(&header).map_err(VideoError::Ron)?;
        out.write_all(h_str.as_bytes())?;
        out.write_all(&[DELIMITER])?;
        Ok(Self {
            header,
            out,
            frames: 0,
        })
    }

    /// Frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl VideoSink for FrameFileWriter {
    type Frame = Frame;

    fn write_frame(&mut self, frame: &Frame) -> Result<(), VideoError> {
        if frame.width() != self.header.width || frame.height() != self.header.height {
            return Err(VideoError::FrameSize {
                expected: byte_len(self.header.width, self.header.height),
                got: frame.as_raw().len(),
            });
        }
        self.out.write_all(frame.as_raw())?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), VideoError> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(())
    }
}

/// A fully loaded raw frame file.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFile {
    /// Geometry and rate of every frame.
    pub header: FrameFileHeader,
    /// The frames, in recording order.
    pub frames: Vec<Frame>,
}

impl FrameFile {
    /// Reads a raw frame file from the path provided.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, VideoError> {
        let mut handle = File::open(path)?;
        Self::from_reader(&mut handle)
    }

    /// Reads a raw frame file from the [Read]able object provided.
    pub fn from_reader(file: &mut impl Read) -> Result<Self, VideoError> {
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;

        let delim_idx = raw
            .iter()
            .position(|b| *b == DELIMITER)
            .ok_or(VideoError::NoDelimiter)?;
        let (header_buf, frames_buf) = raw.split_at(delim_idx);
        let frames_buf = &frames_buf[1..];

        let header: FrameFileHeader =
            ron::de::from_bytes(header_buf).map_err(VideoError::RonSpanned)?;

        let frame_len = byte_len(header.width, header.height);
        if frame_len == 0 || frames_buf.len() % frame_len != 0 {
            return Err(VideoError::Truncated);
        }

        let frames = frames_buf
            .chunks_exact(frame_len)
            .map(|bytes| {
                Frame::from_raw(header.width, header.height, bytes.to_vec()).ok_or(
                    VideoError::FrameSize {
                        expected: frame_len,
                        got: bytes.len(),
                    },
                )
            })
            .collect::<Result<Vec<Frame>, VideoError>>()?;

        Ok(Self { header, frames })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::frame::solid;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn written_frames_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.rvf");

        let mut writer = FrameFileWriter::create(&path, 4, 2, 20.0).unwrap();
        writer.write_frame(&solid(4, 2, [1, 2, 3])).unwrap();
        writer.write_frame(&solid(4, 2, [9, 8, 7])).unwrap();
        writer.finish().unwrap();
        assert_eq!(writer.frames_written(), 2);

        let file = FrameFile::from_path(&path).unwrap();
        assert_eq!(file.header.width, 4);
        assert_eq!(file.header.fps, 20.0);
        assert_eq!(file.frames.len(), 2);
        assert_eq!(file.frames[1].get_pixel(3, 1), &Rgb([9, 8, 7]));
    }

    #[test]
    fn wrong_size_frame_is_refused() {
        let dir = TempDir::new().unwrap();
        let mut writer = FrameFileWriter::create(dir.path().join("clip.rvf"), 4, 2, 20.0).unwrap();
        assert!(matches!(
            writer.write_frame(&solid(2, 2, [0, 0, 0])),
            Err(VideoError::FrameSize { .. })
        ));
        assert_eq!(writer.frames_written(), 0);
    }

    #[test]
    fn damaged_files_are_reported() {
        let mut no_delim: &[u8] = b"(width:1,height:1,fps:1.0,pixel_format:Rgb24)";
        assert!(matches!(
            FrameFile::from_reader(&mut no_delim),
            Err(VideoError::NoDelimiter)
        ));

        let mut cut = b"(width:1,height:1,fps:1.0,pixel_format:Rgb24)".to_vec();
        cut.extend([0xFF, 1, 2, 3, 4]);
        assert!(matches!(
            FrameFile::from_reader(&mut cut.as_slice()),
            Err(VideoError::Truncated)
        ));
    }
}
