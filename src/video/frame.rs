//! Frames of the built-in backend and the transform every stored frame
//! goes through.

use image::{
    imageops::{self, FilterType},
    Rgb, RgbImage,
};

/// Bytes per pixel; frames are packed 8-bit RGB.
pub const CHANNELS: usize = 3;

/// One packed RGB image, row-major, no padding.
pub type Frame = RgbImage;

/// Buffer size of a `width` x `height` frame.
pub fn byte_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * CHANNELS
}

/// A frame filled with a single colour.
pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
    RgbImage::from_pixel(width, height, Rgb(rgb))
}

/// Turns `frame` upside down, the camera being mounted inverted, and scales
/// it to `width` x `height`. The triangle filter widens with the scale
/// factor, so a downscale averages every source pixel it covers.
pub fn upright(mut frame: Frame, width: u32, height: u32) -> Frame {
    imageops::rotate180_in_place(&mut frame);
    if frame.dimensions() == (width, height) {
        return frame;
    }
    imageops::resize(&frame, width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 7]))
    }

    #[test]
    fn rotation_flips_both_axes() {
        let frame = gradient(4, 3);
        let turned = upright(frame.clone(), 4, 3);
        assert_eq!(turned.get_pixel(0, 0), frame.get_pixel(3, 2));
        assert_eq!(turned.get_pixel(3, 2), frame.get_pixel(0, 0));
        assert_eq!(turned.get_pixel(1, 0), frame.get_pixel(2, 2));
        assert_eq!(upright(turned, 4, 3), frame);
    }

    #[test]
    fn halving_averages_blocks() {
        let frame = RgbImage::from_raw(
            2,
            2,
            vec![
                0, 0, 0, 100, 100, 100, //
                50, 50, 50, 250, 250, 250,
            ],
        )
        .unwrap();
        let small = upright(frame, 1, 1);
        assert_eq!(small.get_pixel(0, 0), &Rgb([100, 100, 100]));
    }

    #[test]
    fn downscale_keeps_orientation() {
        // Left half dark, right half bright; upright it is the other way round.
        let frame = RgbImage::from_fn(8, 4, |x, _| {
            if x < 4 {
                Rgb([0, 0, 0])
            } else {
                Rgb([200, 200, 200])
            }
        });
        let small = upright(frame, 2, 1);
        assert_eq!(small.dimensions(), (2, 1));
        assert!(small.get_pixel(0, 0)[0] > 150);
        assert!(small.get_pixel(1, 0)[0] < 50);
    }

    #[test]
    fn upscale_keeps_solid_colour() {
        let big = upright(solid(3, 2, [1, 2, 3]), 8, 5);
        assert_eq!(big.dimensions(), (8, 5));
        assert_eq!(big.as_raw().len(), byte_len(8, 5));
        assert!(big.pixels().all(|p| *p == Rgb([1, 2, 3])));
    }
}
