// THEORY:
// The `FrameBuffer` is the "dumb" data container at the bottom of the flow engine.
// It owns one RGBA8 frame exactly as the video collaborator decoded it and knows
// how to answer a single question: "what is the intensity at (x, y)?"
//
// Key architectural principles:
// 1.  **Raw Layout**: Pixels stay in the interleaved `width * height * 4` layout the
//     decoder produced. No grayscale copy is made; the estimator reads the first
//     channel directly, treating it as the grayscale-equivalent sample.
// 2.  **Clamp-to-Edge Sampling**: The windowed gradient sums around edge zones walk
//     off the image. Every read clamps x and y into the image independently, so a
//     zone at (0, 0) with a wide window sees the border pixel repeated rather than
//     whatever memory happens to lie next to the buffer.
// 3.  **Read-Only**: A frame is never mutated after construction. The pipeline keeps
//     exactly two alive at a time (previous and current) and swaps them per tick.

use crate::error::FrameError;
use image::RgbaImage;

/// Number of interleaved channels per pixel (RGBA).
pub const CHANNELS: usize = 4;

/// One decoded RGBA8 video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FrameBuffer {
    /// Wraps a raw RGBA buffer, rejecting buffers whose length does not match the dimensions.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }

    /// Builds an opaque gray frame from an intensity function.
    /// Handy for synthetic sequences; every channel but alpha receives the value.
    pub fn from_fn<F>(width: u32, height: u32, mut intensity: F) -> Self
    where
        F: FnMut(u32, u32) -> u8,
    {
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for y in 0..height {
            for x in 0..width {
                let value = intensity(x, y);
                data.extend_from_slice(&[value, value, value, u8::MAX]);
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// First-channel intensity at (x, y), with both coordinates clamped into the image.
    /// An empty frame reads as 0 everywhere.
    #[inline]
    pub fn intensity(&self, x: i64, y: i64) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[(y * self.width as usize + x) * CHANNELS] as f64
    }

    /// Converts back into an `image` buffer, e.g. to use the frame as a canvas backdrop.
    pub fn to_image(&self) -> RgbaImage {
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }
}

impl From<RgbaImage> for FrameBuffer {
    fn from(image: RgbaImage) -> Self {
        Self::from_image(image)
    }
}
