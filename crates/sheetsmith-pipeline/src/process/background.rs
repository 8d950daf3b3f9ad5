//! Background removal
//!
//! The segmentation model is a collaborator behind `BackgroundRemover`: a
//! bitmap goes in, the same-sized bitmap comes out with background pixels
//! fully transparent.

use image::{Rgba, RgbaImage};
use sheetsmith_core::Result;
use std::collections::VecDeque;

pub trait BackgroundRemover {
    /// Name for logs
    fn name(&self) -> &str;

    /// Return `image` with its background made transparent. Dimensions are preserved.
    fn remove_background(&self, image: RgbaImage) -> Result<RgbaImage>;
}

/// Leaves pixels untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepBackground;

impl BackgroundRemover for KeepBackground {
    fn name(&self) -> &str {
        "none"
    }

    fn remove_background(&self, image: RgbaImage) -> Result<RgbaImage> {
        Ok(image)
    }
}

/// Keys out the region connected to the image border whose colour matches
/// the dominant corner colour.
///
/// Generated sprites sit on a flat backdrop; flooding from the edges keeps
/// interior pixels of the same colour (eyes, highlights) intact.
#[derive(Debug, Clone, Copy)]
pub struct EdgeKeyRemover {
    /// Max per-channel difference still counted as backdrop
    pub tolerance: u8,
}

impl Default for EdgeKeyRemover {
    fn default() -> Self {
        Self { tolerance: 24 }
    }
}

impl EdgeKeyRemover {
    pub fn new(tolerance: u8) -> Self {
        Self { tolerance }
    }

    fn matches(&self, pixel: &Rgba<u8>, key: &Rgba<u8>) -> bool {
        if pixel[3] == 0 {
            return true;
        }
        pixel
            .0
            .iter()
            .zip(key.0.iter())
            .take(3)
            .all(|(a, b)| a.abs_diff(*b) <= self.tolerance)
    }
}

/// Most frequent of the four corner pixels; top-left wins ties
fn corner_key(image: &RgbaImage) -> Rgba<u8> {
    let (w, h) = image.dimensions();
    let corners = [
        *image.get_pixel(0, 0),
        *image.get_pixel(w - 1, 0),
        *image.get_pixel(0, h - 1),
        *image.get_pixel(w - 1, h - 1),
    ];
    let mut best = corners[0];
    let mut best_count = 0;
    for candidate in &corners {
        let count = corners.iter().filter(|c| *c == candidate).count();
        if count > best_count {
            best = *candidate;
            best_count = count;
        }
    }
    best
}

impl BackgroundRemover for EdgeKeyRemover {
    fn name(&self) -> &str {
        "edge_key"
    }

    fn remove_background(&self, mut image: RgbaImage) -> Result<RgbaImage> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Ok(image);
        }
        let key = corner_key(&image);
        let index = |x: u32, y: u32| (y as usize) * (w as usize) + x as usize;

        let mut visited = vec![false; (w as usize) * (h as usize)];
        let mut queue = VecDeque::new();

        let border = (0..w)
            .flat_map(|x| [(x, 0), (x, h - 1)])
            .chain((0..h).flat_map(|y| [(0, y), (w - 1, y)]));
        for (x, y) in border {
            if !visited[index(x, y)] && self.matches(image.get_pixel(x, y), &key) {
                visited[index(x, y)] = true;
                queue.push_back((x, y));
            }
        }

        while let Some((x, y)) = queue.pop_front() {
            image.put_pixel(x, y, Rgba([0, 0, 0, 0]));

            let neighbours = [
                (x.wrapping_sub(1), y),
                (x + 1, y),
                (x, y.wrapping_sub(1)),
                (x, y + 1),
            ];
            for (nx, ny) in neighbours {
                if nx >= w || ny >= h || visited[index(nx, ny)] {
                    continue;
                }
                if self.matches(image.get_pixel(nx, ny), &key) {
                    visited[index(nx, ny)] = true;
                    queue.push_back((nx, ny));
                }
            }
        }

        Ok(image)
    }
}
