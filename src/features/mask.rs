//! Binary masks and morphological closing.

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Which side of the binarization threshold counts as crystal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Strobe-lit crystal on a dark background: foreground is `> threshold`.
    #[default]
    Bright,
    /// Backlit silhouette: foreground is `< threshold`.
    Dark,
}

/// Row-major foreground mask.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    width: usize,
    height: usize,
    data: Vec<bool>,
}

impl Mask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![false; width * height],
        }
    }

    pub fn from_threshold(image: &GrayImage, threshold: u8, polarity: Polarity) -> Self {
        let (width, height) = image.dimensions();
        let data = image
            .as_raw()
            .iter()
            .map(|&p| match polarity {
                Polarity::Bright => p > threshold,
                Polarity::Dark => p < threshold,
            })
            .collect();
        Self {
            width: width as usize,
            height: height as usize,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Foreground test; out-of-range coordinates are background.
    pub fn get(&self, row: isize, col: isize) -> bool {
        if row < 0 || col < 0 || row as usize >= self.height || col as usize >= self.width {
            return false;
        }
        self.data[row as usize * self.width + col as usize]
    }

    pub fn set(&mut self, row: usize, col: usize, value: bool) {
        if row < self.height && col < self.width {
            self.data[row * self.width + col] = value;
        }
    }

    /// Mark a filled axis-aligned rectangle as foreground.
    pub fn fill_rect(&mut self, row: usize, col: usize, rows: usize, cols: usize) {
        for r in row..row + rows {
            for c in col..col + cols {
                self.set(r, c, true);
            }
        }
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }

    pub(crate) fn raw(&self) -> &[bool] {
        &self.data
    }

    /// Dilation followed by erosion with a `size` x `size` square, each
    /// repeated `iterations` times. Fills gaps narrower than the element
    /// inside a silhouette without growing its outline.
    pub fn close(&self, size: usize, iterations: usize) -> Mask {
        if iterations == 0 || size <= 1 {
            return self.clone();
        }
        let radius = size / 2;
        let mut out = self.clone();
        for _ in 0..iterations {
            out = out.sweep(radius, Sweep::Dilate);
        }
        for _ in 0..iterations {
            out = out.sweep(radius, Sweep::Erode);
        }
        out
    }

    /// A square element is separable: run the 1-D max/min along rows, then columns.
    fn sweep(&self, radius: usize, op: Sweep) -> Mask {
        let horizontal = self.sweep_axis(radius, op, true);
        horizontal.sweep_axis(radius, op, false)
    }

    fn sweep_axis(&self, radius: usize, op: Sweep, along_rows: bool) -> Mask {
        let mut out = Mask::new(self.width, self.height);
        let r = radius as isize;
        for row in 0..self.height {
            for col in 0..self.width {
                let mut hit = matches!(op, Sweep::Erode);
                for offset in -r..=r {
                    let (nr, nc) = if along_rows {
                        (row as isize, col as isize + offset)
                    } else {
                        (row as isize + offset, col as isize)
                    };
                    let inside = nr >= 0
                        && nc >= 0
                        && (nr as usize) < self.height
                        && (nc as usize) < self.width;
                    match op {
                        // Pixels outside the frame never add foreground...
                        Sweep::Dilate if inside && self.get(nr, nc) => {
                            hit = true;
                            break;
                        }
                        // ...and never erode it.
                        Sweep::Erode if inside && !self.get(nr, nc) => {
                            hit = false;
                            break;
                        }
                        _ => {}
                    }
                }
                out.data[row * self.width + col] = hit;
            }
        }
        out
    }
}

#[derive(Clone, Copy, Debug)]
enum Sweep {
    Dilate,
    Erode,
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn threshold_respects_polarity() {
        let image = GrayImage::from_fn(4, 1, |x, _| Luma([(x * 60) as u8]));
        let bright = Mask::from_threshold(&image, 60, Polarity::Bright);
        assert_eq!(bright.raw(), &[false, false, true, true]);
        let dark = Mask::from_threshold(&image, 60, Polarity::Dark);
        assert_eq!(dark.raw(), &[true, false, false, false]);
    }

    #[test]
    fn closing_fills_a_one_pixel_gap() {
        let mut mask = Mask::new(20, 20);
        mask.fill_rect(5, 5, 10, 4);
        mask.fill_rect(5, 10, 10, 4);
        let closed = mask.close(3, 1);
        assert!(!mask.get(8, 9));
        assert!(closed.get(8, 9));
        // Outline is preserved.
        assert!(!closed.get(4, 7));
        assert!(!closed.get(8, 4));
        assert_eq!(closed.count(), 10 * 9);
    }

    #[test]
    fn closing_keeps_distant_objects_apart() {
        let mut mask = Mask::new(30, 14);
        mask.fill_rect(4, 4, 5, 5);
        mask.fill_rect(4, 17, 5, 5);
        let closed = mask.close(3, 2);
        assert_eq!(closed, mask);
    }

    #[test]
    fn closing_does_not_erode_frame_border() {
        let mut mask = Mask::new(8, 8);
        mask.fill_rect(0, 0, 4, 4);
        assert_eq!(mask.close(3, 1), mask);
    }
}
