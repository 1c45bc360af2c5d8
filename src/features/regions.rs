//! Connected-component labeling and region measurements.

use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, SQRT_2};

use super::mask::Mask;

/// Pixel adjacency used when grouping foreground pixels into regions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Four,
    #[default]
    Eight,
}

impl Connectivity {
    fn offsets(self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &[(-1, 0), (0, -1), (0, 1), (1, 0)],
            Connectivity::Eight => &[
                (-1, -1),
                (-1, 0),
                (-1, 1),
                (0, -1),
                (0, 1),
                (1, -1),
                (1, 0),
                (1, 1),
            ],
        }
    }
}

/// One connected foreground component, as (row, col) pixel coordinates.
#[derive(Clone, Debug)]
pub struct Region {
    pub pixels: Vec<(usize, usize)>,
}

/// Label connected components. Regions come out in raster order of their
/// first (top-most, then left-most) pixel, so the result depends only on the mask.
pub fn label(mask: &Mask, connectivity: Connectivity) -> Vec<Region> {
    let (width, height) = (mask.width(), mask.height());
    let mut visited = vec![false; width * height];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for start in 0..width * height {
        if visited[start] || !mask.raw()[start] {
            continue;
        }
        visited[start] = true;
        stack.push(start);
        let mut pixels = Vec::new();
        while let Some(idx) = stack.pop() {
            let (row, col) = (idx / width, idx % width);
            pixels.push((row, col));
            for &(dr, dc) in connectivity.offsets() {
                let (nr, nc) = (row as isize + dr, col as isize + dc);
                if !mask.get(nr, nc) {
                    continue;
                }
                let nidx = nr as usize * width + nc as usize;
                if !visited[nidx] {
                    visited[nidx] = true;
                    stack.push(nidx);
                }
            }
        }
        pixels.sort_unstable();
        regions.push(Region { pixels });
    }

    regions
}

/// Shape measurements of a region, in pixel units.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionProps {
    pub area: usize,
    pub centroid: (f64, f64),
    /// Major-axis angle in radians from the column axis towards increasing rows.
    pub orientation: f64,
    pub major_axis_length: f64,
    pub minor_axis_length: f64,
    pub perimeter: f64,
    pub equivalent_diameter: f64,
}

impl RegionProps {
    pub fn measure(region: &Region) -> Self {
        let area = region.pixels.len();
        let n = area as f64;
        let (sum_r, sum_c) = region
            .pixels
            .iter()
            .fold((0.0, 0.0), |(r, c), &(pr, pc)| (r + pr as f64, c + pc as f64));
        let centroid = (sum_r / n, sum_c / n);

        let (mut var_r, mut var_c, mut cov) = (0.0, 0.0, 0.0);
        for &(pr, pc) in &region.pixels {
            let dr = pr as f64 - centroid.0;
            let dc = pc as f64 - centroid.1;
            var_r += dr * dr;
            var_c += dc * dc;
            cov += dr * dc;
        }
        var_r /= n;
        var_c /= n;
        cov /= n;

        // Eigenvalues of the second-moment matrix.
        let mean = (var_r + var_c) / 2.0;
        let spread = (((var_r - var_c) / 2.0).powi(2) + cov * cov).sqrt();
        let major = 4.0 * (mean + spread).max(0.0).sqrt();
        let minor = 4.0 * (mean - spread).max(0.0).sqrt();

        Self {
            area,
            centroid,
            orientation: 0.5 * (2.0 * cov).atan2(var_c - var_r),
            major_axis_length: major,
            minor_axis_length: minor,
            perimeter: perimeter(region),
            equivalent_diameter: equivalent_diameter(area),
        }
    }

    /// Minor/major axis ratio. A region without extent (a single pixel) is
    /// treated as round.
    pub fn aspect_ratio(&self) -> f64 {
        if self.major_axis_length > f64::EPSILON {
            self.minor_axis_length / self.major_axis_length
        } else {
            1.0
        }
    }
}

/// Diameter of the circle with the same area.
pub fn equivalent_diameter(area: usize) -> f64 {
    (4.0 * area as f64 / PI).sqrt()
}

/// Boundary length estimate that weights straight, diagonal and corner
/// boundary runs differently, so a digitized disc measures close to `pi * d`.
fn perimeter(region: &Region) -> f64 {
    let Some(&(min_r, _)) = region.pixels.first() else {
        return 0.0;
    };
    let max_r = region.pixels.iter().map(|p| p.0).max().unwrap_or(min_r);
    let min_c = region.pixels.iter().map(|p| p.1).min().unwrap_or(0);
    let max_c = region.pixels.iter().map(|p| p.1).max().unwrap_or(min_c);

    // Local mask with a one-pixel background pad.
    let (h, w) = (max_r - min_r + 3, max_c - min_c + 3);
    let mut local = Mask::new(w, h);
    for &(r, c) in &region.pixels {
        local.set(r - min_r + 1, c - min_c + 1, true);
    }

    // Boundary = foreground pixels with a 4-neighbour in the background.
    let mut boundary = Mask::new(w, h);
    for r in 1..h - 1 {
        for c in 1..w - 1 {
            let (ri, ci) = (r as isize, c as isize);
            if local.get(ri, ci)
                && !(local.get(ri - 1, ci)
                    && local.get(ri + 1, ci)
                    && local.get(ri, ci - 1)
                    && local.get(ri, ci + 1))
            {
                boundary.set(r, c, true);
            }
        }
    }

    let mut total = 0.0;
    for r in 1..h - 1 {
        for c in 1..w - 1 {
            let (ri, ci) = (r as isize, c as isize);
            if !boundary.get(ri, ci) {
                continue;
            }
            let mut code = 1usize;
            for (dr, dc) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
                if boundary.get(ri + dr, ci + dc) {
                    code += 2;
                }
            }
            for (dr, dc) in [(-1, -1), (-1, 1), (1, -1), (1, 1)] {
                if boundary.get(ri + dr, ci + dc) {
                    code += 10;
                }
            }
            total += boundary_weight(code);
        }
    }
    total
}

fn boundary_weight(code: usize) -> f64 {
    match code {
        5 | 7 | 15 | 17 | 25 | 27 => 1.0,
        21 | 33 => SQRT_2,
        13 | 23 => (1.0 + SQRT_2) / 2.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disc(size: usize, radius: f64) -> Mask {
        let mut mask = Mask::new(size, size);
        let center = size as f64 / 2.0;
        for r in 0..size {
            for c in 0..size {
                let dr = r as f64 + 0.5 - center;
                let dc = c as f64 + 0.5 - center;
                if dr * dr + dc * dc <= radius * radius {
                    mask.set(r, c, true);
                }
            }
        }
        mask
    }

    #[test]
    fn diagonal_touch_depends_on_connectivity() {
        let mut mask = Mask::new(4, 4);
        mask.set(0, 0, true);
        mask.set(1, 1, true);
        assert_eq!(label(&mask, Connectivity::Four).len(), 2);
        assert_eq!(label(&mask, Connectivity::Eight).len(), 1);
    }

    #[test]
    fn regions_are_in_raster_order() {
        let mut mask = Mask::new(20, 20);
        mask.fill_rect(10, 1, 3, 3);
        mask.fill_rect(2, 15, 2, 2);
        let regions = label(&mask, Connectivity::Eight);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].pixels[0], (2, 15));
        assert_eq!(regions[1].pixels[0], (10, 1));
    }

    #[test]
    fn square_measurements() {
        let mut mask = Mask::new(30, 30);
        mask.fill_rect(5, 8, 10, 10);
        let regions = label(&mask, Connectivity::Eight);
        let props = RegionProps::measure(&regions[0]);
        assert_eq!(props.area, 100);
        assert_eq!(props.centroid, (9.5, 12.5));
        assert!((props.aspect_ratio() - 1.0).abs() < 1e-9);
        assert!((props.equivalent_diameter - 11.283_791_670_955_125).abs() < 1e-9);
        // Measured through the centres of the 36 boundary pixels.
        assert!((props.perimeter - 36.0).abs() < 1e-9, "{}", props.perimeter);
    }

    #[test]
    fn elongated_region_orientation() {
        let mut horizontal = Mask::new(40, 40);
        horizontal.fill_rect(10, 5, 3, 20);
        let props = RegionProps::measure(&label(&horizontal, Connectivity::Eight)[0]);
        assert!(props.orientation.abs() < 1e-9);
        assert!(props.aspect_ratio() < 0.5);

        let mut vertical = Mask::new(40, 40);
        vertical.fill_rect(5, 10, 20, 3);
        let props = RegionProps::measure(&label(&vertical, Connectivity::Eight)[0]);
        assert!((props.orientation.abs() - PI / 2.0).abs() < 1e-9);

        let mut diagonal = Mask::new(40, 40);
        for i in 0..20 {
            diagonal.set(5 + i, 5 + i, true);
        }
        let props = RegionProps::measure(&label(&diagonal, Connectivity::Eight)[0]);
        assert!((props.orientation - PI / 4.0).abs() < 1e-9);
    }

    #[test]
    fn single_pixel_is_round_and_finite() {
        let mut mask = Mask::new(3, 3);
        mask.set(1, 1, true);
        let props = RegionProps::measure(&label(&mask, Connectivity::Four)[0]);
        assert_eq!(props.aspect_ratio(), 1.0);
        assert_eq!(props.perimeter, 0.0);
        assert!(props.orientation.is_finite());
    }

    #[test]
    fn disc_perimeter_is_close_to_circle() {
        let mask = disc(80, 25.0);
        let props = RegionProps::measure(&label(&mask, Connectivity::Eight)[0]);
        let ratio = props.perimeter / (PI * props.equivalent_diameter);
        assert!((ratio - 1.0).abs() < 0.1, "ratio {}", ratio);
    }
}
