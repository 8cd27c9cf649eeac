//! Face alignment to the canonical ArcFace crop.
//!
//! A 4-DOF similarity transform (uniform scale, rotation, translation) is
//! fitted from the five detected landmarks onto the InsightFace reference
//! positions, then the frame is warped into a 112×112 RGB crop.

use image::{Rgb, RgbImage};

pub const ALIGNED_SIZE: u32 = 112;

/// InsightFace reference landmarks for a 112×112 crop.
pub const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Forward similarity transform `dst = [a -b; b a] · src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    #[cfg(test)]
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Closed-form least-squares fit mapping `src` onto `dst`.
    ///
    /// Returns `None` when the source points collapse onto one spot.
    pub fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(x, y), p| (x + p.0, y + p.1));
            (sx / n, sy / n)
        };
        let (sxm, sym) = mean(src);
        let (dxm, dym) = mean(dst);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (s, d) in src.iter().zip(dst) {
            let (px, py) = (s.0 - sxm, s.1 - sym);
            let (qx, qy) = (d.0 - dxm, d.1 - dym);
            dot += px * qx + py * qy;
            cross += px * qy - py * qx;
            norm += px * px + py * py;
        }
        if norm < 1e-9 {
            return None;
        }

        let a = dot / norm;
        let b = cross / norm;
        Some(Self {
            a,
            b,
            tx: dxm - (a * sxm - b * sym),
            ty: dym - (b * sxm + a * sym),
        })
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    /// Inverse mapping, `None` for a degenerate (zero-scale) transform.
    pub fn invert(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (ia, ib) = (self.a / det, -self.b / det);
        Some(Self {
            a: ia,
            b: ib,
            tx: -(ia * self.tx - ib * self.ty),
            ty: -(ib * self.tx + ia * self.ty),
        })
    }
}

/// Warp `image` through `forward` into a `size`×`size` crop.
///
/// Bilinear sampling; pixels that map outside the source are black.
pub fn warp(image: &RgbImage, forward: &Similarity, size: u32) -> RgbImage {
    let mut out = RgbImage::new(size, size);
    let Some(inverse) = forward.invert() else {
        return out;
    };
    let (w, h) = (image.width() as i64, image.height() as i64);

    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < w && y >= 0 && y < h {
            image.get_pixel(x as u32, y as u32).0[c] as f32
        } else {
            0.0
        }
    };

    for (ox, oy, pixel) in out.enumerate_pixels_mut() {
        let (sx, sy) = inverse.apply((ox as f32, oy as f32));
        let (x0, y0) = (sx.floor() as i64, sy.floor() as i64);
        let (fx, fy) = (sx - sx.floor(), sy - sy.floor());

        let mut rgb = [0u8; 3];
        for (c, channel) in rgb.iter_mut().enumerate() {
            let top = sample(x0, y0, c) * (1.0 - fx) + sample(x0 + 1, y0, c) * fx;
            let bottom = sample(x0, y0 + 1, c) * (1.0 - fx) + sample(x0 + 1, y0 + 1, c) * fx;
            *channel = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
        *pixel = Rgb(rgb);
    }

    out
}

/// Align a face to the 112×112 ArcFace template from its landmarks.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> Option<RgbImage> {
    let transform = Similarity::fit(landmarks, &REFERENCE_LANDMARKS)?;
    Some(warp(image, &transform, ALIGNED_SIZE))
}
