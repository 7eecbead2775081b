//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face onto the canonical 112×112 five-landmark template
//! shared by ArcFace and SFace.

use image::{Rgb, RgbImage};

/// Reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [a -b; b a] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit of `src` onto `dst`.
    ///
    /// With both point sets centred, `a = Σ(s·d) / Σ|s|²` and
    /// `b = Σ(s × d) / Σ|s|²`; the translation maps centroid to centroid.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let centroid = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (scx, scy) = centroid(src);
        let (dcx, dcy) = centroid(dst);

        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        let mut var = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (sx, sy) = (sx - scx, sy - scy);
            let (dx, dy) = (dx - dcx, dy - dcy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            var += sx * sx + sy * sy;
        }
        if var < 1e-6 {
            return None;
        }

        let a = dot / var;
        let b = cross / var;
        Some(Self {
            a,
            b,
            tx: dcx - (a * scx - b * scy),
            ty: dcy - (b * scx + a * scy),
        })
    }

    /// Map an output pixel back to source coordinates.
    fn invert(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Warp `src` through `transform` into a square RGB crop.
///
/// Bilinear sampling; pixels that fall outside the source are black.
fn warp(src: &RgbImage, transform: &Similarity, out_size: u32) -> RgbImage {
    let (w, h) = (src.width() as i64, src.height() as i64);
    let sample = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && x < w && y >= 0 && y < h {
            let p = src.get_pixel(x as u32, y as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let Some((sx, sy)) = transform.invert(ox as f32, oy as f32) else {
            return Rgb([0, 0, 0]);
        };
        let (x0, y0) = (sx.floor() as i64, sy.floor() as i64);
        let (fx, fy) = (sx - x0 as f32, sy - y0 as f32);

        let tl = sample(x0, y0);
        let tr = sample(x0 + 1, y0);
        let bl = sample(x0, y0 + 1);
        let br = sample(x0 + 1, y0 + 1);

        Rgb(std::array::from_fn(|c| {
            let v = tl[c] * (1.0 - fx) * (1.0 - fy)
                + tr[c] * fx * (1.0 - fy)
                + bl[c] * (1.0 - fx) * fy
                + br[c] * fx * fy;
            v.round().clamp(0.0, 255.0) as u8
        }))
    })
}

/// Align a detected face to a canonical 112×112 RGB crop.
///
/// Returns `None` when the landmarks are degenerate (all coincident).
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> Option<RgbImage> {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112)?;
    Some(warp(image, &transform, ALIGNED_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let t = Similarity::estimate(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112).unwrap();
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3 && t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_scaled_transform() {
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0 + 10.0, y * 2.0 + 5.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112).unwrap();
        assert!((t.a - 0.5).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4);
        assert!((t.tx + 5.0).abs() < 1e-2, "tx = {}", t.tx);
        assert!((t.ty + 2.5).abs() < 1e-2, "ty = {}", t.ty);
    }

    #[test]
    fn test_rotated_transform() {
        // Source rotated by +90° about the origin: (x, y) → (-y, x).
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (-y, x));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112).unwrap();
        // Undoing it needs a -90° rotation: a = cos = 0, b = sin = -1.
        assert!(t.a.abs() < 1e-4, "a = {}", t.a);
        assert!((t.b + 1.0).abs() < 1e-4, "b = {}", t.b);
    }

    #[test]
    fn test_degenerate_landmarks() {
        let collapsed = [(10.0, 10.0); 5];
        assert!(Similarity::estimate(&collapsed, &REFERENCE_LANDMARKS_112).is_none());
        let image = RgbImage::new(50, 50);
        assert!(align_face(&image, &collapsed).is_none());
    }

    #[test]
    fn test_align_output_size() {
        let image = RgbImage::from_pixel(640, 480, Rgb([128, 64, 32]));
        let aligned = align_face(&image, &REFERENCE_LANDMARKS_112).unwrap();
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        // Identity warp inside a uniform image keeps the colour.
        assert_eq!(aligned.get_pixel(56, 56).0, [128, 64, 32]);
    }

    #[test]
    fn test_landmark_roundtrip() {
        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // Paint a 5×5 green patch at the left eye.
        let mut image = RgbImage::new(200, 200);
        for dy in 0..5 {
            for dx in 0..5 {
                image.put_pixel(78 + dx, 58 + dy, Rgb([0, 255, 0]));
            }
        }

        let aligned = align_face(&image, &src_landmarks).unwrap();

        let (rx, ry) = (
            REFERENCE_LANDMARKS_112[0].0.round() as u32,
            REFERENCE_LANDMARKS_112[0].1.round() as u32,
        );
        let mut max_green = 0u8;
        for y in ry - 1..=ry + 1 {
            for x in rx - 1..=rx + 1 {
                let p = aligned.get_pixel(x, y).0;
                assert_eq!(p[0], 0);
                max_green = max_green.max(p[1]);
            }
        }
        assert!(max_green > 100, "expected green patch near ({rx}, {ry}), max={max_green}");
    }

    #[test]
    fn test_outside_source_is_black() {
        let image = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        let far = REFERENCE_LANDMARKS_112.map(|(x, y)| (x + 1000.0, y + 1000.0));
        let aligned = align_face(&image, &far).unwrap();
        assert_eq!(aligned.get_pixel(56, 56).0, [0, 0, 0]);
    }
}
