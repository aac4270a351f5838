//! CD matrix photo detection
//!
//! Heuristic scorer deciding whether an uploaded photo shows the data
//! surface of a CD (hub hole, metallic ring, radial brightness
//! structure). Used by the scanning UI to route matrix-code photos into
//! the catalogue flow without a round trip to an external vision API.
//!
//! Deterministic and side-effect-free: pixels in, score out. Undecodable
//! input yields confidence 0 and is_matrix false.

use serde::Serialize;

/// Analysis grid edge length; input images are downsampled to this size
const GRID: usize = 64;

/// Luminance below which a pixel counts as "dark" for the hub test
const DARK_LUMA: f32 = 0.25;

/// Feature weights, fixed by calibration against scanned collections
const WEIGHT_HUB: f32 = 0.35;
const WEIGHT_RING: f32 = 0.25;
const WEIGHT_PROFILE: f32 = 0.25;
const WEIGHT_OSCILLATION: f32 = 0.15;

/// Confidence threshold for the boolean verdict
const MATRIX_THRESHOLD: f32 = 0.5;

/// Individual feature measurements, returned for diagnostics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatrixFeatures {
    /// Center disk is predominantly dark (the spindle hole)
    pub has_hub_hole: bool,
    /// Fraction of dark pixels within the hub region
    pub hub_darkness_ratio: f32,
    /// Mean color saturation in the data ring (low for metallic surfaces)
    pub ring_saturation: f32,
    /// Hue variance in the data ring
    pub ring_hue_variance: f32,
    /// Dark-hub-to-bright-ring brightness contrast, normalized
    pub radial_profile_score: f32,
    /// Brightness oscillations along the radius
    pub radial_oscillations: u32,
}

/// Detection verdict
#[derive(Debug, Clone, Serialize)]
pub struct MatrixDetection {
    pub is_matrix: bool,
    /// Weighted feature score in [0, 1]
    pub confidence: f32,
    pub features: MatrixFeatures,
}

impl MatrixDetection {
    /// Zero-confidence result for undecodable input
    fn rejected() -> Self {
        Self {
            is_matrix: false,
            confidence: 0.0,
            features: MatrixFeatures::default(),
        }
    }
}

/// Score whether an RGBA image shows a CD data surface
///
/// `pixels` is row-major RGBA8; its length must equal
/// `width * height * 4`. Invalid dimensions or a mismatched buffer are
/// rejected rather than panicking.
pub fn detect(pixels: &[u8], width: u32, height: u32) -> MatrixDetection {
    if width == 0 || height == 0 {
        return MatrixDetection::rejected();
    }
    let expected = width as usize * height as usize * 4;
    if pixels.len() != expected {
        return MatrixDetection::rejected();
    }

    let grid = downsample(pixels, width as usize, height as usize);

    let (hub_ratio, has_hub_hole) = hub_darkness(&grid);
    let (ring_saturation, ring_hue_variance, ring_score) = ring_uniformity(&grid);
    let profile_score = radial_profile(&grid);
    let (oscillations, oscillation_score) = radial_oscillations(&grid);

    let confidence = (WEIGHT_HUB * hub_ratio
        + WEIGHT_RING * ring_score
        + WEIGHT_PROFILE * profile_score
        + WEIGHT_OSCILLATION * oscillation_score)
        .clamp(0.0, 1.0);

    MatrixDetection {
        is_matrix: confidence >= MATRIX_THRESHOLD,
        confidence,
        features: MatrixFeatures {
            has_hub_hole,
            hub_darkness_ratio: hub_ratio,
            ring_saturation,
            ring_hue_variance,
            radial_profile_score: profile_score,
            radial_oscillations: oscillations,
        },
    }
}

/// One downsampled pixel with precomputed color measures
#[derive(Clone, Copy)]
struct Sample {
    luma: f32,
    saturation: f32,
    hue: f32,
}

/// Nearest-neighbor downsample to the analysis grid
fn downsample(pixels: &[u8], width: usize, height: usize) -> Vec<Sample> {
    let mut grid = Vec::with_capacity(GRID * GRID);
    for gy in 0..GRID {
        let sy = gy * height / GRID;
        for gx in 0..GRID {
            let sx = gx * width / GRID;
            let offset = (sy * width + sx) * 4;
            let r = pixels[offset] as f32 / 255.0;
            let g = pixels[offset + 1] as f32 / 255.0;
            let b = pixels[offset + 2] as f32 / 255.0;
            grid.push(Sample {
                luma: 0.299 * r + 0.587 * g + 0.114 * b,
                saturation: saturation(r, g, b),
                hue: hue_degrees(r, g, b),
            });
        }
    }
    grid
}

fn saturation(r: f32, g: f32, b: f32) -> f32 {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max <= f32::EPSILON {
        0.0
    } else {
        (max - min) / max
    }
}

fn hue_degrees(r: f32, g: f32, b: f32) -> f32 {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    if delta <= f32::EPSILON {
        return 0.0;
    }
    let hue = if max == r {
        60.0 * (((g - b) / delta) % 6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    if hue < 0.0 {
        hue + 360.0
    } else {
        hue
    }
}

/// Normalized distance of a grid cell from the image center, 1.0 at the
/// nearer edge
fn radius(gx: usize, gy: usize) -> f32 {
    let center = (GRID as f32 - 1.0) / 2.0;
    let dx = gx as f32 - center;
    let dy = gy as f32 - center;
    (dx * dx + dy * dy).sqrt() / center
}

/// Hub test: fraction of dark pixels within 10% of the radius
fn hub_darkness(grid: &[Sample]) -> (f32, bool) {
    let mut total = 0u32;
    let mut dark = 0u32;
    for gy in 0..GRID {
        for gx in 0..GRID {
            if radius(gx, gy) <= 0.1 {
                total += 1;
                if grid[gy * GRID + gx].luma < DARK_LUMA {
                    dark += 1;
                }
            }
        }
    }
    if total == 0 {
        return (0.0, false);
    }
    let ratio = dark as f32 / total as f32;
    (ratio, ratio > 0.6)
}

/// Ring test: the data zone of a disc is metallic, so saturation is low
/// and what little color exists (interference rainbow) has a narrow hue
/// spread per photo
fn ring_uniformity(grid: &[Sample]) -> (f32, f32, f32) {
    let mut samples = Vec::new();
    for gy in 0..GRID {
        for gx in 0..GRID {
            let r = radius(gx, gy);
            if r >= 0.35 && r <= 0.9 {
                samples.push(grid[gy * GRID + gx]);
            }
        }
    }
    if samples.is_empty() {
        return (0.0, 0.0, 0.0);
    }

    let mean_sat: f32 =
        samples.iter().map(|s| s.saturation).sum::<f32>() / samples.len() as f32;

    // Hue variance over the saturated pixels only; a gray ring has none
    let hues: Vec<f32> = samples
        .iter()
        .filter(|s| s.saturation > 0.2)
        .map(|s| s.hue)
        .collect();
    let hue_variance = if hues.len() < 2 {
        0.0
    } else {
        let mean = hues.iter().sum::<f32>() / hues.len() as f32;
        hues.iter().map(|h| (h - mean) * (h - mean)).sum::<f32>() / hues.len() as f32
    };

    let sat_score = (1.0 - 2.0 * mean_sat).clamp(0.0, 1.0);
    let hue_score = (1.0 - hue_variance / 10_000.0).clamp(0.0, 1.0);
    (mean_sat, hue_variance, sat_score * hue_score)
}

/// Radial profile test: a matrix photo is dark at the hub and brighter
/// through the data ring
fn radial_profile(grid: &[Sample]) -> f32 {
    let inner = band_mean_luma(grid, 0.0, 0.15);
    let ring = band_mean_luma(grid, 0.35, 0.9);
    match (inner, ring) {
        (Some(inner), Some(ring)) => (ring - inner).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

fn band_mean_luma(grid: &[Sample], lo: f32, hi: f32) -> Option<f32> {
    let mut sum = 0.0f32;
    let mut n = 0u32;
    for gy in 0..GRID {
        for gx in 0..GRID {
            let r = radius(gx, gy);
            if r >= lo && r <= hi {
                sum += grid[gy * GRID + gx].luma;
                n += 1;
            }
        }
    }
    if n == 0 {
        None
    } else {
        Some(sum / n as f32)
    }
}

/// Oscillation test: brightness along a radius crosses its local mean
/// several times on a real disc (hub rim, clamp ring, matrix ring, data
/// zone) and almost never on a flat subject
fn radial_oscillations(grid: &[Sample]) -> (u32, f32) {
    // Sample a horizontal radius from center to the right edge
    let cy = GRID / 2;
    let profile: Vec<f32> = (GRID / 2..GRID)
        .map(|gx| grid[cy * GRID + gx].luma)
        .collect();
    if profile.len() < 3 {
        return (0, 0.0);
    }

    let mean = profile.iter().sum::<f32>() / profile.len() as f32;
    let mut crossings = 0u32;
    let mut above = profile[0] > mean;
    for &luma in &profile[1..] {
        // Hysteresis band suppresses sensor noise
        if above && luma < mean - 0.05 {
            above = false;
            crossings += 1;
        } else if !above && luma > mean + 0.05 {
            above = true;
            crossings += 1;
        }
    }

    let score = (crossings as f32 / 4.0).min(1.0);
    (crossings, score)
}
