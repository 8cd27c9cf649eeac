//! Overlay rendering for display frames.
//!
//! Boxes and label bands are drawn into the pixels. Label text travels with
//! each [`Overlay`] so consumers can typeset it with whatever font they
//! have.

use crate::decision::Decision;
use crate::source::Frame;
use crate::types::FaceRegion;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use serde::Serialize;

const BOX_THICKNESS: u32 = 2;
const LABEL_BAND_HEIGHT: u32 = 35;

const APPROVED_COLOR: [u8; 3] = [0, 255, 0];
const UNKNOWN_COLOR: [u8; 3] = [255, 0, 0];
const PENDING_COLOR: [u8; 3] = [255, 255, 0];

/// How a single detected region was classified in its pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum RegionClass {
    Approved { identity: String },
    Unknown,
    /// Extraction failed, or matching stopped before this region.
    Pending,
}

impl RegionClass {
    pub fn color(&self) -> [u8; 3] {
        match self {
            RegionClass::Approved { .. } => APPROVED_COLOR,
            RegionClass::Unknown => UNKNOWN_COLOR,
            RegionClass::Pending => PENDING_COLOR,
        }
    }

    pub fn label(&self) -> String {
        match self {
            RegionClass::Approved { identity } => format!("✓ {identity}"),
            RegionClass::Unknown => "✗ UNKNOWN".to_string(),
            RegionClass::Pending => "Detecting...".to_string(),
        }
    }
}

/// One drawn box with its label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub region: FaceRegion,
    #[serde(flatten)]
    pub class: RegionClass,
    pub label: String,
    pub color: [u8; 3],
}

/// A frame ready for display.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedFrame {
    #[serde(skip)]
    pub image: RgbImage,
    pub sequence: u32,
    pub width: u32,
    pub height: u32,
    pub overlays: Vec<Overlay>,
    /// Decision from the same recognition pass; `None` for pass-through frames.
    pub decision: Option<Decision>,
}

impl AnnotatedFrame {
    /// A frame that was not run through recognition.
    pub fn passthrough(image: RgbImage, sequence: u32) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            image,
            sequence,
            overlays: Vec::new(),
            decision: None,
        }
    }
}

/// Draw one box per region, coloured by its classification.
///
/// Pure: the input frame is left untouched. `regions` and `classes` are
/// paired positionally up to the shorter of the two.
pub fn annotate(
    frame: &Frame,
    regions: &[FaceRegion],
    classes: &[RegionClass],
    decision: Option<Decision>,
) -> AnnotatedFrame {
    let mut image = frame.image.clone();
    let mut overlays = Vec::with_capacity(regions.len().min(classes.len()));

    for (region, class) in regions.iter().zip(classes) {
        let color = class.color();
        draw_region(&mut image, region, Rgb(color));
        overlays.push(Overlay {
            region: region.clone(),
            class: class.clone(),
            label: class.label(),
            color,
        });
    }

    AnnotatedFrame {
        width: image.width(),
        height: image.height(),
        image,
        sequence: frame.sequence,
        overlays,
        decision,
    }
}

fn draw_region(image: &mut RgbImage, region: &FaceRegion, color: Rgb<u8>) {
    let (w, h) = (region.width(), region.height());
    if w == 0 || h == 0 {
        return;
    }

    // Nested hollow rects give the outline its thickness.
    for inset in 0..BOX_THICKNESS.min(w / 2).min(h / 2) {
        let rect = Rect::at((region.left + inset) as i32, (region.top + inset) as i32)
            .of_size(w - 2 * inset, h - 2 * inset);
        draw_hollow_rect_mut(image, rect, color);
    }

    let band = LABEL_BAND_HEIGHT.min(h);
    let band_rect = Rect::at(region.left as i32, (region.bottom - band) as i32).of_size(w, band);
    draw_filled_rect_mut(image, band_rect, color);
}
