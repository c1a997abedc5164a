//! Decides which crop list is used for a screenshot.

use image::RgbaImage;
use log::warn;

use crate::{color::Rgb, Position};

/// A pixel color comparison at a fixed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PixelCheck {
    /// Where the pixel is sampled.
    pub(crate) position: Position,
    /// The color the pixel is compared against.
    pub(crate) color: Rgb,
}

impl PixelCheck {
    /// Builds a check from its optional parts.
    ///
    /// A check is only active once the color and both coordinates are known.
    pub(crate) fn from_parts(
        name: &str,
        x: Option<i64>,
        y: Option<i64>,
        color: Option<Rgb>,
    ) -> Option<Self> {
        match (x, y, color) {
            (Some(x), Some(y), Some(color)) => Some(PixelCheck {
                position: Position { x, y },
                color,
            }),
            (None, None, None) => None,
            _ => {
                warn!("{name} check needs a color and both coordinates, ignoring it");
                None
            }
        }
    }

    /// Checks whether the sampled pixel matches the target color.
    ///
    /// A position outside the image never matches.
    pub(crate) fn evaluate(&self, image: &RgbaImage, tolerance: u8) -> bool {
        let in_bounds = |value: i64, limit: u32| {
            u32::try_from(value)
                .ok()
                .filter(|&value| value < limit)
        };

        let Position { x, y } = self.position;
        let (Some(x), Some(y)) = (
            in_bounds(x, image.width()),
            in_bounds(y, image.height()),
        ) else {
            warn!(
                "coordinates {} out of bounds for screenshot {}x{}",
                self.position,
                image.width(),
                image.height()
            );
            return false;
        };

        Rgb::from_rgba(*image.get_pixel(x, y)).matches(self.color, tolerance)
    }
}

/// The crop list chosen for one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BranchDecision {
    /// Use the crops of the true list.
    UseTrue,
    /// Use the crops of the false list.
    UseFalse,
    /// Crop nothing.
    Skip,
}

/// The checks that select the crop list.
#[derive(Debug, Clone, Default)]
pub(crate) struct DecisionRules {
    /// The check that selects the true list.
    pub(crate) primary: Option<PixelCheck>,
    /// The check that selects the false list when the primary check fails.
    pub(crate) secondary: Option<PixelCheck>,
    /// The per-channel tolerance shared by both checks.
    pub(crate) tolerance: u8,
    /// Whether a color was given for either check, even if the check is incomplete.
    pub(crate) colors_given: bool,
}

impl DecisionRules {
    /// Explains why nothing was cropped.
    pub(crate) fn skip_reason(&self) -> &'static str {
        if self.colors_given {
            "initial check failed and subcheck failed"
        } else {
            "no crops selected"
        }
    }

    /// Decides which crop list to use for the given screenshot.
    ///
    /// A primary match wins over a secondary match, which wins over skipping.
    /// Without a primary check the true list is used whenever it has entries.
    pub(crate) fn decide(&self, image: &RgbaImage, true_set_empty: bool) -> BranchDecision {
        let Some(primary) = &self.primary else {
            return if true_set_empty {
                BranchDecision::Skip
            } else {
                BranchDecision::UseTrue
            };
        };

        if primary.evaluate(image, self.tolerance) {
            return BranchDecision::UseTrue;
        }

        match &self.secondary {
            Some(secondary) if secondary.evaluate(image, self.tolerance) => {
                BranchDecision::UseFalse
            }
            _ => BranchDecision::Skip,
        }
    }
}
