//! Handles cropping of screenshots and publishing the crops to OBS.

use std::path::{Path, PathBuf};

use anyhow::Context;
use image::{ImageFormat, RgbaImage};
use log::{debug, error, warn};
use serde_json::Value;

use crate::{crop_config::CropSpec, obs::ObsApi, Rect};

/// Clamps a crop region into an image of the given size.
///
/// The result always lies within the image and is at least 1x1.
pub(crate) fn clamp_rect(
    crop: &CropSpec,
    image_width: u32,
    image_height: u32,
) -> anyhow::Result<Rect> {
    if image_width == 0 || image_height == 0 {
        anyhow::bail!("cannot crop an empty {image_width}x{image_height} screenshot");
    }

    let (image_width, image_height) = (i64::from(image_width), i64::from(image_height));

    let x = crop.x.clamp(0, image_width - 1);
    let y = crop.y.clamp(0, image_height - 1);
    let width = crop.w.clamp(1, image_width - x);
    let height = crop.h.clamp(1, image_height - y);

    Ok(Rect {
        x: u32::try_from(x)?,
        y: u32::try_from(y)?,
        width: u32::try_from(width)?,
        height: u32::try_from(height)?,
    })
}

/// Resolves a path relative to `base_dir` unless it is already absolute.
pub(crate) fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Writes the crops of a screenshot and points their image sources at them.
pub(crate) struct CropPublisher<'a, A> {
    /// The connection used to update image sources.
    api: &'a mut A,
    /// The directory relative output paths are resolved against.
    base_dir: &'a Path,
}

impl<'a, A: ObsApi> CropPublisher<'a, A> {
    /// Creates a new publisher.
    pub(crate) fn new(api: &'a mut A, base_dir: &'a Path) -> Self {
        Self { api, base_dir }
    }

    /// Processes every crop in order and returns how many were written.
    ///
    /// A failing crop is logged and does not stop the remaining crops.
    pub(crate) fn publish_all(&mut self, image: &RgbaImage, crops: &[CropSpec]) -> usize {
        let mut written = 0;

        for crop in crops {
            match self.publish(image, crop) {
                Ok(()) => written += 1,
                Err(err) => error!(
                    "error processing crop from line {}: {err:#}",
                    crop.line_num
                ),
            }
        }

        written
    }

    /// Writes a single crop and updates its image source, if any.
    fn publish(&mut self, image: &RgbaImage, crop: &CropSpec) -> anyhow::Result<()> {
        let output_file = resolve_path(self.base_dir, &crop.output_file);
        let rect = clamp_rect(crop, image.width(), image.height())?;

        let cropped =
            image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image();

        if let Some(parent) = output_file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create `{}`", parent.display()))?;
        }
        cropped
            .save_with_format(&output_file, ImageFormat::Png)
            .with_context(|| format!("failed to write `{}`", output_file.display()))?;
        debug!("wrote {rect} to {}", output_file.display());

        if let Some(image_source) = &crop.image_source {
            if let Err(err) = self.update_image_source(image_source, &output_file) {
                warn!("failed to update image source '{image_source}': {err:#}");
            }
        }

        Ok(())
    }

    /// Points the `file` setting of an image source at `file`, keeping its other settings.
    fn update_image_source(&mut self, image_source: &str, file: &Path) -> anyhow::Result<()> {
        let mut settings = self.api.get_input_settings(image_source)?;
        settings.insert(
            "file".to_string(),
            Value::from(file.to_string_lossy().into_owned()),
        );
        self.api.set_input_settings(image_source, settings, true)
    }
}
