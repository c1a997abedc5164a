//! Handles loading of the crop list files.
//!
//! Each non-empty line that does not start with `#` has the form
//! `x,y,w,h,output_file[,image_source]`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use log::warn;

/// A single crop region read from a crop list file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CropSpec {
    /// The x position of the region, before clamping.
    pub(crate) x: i64,
    /// The y position of the region, before clamping.
    pub(crate) y: i64,
    /// The width of the region, before clamping.
    pub(crate) w: i64,
    /// The height of the region, before clamping.
    pub(crate) h: i64,
    /// Where the cropped image is written.
    pub(crate) output_file: PathBuf,
    /// The OBS image source that should be pointed at `output_file`.
    pub(crate) image_source: Option<String>,
    /// The line of the crop list this region was read from.
    pub(crate) line_num: usize,
}

/// Parses one line of a crop list.
///
/// Returns `Ok(None)` for blank lines and comments.
pub(crate) fn parse_line(line: &str, line_num: usize) -> anyhow::Result<Option<CropSpec>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 5 {
        anyhow::bail!("expected at least 5 fields, found {}", parts.len());
    }

    let int = |index: usize, name: &str| -> anyhow::Result<i64> {
        parts[index]
            .parse()
            .with_context(|| format!("invalid {name} `{}`", parts[index]))
    };

    Ok(Some(CropSpec {
        x: int(0, "x")?,
        y: int(1, "y")?,
        w: int(2, "w")?,
        h: int(3, "h")?,
        output_file: PathBuf::from(parts[4]),
        image_source: parts
            .get(5)
            .filter(|name| !name.is_empty())
            .map(|name| name.to_string()),
        line_num,
    }))
}

/// Parses the contents of a crop list, skipping invalid lines with a warning.
pub(crate) fn parse_crop_list(content: &str) -> Vec<CropSpec> {
    let mut crops = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line_num = index + 1;
        match parse_line(line, line_num) {
            Ok(Some(crop)) => crops.push(crop),
            Ok(None) => {}
            Err(err) => warn!("skipping line {line_num}: '{}' ({err:#})", line.trim()),
        }
    }

    crops
}

/// Loads a crop list from the given file.
///
/// A missing file or a file without a single valid entry is an error.
pub(crate) fn load_crop_list(path: impl AsRef<Path>) -> anyhow::Result<Vec<CropSpec>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read crop config `{}`", path.display()))?;

    let crops = parse_crop_list(&content);
    if crops.is_empty() {
        anyhow::bail!("no valid crop configurations found in `{}`", path.display());
    }

    Ok(crops)
}

/// Loads a crop list if a path is given, otherwise returns an empty list.
pub(crate) fn load_optional_crop_list(path: Option<&Path>) -> anyhow::Result<Vec<CropSpec>> {
    match path {
        Some(path) => load_crop_list(path),
        None => Ok(Vec::new()),
    }
}
