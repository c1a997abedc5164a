//! Handles the capture loop.
//!
//! Every cycle takes a screenshot, decides which crop list applies and writes the crops.
//! Errors end the current cycle only; the next cycle starts after the regular interval.
//! There is no backoff and no retry limit.

use std::{path::PathBuf, time::Duration};

use log::{error, info};

use crate::{
    crop_config::CropSpec,
    decision::{BranchDecision, DecisionRules},
    obs::{ObsApi, ScreenshotRequest},
    publish::CropPublisher,
    screenshot::decode_screenshot,
};

/// The screenshot size used when the native size of the source is unknown.
pub(crate) const FALLBACK_SIZE: (u32, u32) = (1920, 1080);

/// The file name of the full screenshot written in debug mode.
pub(crate) const DEBUG_SCREENSHOT: &str = "debug_full_screenshot.png";

/// What happened during a single cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CycleOutcome {
    /// The crop list that was chosen.
    pub(crate) decision: BranchDecision,
    /// The number of crops that were written.
    pub(crate) written: usize,
}

/// Periodically captures a source and writes the crops of the selected list.
pub(crate) struct Poller<A> {
    /// The connection to OBS.
    api: A,
    /// The source that is captured.
    source: String,
    /// The size screenshots are requested in.
    size: (u32, u32),
    /// The crops used when the decision selects the true list.
    crops_true: Vec<CropSpec>,
    /// The crops used when the decision selects the false list.
    crops_false: Vec<CropSpec>,
    /// The checks choosing between the crop lists.
    rules: DecisionRules,
    /// The directory relative output paths are resolved against.
    base_dir: PathBuf,
    /// Whether the full screenshot is saved every cycle.
    debug: bool,
}

impl<A: ObsApi> Poller<A> {
    /// Creates a new poller.
    ///
    /// `native_size` is used for screenshots if known, otherwise [`FALLBACK_SIZE`].
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        api: A,
        source: String,
        native_size: Option<(u32, u32)>,
        crops_true: Vec<CropSpec>,
        crops_false: Vec<CropSpec>,
        rules: DecisionRules,
        base_dir: PathBuf,
        debug: bool,
    ) -> Self {
        Self {
            api,
            source,
            size: native_size.unwrap_or(FALLBACK_SIZE),
            crops_true,
            crops_false,
            rules,
            base_dir,
            debug,
        }
    }

    /// Runs the capture loop forever.
    pub(crate) fn run(&mut self, interval: Duration) -> ! {
        loop {
            if let Err(err) = self.run_cycle() {
                error!("capture_error: {err:#}");
            }
            std::thread::sleep(interval);
        }
    }

    /// Captures one screenshot and writes the crops of the selected list.
    pub(crate) fn run_cycle(&mut self) -> anyhow::Result<CycleOutcome> {
        let (width, height) = self.size;
        let payload = self.api.get_source_screenshot(&ScreenshotRequest {
            source_name: &self.source,
            format: "png",
            width,
            height,
            quality: -1,
        })?;
        let image = decode_screenshot(&payload)?;

        if self.debug {
            let debug_path = self.base_dir.join(DEBUG_SCREENSHOT);
            image.save_with_format(&debug_path, image::ImageFormat::Png)?;
            info!("debug: full screenshot saved to {}", debug_path.display());
        }

        let decision = self.rules.decide(&image, self.crops_true.is_empty());
        let selected: &[CropSpec] = match decision {
            BranchDecision::UseTrue => &self.crops_true,
            BranchDecision::UseFalse => &self.crops_false,
            BranchDecision::Skip => &[],
        };

        if selected.is_empty() {
            info!("screenshot skipped - {}", self.rules.skip_reason());
            return Ok(CycleOutcome {
                decision,
                written: 0,
            });
        }

        let written =
            CropPublisher::new(&mut self.api, &self.base_dir).publish_all(&image, selected);

        Ok(CycleOutcome { decision, written })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use image::RgbaImage;

    use super::*;
    use crate::{
        color::Rgb, crop_config::parse_line, decision::PixelCheck, obs::fake::FakeObs,
        screenshot::encode_data_uri, Position,
    };

    /// A 100x100 blue screenshot with a red pixel at (5, 5).
    fn screenshot() -> String {
        let mut image = RgbaImage::from_pixel(100, 100, image::Rgba([0, 0, 255, 255]));
        image.put_pixel(5, 5, image::Rgba([255, 0, 0, 255]));
        encode_data_uri(&image)
    }

    fn poller(
        obs: FakeObs,
        rules: DecisionRules,
        base_dir: &Path,
        debug: bool,
    ) -> Poller<FakeObs> {
        Poller::new(
            obs,
            "Game".to_string(),
            None,
            vec![parse_line("0,0,10,10,true.png", 1).unwrap().unwrap()],
            vec![
                parse_line("0,0,10,10,false_a.png", 1).unwrap().unwrap(),
                parse_line("10,10,10,10,false_b.png", 2).unwrap().unwrap(),
            ],
            rules,
            base_dir.to_path_buf(),
            debug,
        )
    }

    fn check(x: i64, y: i64, color: Rgb) -> Option<PixelCheck> {
        Some(PixelCheck {
            position: Position { x, y },
            color,
        })
    }

    #[test]
    fn without_checks_writes_true_crops() {
        let dir = tempfile::tempdir().unwrap();
        let obs = FakeObs {
            screenshot: Some(screenshot()),
            ..FakeObs::default()
        };
        let mut poller = poller(obs, DecisionRules::default(), dir.path(), false);

        let outcome = poller.run_cycle().unwrap();
        assert_eq!(
            outcome,
            CycleOutcome {
                decision: BranchDecision::UseTrue,
                written: 1
            }
        );
        assert!(dir.path().join("true.png").exists());
        assert!(!dir.path().join(DEBUG_SCREENSHOT).exists());
        assert_eq!(poller.api.screenshot_sizes, vec![FALLBACK_SIZE]);
    }

    #[test]
    fn secondary_match_writes_false_crops() {
        let dir = tempfile::tempdir().unwrap();
        let obs = FakeObs {
            screenshot: Some(screenshot()),
            ..FakeObs::default()
        };
        let rules = DecisionRules {
            primary: check(0, 0, Rgb { r: 255, g: 0, b: 0 }),
            secondary: check(0, 0, Rgb { r: 0, g: 0, b: 250 }),
            tolerance: 5,
            colors_given: true,
        };
        let mut poller = poller(obs, rules, dir.path(), true);

        let outcome = poller.run_cycle().unwrap();
        assert_eq!(outcome.decision, BranchDecision::UseFalse);
        assert_eq!(outcome.written, 2);
        assert!(dir.path().join("false_a.png").exists());
        assert!(dir.path().join("false_b.png").exists());
        assert!(!dir.path().join("true.png").exists());
        assert!(dir.path().join(DEBUG_SCREENSHOT).exists());
    }

    #[test]
    fn failing_checks_skip_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let obs = FakeObs {
            screenshot: Some(screenshot()),
            ..FakeObs::default()
        };
        let rules = DecisionRules {
            primary: check(0, 0, Rgb { r: 255, g: 0, b: 0 }),
            secondary: None,
            tolerance: 5,
            colors_given: true,
        };
        let mut poller = poller(obs, rules, dir.path(), false);

        let outcome = poller.run_cycle().unwrap();
        assert_eq!(outcome.decision, BranchDecision::Skip);
        assert_eq!(outcome.written, 0);
        assert!(!dir.path().join("true.png").exists());
    }

    #[test]
    fn uses_native_size_when_known() {
        let dir = tempfile::tempdir().unwrap();
        let obs = FakeObs {
            screenshot: Some(screenshot()),
            ..FakeObs::default()
        };
        let mut poller = Poller::new(
            obs,
            "Game".to_string(),
            Some((640, 360)),
            Vec::new(),
            Vec::new(),
            DecisionRules::default(),
            dir.path().to_path_buf(),
            false,
        );

        let outcome = poller.run_cycle().unwrap();
        assert_eq!(outcome.decision, BranchDecision::Skip);
        assert_eq!(poller.api.screenshot_sizes, vec![(640, 360)]);
    }

    #[test]
    fn capture_errors_end_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut poller = poller(FakeObs::default(), DecisionRules::default(), dir.path(), false);
        assert!(poller.run_cycle().is_err());

        poller.api.screenshot = Some("data:image/png;base64,AAAA".to_string());
        assert!(poller.run_cycle().is_err());

        poller.api.screenshot = Some(screenshot());
        assert_eq!(poller.run_cycle().unwrap().written, 1);
    }
}
