use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use log::{info, warn};
use structopt::StructOpt;

mod color;
mod crop_config;
mod decision;
mod obs;
mod poller;
mod publish;
mod screenshot;

/// The crop list used for the true branch if none is given.
const DEFAULT_CONFIG_TRUE: &str = "crop_config_true.txt";

/// The crop list used for the false branch if none is given.
const DEFAULT_CONFIG_FALSE: &str = "crop_config_false.txt";

/// The timeout for connecting to OBS and for every single message.
const OBS_TIMEOUT: Duration = Duration::from_secs(5);

/// A position on the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    /// The x position.
    pub(crate) x: i64,
    /// The y position.
    pub(crate) y: i64,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Position { x, y } = self;
        write!(f, "({x},{y})")
    }
}

/// A rectangle with integer coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rect {
    /// The lowest x position.
    pub(crate) x: u32,
    /// The lowest y position.
    pub(crate) y: u32,
    /// The width of the rectangle.
    pub(crate) width: u32,
    /// The height of the rectangle.
    pub(crate) height: u32,
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Rect {
            x,
            y,
            width,
            height,
        } = self;
        write!(f, "{{ x: {x}, y: {y}, w: {width}, h: {height} }}")
    }
}

/// Parses a non-negative number of seconds.
fn parse_interval(s: &str) -> anyhow::Result<Duration> {
    let secs: f64 = s.parse()?;
    if !secs.is_finite() || secs.is_sign_negative() {
        anyhow::bail!("interval must be a non-negative number of seconds");
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Captures multiple cropped regions from an OBS source, chosen by primary and secondary color checks
#[derive(Debug, StructOpt)]
#[structopt(setting = structopt::clap::AppSettings::AllowNegativeNumbers)]
struct Config {
    /// the host OBS is running on
    #[structopt(long, default_value = "localhost")]
    host: String,
    /// the obs-websocket port
    #[structopt(long, default_value = "4455")]
    port: u16,
    /// the obs-websocket password
    #[structopt(long)]
    password: String,
    /// the exact name of the OBS source to capture
    #[structopt(long)]
    source: String,
    /// the crops used when the primary check is true, an empty path disables them
    /// [default: crop_config_true.txt]
    #[structopt(long = "config_true")]
    config_true: Option<PathBuf>,
    /// the crops used when the primary check is false but the secondary check is true, an
    /// empty path disables them [default: crop_config_false.txt]
    #[structopt(long = "config_false")]
    config_false: Option<PathBuf>,
    /// legacy single crop list, only used without --config_true and --config_false
    #[structopt(long)]
    config: Option<PathBuf>,
    /// seconds between captures
    #[structopt(long, default_value = "10", parse(try_from_str = parse_interval))]
    interval: Duration,
    /// the x position of the primary pixel check
    #[structopt(long = "check_x")]
    check_x: Option<i64>,
    /// the y position of the primary pixel check
    #[structopt(long = "check_y")]
    check_y: Option<i64>,
    /// the hex color of the primary check, e.g. #FF0000 or FF0000
    #[structopt(long = "check_color")]
    check_color: Option<color::Rgb>,
    /// the x position of the secondary pixel check
    #[structopt(long = "subcheck_x")]
    subcheck_x: Option<i64>,
    /// the y position of the secondary pixel check
    #[structopt(long = "subcheck_y")]
    subcheck_y: Option<i64>,
    /// the hex color of the secondary check, e.g. #00FF00 or 00FF00
    #[structopt(long = "subcheck_color")]
    subcheck_color: Option<color::Rgb>,
    /// the per-channel tolerance of both checks
    #[structopt(long = "color_tolerance", default_value = "5")]
    color_tolerance: u8,
    /// save the full screenshot before cropping and log more details
    #[structopt(long)]
    debug: bool,
}

impl Config {
    /// Returns the paths of the true and false crop lists, resolved against `base_dir`.
    fn crop_list_paths(&self, base_dir: &Path) -> (Option<PathBuf>, Option<PathBuf>) {
        let given = |path: &Option<PathBuf>| {
            path.clone()
                .filter(|path| !path.as_os_str().is_empty())
        };
        let resolve = |path: Option<PathBuf>, default: &str| match path {
            Some(path) if path.as_os_str().is_empty() => None,
            Some(path) => Some(publish::resolve_path(base_dir, &path)),
            None => Some(base_dir.join(default)),
        };

        match (given(&self.config_true), given(&self.config_false), given(&self.config)) {
            (None, None, Some(legacy)) => (Some(publish::resolve_path(base_dir, &legacy)), None),
            _ => (
                resolve(self.config_true.clone(), DEFAULT_CONFIG_TRUE),
                resolve(self.config_false.clone(), DEFAULT_CONFIG_FALSE),
            ),
        }
    }

    /// Returns the checks selecting the crop list.
    fn decision_rules(&self) -> decision::DecisionRules {
        decision::DecisionRules {
            primary: decision::PixelCheck::from_parts(
                "primary",
                self.check_x,
                self.check_y,
                self.check_color,
            ),
            secondary: decision::PixelCheck::from_parts(
                "secondary",
                self.subcheck_x,
                self.subcheck_y,
                self.subcheck_color,
            ),
            tolerance: self.color_tolerance,
            colors_given: self.check_color.is_some() || self.subcheck_color.is_some(),
        }
    }
}

/// Sets up logging to stderr, `RUST_LOG` takes precedence over the `debug` flag.
fn set_up_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

/// Returns the directory containing the running executable.
fn program_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to locate the executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("the executable has no parent directory")
}

fn main() -> anyhow::Result<()> {
    let config = Config::from_args();
    set_up_logging(config.debug);

    let base_dir = program_dir()?;

    let (config_true_path, config_false_path) = config.crop_list_paths(&base_dir);
    let crops_true = crop_config::load_optional_crop_list(config_true_path.as_deref())?;
    let crops_false = crop_config::load_optional_crop_list(config_false_path.as_deref())?;

    info!(
        "loaded {} crops from {}",
        crops_true.len(),
        config_true_path
            .as_deref()
            .map_or("(none)".into(), Path::to_string_lossy)
    );
    if let Some(path) = &config_false_path {
        info!("loaded {} crops from {}", crops_false.len(), path.display());
    }

    let mut client = obs::ObsClient::connect(
        &config.host,
        config.port,
        &config.password,
        OBS_TIMEOUT,
    )
    .context("connect_failed")?;

    let native_size = obs::native_size(&mut client, &config.source);
    match native_size {
        Some((width, height)) => info!("using native size {width}x{height}"),
        None => info!(
            "native size unknown, using {}x{}",
            poller::FALLBACK_SIZE.0,
            poller::FALLBACK_SIZE.1
        ),
    }

    let rules = config.decision_rules();
    let tolerance = rules.tolerance;
    if let Some(check) = &rules.primary {
        info!(
            "primary check at {} for {} tol={tolerance}",
            check.position, check.color
        );
    }
    if let Some(check) = &rules.secondary {
        info!(
            "secondary check at {} for {} tol={tolerance}",
            check.position, check.color
        );
        if rules.primary.is_none() {
            warn!("secondary check is never evaluated without a primary check");
        }
    }

    info!(
        "capturing '{}' every {}s",
        config.source,
        config.interval.as_secs_f64()
    );
    if config.debug {
        info!("debug mode: saving full screenshots");
    }

    poller::Poller::new(
        client,
        config.source,
        native_size,
        crops_true,
        crops_false,
        rules,
        base_dir,
        config.debug,
    )
    .run(config.interval)
}
