use anyhow::{anyhow, Context, Result};
use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use structopt::StructOpt;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;

mod clock;
mod config;
mod driver;
mod error;
mod feedback;
mod frames;
mod gemini;
mod geometry;
mod hold;
mod joints;
mod pose;
mod reference;
mod scoring;
mod session;
mod summary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedbackKind {
    None,
    Hints,
    Gemini,
}

impl FromStr for FeedbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(FeedbackKind::None),
            "hints" => Ok(FeedbackKind::Hints),
            "gemini" => Ok(FeedbackKind::Gemini),
            other => Err(format!("unknown feedback generator: {}", other)),
        }
    }
}

#[derive(structopt::StructOpt)]
struct TrainOpt {
    /// Landmark frames as JSON lines; reads stdin when omitted or "-".
    frames: Option<PathBuf>,

    /// Reference pose table (JSON).
    #[structopt(short, long)]
    references: Option<PathBuf>,

    /// Training module (JSON). Defaults to the built-in first module.
    #[structopt(short, long)]
    module: Option<PathBuf>,

    /// Follow a live stream on the wall clock instead of replaying timestamps.
    #[structopt(short, long)]
    follow: bool,

    /// Angle error in degrees still scored as on target.
    #[structopt(short, long)]
    tolerance: Option<f32>,

    /// Ticks between feedback requests, 0 disables feedback.
    #[structopt(long)]
    feedback_interval: Option<u32>,

    #[structopt(long, default_value = "hints", possible_values = &["none", "hints", "gemini"])]
    feedback: FeedbackKind,

    #[structopt(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Only allow skipping the poses the module marks as skippable.
    #[structopt(long)]
    restrict_skips: bool,

    /// Replay a second player's frames through the same module and rank both.
    #[structopt(long)]
    versus: Option<PathBuf>,

    /// Print the summary as JSON.
    #[structopt(long)]
    json: bool,

    #[structopt(short, long)]
    show_progress: bool,
}

#[derive(structopt::StructOpt)]
struct CaptureOpt {
    /// Landmark frames as JSON lines; reads stdin when omitted or "-".
    frames: Option<PathBuf>,

    /// Reference key to record the pose under.
    #[structopt(short, long)]
    key: String,

    /// Reference pose table to add to; created if missing.
    #[structopt(short, long)]
    references: PathBuf,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Train through a module of poses.
    Train(TrainOpt),
    /// Record the last complete frame as a reference pose.
    Capture(CaptureOpt),
}

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long, default_value = "info", env = "RUST_LOG")]
    log_level: tracing_subscriber::filter::EnvFilter,

    /// TOML settings file.
    #[structopt(short, long)]
    config: Option<PathBuf>,

    #[structopt(subcommand)]
    command: Command,
}

type FrameInput = BufReader<Box<dyn Read + Send>>;

fn open_frames(path: Option<&Path>) -> Result<FrameInput> {
    let input: Box<dyn Read + Send> = match path {
        Some(path) if path != Path::new("-") => Box::new(
            File::open(path).with_context(|| format!("failed opening {}", path.display()))?,
        ),
        _ => Box::new(std::io::stdin()),
    };
    Ok(BufReader::new(input))
}

fn feedback_generator(
    opt: &TrainOpt,
    config: &config::Config,
) -> Result<Option<Box<dyn feedback::FeedbackGenerator>>> {
    let generator: Option<Box<dyn feedback::FeedbackGenerator>> = match opt.feedback {
        FeedbackKind::None => None,
        FeedbackKind::Hints => Some(Box::new(feedback::HintFeedback::new(
            config.session.scoring,
        ))),
        FeedbackKind::Gemini => {
            let api_key = opt
                .gemini_api_key
                .clone()
                .ok_or_else(|| anyhow!("--feedback gemini needs GEMINI_API_KEY"))?;
            Some(Box::new(
                gemini::GeminiFeedback::new(api_key, config.gemini.clone())
                    .context("failed constructing Gemini client")?,
            ))
        }
    };
    Ok(generator)
}

fn build_session<C>(
    opt: &TrainOpt,
    config: &config::Config,
    clock: C,
) -> Result<session::Session<C>>
where
    C: clock::Clock,
{
    let references_path = opt
        .references
        .as_ref()
        .or_else(|| config.references.as_ref())
        .ok_or_else(|| anyhow!("no reference poses given, pass --references"))?;
    let references = reference::ReferenceStore::load(references_path)
        .context("failed loading reference poses")?;

    let module = match opt.module.as_ref().or_else(|| config.module.as_ref()) {
        Some(path) => reference::TrainingModule::load(path).context("failed loading module")?,
        None => reference::TrainingModule::module_one(),
    };
    info!(
        message = "loaded training data",
        module = %module.name,
        poses = module.poses.len(),
        references = references.len()
    );

    let session = session::Session::new(module, references, config.session, clock);
    Ok(match feedback_generator(opt, config)? {
        Some(generator) => session.with_feedback(generator),
        None => session,
    })
}

/// Attach closing remarks from the configured feedback generator.
fn coach(
    opt: &TrainOpt,
    config: &config::Config,
    summary: &mut summary::SessionSummary,
) -> Result<()> {
    if summary.poses.is_empty() {
        return Ok(());
    }
    if let Some(generator) = feedback_generator(opt, config)? {
        summary.coaching = Some(feedback::review_or_fallback(generator.as_ref(), summary));
    }
    Ok(())
}

fn print_summary(summary: &summary::SessionSummary, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(summary).context("failed serializing summary")?
        );
    } else {
        print!("{}", summary);
    }
    Ok(())
}

fn train(opt: TrainOpt, mut config: config::Config, running: Arc<AtomicBool>) -> Result<()> {
    if let Some(tolerance) = opt.tolerance {
        config.session.scoring.tolerance = tolerance;
    }
    if let Some(interval) = opt.feedback_interval {
        config.session.feedback_interval = interval;
    }
    config.session.restrict_skips |= opt.restrict_skips;

    let mut driver = driver::Driver::new(running);
    if opt.show_progress {
        driver = driver.with_progress(driver::spinner());
    }
    let input = open_frames(opt.frames.as_deref())?;

    let mut summary = if opt.follow {
        let mut session = build_session(&opt, &config, clock::SystemClock::new())?;
        driver.follow(&mut session, input)?;
        summary::SessionSummary::from_session(&session)
    } else {
        replay(&opt, &config, &driver, input)?
    };

    if summary.poses.is_empty() {
        warn!(message = "no pose was finished");
    }
    coach(&opt, &config, &mut summary)?;
    print_summary(&summary, opt.json)?;

    if let Some(path) = opt.versus.as_deref() {
        let mut second = replay(&opt, &config, &driver, open_frames(Some(path))?)
            .with_context(|| format!("failed replaying {}", path.display()))?;
        coach(&opt, &config, &mut second)?;
        print_summary(&second, opt.json)?;
        match summary::compare(&summary, &second) {
            summary::Outcome::First => println!("player 1 wins"),
            summary::Outcome::Second => println!("player 2 wins"),
            summary::Outcome::Tie => println!("draw"),
        }
    }
    Ok(())
}

fn replay(
    opt: &TrainOpt,
    config: &config::Config,
    driver: &driver::Driver,
    input: FrameInput,
) -> Result<summary::SessionSummary> {
    let clock = clock::ManualClock::new();
    let mut session = build_session(opt, config, clock.clone())?;
    driver
        .replay(&mut session, &clock, frames::FrameReader::new(input))
        .context("failed replaying landmark frames")?;
    Ok(summary::SessionSummary::from_session(&session))
}

fn capture(opt: CaptureOpt, running: Arc<AtomicBool>) -> Result<()> {
    let mut last = None;
    for frame in frames::FrameReader::new(open_frames(opt.frames.as_deref())?) {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        if let Some(landmarks) = frame?.landmarks.filter(pose::LandmarkSet::is_complete) {
            last = Some(landmarks);
        }
    }
    let landmarks = last.ok_or_else(|| anyhow!("no complete landmark frame to capture"))?;
    let angles = joints::extract_joint_angles(Some(&landmarks));

    let mut store = if opt.references.exists() {
        reference::ReferenceStore::load(&opt.references)?
    } else {
        reference::ReferenceStore::default()
    };
    if store
        .insert(opt.key.as_str(), reference::ReferencePose::capture(&angles))
        .is_some()
    {
        warn!(message = "replacing existing reference", key = %opt.key);
    }
    store.save(&opt.references)?;
    info!(
        message = "captured reference",
        key = %opt.key,
        angles = %serde_json::to_string(&angles).context("failed serializing angles")?
    );
    Ok(())
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    tracing::subscriber::set_global_default(
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(opt.log_level),
    )?;

    let config = match opt.config.as_ref() {
        Some(path) => config::Config::load(path).context("failed loading config")?,
        None => config::Config::default(),
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_ctrl_c = running.clone();

    ctrlc::set_handler(move || {
        running_ctrl_c.store(false, Ordering::SeqCst);
    })
    .context("failed setting Ctrl-C handler")?;

    match opt.command {
        Command::Train(train_opt) => train(train_opt, config, running),
        Command::Capture(capture_opt) => capture(capture_opt, running),
    }
}
