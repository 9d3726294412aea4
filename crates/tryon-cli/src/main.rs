use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tryon_contracts::assets::mime_for_path;
use tryon_contracts::{
    normalize_image, AnimationType, EventLog, ImageAsset, QualityTier, ResultGroup, VideoDuration,
};
use tryon_engine::{
    new_session_id, CancelToken, DryrunBackend, EngineConfig, GeminiBackend, GenerativeBackend,
    PollSettings, TryOnSession, ViewAggregation,
};

#[derive(Debug, Parser)]
#[command(name = "tryon", version, about = "Virtual try-on image and video generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    Gemini,
    Dryrun,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    person: PathBuf,
    #[arg(long = "outfit", required = true)]
    outfits: Vec<PathBuf>,
    #[arg(long = "style")]
    styles: Vec<PathBuf>,
    #[arg(long, default_value = "standard")]
    quality: String,
    #[arg(long, default_value = "")]
    instructions: String,
    /// Keep combinations where only some views could be generated.
    #[arg(long)]
    partial: bool,
    #[arg(long, value_enum, default_value_t = BackendChoice::Gemini)]
    backend: BackendChoice,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    /// Result group id to animate, or `first`.
    #[arg(long)]
    video_group: Option<String>,
    #[arg(long, default_value = "360-turn")]
    animation: String,
    #[arg(long, default_value_t = 5)]
    duration: u64,
    /// Give up on the video after this many seconds.
    #[arg(long)]
    video_timeout: Option<u64>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("tryon error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("TRYON_LOG")
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let Some(quality) = QualityTier::parse(&args.quality) else {
        bail!(
            "unknown quality '{}' (expected standard, high or ultra)",
            args.quality
        );
    };
    let Some(duration) = VideoDuration::from_seconds(args.duration) else {
        bail!("unsupported video duration {}s (expected 5, 8 or 10)", args.duration);
    };
    let animation = AnimationType::parse_or_default(&args.animation);

    let backend: Box<dyn GenerativeBackend> = match args.backend {
        BackendChoice::Gemini => Box::new(GeminiBackend::new(EngineConfig::from_env()?)?),
        BackendChoice::Dryrun => Box::new(DryrunBackend::new()),
    };

    let person = load_image(&args.person)?;
    let outfits = args
        .outfits
        .iter()
        .map(|path| load_image(path))
        .collect::<Result<Vec<_>>>()?;
    let styles = args
        .styles
        .iter()
        .map(|path| load_image(path))
        .collect::<Result<Vec<_>>>()?;

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let session_id = new_session_id();
    tracing::info!(
        session = %session_id,
        backend = backend.name(),
        out = %args.out.display(),
        "starting try-on session"
    );
    let mut session = TryOnSession::new(&args.out)
        .with_events(EventLog::new(&events_path, session_id.clone()));
    session.set_person(Some(person));
    session.set_outfits(outfits);
    session.set_styles(styles);
    session.set_instructions(args.instructions.clone());
    session.set_quality(quality);
    session.set_aggregation(if args.partial {
        ViewAggregation::Partial
    } else {
        ViewAggregation::AllOrNothing
    });

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut write_failures = Vec::new();
    session.generate_with(backend.as_ref(), &mut rng, |group| {
        match write_group_views(&args.out, group) {
            Ok(paths) => println!("{} -> {} view(s)", group.id, paths.len()),
            Err(err) => write_failures.push(err),
        }
    })?;
    if let Some(err) = write_failures.into_iter().next() {
        return Err(err);
    }
    if let Some(error) = session.error() {
        eprintln!("{error}");
    }

    let video_outcome = match args.video_group.as_deref() {
        Some(selector) => Some(run_video(
            &mut session,
            backend.as_ref(),
            selector,
            duration,
            animation,
            args.video_timeout,
        )),
        None => None,
    };
    if let Some(Err(err)) = &video_outcome {
        eprintln!("video: {err:#}");
    }

    let summary = build_summary(&session_id, backend.name(), &args.out, &session);
    let summary_path = args.out.join("summary.json");
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("failed to write {}", summary_path.display()))?;
    println!("Summary written to {}", summary_path.display());

    if session.groups().is_empty() {
        return Ok(1);
    }
    Ok(0)
}

fn load_image(path: &Path) -> Result<ImageAsset> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    normalize_image(&bytes, mime_for_path(path))
        .with_context(|| format!("failed to load image {}", path.display()))
}

/// Writes `<out>/<group>/<view>.png` for every view in the group.
fn write_group_views(out: &Path, group: &ResultGroup) -> Result<Vec<PathBuf>> {
    let dir = out.join(group.id.as_str());
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let mut written = Vec::with_capacity(group.views.len());
    for view in &group.views {
        let path = view_path(out, group, view.label.slug());
        let bytes = view.src.decode_bytes()?;
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

fn view_path(out: &Path, group: &ResultGroup, slug: &str) -> PathBuf {
    out.join(group.id.as_str()).join(format!("{slug}.png"))
}

fn run_video(
    session: &mut TryOnSession,
    backend: &dyn GenerativeBackend,
    selector: &str,
    duration: VideoDuration,
    animation: AnimationType,
    timeout_secs: Option<u64>,
) -> Result<PathBuf> {
    let Some(group) = select_group(session.groups(), selector) else {
        bail!("no result group matches '{selector}'");
    };
    let id = group.id.clone();
    let settings = PollSettings {
        deadline: timeout_secs.map(Duration::from_secs),
        ..PollSettings::default()
    };
    println!("Generating {}s video for {id}...", duration.seconds());
    let path = session.request_video(
        backend,
        &id,
        duration,
        animation,
        &settings,
        &CancelToken::new(),
    )?;
    println!("Video written to {}", path.display());
    Ok(path)
}

fn select_group<'a>(groups: &'a [ResultGroup], selector: &str) -> Option<&'a ResultGroup> {
    if selector.eq_ignore_ascii_case("first") {
        return groups.first();
    }
    groups.iter().find(|group| group.id.as_str() == selector)
}

fn build_summary(session_id: &str, backend: &str, out: &Path, session: &TryOnSession) -> Value {
    let groups: Vec<Value> = session
        .groups()
        .iter()
        .map(|group| {
            let views: Vec<Value> = group
                .views
                .iter()
                .map(|view| {
                    json!({
                        "label": view.label.label(),
                        "alt": view.alt,
                        "path": view_path(out, group, view.label.slug()),
                    })
                })
                .collect();
            json!({
                "id": group.id.as_str(),
                "has_style": group.style_image.is_some(),
                "views": views,
                "info": group.info,
                "missing_views": group.missing_views,
                "video": group.video,
            })
        })
        .collect();
    json!({
        "session_id": session_id,
        "backend": backend,
        "groups": groups,
        "error": session.error(),
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tryon_contracts::{ImageAsset, ViewLabel};
    use tryon_engine::{DryrunBackend, TryOnSession};

    use super::{build_summary, select_group, write_group_views, BackendChoice, Cli, Command};

    #[test]
    fn generate_args_collect_repeated_outfits_and_styles() {
        let cli = Cli::try_parse_from([
            "tryon", "generate", "--person", "me.jpg", "--outfit", "a.png", "--outfit", "b.png",
            "--style", "s.webp", "--backend", "dryrun", "--out", "out", "--partial",
        ])
        .unwrap();
        let Command::Generate(args) = cli.command;
        assert_eq!(args.outfits.len(), 2);
        assert_eq!(args.styles.len(), 1);
        assert_eq!(args.backend, BackendChoice::Dryrun);
        assert!(args.partial);
        assert_eq!(args.duration, 5);
        assert_eq!(args.animation, "360-turn");
    }

    #[test]
    fn outfit_is_required() {
        let parsed = Cli::try_parse_from(["tryon", "generate", "--person", "me.jpg", "--out", "o"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn views_are_written_and_summarized() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut session = TryOnSession::new(dir.path());
        session.set_person(Some(ImageAsset::from_bytes("image/png", b"person")));
        session.set_outfit(Some(ImageAsset::from_bytes("image/png", b"outfit")));
        session.generate(&DryrunBackend::new(), &mut StdRng::seed_from_u64(4))?;

        let group = &session.groups()[0];
        let written = write_group_views(dir.path(), group)?;
        assert_eq!(written.len(), 4);
        assert!(written[0].ends_with(format!("{}/{}.png", group.id, ViewLabel::Front.slug())));
        assert!(written.iter().all(|path| path.exists()));

        assert_eq!(select_group(session.groups(), "first").map(|g| &g.id), Some(&group.id));
        assert!(select_group(session.groups(), "rg-missing").is_none());

        let summary = build_summary("sess-1", "dryrun", dir.path(), &session);
        assert_eq!(summary["groups"][0]["views"].as_array().map(Vec::len), Some(4));
        assert_eq!(summary["groups"][0]["video"]["state"], "idle");
        assert!(summary["error"].is_null());
        Ok(())
    }
}
