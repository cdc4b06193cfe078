use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use image::ImageFormat;
use portrait_contracts::events::EventWriter;
use portrait_contracts::features::{Attire, Expression, FeatureSet, Grooming};
use portrait_contracts::history::{StudioProject, VersionEntry, VersionHistory};
use portrait_contracts::media::ImagePayload;
use portrait_contracts::results::{GeneratedResult, ResultKind};
use portrait_contracts::studio::{help_lines, parse_command, StudioCommand, VersionRef};
use portrait_contracts::usage::{QuotaPolicy, UsageCounter};
use portrait_engine::prompt;
use portrait_engine::{
    random_seed, resolve_credential, EngineConfig, GenerationRequest, StudioSession,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PROJECT_FILE: &str = "project.json";
const EVENTS_FILE: &str = "events.jsonl";
const VERSIONS_DIR: &str = "versions";
const LOG_ENV: &str = "PORTRAIT_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "portrait-rs",
    version,
    about = "Studio portrait generation and retouching"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a portrait (a new root version if the project already has some).
    Generate(GenerateArgs),
    /// Retouch the current version, or the one named by --from.
    Edit(EditArgs),
    History(ProjectArgs),
    Select(SelectArgs),
    Export(ExportArgs),
    /// Print the exact instruction text that would be sent.
    Prompt(PromptArgs),
    Usage(UsageArgs),
    /// Generate if needed, then edit interactively.
    Studio(StudioArgs),
}

#[derive(Debug, Clone, Args)]
struct ProjectArgs {
    /// Directory holding project.json, events.jsonl and exported versions.
    #[arg(long, default_value = "portrait-project")]
    project: PathBuf,
}

#[derive(Debug, Clone, Default, Args)]
struct ServiceArgs {
    /// API key or delegated access token; falls back to the environment.
    #[arg(long)]
    credential: Option<String>,
    /// Single-credit trial quota.
    #[arg(long)]
    trial: bool,
}

#[derive(Debug, Clone, Default, Args)]
struct FeatureArgs {
    #[arg(long)]
    pose: Option<String>,
    #[arg(long)]
    attire: Option<String>,
    /// Clothing reference photo; implies the custom-reference attire.
    #[arg(long, value_name = "PATH")]
    attire_reference: Option<PathBuf>,
    #[arg(long)]
    background: Option<String>,
    #[arg(long)]
    grooming: Option<Grooming>,
    #[arg(long)]
    expression: Option<Expression>,
    #[arg(long)]
    camera_angle: Option<String>,
    #[arg(long)]
    lens_depth: Option<String>,
    #[arg(long)]
    color_grade: Option<String>,
}

#[derive(Debug, Clone, Default, Args)]
struct SeedArgs {
    #[arg(long, conflicts_with = "random_seed")]
    seed: Option<i64>,
    #[arg(long)]
    random_seed: bool,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    project: ProjectArgs,
    #[command(flatten)]
    service: ServiceArgs,
    #[command(flatten)]
    features: FeatureArgs,
    #[command(flatten)]
    seed: SeedArgs,
    /// Source photo; required when the project does not exist yet.
    #[arg(long)]
    photo: Option<PathBuf>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct EditArgs {
    #[command(flatten)]
    project: ProjectArgs,
    #[command(flatten)]
    service: ServiceArgs,
    /// Version to branch from (position, id or id prefix).
    #[arg(long)]
    from: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(required = true, num_args = 1..)]
    instruction: Vec<String>,
}

#[derive(Debug, Args)]
struct SelectArgs {
    #[command(flatten)]
    project: ProjectArgs,
    version: String,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[command(flatten)]
    project: ProjectArgs,
    version: String,
    out: PathBuf,
}

#[derive(Debug, Args)]
struct PromptArgs {
    #[command(flatten)]
    project: ProjectArgs,
    #[command(flatten)]
    features: FeatureArgs,
    /// Show the retouch template for this instruction instead.
    #[arg(long)]
    edit: Option<String>,
}

#[derive(Debug, Args)]
struct UsageArgs {
    #[arg(long)]
    trial: bool,
}

#[derive(Debug, Args)]
struct StudioArgs {
    #[command(flatten)]
    project: ProjectArgs,
    #[command(flatten)]
    service: ServiceArgs,
    #[command(flatten)]
    features: FeatureArgs,
    #[command(flatten)]
    seed: SeedArgs,
    #[arg(long)]
    photo: Option<PathBuf>,
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("portrait-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args).await,
        Command::Edit(args) => run_edit(args).await,
        Command::History(args) => run_history(args),
        Command::Select(args) => run_select(args),
        Command::Export(args) => run_export(args),
        Command::Prompt(args) => run_prompt(args),
        Command::Usage(args) => run_usage(args),
        Command::Studio(args) => run_studio(args).await,
    }
}

async fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut project = open_or_create_project(
        &args.project,
        args.photo.as_deref(),
        args.name.as_deref(),
        &args.features,
    )?;
    let mut session = open_session(&project, &args.service)?;
    let request = generation_request(&project, &args.seed);

    let interrupt = InterruptGuard::arm();
    let result = session.generate(&request, interrupt.token()).await?.clone();
    drop(interrupt);

    save_session(&mut project, &session)?;
    let written = write_version(&project, session.history(), &result, args.out.as_deref())?;
    println!("Generated {} -> {}", short_id(result.id()), written.display());
    print_usage(session.usage(), session.quota());
    Ok(0)
}

async fn run_edit(args: EditArgs) -> Result<i32> {
    let mut project = load_project(&args.project)?;
    let mut session = open_session(&project, &args.service)?;
    if let Some(from) = args.from.as_deref() {
        session.select_ref(&parse_version_ref(from)?)?;
    }
    let instruction = args.instruction.join(" ");

    let interrupt = InterruptGuard::arm();
    let result = session.edit(&instruction, interrupt.token()).await?.clone();
    drop(interrupt);

    save_session(&mut project, &session)?;
    let written = write_version(&project, session.history(), &result, args.out.as_deref())?;
    println!(
        "Edited {} -> {} ({})",
        result.derived_from().map(short_id).unwrap_or("-"),
        short_id(result.id()),
        written.display()
    );
    Ok(0)
}

fn run_history(args: ProjectArgs) -> Result<i32> {
    let project = load_project(&args)?;
    match project.history.as_ref() {
        Some(history) => print_history(history),
        None => println!("No versions yet."),
    }
    Ok(0)
}

fn run_select(args: SelectArgs) -> Result<i32> {
    let mut project = load_project(&args.project)?;
    let mut session = open_session(&project, &ServiceArgs::default())?;
    let selected = session
        .select_ref(&parse_version_ref(&args.version)?)?
        .clone();
    save_session(&mut project, &session)?;
    println!("Current version: {}", describe_version(session.history(), &selected));
    Ok(0)
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let project = load_project(&args.project)?;
    let history = project
        .history
        .as_ref()
        .context("project has no versions to export")?;
    let result = resolve_version(history, &args.version)?;
    let written = write_image(result, &args.out)?;
    println!("Exported {} to {}", short_id(result.id()), written.display());
    Ok(0)
}

fn run_prompt(args: PromptArgs) -> Result<i32> {
    let path = args.project.project.join(PROJECT_FILE);
    let mut features = if path.exists() {
        StudioProject::load(&path)?.features
    } else {
        FeatureSet::default()
    };
    args.features.apply(&mut features)?;

    let text = match args.edit.as_deref() {
        Some(instruction) => prompt::compose_edit(instruction),
        None => prompt::compose(
            &features.semantic(),
            &features.technical(),
            features.effective_attire_reference().is_some(),
        ),
    };
    print_prompt(&text);
    Ok(0)
}

fn run_usage(args: UsageArgs) -> Result<i32> {
    let config = engine_config(args.trial)?;
    let usage = UsageCounter::open(&config.usage_path);
    println!("Usage file: {}", config.usage_path.display());
    print_usage(&usage, config.quota);
    Ok(0)
}

async fn run_studio(args: StudioArgs) -> Result<i32> {
    let mut project = open_or_create_project(
        &args.project,
        args.photo.as_deref(),
        args.name.as_deref(),
        &args.features,
    )?;
    let mut session = open_session(&project, &args.service)?;

    if session.history().is_none() {
        println!("Generating the first portrait...");
        let request = generation_request(&project, &args.seed);
        let interrupt = InterruptGuard::arm();
        session.generate(&request, interrupt.token()).await?;
        drop(interrupt);
        save_session(&mut project, &session)?;
    }

    println!("Studio ready. Plain text retouches the current version; /help lists commands.");
    if let Some(current) = session.current() {
        println!("Current version: {}", describe_version(session.history(), current));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = next_studio_line(&mut lines, interrupted()).await? else {
            println!();
            break;
        };

        match parse_command(&line) {
            StudioCommand::Noop => continue,
            StudioCommand::Quit => break,
            StudioCommand::Help => {
                for usage in help_lines() {
                    println!("  {usage}");
                }
            }
            StudioCommand::Edit { instruction } => {
                let interrupt = InterruptGuard::arm();
                let outcome = session
                    .edit(&instruction, interrupt.token())
                    .await
                    .map(GeneratedResult::clone);
                drop(interrupt);
                match outcome {
                    Ok(result) => {
                        autosave(&mut project, &session);
                        println!("Edited -> {}", describe_version(session.history(), &result));
                    }
                    Err(err) => println!("Edit failed: {err}"),
                }
            }
            StudioCommand::Regenerate => {
                let request = generation_request(&project, &args.seed);
                let interrupt = InterruptGuard::arm();
                let outcome = session
                    .generate(&request, interrupt.token())
                    .await
                    .map(GeneratedResult::clone);
                drop(interrupt);
                match outcome {
                    Ok(result) => {
                        autosave(&mut project, &session);
                        println!(
                            "Regenerated -> {}",
                            describe_version(session.history(), &result)
                        );
                    }
                    Err(err) => println!("Generation failed: {err}"),
                }
            }
            StudioCommand::Select { target } => match session.select_ref(&target) {
                Ok(result) => {
                    let result = result.clone();
                    autosave(&mut project, &session);
                    println!("Current version: {}", describe_version(session.history(), &result));
                }
                Err(err) => println!("Select failed: {err}"),
            },
            StudioCommand::History => match session.history() {
                Some(history) => print_history(history),
                None => println!("No versions yet."),
            },
            StudioCommand::Diff { from, to } => match session.history() {
                Some(history) => print_diff(history, &from, &to),
                None => println!("No versions yet."),
            },
            StudioCommand::Prompt => match session.current() {
                Some(current) => print_prompt(current.instruction()),
                None => println!("No versions yet."),
            },
            StudioCommand::Export { target, path } => {
                let Some(result) = session.history().and_then(|h| h.resolve(&target)) else {
                    println!("Export failed: unknown version");
                    continue;
                };
                match write_image(result, Path::new(&path)) {
                    Ok(written) => println!("Exported to {}", written.display()),
                    Err(err) => println!("Export failed: {err:#}"),
                }
            }
            StudioCommand::Save => match save_session(&mut project, &session) {
                Ok(()) => println!("Saved {}", project.path().display()),
                Err(err) => println!("Save failed: {err:#}"),
            },
            StudioCommand::Usage => print_usage(session.usage(), session.quota()),
            StudioCommand::Invalid { command, reason } => println!("/{command}: {reason}"),
            StudioCommand::Unknown { command } => {
                println!("Unknown command /{command}. Type /help for commands.")
            }
        }
    }

    save_session(&mut project, &session)?;
    Ok(0)
}

/// Next line typed at the studio prompt. `None` on end of input or when
/// `interrupt` resolves first.
async fn next_studio_line<R, I>(lines: &mut Lines<R>, interrupt: I) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    I: Future<Output = ()>,
{
    tokio::select! {
        line = lines.next_line() => line,
        () = interrupt => Ok(None),
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Cancels its token on Ctrl-C until dropped.
struct InterruptGuard {
    token: CancellationToken,
    watcher: JoinHandle<()>,
}

impl InterruptGuard {
    fn arm() -> Self {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling request");
                trigger.cancel();
            }
        });
        Self { token, watcher }
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

fn engine_config(trial: bool) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env()?;
    if trial {
        config.quota = QuotaPolicy::TRIAL;
    }
    Ok(config)
}

fn open_session(project: &StudioProject, service: &ServiceArgs) -> Result<StudioSession> {
    let config = engine_config(service.trial)?;
    let credential = resolve_credential(service.credential.as_deref(), |key| {
        std::env::var(key).ok()
    });
    let mut session = StudioSession::from_config(&config, credential)?;
    if let Some(history) = project.history.clone() {
        session = session.with_history(history);
    }
    let events = EventWriter::new(
        project_dir(project).join(EVENTS_FILE),
        project.project_id.clone(),
    );
    Ok(session.with_events(events))
}

fn generation_request(project: &StudioProject, seed: &SeedArgs) -> GenerationRequest {
    let request = GenerationRequest::new(project.source_image.clone(), project.features.clone());
    match (seed.seed, seed.random_seed) {
        (Some(seed), _) => request.with_seed(seed),
        (None, true) => request.with_seed(random_seed()),
        (None, false) => request,
    }
}

fn load_project(args: &ProjectArgs) -> Result<StudioProject> {
    let path = args.project.join(PROJECT_FILE);
    if !path.exists() {
        bail!(
            "no project at {} (start one with `portrait-rs generate --photo <file>`)",
            args.project.display()
        );
    }
    StudioProject::load(path)
}

fn open_or_create_project(
    args: &ProjectArgs,
    photo: Option<&Path>,
    name: Option<&str>,
    features: &FeatureArgs,
) -> Result<StudioProject> {
    let path = args.project.join(PROJECT_FILE);
    let mut project = if path.exists() {
        let mut project = StudioProject::load(&path)?;
        if let Some(photo) = photo {
            project.source_image = read_image(photo)?;
        }
        if let Some(name) = name {
            project.name = name.to_string();
        }
        project
    } else {
        let Some(photo) = photo else {
            bail!(
                "--photo is required to start a new project in {}",
                args.project.display()
            );
        };
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| default_project_name(photo));
        info!(project = %args.project.display(), "starting new project");
        StudioProject::new(path, name, read_image(photo)?, FeatureSet::default())
    };
    features.apply(&mut project.features)?;
    Ok(project)
}

fn default_project_name(photo: &Path) -> String {
    photo
        .file_stem()
        .and_then(|value| value.to_str())
        .map(|value| value.replace(['_', '-'], " ").trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "portrait".to_string())
}

fn project_dir(project: &StudioProject) -> PathBuf {
    project
        .path()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

fn save_session(project: &mut StudioProject, session: &StudioSession) -> Result<()> {
    project.history = session.history().cloned();
    project
        .save()
        .with_context(|| format!("failed saving {}", project.path().display()))
}

fn autosave(project: &mut StudioProject, session: &StudioSession) {
    if let Err(err) = save_session(project, session) {
        warn!(error = %format!("{err:#}"), "project autosave failed");
    }
}

impl FeatureArgs {
    fn apply(&self, features: &mut FeatureSet) -> Result<()> {
        let text_fields = [
            (&self.pose, &mut features.pose),
            (&self.background, &mut features.background),
            (&self.camera_angle, &mut features.camera_angle),
            (&self.lens_depth, &mut features.lens_depth),
            (&self.color_grade, &mut features.color_grade),
        ];
        for (value, slot) in text_fields {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                *slot = value.to_string();
            }
        }
        if let Some(attire) = self.attire.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            features.attire = Attire::from(attire);
        }
        if let Some(expression) = self.expression {
            features.expression = expression;
        }
        if let Some(grooming) = self.grooming {
            features.grooming = grooming;
        }
        if let Some(path) = &self.attire_reference {
            features.attire_reference = Some(read_image(path)?);
            if self.attire.is_none() {
                features.attire = Attire::CustomReference;
            }
        }
        Ok(())
    }
}

fn read_image(path: &Path) -> Result<ImagePayload> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let format = image::guess_format(&bytes)
        .with_context(|| format!("{} is not a recognised image", path.display()))?;
    Ok(ImagePayload::from_bytes(format.to_mime_type(), &bytes))
}

fn write_image(result: &GeneratedResult, path: &Path) -> Result<PathBuf> {
    let bytes = result.image().decode()?;
    let path = with_image_extension(path, result.mime_type());
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, bytes).with_context(|| format!("failed writing {}", path.display()))?;
    Ok(path)
}

/// Writes a new version to `out`, or to `versions/<position>-<id>` in the project.
fn write_version(
    project: &StudioProject,
    history: Option<&VersionHistory>,
    result: &GeneratedResult,
    out: Option<&Path>,
) -> Result<PathBuf> {
    let target = match out {
        Some(out) => out.to_path_buf(),
        None => {
            let position = history
                .and_then(|history| history.position_of(result.id()))
                .unwrap_or(0);
            project_dir(project)
                .join(VERSIONS_DIR)
                .join(format!("{position:03}-{}", short_id(result.id())))
        }
    };
    write_image(result, &target)
}

fn with_image_extension(path: &Path, mime_type: &str) -> PathBuf {
    if path.extension().is_some() {
        return path.to_path_buf();
    }
    let extension = ImageFormat::from_mime_type(mime_type)
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("png");
    path.with_extension(extension)
}

fn parse_version_ref(raw: &str) -> Result<VersionRef> {
    VersionRef::parse(raw).with_context(|| format!("invalid version reference '{raw}'"))
}

fn resolve_version<'a>(history: &'a VersionHistory, raw: &str) -> Result<&'a GeneratedResult> {
    let target = parse_version_ref(raw)?;
    history
        .resolve(&target)
        .with_context(|| format!("no version '{raw}' in this project"))
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn kind_label(kind: ResultKind) -> &'static str {
    match kind {
        ResultKind::Generation => "generation",
        ResultKind::Edit => "edit",
    }
}

fn describe_version(history: Option<&VersionHistory>, result: &GeneratedResult) -> String {
    let position = history.and_then(|history| history.position_of(result.id()));
    let total = history.map(VersionHistory::len).unwrap_or(0);
    match position {
        Some(position) => format!(
            "#{position} of {total} ({}, {})",
            short_id(result.id()),
            kind_label(result.kind())
        ),
        None => short_id(result.id()).to_string(),
    }
}

fn history_line(history: &VersionHistory, position: usize, entry: &VersionEntry) -> String {
    let result = &entry.result;
    let marker = if result.id() == history.current_id() {
        "*"
    } else {
        " "
    };
    format!(
        "{marker} #{position:<3} {} {:<10} from {:<8} {} {}",
        short_id(result.id()),
        kind_label(result.kind()),
        entry.parent_id.as_deref().map(short_id).unwrap_or("-"),
        entry.created_at,
        prompt::fingerprint(result.instruction()),
    )
}

fn print_history(history: &VersionHistory) {
    for (index, entry) in history.entries().enumerate() {
        println!("{}", history_line(history, index + 1, entry));
    }
}

fn print_diff(history: &VersionHistory, from: &VersionRef, to: &VersionRef) {
    let (Some(from), Some(to)) = (history.resolve(from), history.resolve(to)) else {
        println!("Diff failed: unknown version");
        return;
    };
    match history.prompt_diff(from.id(), to.id()) {
        Some(lines) if lines.is_empty() => println!("Instructions are identical."),
        Some(lines) => {
            for line in lines {
                println!("{line}");
            }
        }
        None => println!("Diff failed: unknown version"),
    }
}

fn print_prompt(text: &str) {
    println!("{text}");
    println!();
    println!(
        "fingerprint {}  ~{} tokens",
        prompt::fingerprint(text),
        prompt::estimate_tokens(text)
    );
}

fn print_usage(usage: &UsageCounter, quota: QuotaPolicy) {
    match quota.ceiling() {
        Some(ceiling) => println!(
            "Generations used: {} of {} ({} remaining)",
            usage.count(),
            ceiling,
            quota.remaining(usage.count()).unwrap_or(0)
        ),
        None => println!("Generations used: {} (unlimited)", usage.count()),
    }
}
