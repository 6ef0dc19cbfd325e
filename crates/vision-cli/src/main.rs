mod console;
mod session;

use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;
use vision_contracts::events::EventWriter;
use vision_contracts::models::{Capability, ModelRegistry, ModelSelector};
use vision_contracts::samples::SampleCatalog;
use vision_contracts::session::parse_intent;
use vision_contracts::settings::{KeyValueStore, SettingsFile, StorageKey};
use vision_engine::credentials::mask_secret;
use vision_engine::pipeline::{AnalysisObserver, AnalysisRequest, StatusTone};
use vision_engine::samples::{
    apply_outcome, loading_status, source_from_config, SampleApplied, SampleLoader,
    SampleSource, SAMPLE_WARNING_PREFIX, STATUS_CUSTOM_READY, STATUS_SAMPLE_READY,
};
use vision_engine::{
    AnalysisPipeline, CaptionClient, CredentialStore, Credentials, EngineConfig, ImageSelection,
    InsightClient, MemoryPreviews, OutputPanel, PreviewStore, TempFilePreviews,
};

use crate::console::ConsolePanel;
use crate::session::{Flow, Session, SessionParts};

const DEFAULT_PROMPT: &str = "Summarize the scene and list any notable risks or next steps.";
const SAMPLE_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Parser)]
#[command(
    name = "vision-captioner",
    version,
    about = "Caption an image with Hugging Face, then ask OpenRouter about it"
)]
struct Cli {
    /// Settings file holding keys and model choices.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Keep keys and model choices in memory only.
    #[arg(long, global = true)]
    no_persist: bool,
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Caption one image and generate an insight.
    Analyze(AnalyzeArgs),
    /// Interactive session with slash commands.
    Session(SessionArgs),
    /// Inspect or edit stored settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List the bundled sample images and whether they can be loaded.
    Samples(SamplesArgs),
    /// List caption and insight model choices.
    Models(ModelsArgs),
}

#[derive(Debug, Args)]
#[group(id = "image_source", required = true, multiple = false)]
struct ImageSourceArgs {
    #[arg(long)]
    image: Option<PathBuf>,
    /// Sample name, slug or path, e.g. `burnt_pcb`.
    #[arg(long)]
    sample: Option<String>,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[command(flatten)]
    source: ImageSourceArgs,
    #[arg(long, default_value = DEFAULT_PROMPT)]
    prompt: String,
    #[arg(long)]
    hf_key: Option<String>,
    #[arg(long)]
    or_key: Option<String>,
    #[arg(long)]
    caption_model: Option<String>,
    #[arg(long)]
    insight_model: Option<String>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    samples_dir: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    samples_dir: Option<PathBuf>,
    /// Write previews to temp files and print their location.
    #[arg(long)]
    preview: bool,
    #[arg(long, default_value = DEFAULT_PROMPT)]
    prompt: String,
}

#[derive(Debug, Parser)]
struct SamplesArgs {
    #[arg(long)]
    samples_dir: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct ModelsArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print one stored value.
    Get { key: String },
    /// Store a value; model ids must be known choices.
    Set { key: String, value: String },
    /// Remove a stored value.
    Clear { key: String },
    /// Print every stored value with secrets masked.
    Show,
}

struct AppContext {
    config: EngineConfig,
    registry: ModelRegistry,
    persist: bool,
}

impl AppContext {
    fn from_cli(cli: &Cli) -> Self {
        let mut config = EngineConfig::from_env();
        if let Some(path) = &cli.settings {
            config.settings_path = Some(path.clone());
        }
        Self {
            config,
            registry: ModelRegistry::default(),
            persist: !cli.no_persist,
        }
    }

    fn with_samples_dir(mut self, samples_dir: Option<&PathBuf>) -> Self {
        if let Some(dir) = samples_dir {
            self.config.samples_dir = dir.clone();
            self.config.samples_url = None;
        }
        self
    }

    fn credential_store(&self) -> CredentialStore {
        if self.persist {
            CredentialStore::open(self.config.settings_path.clone())
        } else {
            CredentialStore::in_memory()
        }
    }

    fn load_credentials(&self, store: &mut CredentialStore) -> Credentials {
        let defaults = Credentials::with_defaults(&self.registry);
        Credentials::load(store, defaults, &self.registry)
    }

    fn settings_file(&self) -> Result<SettingsFile> {
        if !self.persist {
            bail!("settings are disabled by --no-persist");
        }
        let Some(path) = self.config.settings_path.clone() else {
            bail!("no settings location available; pass --settings or set SVC_SETTINGS_PATH");
        };
        Ok(SettingsFile::new(path))
    }

    fn panel(&self, events: Option<&PathBuf>) -> OutputPanel {
        let panel = OutputPanel::new();
        match events {
            Some(path) => panel.with_events(EventWriter::for_new_session(path)),
            None => panel,
        }
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("vision-captioner error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let ctx = AppContext::from_cli(&cli);
    match cli.command {
        Command::Analyze(args) => run_analyze(ctx, args),
        Command::Session(args) => {
            run_session(ctx, args)?;
            Ok(0)
        }
        Command::Config { action } => {
            run_config(&ctx, action, &mut io::stdout())?;
            Ok(0)
        }
        Command::Samples(args) => {
            run_samples(ctx, args)?;
            Ok(0)
        }
        Command::Models(args) => {
            print_models(&ctx.registry, args.json, &mut io::stdout())?;
            Ok(0)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run_analyze(ctx: AppContext, args: AnalyzeArgs) -> Result<i32> {
    let ctx = ctx.with_samples_dir(args.samples_dir.as_ref());
    let mut store = ctx.credential_store();
    let mut credentials = ctx.load_credentials(&mut store);
    apply_flag_overrides(&ctx.registry, &mut credentials, &args)?;

    let mut console = ConsolePanel::stdout(ctx.panel(args.events.as_ref()));
    let mut selection = ImageSelection::new(MemoryPreviews::new());
    if let Some(path) = &args.source.image {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        selection.select_from_bytes(bytes, &file_name_of(path));
        console.set_status(StatusTone::Info, STATUS_CUSTOM_READY);
    } else if let Some(query) = &args.source.sample {
        load_sample_blocking(&ctx.config, query, &mut selection, &mut console)?;
    }

    let pipeline = AnalysisPipeline::new(
        CaptionClient::from_config(&ctx.config)?,
        InsightClient::from_config(&ctx.config)?,
    );
    let request = AnalysisRequest {
        credentials: &credentials,
        prompt: &args.prompt,
        image: selection.current(),
    };
    let result = pipeline.run(&request, &mut store, &mut console);
    if result.error.as_ref().is_some_and(|err| err.is_validation()) {
        eprintln!(
            "Keys come from --hf-key/--or-key or `vision-captioner config set`; \
             images from --image or --sample."
        );
    }
    Ok(if result.is_success() { 0 } else { 1 })
}

/// Flags win over stored values; the pipeline persists them once validation
/// passes.
fn apply_flag_overrides(
    registry: &ModelRegistry,
    credentials: &mut Credentials,
    args: &AnalyzeArgs,
) -> Result<()> {
    if let Some(key) = &args.hf_key {
        credentials.set(StorageKey::CaptionApiKey, key.as_str());
    }
    if let Some(key) = &args.or_key {
        credentials.set(StorageKey::InsightApiKey, key.as_str());
    }
    let selector = ModelSelector::new(Some(registry.clone()));
    for (requested, key, capability) in [
        (&args.caption_model, StorageKey::CaptionModel, Capability::Caption),
        (&args.insight_model, StorageKey::InsightModel, Capability::Insight),
    ] {
        let Some(requested) = requested.as_deref() else {
            continue;
        };
        let selection = selector
            .select(Some(requested), capability)
            .map_err(anyhow::Error::msg)?;
        if let Some(reason) = selection.fallback_reason {
            bail!("{reason} Run `vision-captioner models` to list choices.");
        }
        credentials.set(key, selection.model.id);
    }
    Ok(())
}

fn load_sample_blocking(
    config: &EngineConfig,
    query: &str,
    selection: &mut ImageSelection<MemoryPreviews>,
    console: &mut ConsolePanel,
) -> Result<()> {
    let mut catalog = SampleCatalog::default();
    let Some(sample) = catalog.find(query).cloned() else {
        bail!("unknown sample '{query}'; run `vision-captioner samples` to list them");
    };
    console.set_status(StatusTone::Info, loading_status(&catalog, &sample));
    let mut loader = SampleLoader::new(source_from_config(config)?);
    loader.start(selection.begin_load(), sample);
    while loader.in_flight() > 0 {
        let Some(outcome) = loader.wait_next(SAMPLE_POLL) else {
            continue;
        };
        match apply_outcome(selection, &mut catalog, outcome) {
            SampleApplied::Selected { .. } => {
                console.set_status(StatusTone::Info, STATUS_SAMPLE_READY);
            }
            SampleApplied::Failed(err) => {
                console.set_status(StatusTone::Error, &format!("{SAMPLE_WARNING_PREFIX}{err}"));
            }
            SampleApplied::Stale => {}
        }
    }
    Ok(())
}

fn run_session(ctx: AppContext, args: SessionArgs) -> Result<()> {
    let ctx = ctx.with_samples_dir(args.samples_dir.as_ref());
    let mut store = ctx.credential_store();
    let credentials = ctx.load_credentials(&mut store);
    let previews: Box<dyn PreviewStore> = if args.preview {
        Box::new(TempFilePreviews::new())
    } else {
        Box::new(MemoryPreviews::new())
    };
    let mut session = Session::new(SessionParts {
        pipeline: AnalysisPipeline::new(
            CaptionClient::from_config(&ctx.config)?,
            InsightClient::from_config(&ctx.config)?,
        ),
        registry: ctx.registry.clone(),
        store,
        credentials,
        prompt: args.prompt.clone(),
        loader: SampleLoader::new(source_from_config(&ctx.config)?),
        previews,
        console: ConsolePanel::stdout(ctx.panel(args.events.as_ref())),
        show_previews: args.preview,
    });

    let stdin = io::stdin();
    let mut line = String::new();
    println!("Smart Vision Captioner session. Type /help for commands.");
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        if session.handle(&parse_intent(input)) == Flow::Quit {
            break;
        }
    }
    Ok(())
}

fn parse_key(raw: &str) -> Result<StorageKey> {
    StorageKey::parse(raw).with_context(|| {
        let names: Vec<&str> = StorageKey::ALL.iter().map(|key| key.cli_name()).collect();
        format!("unknown key '{raw}' (expected one of: {})", names.join(", "))
    })
}

fn run_config(ctx: &AppContext, action: ConfigAction, out: &mut dyn Write) -> Result<()> {
    let mut file = ctx.settings_file()?;
    match action {
        ConfigAction::Get { key } => {
            let key = parse_key(&key)?;
            let value = file.get(key.as_str())?;
            writeln!(out, "{}", value.as_deref().unwrap_or("(not set)"))?;
        }
        ConfigAction::Set { key, value } => {
            let key = parse_key(&key)?;
            let value = value.trim();
            let capability = match key {
                StorageKey::CaptionModel => Some(Capability::Caption),
                StorageKey::InsightModel => Some(Capability::Insight),
                _ => None,
            };
            if let (Some(capability), false) = (capability, value.is_empty()) {
                if ctx.registry.ensure(value, capability).is_none() {
                    bail!("'{value}' is not a known {capability} model");
                }
            }
            if value.is_empty() {
                file.remove(key.as_str())?;
            } else {
                file.set(key.as_str(), value)?;
            }
            writeln!(out, "{} updated in {}", key.cli_name(), file.path().display())?;
        }
        ConfigAction::Clear { key } => {
            let key = parse_key(&key)?;
            file.remove(key.as_str())?;
            writeln!(out, "{} cleared", key.cli_name())?;
        }
        ConfigAction::Show => {
            writeln!(out, "settings: {}", file.path().display())?;
            for key in StorageKey::ALL {
                let value = file.get(key.as_str())?.unwrap_or_default();
                let shown = if key.is_secret() {
                    mask_secret(&value)
                } else if value.is_empty() {
                    "(default)".to_string()
                } else {
                    value
                };
                writeln!(out, "{:<14} {shown}", key.cli_name())?;
            }
        }
    }
    Ok(())
}

fn run_samples(ctx: AppContext, args: SamplesArgs) -> Result<()> {
    let ctx = ctx.with_samples_dir(args.samples_dir.as_ref());
    let source = source_from_config(&ctx.config)?;
    if !args.json {
        println!("source: {}", source.describe());
    }
    print_samples(source, args.json, &mut io::stdout())
}

fn print_samples(source: Arc<dyn SampleSource>, json: bool, out: &mut dyn Write) -> Result<()> {
    let catalog = SampleCatalog::default();
    let mut rows = Vec::new();
    for sample in catalog.definitions() {
        let probed = source.fetch(&sample.path).map(|bytes| bytes.len());
        if let Err(err) = &probed {
            tracing::debug!(path = %sample.path, error = ?err, "sample probe failed");
        }
        if json {
            let mut row = serde_json::to_value(sample)?;
            if let Value::Object(map) = &mut row {
                map.insert("slug".to_string(), json!(sample.slug()));
                map.insert("available".to_string(), json!(probed.is_ok()));
                map.insert("bytes".to_string(), json!(probed.as_ref().ok()));
            }
            rows.push(row);
            continue;
        }
        let availability = match probed {
            Ok(len) => format!("available, {len} bytes"),
            Err(_) => "missing".to_string(),
        };
        writeln!(
            out,
            "{:<14} {:<14} {} [{availability}]",
            sample.slug(),
            sample.label,
            sample.path
        )?;
    }
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
    }
    Ok(())
}

fn print_models(registry: &ModelRegistry, json: bool, out: &mut dyn Write) -> Result<()> {
    if json {
        let payload = json!({
            "caption": registry.by_capability(Capability::Caption),
            "insight": registry.by_capability(Capability::Insight),
            "defaults": {
                "caption": registry.default_for(Capability::Caption).map(|model| &model.id),
                "insight": registry.default_for(Capability::Insight).map(|model| &model.id),
            },
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&payload)?)?;
        return Ok(());
    }
    for capability in [Capability::Caption, Capability::Insight] {
        writeln!(out, "{capability} models:")?;
        let default_id = registry
            .default_for(capability)
            .map(|model| model.id.clone())
            .unwrap_or_default();
        for model in registry.by_capability(capability) {
            let marker = if model.id == default_id { " (default)" } else { "" };
            writeln!(out, "  {} - {}{marker}", model.id, model.label)?;
        }
    }
    Ok(())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string()
}
