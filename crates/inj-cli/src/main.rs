//! Injector CLI
//!
//! Inspect and edit Injector script stores outside the browser: classify
//! URLs, preview the code units a navigation would inject, and run the
//! popup's save, import and export flows against a JSON store file.

mod fetch;
mod storage;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use inj_core::popup::EXPORT_FILE_NAME;
use inj_core::{
    codec, load_defaults, url, DefaultScripts, DefaultsState, DomainKey, Injector, InjectorConfig, PopupSession,
    RecordingExecutor, ScriptStore, TabSnapshot,
};

use crate::fetch::DirFetcher;
use crate::storage::JsonFileStorage;

#[derive(Parser)]
#[command(name = "inj-cli")]
#[command(about = "Injector script store tools")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding lib.js, prelude.js, generic.js and domain.js
    /// (defaults to the built-in copies)
    #[arg(long, global = true)]
    defaults: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum TabStatus {
    Loading,
    Complete,
}

impl TabStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Complete => "complete",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the domain key of each URL
    Classify {
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Compress a script file
    Compress {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decompress a stored record
    Decompress {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the code units a navigation to URL would inject
    Inject {
        #[arg(long)]
        url: String,

        #[arg(long)]
        store: PathBuf,

        #[arg(long, value_enum, default_value = "complete")]
        status: TabStatus,
    },

    /// Export all scripts, decompressed
    Export {
        #[arg(long)]
        store: PathBuf,

        #[arg(short, long, default_value = EXPORT_FILE_NAME)]
        output: PathBuf,
    },

    /// Import scripts from an export file
    Import {
        #[arg(long)]
        store: PathBuf,

        #[arg(short, long)]
        input: PathBuf,
    },

    /// Save one script the way the popup editor does
    Save {
        #[arg(long)]
        store: PathBuf,

        #[arg(long)]
        key: String,

        #[arg(short, long)]
        input: PathBuf,
    },
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_ref()).and_then(|config| {
        let ctx = Context {
            config,
            defaults_dir: cli.defaults,
        };
        match cli.command {
            Commands::Classify { urls } => cmd_classify(&ctx, &urls),
            Commands::Compress { input, output } => cmd_compress(&input, output.as_ref()),
            Commands::Decompress { input, output } => cmd_decompress(&input, output.as_ref()),
            Commands::Inject { url, store, status } => block_on(cmd_inject(&ctx, &url, store, status)),
            Commands::Export { store, output } => block_on(cmd_export(&ctx, store, &output)),
            Commands::Import { store, input } => block_on(cmd_import(&ctx, store, &input)),
            Commands::Save { store, key, input } => block_on(cmd_save(&ctx, store, &key, &input)),
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

struct Context {
    config: InjectorConfig,
    defaults_dir: Option<PathBuf>,
}

impl Context {
    async fn defaults(&self) -> Result<DefaultScripts, String> {
        match &self.defaults_dir {
            Some(dir) => {
                let timeout = Duration::from_millis(u64::from(self.config.fetch_timeout_ms));
                load_defaults(&DirFetcher::new(dir), &self.config.resources, timeout)
                    .await
                    .map_err(|e| e.to_string())
            }
            None => Ok(DefaultScripts::builtin()),
        }
    }

    fn store(&self, path: PathBuf) -> ScriptStore<JsonFileStorage> {
        ScriptStore::with_soft_limit(JsonFileStorage::new(path), self.config.soft_size_limit)
    }

    async fn popup(&self, store: PathBuf) -> Result<PopupSession<JsonFileStorage>, String> {
        let defaults = self.defaults().await?;
        Ok(PopupSession::new(self.store(store), Arc::new(defaults), self.config.clone()))
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<InjectorConfig, String> {
    let Some(path) = path else {
        return Ok(InjectorConfig::default());
    };
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    InjectorConfig::from_json(&text).map_err(|e| format!("Invalid config '{}': {}", path.display(), e))
}

fn block_on<F: std::future::Future<Output = Result<(), String>>>(future: F) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(future)
}

fn read_input(path: &PathBuf) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))
}

fn write_output(path: Option<&PathBuf>, content: &str) -> Result<(), String> {
    match path {
        Some(path) => fs::write(path, content).map_err(|e| format!("Failed to write '{}': {}", path.display(), e)),
        None => {
            println!("{}", content);
            Ok(())
        }
    }
}

fn cmd_classify(ctx: &Context, urls: &[String]) -> Result<(), String> {
    let mut failures = 0usize;
    for raw in urls {
        match url::classify_with(raw, &ctx.config.supported_protocols[..]) {
            Ok(classified) => println!("{} -> {} ({})", raw, classified.domain_key, classified.protocol),
            Err(e) => {
                println!("{} -> error: {}", raw, e);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        return Err(format!("{} of {} URLs could not be classified", failures, urls.len()));
    }
    Ok(())
}

fn cmd_compress(input: &PathBuf, output: Option<&PathBuf>) -> Result<(), String> {
    let text = read_input(input)?;
    let encoded = codec::encode_for_storage(&text);
    eprintln!(
        "{} -> {} units (ratio = {:.1}, stored {})",
        encoded.plain_len,
        encoded.compressed_len,
        encoded.ratio,
        if encoded.compressed { "compressed" } else { "raw" }
    );
    write_output(output, &codec::compress(&text))
}

fn cmd_decompress(input: &PathBuf, output: Option<&PathBuf>) -> Result<(), String> {
    let content = read_input(input)?;
    let plain = codec::decompress(&content).map_err(|e| e.to_string())?;
    write_output(output, &plain)
}

async fn cmd_inject(ctx: &Context, target: &str, store: PathBuf, status: TabStatus) -> Result<(), String> {
    let defaults = ctx.defaults().await?;
    let injector = Injector::new(ctx.store(store), RecordingExecutor::new(), ctx.config.clone())
        .with_defaults(DefaultsState::ready(defaults));

    let tab = TabSnapshot::new(1, target, status.as_str());
    let report = injector.handle_tab_updated(1, Some(status.as_str()), tab).await;

    if let Some(reason) = report.skipped {
        return Err(format!("Nothing injected: {}", reason));
    }
    for (slot, error) in &report.failed {
        eprintln!("Skipped {}: {}", slot, error);
    }
    for slot in &report.waiting {
        eprintln!("Waiting for the tab to complete: {}", slot);
    }

    for (_, unit) in injector.executor().calls() {
        println!("// runAt: {}", unit.run_at.as_str());
        println!("{}", unit.code);
    }
    Ok(())
}

async fn cmd_export(ctx: &Context, store: PathBuf, output: &PathBuf) -> Result<(), String> {
    let session = ctx.popup(store).await?;
    let json = session.export_all().await.map_err(|e| e.to_string())?;
    fs::write(output, json).map_err(|e| format!("Failed to write '{}': {}", output.display(), e))?;
    println!("Exported scripts to '{}'", output.display());
    Ok(())
}

async fn cmd_import(ctx: &Context, store: PathBuf, input: &PathBuf) -> Result<(), String> {
    let text = read_input(input)?;
    let session = ctx.popup(store).await?;
    let report = session.import_all(&text).await.map_err(|e| e.to_string())?;

    println!("Imported '{}'", input.display());
    println!("  Saved:    {}", report.saved.len());
    println!("  Removed:  {}", report.removed.len());
    println!("  Failed:   {}", report.failed.len());
    for (key, reason) in &report.failed {
        println!("    {}: {}", key, reason);
    }

    if !report.is_complete() {
        return Err("Some scripts could not be imported".to_string());
    }
    Ok(())
}

async fn cmd_save(ctx: &Context, store: PathBuf, key: &str, input: &PathBuf) -> Result<(), String> {
    let key = DomainKey::new(key).ok_or_else(|| format!("Invalid domain key: {:?}", key))?;
    let text = read_input(input)?;
    let session = ctx.popup(store).await?;

    session.load(&key).await.map_err(|e| e.to_string())?;
    session.edit(&text);
    let status = session.save_now().await;

    println!("{} {}", status.glyph(), status.message());
    if status.is_error() {
        return Err(format!("Failed to save '{}'", key));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn ctx() -> Context {
        Context {
            config: InjectorConfig::default(),
            defaults_dir: None,
        }
    }

    #[test]
    fn test_save_import_export_flow() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("store.json");

        let script = dir.path().join("a.js");
        fs::write(&script, "console.log('a')").unwrap();
        block_on(cmd_save(&ctx(), store.clone(), "a.com", &script)).unwrap();

        let import = dir.path().join("import.json");
        fs::write(&import, r#"{ "b.com": "b()", "a.com": "" }"#).unwrap();
        block_on(cmd_import(&ctx(), store.clone(), &import)).unwrap();

        let out = dir.path().join(EXPORT_FILE_NAME);
        block_on(cmd_export(&ctx(), store, &out)).unwrap();
        let exported: BTreeMap<String, String> = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(exported, BTreeMap::from([("b.com".to_string(), "b()".to_string())]));
    }

    #[test]
    fn test_inject_rejects_unsupported_url() {
        let dir = tempdir().unwrap();
        let result = block_on(cmd_inject(
            &ctx(),
            "chrome://settings/",
            dir.path().join("store.json"),
            TabStatus::Complete,
        ));
        assert!(result.unwrap_err().contains("Unsupported protocol"));
    }

    #[test]
    fn test_missing_config_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.json"))).is_err());
        assert_eq!(load_config(None).unwrap(), InjectorConfig::default());
    }
}
