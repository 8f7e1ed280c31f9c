use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use livepen::store::SnapshotStore;
use livepen::{
    compose, share, BoaHost, ConsoleEvent, ConsoleKind, ErrorLocation, ErrorPolicy, FileBackend, HostUi, Playground,
    PlaygroundConfig, SourceBundle, Status,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "livepen", version, about = "Compose, run and share HTML/CSS/JS playground bundles")]
struct Cli {
    /// JSON config file; missing fields keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding saved snapshots
    #[arg(long, global = true, default_value = ".livepen")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct Sources {
    /// Markup pane file
    #[arg(long)]
    html: Option<PathBuf>,
    /// Styles pane file
    #[arg(long)]
    css: Option<PathBuf>,
    /// Script pane file
    #[arg(long)]
    js: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a bundle in an isolated context and print its console output
    Run {
        #[command(flatten)]
        sources: Sources,
        /// Open a share token instead of reading files
        #[arg(long, conflicts_with_all = ["html", "css", "js"])]
        share: Option<String>,
        /// Report script errors without re-throwing them
        #[arg(long)]
        swallow: bool,
    },
    /// Print the composed preview document
    Compose {
        #[command(flatten)]
        sources: Sources,
    },
    /// Print the clean exported document
    Export {
        #[command(flatten)]
        sources: Sources,
        /// Write to a file instead of stdout
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Encode or decode share links
    Share {
        #[command(subcommand)]
        action: ShareAction,
    },
    /// Save a bundle to the single slot or under a project name
    Save {
        #[command(flatten)]
        sources: Sources,
        #[arg(long)]
        name: Option<String>,
    },
    /// Print a saved bundle as JSON
    Load {
        #[arg(long)]
        name: Option<String>,
    },
    /// List named projects
    List,
    /// Remove the single slot or one named project
    Clear {
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum ShareAction {
    Encode {
        #[command(flatten)]
        sources: Sources,
        /// Page URL to attach the token to
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Decode a token or a full share URL
    Decode { token: String },
}

fn read_pane(path: &Option<PathBuf>) -> anyhow::Result<String> {
    match path {
        Some(p) => std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display())),
        None => Ok(String::new()),
    }
}

fn read_sources(sources: &Sources) -> anyhow::Result<SourceBundle> {
    Ok(SourceBundle::new(read_pane(&sources.html)?, read_pane(&sources.css)?, read_pane(&sources.js)?))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PlaygroundConfig> {
    match path {
        Some(p) => Ok(PlaygroundConfig::from_json_file(p)?),
        None => Ok(PlaygroundConfig::default()),
    }
}

/// Prints console output and status changes to the terminal
#[derive(Default)]
struct TerminalUi {
    errors: usize,
}

impl HostUi for TerminalUi {
    fn append_console(&mut self, event: &ConsoleEvent) {
        match event.kind {
            ConsoleKind::Log => println!("{}", event.display_text()),
            ConsoleKind::Warn => println!("{} [warn]", event.display_text()),
            ConsoleKind::Error => {
                self.errors += 1;
                eprintln!("> {}", event.payload.first().map(String::as_str).unwrap_or(""));
                if let Some(stack) = event.stack() {
                    for line in stack.lines() {
                        eprintln!("    {}", line);
                    }
                }
            }
        }
    }

    fn clear_console(&mut self) {}

    fn highlight_line(&mut self, location: ErrorLocation) {
        eprintln!("  at script line {}, column {}", location.line + 1, location.column + 1);
    }

    fn clear_highlight(&mut self) {}

    fn set_status(&mut self, status: &Status) {
        log::info!("status: {}", status.text);
    }
}

fn run(cfg: PlaygroundConfig, bundle: Option<SourceBundle>, token: Option<String>) -> anyhow::Result<()> {
    let timeout = Duration::from_millis(cfg.script_timeout_ms);
    let host = BoaHost::new(&cfg);
    let mut pg = Playground::new(cfg, host, livepen::MemoryBackend::new(), TerminalUi::default());

    match (bundle, token) {
        (_, Some(token)) => {
            let opened = if token.contains("://") { pg.open_shared_url(&token) } else { pg.open_shared(&token) };
            if !opened {
                bail!("could not open share link");
            }
        }
        (Some(bundle), None) => pg.replace(bundle),
        (None, None) => {
            pg.run();
        }
    }

    let outcome = pg.run_to_settle(timeout)?;
    log::debug!("run finished in {}ms", outcome.elapsed_ms);
    if let Some(snapshot) = pg.host().text_snapshot() {
        if !snapshot.text.trim().is_empty() {
            println!("--- page text ---\n{}", snapshot.text.trim());
        }
    }
    if pg.ui().errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_deref())?;
    let key = cfg.storage_key.clone();
    let store = || SnapshotStore::new(FileBackend::new(&cli.store), key.clone());

    match &cli.command {
        Command::Run { sources, share, swallow } => {
            if *swallow {
                cfg.error_policy = ErrorPolicy::Swallow;
            }
            let bundle = if share.is_some() { None } else { Some(read_sources(sources)?) };
            run(cfg, bundle, share.clone())?;
        }
        Command::Compose { sources } => {
            print!("{}", compose::compose(&read_sources(sources)?, &cfg.shim_options()));
        }
        Command::Export { sources, out } => {
            let doc = compose::export(&read_sources(sources)?);
            match out {
                Some(path) => std::fs::write(path, doc).with_context(|| format!("writing {}", path.display()))?,
                None => print!("{}", doc),
            }
        }
        Command::Share { action } => match action {
            ShareAction::Encode { sources, base_url } => {
                let token = share::encode(&read_sources(sources)?);
                match base_url {
                    Some(base) => println!("{}", share::share_url(base, &token)?),
                    None => println!("{}", token),
                }
            }
            ShareAction::Decode { token } => {
                let token = match share::token_from_url(token) {
                    Some(t) => t,
                    None => share::ShareToken::from(token.as_str()),
                };
                let bundle = share::decode(token.as_str())?;
                println!("{}", serde_json::to_string_pretty(&bundle)?);
            }
        },
        Command::Save { sources, name } => {
            let snap = store().save(&read_sources(sources)?, name.as_deref())?;
            println!("Saved {} at {}", snap.name.as_deref().unwrap_or("slot"), snap.created_at.to_rfc3339());
        }
        Command::Load { name } => match store().load(name.as_deref())? {
            Some(bundle) => println!("{}", serde_json::to_string_pretty(&bundle)?),
            None => bail!("nothing saved under {}", name.as_deref().unwrap_or("the single slot")),
        },
        Command::List => {
            for entry in store().list()? {
                println!("{}\t{}", entry.name, entry.created_at.to_rfc3339());
            }
        }
        Command::Clear { name } => {
            if !store().clear(name.as_deref())? {
                log::warn!("nothing to clear");
            }
        }
    }
    Ok(())
}
