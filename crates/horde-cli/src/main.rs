// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Result};
use cache::JsonStore;
use clap::{Parser, Subcommand};
use client::{
    discover_models, GenerateOptions, GenerateRequest, HordeModel, JobClient, PriorTurn,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const KEY_ENV_VAR: &str = "AIHORDE_KEY";
const CONVERSATION_STORE: &str = "conversation";

#[derive(Parser)]
#[command(name = "horde", version, about = "text generation on the AI Horde")]
struct Cli {
    /// optional path to a toml config file (applies to all subcommands)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// log resolved models, the full prompt and raw responses
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// list models currently served by workers
    Models {
        /// bypass the in-process cache and query the service again
        #[arg(long)]
        refresh: bool,
    },

    /// list instruction template families
    Templates,

    /// generate a reply for a prompt
    Prompt(PromptOpts),
}

#[derive(Parser, Debug)]
struct PromptOpts {
    /// prompt text; empty means plain continuation of the conversation
    #[arg(default_value = "")]
    prompt: String,

    /// model id (`horde` or `horde/<worker model>`)
    #[arg(short, long)]
    model: Option<String>,

    /// regex selecting worker models when using the generic `horde` model
    #[arg(long, default_value = "")]
    pattern: String,

    /// system prompt
    #[arg(short, long)]
    system: Option<String>,

    /// instruction family, or `auto` to detect it from the model name
    #[arg(long, default_value = "auto")]
    instruct: String,

    #[arg(long)]
    max_tokens: Option<u32>,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    top_k: Option<u32>,

    #[arg(long)]
    top_p: Option<f32>,

    /// api key; falls back to AIHORDE_KEY, the config file, then the
    /// anonymous key
    #[arg(long)]
    key: Option<String>,

    /// continue the previous conversation
    #[arg(short = 'c', long = "continue")]
    continue_conversation: bool,
}

/// conversation remembered between invocations.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedConversation {
    /// model id the caller asked for, not the one that answered.
    model_id: String,
    turns: Vec<PriorTurn>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::logging::init_tracing_with(if cli.debug { "debug" } else { "warn" });

    let cfg = config::load_or_default(cli.config.as_deref())?;
    info!("starting horde: {:?}", cli.command);

    match cli.command {
        Commands::Models { refresh } => {
            let client = JobClient::from_config(&cfg, &resolve_key(None, &cfg))?;
            if refresh {
                client.registry().refresh().await?;
            }
            for model in discover_models(client.registry()).await {
                println!("{model}");
            }
        }
        Commands::Templates => {
            let client = JobClient::from_config(&cfg, &resolve_key(None, &cfg))?;
            for family in client.templates().families() {
                println!("{family}");
            }
        }
        Commands::Prompt(opts) => prompt(&cfg, opts).await?,
    }

    Ok(())
}

/// explicit flag, then environment, then config, then anonymous.
fn resolve_key(explicit: Option<&str>, cfg: &config::HordeConfig) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| env::var(KEY_ENV_VAR).ok().filter(|k| !k.is_empty()))
        .or_else(|| cfg.api_key.clone())
        .unwrap_or_else(|| protocol::ANON_APIKEY.to_string())
}

/// the saved conversation when continuing; otherwise the saved one is
/// discarded and a fresh conversation starts.
fn load_conversation(store: &JsonStore, continue_conversation: bool) -> Result<SavedConversation> {
    if continue_conversation {
        return store.load_or_default();
    }
    store.clear()?;
    Ok(SavedConversation::default())
}

async fn prompt(cfg: &config::HordeConfig, opts: PromptOpts) -> Result<()> {
    let client = JobClient::from_config(cfg, &resolve_key(opts.key.as_deref(), cfg))?;
    let store = JsonStore::new(CONVERSATION_STORE)?;

    let mut saved = load_conversation(&store, opts.continue_conversation)?;

    let model = match opts.model.as_deref() {
        Some(id) => HordeModel::from_id(id),
        None if !saved.model_id.is_empty() => HordeModel::from_id(&saved.model_id),
        None => HordeModel::generic(),
    };

    let request = GenerateRequest {
        model,
        prompt: opts.prompt,
        system: opts.system,
        history: saved.turns.clone(),
        options: GenerateOptions {
            max_tokens: opts.max_tokens,
            temperature: opts.temperature,
            top_k: opts.top_k,
            top_p: opts.top_p,
            pattern: opts.pattern,
            instruct: opts.instruct,
        },
    };

    let response = match client.generate(&request).await {
        Ok(response) => response,
        Err(client::HordeError::NoModelMatch { pattern }) => {
            bail!("model matching {pattern:?} not found")
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", response.text());
    if response.result.failed {
        warn!("horde: the job was not accepted; see the log for the service response");
        return Ok(());
    }
    info!(
        "horde: answered by {} (instruct={}, kudos={})",
        response.model_id, response.instruct, response.result.kudos
    );

    saved.model_id = request.model.model_id.clone();
    saved.turns.push(response.to_turn(&request));
    if let Err(e) = store.save(&saved) {
        warn!("horde: failed to save conversation: {e:?}");
    }
    Ok(())
}
