//! CLI command implementations

use anyhow::{Context, Result};
use llm_core::{ChatBackend, OllamaClient, Role};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::agent::{Agent, AgentConfig, AgentRole};
use crate::config::UserConfig;
use crate::console::{Console, TerminalConsole};
use crate::learn::LessonExtractor;
use crate::orchestrator::Orchestrator;
use crate::progress::Spinner;
use crate::storage::{Database, HistoryStore, LessonStore, SharedDatabase};
use crate::tools::sandbox::{create_executor, SandboxConfig, SandboxStrategy};

// ANSI color codes
const GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";
const BLUE: &str = "\x1b[94m";
const CYAN: &str = "\x1b[96m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Configuration after applying command-line overrides
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: UserConfig,
    pub config_path: PathBuf,
    pub db_path: PathBuf,
}

impl Settings {
    pub fn resolve(config_path: Option<PathBuf>, db: Option<PathBuf>, model: Option<String>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => UserConfig::config_path()?,
        };
        let mut config = UserConfig::load(Some(&config_path))?;

        if let Some(model) = model {
            config.llm.model = model;
        }
        if let Some(db) = db {
            config.storage.db_path = Some(db);
        }
        let db_path = config.db_path()?;

        Ok(Self {
            config,
            config_path,
            db_path,
        })
    }

    fn open_db(&self) -> Result<SharedDatabase> {
        Ok(Database::open(&self.db_path)?.shared())
    }

    fn client(&self) -> Result<OllamaClient> {
        OllamaClient::from_config(&self.config.llm)
    }
}

/// Options for `relay run`
#[derive(Debug, Default)]
pub struct RunOptions {
    pub request: Vec<String>,
    pub strategy: Option<SandboxStrategy>,
    pub resume_converser: Option<String>,
    pub resume_coder: Option<String>,
    pub show_progress: bool,
}

/// Drive the converser/coder graph until the conversation ends
pub async fn run(settings: &Settings, options: RunOptions) -> Result<()> {
    let client = settings.client()?;
    ensure_ready(&client, &settings.config.llm.model).await?;
    let backend: Arc<dyn ChatBackend> = Arc::new(client);
    let db = settings.open_db()?;

    let mut sandbox = settings.config.sandbox.clone();
    if let Some(strategy) = options.strategy {
        sandbox.strategy = strategy;
    }

    let agent_config = settings.config.agent_config().with_progress(options.show_progress);
    let console: Arc<dyn Console> = Arc::new(TerminalConsole::new());
    let (converser, coder) = prepare_agents(
        backend,
        db,
        &sandbox,
        agent_config,
        console,
        options.resume_converser,
        options.resume_coder,
    )
    .await?;

    println!(
        "{}model {} | sandbox {} | converser {} | coder {}{}",
        DIM,
        settings.config.llm.model,
        sandbox.strategy,
        converser.session_id(),
        coder.session_id(),
        RESET
    );
    info!(
        converser = converser.session_id(),
        converser_messages = converser.messages().len(),
        coder = coder.session_id(),
        coder_messages = coder.messages().len(),
        "Starting orchestration"
    );

    let mut orchestrator = Orchestrator::standard(Box::new(converser), Box::new(coder))?;
    let result = match orchestrator.run(&options.request.join(" ")).await {
        Ok(result) => result,
        Err(e) if e.is_configuration() => {
            return Err(anyhow::Error::new(e).context(format!(
                "Configuration error: check that {} supports tool calling",
                settings.config.llm.model
            )))
        }
        Err(e) => return Err(e.into()),
    };

    println!();
    println!("{}{}{}", GREEN, result, RESET);
    Ok(())
}

/// Sandbox first, then the agents, so a failed sandbox leaves no session rows
async fn prepare_agents(
    backend: Arc<dyn ChatBackend>,
    db: SharedDatabase,
    sandbox: &SandboxConfig,
    agent_config: AgentConfig,
    console: Arc<dyn Console>,
    resume_converser: Option<String>,
    resume_coder: Option<String>,
) -> Result<(Agent, Agent)> {
    let spinner = if agent_config.show_progress {
        Spinner::start(format!("Preparing {} sandbox...", sandbox.strategy))
    } else {
        Spinner::inert()
    };
    let executor = create_executor(sandbox).await;
    spinner.stop().await;
    let executor = executor.context("Failed to prepare the code sandbox")?;

    let converser = Agent::builder(AgentRole::Converser, Arc::clone(&backend), Arc::clone(&db))
        .with_config(agent_config.clone())
        .with_console(console)
        .resume(resume_converser)
        .build()?;

    let coder = Agent::builder(AgentRole::Coder, backend, db)
        .with_config(agent_config)
        .with_executor(executor)
        .resume(resume_coder)
        .build()?;

    Ok((converser, coder))
}

/// Extract lessons for one role, or all of them
pub async fn learn(settings: &Settings, role: Option<AgentRole>) -> Result<()> {
    let client = settings.client()?;
    ensure_ready(&client, &settings.config.llm.model).await?;
    let extractor = LessonExtractor::new(Arc::new(client), &settings.config.llm.model, settings.open_db()?);

    let roles = match role {
        Some(role) => vec![role],
        None => AgentRole::ALL.to_vec(),
    };

    for role in roles {
        let spinner = Spinner::start(format!("Extracting lessons for {}...", role));
        let lesson = extractor.extract(role).await;
        spinner.stop().await;

        match lesson? {
            Some(lesson) => {
                println!("{}{}{}", BOLD, role, RESET);
                println!("{}", lesson);
                println!();
            }
            None => println!("{}{}: no history yet{}", YELLOW, role, RESET),
        }
    }
    Ok(())
}

/// List stored sessions
pub async fn sessions_list(settings: &Settings, role: Option<AgentRole>, json: bool) -> Result<()> {
    let store = HistoryStore::new(settings.open_db()?);
    let sessions = store.list_sessions(role.map(|r| r.as_str()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!("{}Sessions:{}", BOLD, RESET);
    println!();
    for s in sessions {
        println!(
            "  {}{}{}  {:<9}  {} msgs",
            CYAN, s.session_id, RESET, s.agent_type, s.message_count
        );
    }
    println!();
    println!(
        "{}Resume with:{} relay run --resume-converser <id> / --resume-coder <id>",
        DIM, RESET
    );
    Ok(())
}

/// Print the transcript of a session
pub async fn sessions_show(settings: &Settings, id: &str, full: bool) -> Result<()> {
    let store = HistoryStore::new(settings.open_db()?);
    let entries = store.session_entries(id)?;

    let Some(first) = entries.first() else {
        anyhow::bail!("Session not found: {}", id);
    };

    println!("{}Session:{} {}", BOLD, RESET, id);
    println!("  Agent: {}", first.agent_type);
    println!("  Messages: {}", entries.len());
    println!();

    for entry in &entries {
        let color = match entry.role {
            Role::System => DIM,
            Role::User => BLUE,
            Role::Assistant => GREEN,
            Role::Tool => YELLOW,
        };
        let content = if full {
            entry.content.clone()
        } else {
            truncate(&entry.content, 100)
        };
        println!("  {:>4} {}[{}]{} {}", entry.id, color, entry.role, RESET, content);
    }
    Ok(())
}

/// List stored lessons
pub async fn lessons(settings: &Settings, role: Option<AgentRole>) -> Result<()> {
    let store = LessonStore::new(settings.open_db()?);
    let roles = match role {
        Some(role) => vec![role],
        None => AgentRole::ALL.to_vec(),
    };

    for role in roles {
        let lessons = store.for_agent(role.as_str())?;
        println!("{}{} ({}){}", BOLD, role, lessons.len(), RESET);
        if lessons.is_empty() {
            println!("  {}none yet, run `relay learn`{}", DIM, RESET);
        }
        for lesson in lessons {
            for line in lesson.lines() {
                println!("  {}", line);
            }
            println!();
        }
    }
    Ok(())
}

/// Create a default config file
pub async fn config_init(settings: &Settings) -> Result<()> {
    let path = &settings.config_path;
    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    UserConfig::create_default(path)?;
    println!("{}Created:{} {}", GREEN, RESET, path.display());
    Ok(())
}

/// Show the effective configuration
pub async fn config_show(settings: &Settings) -> Result<()> {
    println!("{}# config: {}{}", DIM, describe_path(&settings.config_path), RESET);
    println!("{}# database: {}{}", DIM, settings.db_path.display(), RESET);
    println!();
    print!("{}", settings.config.to_toml()?);
    Ok(())
}

/// Ollama is up and has the model
async fn ensure_ready(client: &OllamaClient, model: &str) -> Result<()> {
    if !client.health_check().await? {
        anyhow::bail!(
            "Ollama is not reachable at {}. Start it with `ollama serve` or set [llm] host/port.",
            client.base_url()
        );
    }

    let models = client.list_models().await?;
    match models.iter().find(|m| model_matches(&m.name, model)) {
        Some(found) => {
            info!(model = %found.name, size = %found.size_human(), "Model available");
            Ok(())
        }
        None => anyhow::bail!("Model {} is not available. Pull it with `ollama pull {}`.", model, model),
    }
}

/// `llama3.2` matches `llama3.2:latest`
fn model_matches(available: &str, wanted: &str) -> bool {
    available == wanted || (!wanted.contains(':') && available.strip_suffix(":latest") == Some(wanted))
}

fn describe_path(path: &Path) -> String {
    if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (not found, using defaults)", path.display())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llm_core::{AssistantMessage, ChatMessage, ChatOptions, ChatResponse, ToolDefinition};
    use tempfile::TempDir;

    struct Unused;

    #[async_trait]
    impl ChatBackend for Unused {
        async fn chat(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _options: &ChatOptions,
        ) -> Result<ChatResponse> {
            Ok(ChatResponse::new(AssistantMessage::text("")))
        }
    }

    struct NoInput;

    #[async_trait]
    impl Console for NoInput {
        async fn ask(&self, _prompt: &str) -> Result<String> {
            anyhow::bail!("no input")
        }
    }

    async fn prepare(db: SharedDatabase, sandbox: SandboxConfig) -> Result<(Agent, Agent)> {
        prepare_agents(
            Arc::new(Unused),
            db,
            &sandbox,
            AgentConfig::default(),
            Arc::new(NoInput),
            None,
            None,
        )
        .await
    }

    #[tokio::test]
    async fn test_failed_sandbox_leaves_no_sessions() {
        let db = Database::open_in_memory().unwrap().shared();
        let sandbox = SandboxConfig {
            strategy: SandboxStrategy::Direct,
            python: "relay-no-such-python".to_string(),
            ..Default::default()
        };

        assert!(prepare(db.clone(), sandbox).await.is_err());
        assert!(HistoryStore::new(db).list_sessions(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prepared_agents_each_get_a_session() {
        let db = Database::open_in_memory().unwrap().shared();
        let sandbox = SandboxConfig {
            strategy: SandboxStrategy::Direct,
            python: "sh".to_string(),
            ..Default::default()
        };

        let (converser, coder) = prepare(db.clone(), sandbox).await.unwrap();
        let sessions = HistoryStore::new(db).list_sessions(None).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_ne!(converser.session_id(), coder.session_id());
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("line one\nline two", 100), "line one line two");
        assert_eq!(truncate("ééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_model_matches_latest_tag() {
        assert!(model_matches("llama3.2:latest", "llama3.2"));
        assert!(model_matches("qwen2.5-coder:7b", "qwen2.5-coder:7b"));
        assert!(!model_matches("qwen2.5-coder:7b", "qwen2.5-coder"));
        assert!(!model_matches("llama3.2:latest", "llama3.2:1b"));
    }

    #[test]
    fn test_settings_overrides() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[llm]\nmodel = \"from-file\"\n").unwrap();

        let settings = Settings::resolve(Some(config_path.clone()), None, None).unwrap();
        assert_eq!(settings.config.llm.model, "from-file");

        let db = dir.path().join("h.db");
        let settings =
            Settings::resolve(Some(config_path), Some(db.clone()), Some("from-flag".to_string())).unwrap();
        assert_eq!(settings.config.llm.model, "from-flag");
        assert_eq!(settings.db_path, db);
    }
}
