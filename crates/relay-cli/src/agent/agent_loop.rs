//! Agent turn loop

use std::sync::Arc;

use async_trait::async_trait;
use llm_core::{ChatBackend, ChatMessage, ChatOptions, FunctionCall, ToolDefinition};
use tracing::{debug, info, instrument, warn};

use crate::console::Console;
use crate::graph::NodeContext;
use crate::progress::Spinner;
use crate::storage::{HistoryStore, LessonStore, SharedDatabase};
use crate::tools::sandbox::{CodeExecutor, Script};
use crate::tools::{ToolInvocation, ToolKind, Toolbox, EXIT_SIGNAL};

use super::fallback;
use super::prompts::{self, TOOL_REQUIRED_REMINDER};
use super::state::{AgentConfig, AgentError, AgentRole, TurnOutcome};

/// Something the orchestrator can hand a payload to
#[async_trait]
pub trait TurnRunner: Send {
    fn name(&self) -> &str;

    async fn run_turn(
        &mut self,
        payload: &str,
        context: Option<&NodeContext>,
    ) -> Result<TurnOutcome, AgentError>;
}

/// One conversational agent with its own persisted session
pub struct Agent {
    role: AgentRole,
    session_id: String,
    messages: Vec<ChatMessage>,
    toolbox: Toolbox,
    tool_defs: Vec<ToolDefinition>,
    backend: Arc<dyn ChatBackend>,
    executor: Option<Box<dyn CodeExecutor>>,
    console: Option<Arc<dyn Console>>,
    history: HistoryStore,
    config: AgentConfig,
}

/// Builder for [`Agent`]
pub struct AgentBuilder {
    role: AgentRole,
    backend: Arc<dyn ChatBackend>,
    db: SharedDatabase,
    config: AgentConfig,
    executor: Option<Box<dyn CodeExecutor>>,
    console: Option<Arc<dyn Console>>,
    resume: Option<String>,
}

impl AgentBuilder {
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_executor(mut self, executor: Box<dyn CodeExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = Some(console);
        self
    }

    /// Continue an existing session instead of starting a new one
    pub fn resume(mut self, session_id: Option<String>) -> Self {
        self.resume = session_id;
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let toolbox = self.role.toolbox();
        if toolbox.contains(&ToolKind::ExecuteCode) && self.executor.is_none() {
            return Err(AgentError::MissingExecutor(self.role));
        }

        let history = HistoryStore::new(Arc::clone(&self.db));
        let mut agent = Agent {
            role: self.role,
            session_id: String::new(),
            messages: Vec::new(),
            tool_defs: toolbox.definitions(),
            toolbox,
            backend: self.backend,
            executor: self.executor,
            console: self.console,
            history,
            config: self.config,
        };

        match self.resume {
            Some(session_id) => agent.restore(session_id)?,
            None => agent.start_session(&LessonStore::new(self.db))?,
        }
        Ok(agent)
    }
}

impl Agent {
    pub fn builder(role: AgentRole, backend: Arc<dyn ChatBackend>, db: SharedDatabase) -> AgentBuilder {
        AgentBuilder {
            role,
            backend,
            db,
            config: AgentConfig::default(),
            executor: None,
            console: None,
            resume: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn start_session(&mut self, lessons: &LessonStore) -> Result<(), AgentError> {
        self.session_id = uuid::Uuid::new_v4().to_string();
        let lessons = lessons
            .for_agent(self.role.as_str())
            .map_err(AgentError::Storage)?;
        let prompt = prompts::system_prompt(self.role.base_prompt(), &lessons, &self.toolbox.summary());

        info!(
            agent = %self.role,
            session = %self.session_id,
            lessons = lessons.len(),
            tools = self.tool_defs.len(),
            "Created agent session"
        );
        self.record(ChatMessage::system(prompt))
    }

    fn restore(&mut self, session_id: String) -> Result<(), AgentError> {
        let owner = self
            .history
            .session_agent_type(&session_id)
            .map_err(AgentError::Storage)?
            .ok_or_else(|| AgentError::SessionNotFound(session_id.clone()))?;

        if owner != self.role.as_str() {
            return Err(AgentError::SessionRoleMismatch {
                session_id,
                expected: self.role,
                found: owner,
            });
        }

        self.messages = self.history.load_session(&session_id).map_err(AgentError::Storage)?;
        info!(agent = %self.role, session = %session_id, messages = self.messages.len(), "Restored agent session");
        self.session_id = session_id;
        Ok(())
    }

    /// Persist, then append to the in-memory history
    fn record(&mut self, message: ChatMessage) -> Result<(), AgentError> {
        self.history
            .append(&self.session_id, self.role.as_str(), &message)
            .map_err(AgentError::Storage)?;
        debug!(role = %message.role, len = message.content.len(), "Recorded message");
        self.messages.push(message);
        Ok(())
    }

    fn spinner(&self, message: &str) -> Spinner {
        if self.config.show_progress {
            Spinner::start(message)
        } else {
            Spinner::inert()
        }
    }

    /// Drive the model until it calls a terminal or hand-off tool
    #[instrument(skip(self, payload, context), fields(agent = %self.role, session = %self.session_id))]
    pub async fn run(
        &mut self,
        payload: &str,
        context: Option<&NodeContext>,
    ) -> Result<TurnOutcome, AgentError> {
        if let Some(context) = context.filter(|c| !c.is_empty()) {
            debug!(context = ?context, "Node context");
        }
        if !payload.is_empty() {
            self.record(ChatMessage::user(payload))?;
        }

        let options = ChatOptions::with_temperature(self.config.temperature);

        for iteration in 1..=self.config.max_iterations {
            debug!(iteration, messages = self.messages.len(), "Calling model");

            let spinner = self.spinner("Thinking...");
            let response = self
                .backend
                .chat(&self.config.model, &self.messages, Some(self.tool_defs.as_slice()), &options)
                .await;
            spinner.stop().await;

            let message = response.map_err(AgentError::Transport)?.message;

            let calls: Vec<FunctionCall> = if message.has_tool_calls() {
                message.tool_calls.into_iter().map(|c| c.function).collect()
            } else {
                fallback::extract_tool_calls(&message.content, &self.toolbox)
            };

            if calls.is_empty() {
                self.handle_text(message.content).await?;
                continue;
            }

            debug!(count = calls.len(), "Processing tool calls");
            for call in calls {
                if let Some(outcome) = self.dispatch(call).await? {
                    info!(iteration, "Turn finished");
                    return Ok(outcome);
                }
            }
        }

        warn!(max_iterations = self.config.max_iterations, "Iteration budget exhausted");
        Ok(TurnOutcome::BudgetExceeded {
            iterations: self.config.max_iterations,
        })
    }

    /// Handle one tool call; `Some` ends the turn
    async fn dispatch(&mut self, call: FunctionCall) -> Result<Option<TurnOutcome>, AgentError> {
        let agent = self.role;
        let invocation = self
            .toolbox
            .parse(&call)
            .map_err(|error| AgentError::Tool { agent, error })?;

        self.record(ChatMessage::assistant(recorded_call(&call)))?;

        match invocation {
            ToolInvocation::Exit { output } => Ok(Some(TurnOutcome::signal(EXIT_SIGNAL, output))),
            ToolInvocation::Handoff { signal, output } => {
                info!(signal = %signal, "Handing off");
                Ok(Some(TurnOutcome::signal(signal, output)))
            }
            ToolInvocation::ExecuteCode(script) => {
                let message = self.execute(&script).await?;
                self.record(ChatMessage::user(message))?;
                Ok(None)
            }
        }
    }

    async fn execute(&self, script: &Script) -> Result<String, AgentError> {
        let executor = self
            .executor
            .as_ref()
            .ok_or(AgentError::MissingExecutor(self.role))?;

        info!(strategy = %executor.strategy(), code_len = script.code.len(), "Executing code");
        debug!(code = %script.code, "Script");

        let spinner = self.spinner("Running code...");
        let outcome = executor.execute(script).await;
        spinner.stop().await;

        if outcome.is_error() {
            debug!(outcome = ?outcome, "Execution failed");
        }
        Ok(outcome.to_message())
    }

    /// Plain text from the model: ask the human, or nudge toward a tool call
    async fn handle_text(&mut self, content: String) -> Result<(), AgentError> {
        match self.console.clone() {
            Some(console) => {
                self.record(ChatMessage::assistant(content.clone()))?;
                let reply = console.ask(&content).await.map_err(AgentError::Console)?;
                self.record(ChatMessage::user(reply))
            }
            None => {
                debug!("Text reply without a console, requesting a tool call");
                self.record(ChatMessage::assistant(content))?;
                self.record(ChatMessage::user(TOOL_REQUIRED_REMINDER))
            }
        }
    }
}

#[async_trait]
impl TurnRunner for Agent {
    fn name(&self) -> &str {
        self.role.as_str()
    }

    async fn run_turn(
        &mut self,
        payload: &str,
        context: Option<&NodeContext>,
    ) -> Result<TurnOutcome, AgentError> {
        self.run(payload, context).await
    }
}

/// The assistant message stored for a tool call
fn recorded_call(call: &FunctionCall) -> String {
    serde_json::json!({
        "function": call.name,
        "arguments": call.arguments_json(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::tools::sandbox::{ExecutionOutcome, SandboxStrategy};
    use anyhow::Result;
    use llm_core::{AssistantMessage, ChatResponse, Role};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays canned assistant messages and records what it was sent
    struct ScriptedBackend {
        replies: Mutex<VecDeque<AssistantMessage>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedBackend {
        fn new(replies: impl IntoIterator<Item = AssistantMessage>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn silent() -> Arc<Self> {
            Self::new(Vec::new())
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn chat(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _options: &ChatOptions,
        ) -> Result<ChatResponse> {
            self.seen.lock().push(messages.to_vec());
            let reply = self
                .replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| AssistantMessage::text("still thinking"));
            Ok(ChatResponse::new(reply))
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl ChatBackend for FailingBackend {
        async fn chat(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _options: &ChatOptions,
        ) -> Result<ChatResponse> {
            anyhow::bail!("connection refused")
        }
    }

    #[derive(Default)]
    struct CountingExecutor {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CodeExecutor for CountingExecutor {
        fn strategy(&self) -> SandboxStrategy {
            SandboxStrategy::Direct
        }

        async fn execute(&self, _script: &Script) -> ExecutionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ExecutionOutcome::Output("55\n".to_string())
        }
    }

    struct CannedConsole {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Console for CannedConsole {
        async fn ask(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn db() -> SharedDatabase {
        Database::open_in_memory().unwrap().shared()
    }

    fn coder(backend: Arc<dyn ChatBackend>, db: SharedDatabase, calls: Arc<AtomicUsize>) -> Agent {
        Agent::builder(AgentRole::Coder, backend, db)
            .with_executor(Box::new(CountingExecutor { calls }))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_execute_then_exit() {
        let backend = ScriptedBackend::new([
            AssistantMessage::tool_call("execute_code", json!({"code": "print(sum(range(11)))"})),
            AssistantMessage::tool_call("exit", json!({"output": "done"})),
        ]);
        let calls = Arc::new(AtomicUsize::new(0));
        let db = db();
        let mut agent = coder(backend.clone(), db.clone(), calls.clone());

        let outcome = agent.run("sum 0..10", None).await.unwrap();

        assert_eq!(outcome, TurnOutcome::signal("exit", "done"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let roles: Vec<Role> = agent.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert_eq!(agent.messages()[3].content, "Output of the code was: 55\n");

        let recorded: serde_json::Value = serde_json::from_str(&agent.messages()[4].content).unwrap();
        assert_eq!(recorded["function"], "exit");
        assert_eq!(recorded["arguments"], "{\"output\":\"done\"}");

        // the second model call saw the execution output
        let seen = backend.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].last().unwrap().content, "Output of the code was: 55\n");

        // everything in memory was persisted
        let stored = HistoryStore::new(db).load_session(agent.session_id()).unwrap();
        assert_eq!(stored, agent.messages());
    }

    #[tokio::test]
    async fn test_system_prompt_includes_lessons_and_tools() {
        let db = db();
        LessonStore::new(db.clone()).append("Coder", "Always print the answer.").unwrap();

        let agent = coder(ScriptedBackend::silent(), db, Arc::default());
        let system = &agent.messages()[0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.contains("Always print the answer."));
        assert!(system.content.contains("execute_code: "));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_a_configuration_error() {
        let backend = ScriptedBackend::new([AssistantMessage::tool_call("programmer", json!({"output": "x"}))]);
        let mut agent = coder(backend, db(), Arc::default());

        let err = agent.run("task", None).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(err, AgentError::Tool { agent: AgentRole::Coder, .. }));
    }

    #[tokio::test]
    async fn test_budget_exceeded() {
        let backend = ScriptedBackend::silent();
        let mut agent = Agent::builder(AgentRole::Coder, backend.clone(), db())
            .with_executor(Box::new(CountingExecutor::default()))
            .with_config(AgentConfig::default().with_max_iterations(3))
            .build()
            .unwrap();

        let outcome = agent.run("task", None).await.unwrap();
        assert_eq!(outcome, TurnOutcome::BudgetExceeded { iterations: 3 });
        assert_eq!(backend.seen.lock().len(), 3);
        assert_eq!(agent.messages().last().unwrap().content, TOOL_REQUIRED_REMINDER);
    }

    #[tokio::test]
    async fn test_converser_asks_console_on_text() {
        let backend = ScriptedBackend::new([
            AssistantMessage::text("How old are you?"),
            AssistantMessage::tool_call("programmer", json!("{\"output\": \"age 41\"}")),
        ]);
        let console = Arc::new(CannedConsole {
            reply: "41".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let mut agent = Agent::builder(AgentRole::Converser, backend, db())
            .with_console(console.clone())
            .build()
            .unwrap();

        let outcome = agent.run("", None).await.unwrap();

        assert_eq!(outcome, TurnOutcome::signal("programmer", "age 41"));
        assert_eq!(*console.prompts.lock(), vec!["How old are you?".to_string()]);
        // empty payload is not recorded
        assert_eq!(agent.messages()[1], ChatMessage::assistant("How old are you?"));
        assert_eq!(agent.messages()[2], ChatMessage::user("41"));
    }

    #[tokio::test]
    async fn test_tool_call_in_text_is_honoured() {
        let backend = ScriptedBackend::new([AssistantMessage::text(
            "```json\n{\"name\": \"exit\", \"arguments\": {\"output\": \"42\"}}\n```",
        )]);
        let mut agent = coder(backend, db(), Arc::default());
        assert_eq!(agent.run("task", None).await.unwrap(), TurnOutcome::signal("exit", "42"));
    }

    #[tokio::test]
    async fn test_first_terminal_call_ends_turn() {
        let backend = ScriptedBackend::new([AssistantMessage {
            content: String::new(),
            tool_calls: vec![
                llm_core::ToolCall {
                    id: String::new(),
                    function: FunctionCall::new("exit", json!({"output": "first"})),
                },
                llm_core::ToolCall {
                    id: String::new(),
                    function: FunctionCall::new("execute_code", json!({"code": "print(1)"})),
                },
            ],
        }]);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut agent = coder(backend, db(), calls.clone());

        assert_eq!(agent.run("task", None).await.unwrap(), TurnOutcome::signal("exit", "first"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_configuration() {
        let mut agent = coder(Arc::new(FailingBackend), db(), Arc::default());
        let err = agent.run("task", None).await.unwrap_err();
        assert!(matches!(err, AgentError::Transport(_)));
        assert!(!err.is_configuration());
    }

    #[tokio::test]
    async fn test_restore_replays_session() {
        let db = db();
        let backend = ScriptedBackend::new([AssistantMessage::tool_call("exit", json!({"output": "ok"}))]);
        let mut first = coder(backend, db.clone(), Arc::default());
        first.run("task", None).await.unwrap();
        let session_id = first.session_id().to_string();

        let restored = Agent::builder(AgentRole::Coder, ScriptedBackend::silent(), db.clone())
            .with_executor(Box::new(CountingExecutor::default()))
            .resume(Some(session_id.clone()))
            .build()
            .unwrap();
        assert_eq!(restored.session_id(), session_id);
        assert_eq!(restored.messages(), first.messages());

        let wrong_role = Agent::builder(AgentRole::Converser, ScriptedBackend::silent(), db.clone())
            .resume(Some(session_id))
            .build();
        assert!(matches!(wrong_role, Err(AgentError::SessionRoleMismatch { .. })));

        let missing = Agent::builder(AgentRole::Converser, ScriptedBackend::silent(), db)
            .resume(Some("nope".to_string()))
            .build();
        assert!(matches!(missing, Err(AgentError::SessionNotFound(_))));
    }

    #[test]
    fn test_coder_requires_executor() {
        let result = Agent::builder(AgentRole::Coder, ScriptedBackend::silent(), db()).build();
        assert!(matches!(result, Err(AgentError::MissingExecutor(AgentRole::Coder))));
    }
}
