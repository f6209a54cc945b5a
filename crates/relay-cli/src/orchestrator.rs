//! Drives agents around the transition graph

use std::collections::HashMap;

use anyhow::Result;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::agent::{AgentError, AgentRole, TurnOutcome, TurnRunner};
use crate::graph::{Graph, Transition};
use crate::tools::EXIT_SIGNAL;

/// Signal that leaves the start sentinel
pub const START_SIGNAL: &str = "start";

/// A node of the orchestration graph
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Station {
    Start,
    /// Runner registered under this name
    Agent(String),
    End,
}

impl Station {
    pub fn agent(name: impl Into<String>) -> Self {
        Self::Agent(name.into())
    }
}

impl std::fmt::Display for Station {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Agent(name) => write!(f, "{}", name),
            Self::End => write!(f, "end"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("no transition from {from} on signal '{signal}'")]
    NoTransition { from: Station, signal: String },
    #[error("graph has no current node")]
    Uninitialized,
    #[error("no runner registered for {0}")]
    UnknownRunner(String),
    #[error("{agent} used its whole budget of {iterations} model calls")]
    BudgetExceeded { agent: String, iterations: usize },
    #[error("graph transitioned back into the start node")]
    ReenteredStart,
    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl RunError {
    /// Wiring or tool-contract problems rather than runtime failures
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::NoTransition { .. } | Self::Uninitialized | Self::UnknownRunner(_) | Self::ReenteredStart => true,
            Self::BudgetExceeded { .. } => false,
            Self::Agent(e) => e.is_configuration(),
        }
    }
}

/// Graph plus the runners behind its agent nodes
pub struct Orchestrator {
    graph: Graph<Station>,
    runners: HashMap<String, Box<dyn TurnRunner>>,
}

impl Orchestrator {
    pub fn new(graph: Graph<Station>) -> Self {
        Self {
            graph,
            runners: HashMap::new(),
        }
    }

    /// start -start-> Converser -programmer-> Coder -exit-> Converser -exit-> end
    pub fn standard(converser: Box<dyn TurnRunner>, coder: Box<dyn TurnRunner>) -> Result<Self> {
        let mut orchestrator = Self::new(standard_graph()?);
        orchestrator.add_runner(converser);
        orchestrator.add_runner(coder);
        Ok(orchestrator)
    }

    pub fn add_runner(&mut self, runner: Box<dyn TurnRunner>) {
        let name = runner.name().to_string();
        if !self.graph.contains(&Station::agent(name.as_str())) {
            warn!(runner = %name, "Runner has no node in the graph");
        }
        self.runners.insert(name, runner);
    }

    /// Run until the end node is reached; returns the last payload
    #[instrument(skip_all)]
    pub async fn run(&mut self, initial_payload: &str) -> Result<String, RunError> {
        let mut signal = START_SIGNAL.to_string();
        let mut payload = initial_payload.to_string();

        loop {
            let station = match self.graph.advance(&signal) {
                Transition::Moved(station) => station,
                Transition::NoTransition { from, signal } => {
                    return Err(RunError::NoTransition { from, signal })
                }
                Transition::Uninitialized => return Err(RunError::Uninitialized),
            };

            let name = match station {
                Station::End => {
                    info!("Reached end node");
                    return Ok(payload);
                }
                Station::Start => return Err(RunError::ReenteredStart),
                Station::Agent(name) => name,
            };

            let runner = self
                .runners
                .get_mut(&name)
                .ok_or_else(|| RunError::UnknownRunner(name.clone()))?;

            self.graph.update_context("last_input", json!(payload));
            let context = self.graph.context().cloned();

            debug!(agent = %name, payload_len = payload.len(), "Running agent");
            match runner.run_turn(&payload, context.as_ref()).await? {
                TurnOutcome::Signal {
                    signal: next,
                    payload: output,
                } => {
                    info!(agent = %name, signal = %next, "Agent returned");
                    self.graph.update_context("last_signal", json!(next));
                    self.graph.update_context("last_output", json!(output));
                    signal = next;
                    payload = output;
                }
                TurnOutcome::BudgetExceeded { iterations } => {
                    return Err(RunError::BudgetExceeded {
                        agent: name,
                        iterations,
                    })
                }
            }
        }
    }
}

/// The converser/coder wiring
pub fn standard_graph() -> Result<Graph<Station>> {
    let converser = Station::agent(AgentRole::Converser.as_str());
    let coder = Station::agent(AgentRole::Coder.as_str());

    let mut graph = Graph::new();
    graph.add_node(Station::Start)?;
    graph.add_node(converser.clone())?;
    graph.add_node(coder.clone())?;
    graph.add_node(Station::End)?;

    graph.add_edge(&Station::Start, START_SIGNAL, &converser)?;
    graph.add_edge(&converser, "programmer", &coder)?;
    graph.add_edge(&coder, EXIT_SIGNAL, &converser)?;
    graph.add_edge(&converser, EXIT_SIGNAL, &Station::End)?;
    graph.set_start(&Station::Start)?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeContext;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct StubRunner {
        name: String,
        outcomes: VecDeque<TurnOutcome>,
        inputs: Arc<Mutex<Vec<String>>>,
    }

    impl StubRunner {
        fn boxed(
            name: &str,
            outcomes: impl IntoIterator<Item = TurnOutcome>,
        ) -> (Box<dyn TurnRunner>, Arc<Mutex<Vec<String>>>) {
            let inputs = Arc::new(Mutex::new(Vec::new()));
            let runner = Self {
                name: name.to_string(),
                outcomes: outcomes.into_iter().collect(),
                inputs: inputs.clone(),
            };
            (Box::new(runner), inputs)
        }
    }

    #[async_trait]
    impl TurnRunner for StubRunner {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run_turn(
            &mut self,
            payload: &str,
            context: Option<&NodeContext>,
        ) -> Result<TurnOutcome, AgentError> {
            assert_eq!(
                context.and_then(|c| c.get("last_input")),
                Some(&json!(payload))
            );
            self.inputs.lock().push(payload.to_string());
            Ok(self
                .outcomes
                .pop_front()
                .unwrap_or_else(|| TurnOutcome::signal("exit", "")))
        }
    }

    #[tokio::test]
    async fn test_start_agent_end() {
        let a = Station::agent("A");
        let mut graph = Graph::new();
        graph.add_node(Station::Start).unwrap();
        graph.add_node(a.clone()).unwrap();
        graph.add_node(Station::End).unwrap();
        graph.add_edge(&Station::Start, "start", &a).unwrap();
        graph.add_edge(&a, "finish", &Station::End).unwrap();

        let (runner, inputs) = StubRunner::boxed("A", [TurnOutcome::signal("finish", "ok")]);
        let mut orchestrator = Orchestrator::new(graph);
        orchestrator.add_runner(runner);

        assert_eq!(orchestrator.run("hello").await.unwrap(), "ok");
        assert_eq!(*inputs.lock(), vec!["hello"]);
        assert_eq!(orchestrator.graph.current(), Some(&Station::End));
    }

    #[tokio::test]
    async fn test_standard_round_trip() {
        let (converser, converser_inputs) = StubRunner::boxed(
            "Converser",
            [
                TurnOutcome::signal("programmer", "sum 1..10"),
                TurnOutcome::signal("exit", "The answer is 55"),
            ],
        );
        let (coder, coder_inputs) = StubRunner::boxed("Coder", [TurnOutcome::signal("exit", "55")]);

        let mut orchestrator = Orchestrator::standard(converser, coder).unwrap();
        let result = orchestrator.run("add the numbers").await.unwrap();

        assert_eq!(result, "The answer is 55");
        assert_eq!(*converser_inputs.lock(), vec!["add the numbers", "55"]);
        assert_eq!(*coder_inputs.lock(), vec!["sum 1..10"]);
    }

    #[tokio::test]
    async fn test_unknown_signal_is_fatal() {
        let (converser, _) = StubRunner::boxed("Converser", [TurnOutcome::signal("reviewer", "x")]);
        let (coder, _) = StubRunner::boxed("Coder", Vec::new());
        let mut orchestrator = Orchestrator::standard(converser, coder).unwrap();

        match orchestrator.run("").await {
            Err(RunError::NoTransition { from, signal }) => {
                assert_eq!(from, Station::agent("Converser"));
                assert_eq!(signal, "reviewer");
            }
            other => panic!("expected no transition, got {:?}", other),
        }
        // the graph stays where it was
        assert_eq!(orchestrator.graph.current(), Some(&Station::agent("Converser")));
    }

    #[tokio::test]
    async fn test_budget_exceeded_is_fatal() {
        let (converser, _) = StubRunner::boxed(
            "Converser",
            [TurnOutcome::BudgetExceeded { iterations: 1024 }],
        );
        let (coder, _) = StubRunner::boxed("Coder", Vec::new());
        let mut orchestrator = Orchestrator::standard(converser, coder).unwrap();

        assert!(matches!(
            orchestrator.run("").await,
            Err(RunError::BudgetExceeded { iterations: 1024, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_runner_and_empty_graph() {
        let (converser, _) = StubRunner::boxed("Converser", Vec::new());
        let mut orchestrator = Orchestrator::new(standard_graph().unwrap());
        orchestrator.add_runner(converser);
        // Converser exits straight away, so the coder is never needed
        assert_eq!(orchestrator.run("").await.unwrap(), "");

        let mut orchestrator = Orchestrator::new(standard_graph().unwrap());
        assert!(matches!(orchestrator.run("").await, Err(RunError::UnknownRunner(name)) if name == "Converser"));

        let mut empty = Orchestrator::new(Graph::new());
        assert!(matches!(empty.run("").await, Err(RunError::Uninitialized)));
    }

    #[test]
    fn test_standard_graph_wiring() {
        let graph = standard_graph().unwrap();
        assert_eq!(graph.current(), Some(&Station::Start));
        assert_eq!(graph.signals(&Station::agent("Converser")), vec!["exit", "programmer"]);
        assert_eq!(graph.signals(&Station::agent("Coder")), vec!["exit"]);
    }
}
