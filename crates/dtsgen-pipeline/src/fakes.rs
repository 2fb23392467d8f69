//! In-memory fakes for the agent boundary (testing only).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::agent::{AgentFactory, ExampleAgent, PackageContext, Screening};
use crate::context::RunContext;

/// What a scripted agent was asked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentLog {
    pub screenings: usize,
    pub proposals: usize,
    pub feedback: Vec<String>,
}

// ---------------------------------------------------------------------------
// ScriptedAgent
// ---------------------------------------------------------------------------

/// Agent that replays a fixed list of proposals.
#[derive(Debug)]
pub struct ScriptedAgent {
    screening: Screening,
    proposals: VecDeque<String>,
    log: Arc<Mutex<AgentLog>>,
}

impl ScriptedAgent {
    pub fn new<I, S>(proposals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            screening: Screening::Supported,
            proposals: proposals.into_iter().map(Into::into).collect(),
            log: Arc::default(),
        }
    }

    pub fn log(&self) -> AgentLog {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExampleAgent for ScriptedAgent {
    async fn screen(&mut self) -> anyhow::Result<Screening> {
        self.log.lock().unwrap().screenings += 1;
        Ok(self.screening.clone())
    }

    async fn propose(&mut self) -> anyhow::Result<String> {
        self.log.lock().unwrap().proposals += 1;
        self.proposals
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted proposal left"))
    }

    fn feedback(&mut self, message: &str) {
        self.log.lock().unwrap().feedback.push(message.to_string());
    }
}

// ---------------------------------------------------------------------------
// ScriptedAgentFactory
// ---------------------------------------------------------------------------

/// Hands out [`ScriptedAgent`]s that share one [`AgentLog`].
#[derive(Debug, Clone)]
pub struct ScriptedAgentFactory {
    screening: Screening,
    proposals: Vec<String>,
    log: Arc<Mutex<AgentLog>>,
}

impl ScriptedAgentFactory {
    pub fn new<I, S>(proposals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            screening: Screening::Supported,
            proposals: proposals.into_iter().map(Into::into).collect(),
            log: Arc::default(),
        }
    }

    /// Factory whose agents reject every package.
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            screening: Screening::Rejected {
                reason: reason.into(),
            },
            ..Self::new(Vec::<String>::new())
        }
    }

    pub fn log(&self) -> AgentLog {
        self.log.lock().unwrap().clone()
    }
}

impl AgentFactory for ScriptedAgentFactory {
    fn create<'a>(
        &self,
        _run: RunContext<'a>,
        _package: &PackageContext,
    ) -> anyhow::Result<Box<dyn ExampleAgent + 'a>> {
        Ok(Box::new(ScriptedAgent {
            screening: self.screening.clone(),
            proposals: self.proposals.iter().cloned().collect(),
            log: self.log.clone(),
        }))
    }
}
