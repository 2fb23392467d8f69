//! Prompting agent collaborator.
//!
//! The agent screens a package and proposes examples; prompt content and
//! model access live entirely on the other side of a process boundary. The
//! pipeline only sees [`ExampleAgent`].

use std::path::Path;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dtsgen_core::fsutil;
use dtsgen_core::{ProcessInvocation, RunLayout};

use crate::context::RunContext;

/// A test file of the package repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestFile {
    /// Path relative to the repository root.
    pub path: String,
    pub content: String,
}

/// Package data handed to the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageContext {
    pub package: String,
    pub readme: Option<String>,
    pub package_json: Option<String>,
    pub main: Option<String>,
    pub tests: Vec<TestFile>,
}

impl PackageContext {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            ..Self::default()
        }
    }

    /// True when no kind of package data was found.
    pub fn is_empty(&self) -> bool {
        self.readme.is_none()
            && self.package_json.is_none()
            && self.main.is_none()
            && self.tests.is_empty()
    }

    /// Copy with every file cut to `max_chars` and at most `max_tests` tests.
    pub fn excerpt(&self, max_chars: usize, max_tests: usize) -> Self {
        let cut = |text: &String| truncate_chars(text, max_chars).to_string();
        Self {
            package: self.package.clone(),
            readme: self.readme.as_ref().map(cut),
            package_json: self.package_json.as_ref().map(cut),
            main: self.main.as_ref().map(cut),
            tests: self
                .tests
                .iter()
                .take(max_tests)
                .map(|test| TestFile {
                    path: test.path.clone(),
                    content: cut(&test.content),
                })
                .collect(),
        }
    }
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Verdict of the agent's scope check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screening {
    Supported,
    /// The package is out of scope for generated examples.
    Rejected { reason: String },
}

/// Conversation partner that proposes usage examples.
#[async_trait]
pub trait ExampleAgent: Send {
    /// Decide whether the package can be exercised from plain Node.
    async fn screen(&mut self) -> anyhow::Result<Screening>;

    /// Propose the source of one example.
    async fn propose(&mut self) -> anyhow::Result<String>;

    /// Tell the agent why its last proposal was rejected.
    fn feedback(&mut self, message: &str);
}

/// Creates one agent per run.
pub trait AgentFactory: Send + Sync {
    fn create<'a>(
        &self,
        run: RunContext<'a>,
        package: &PackageContext,
    ) -> anyhow::Result<Box<dyn ExampleAgent + 'a>>;
}

// ---------------------------------------------------------------------------
// ProcessAgent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Serialize)]
struct AgentRequest<'r> {
    task: &'r str,
    model: &'r str,
    context: &'r PackageContext,
    conversation: &'r [Message],
}

#[derive(Debug, Default, Deserialize)]
struct AgentReply {
    #[serde(default)]
    supported: Option<bool>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    example: Option<String>,
}

/// Agent reached by running the configured command.
///
/// Each exchange writes `cache/agent/request.json`, runs
/// `<command> <request> <reply>` and reads `cache/agent/reply.json`.
/// Conversations are kept in `logs/screening.json` and
/// `logs/generation.json`.
pub struct ProcessAgent<'a> {
    run: RunContext<'a>,
    context: PackageContext,
    screening: Vec<Message>,
    generation: Vec<Message>,
}

impl<'a> ProcessAgent<'a> {
    pub fn new(run: RunContext<'a>, context: PackageContext) -> Self {
        Self {
            run,
            context,
            screening: Vec::new(),
            generation: Vec::new(),
        }
    }

    async fn exchange(&self, task: &str, conversation: &[Message]) -> anyhow::Result<AgentReply> {
        let dir = self.run.layout.agent_dir();
        fsutil::create_dir(&dir, false)?;
        let request_path = dir.join("request.json");
        let reply_path = dir.join("reply.json");
        if reply_path.exists() {
            std::fs::remove_file(&reply_path)?;
        }
        let request = AgentRequest {
            task,
            model: &self.run.config.agent.model,
            context: &self.context,
            conversation,
        };
        fsutil::write_file(&request_path, serde_json::to_string_pretty(&request)?)?;

        let invocation = ProcessInvocation::new(format!(
            "{} {} {}",
            self.run.config.agent.command,
            request_path.display(),
            reply_path.display()
        ))
        .timeout(self.run.config.installation_timeout())
        .verbose(self.run.config.verbose_setup);
        self.run
            .shell
            .run(&invocation, true)
            .await
            .with_context(|| format!("agent task {task:?} failed"))?;

        let content = std::fs::read_to_string(&reply_path)
            .with_context(|| format!("agent wrote no reply to {}", reply_path.display()))?;
        serde_json::from_str(&content).context("agent reply is not valid JSON")
    }

    fn record(&self, conversation: &[Message], log_name: &str) -> anyhow::Result<()> {
        let path = self.run.layout.logs_dir().join(log_name);
        save_conversation(&path, conversation)
    }

    fn narrate(&self, message: &Message) {
        if self.run.config.agent.verbose {
            let label = match message.role {
                Role::User => "Feedback:",
                Role::Assistant => "Agent:",
            };
            self.run.narrator.write_block(label, &message.content);
        }
    }
}

fn save_conversation(path: &Path, conversation: &[Message]) -> anyhow::Result<()> {
    fsutil::write_file(path, serde_json::to_string_pretty(conversation)?)?;
    Ok(())
}

#[async_trait]
impl ExampleAgent for ProcessAgent<'_> {
    async fn screen(&mut self) -> anyhow::Result<Screening> {
        let reply = self.exchange("screen", &self.screening).await?;
        let supported = reply
            .supported
            .ok_or_else(|| anyhow!("screening reply lacks \"supported\""))?;
        let reason = reply.reason.unwrap_or_default();
        let message = Message {
            role: Role::Assistant,
            content: if supported {
                "supported".to_string()
            } else {
                format!("rejected: {reason}")
            },
        };
        self.narrate(&message);
        self.screening.push(message);
        self.record(&self.screening, "screening.json")?;
        Ok(if supported {
            Screening::Supported
        } else {
            Screening::Rejected { reason }
        })
    }

    async fn propose(&mut self) -> anyhow::Result<String> {
        let reply = self.exchange("propose", &self.generation).await?;
        let example = reply
            .example
            .ok_or_else(|| anyhow!("proposal reply lacks \"example\""))?;
        let message = Message {
            role: Role::Assistant,
            content: example.clone(),
        };
        self.narrate(&message);
        self.generation.push(message);
        self.record(&self.generation, "generation.json")?;
        Ok(example)
    }

    fn feedback(&mut self, message: &str) {
        let message = Message {
            role: Role::User,
            content: message.to_string(),
        };
        self.narrate(&message);
        self.generation.push(message);
    }
}

/// Factory for [`ProcessAgent`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessAgentFactory;

impl AgentFactory for ProcessAgentFactory {
    fn create<'a>(
        &self,
        run: RunContext<'a>,
        package: &PackageContext,
    ) -> anyhow::Result<Box<dyn ExampleAgent + 'a>> {
        let context = package.excerpt(run.config.max_prompt_chars, run.config.max_test_files);
        Ok(Box::new(ProcessAgent::new(run, context)))
    }
}

/// Read a saved conversation back, mostly for inspection.
pub fn load_conversation(layout: &RunLayout, log_name: &str) -> anyhow::Result<Vec<Message>> {
    let path = layout.logs_dir().join(log_name);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}
