//! Core application
//!
//! Wires configuration, the service client, and the chat session together,
//! and runs the interactive loop. Feedback and trace lookups are side
//! channels driven from slash commands; they never touch the turn state
//! machine.

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncBufReadExt;

use crate::chat::message::Source;
use crate::chat::session::ChatSession;
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME, ENV_LOG, FEEDBACK_CLICK_KEY, FEEDBACK_SCORE_KEY};
use crate::remote::client::ChatServiceClient;
use crate::remote::feedback::{FeedbackRequest, spawn_feedback};
use crate::render::terminal::StreamPrinter;

pub struct ChatApp {
    client: ChatServiceClient,
    session: ChatSession<ChatServiceClient>,
    /// run_id → feedback_id for runs already rated; a successful submission
    /// locks the run, a failed one leaves it open for retry.
    feedback_by_run: HashMap<String, String>,
    last_sources: Vec<Source>,
}

impl ChatApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        let (cli_config, command) = cli::parse();
        let app = Self::init(&cli_config)?;

        match command {
            Some(Commands::Ask { question }) => app.run_once(&question).await,
            Some(Commands::Chat) | None => app.run_interactive().await,
        }
    }

    fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let client =
            ChatServiceClient::new(&config.endpoint, Duration::from_secs(config.timeout_secs))
                .context("Failed to build chat service client")?;
        let session = ChatSession::new(client.clone(), &config.model, &config.source_step);

        tracing::debug!(
            endpoint = %config.endpoint,
            model = %config.model,
            conversation_id = %session.conversation_id(),
            "Session ready"
        );

        Ok(Self {
            client,
            session,
            feedback_by_run: HashMap::new(),
            last_sources: Vec::new(),
        })
    }

    fn init_logging() {
        let default_filter = format!("warn,{}=warn", APP_NAME);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    async fn run_once(mut self, question: &str) -> Result<()> {
        self.run_turn(question).await;
        Ok(())
    }

    async fn run_interactive(mut self) -> Result<()> {
        println!("docpilot — ask the docs anything. Type /help for commands.\n");

        // Abandon the in-flight turn on Ctrl-C; late batches are discarded.
        let cancel = self.session.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });

        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        loop {
            print!("\u{276f} ");
            let _ = std::io::stdout().flush();

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(command) = line.strip_prefix('/') {
                if !self.handle_command(command).await {
                    break;
                }
                continue;
            }
            self.run_turn(line).await;
            if self.session.cancel_token().is_cancelled() {
                break;
            }
        }
        Ok(())
    }

    async fn run_turn(&mut self, question: &str) {
        let mut printer = StreamPrinter::new();
        let result = self
            .session
            .submit(question, |update| printer.present(&update))
            .await;

        match result {
            Ok(_) => {
                self.last_sources = printer.finish();
            }
            Err(e) => {
                drop(printer);
                tracing::error!(error = %e, "Turn failed");
                eprintln!("\n! The answer could not be completed. Please try again.");
            }
        }
    }

    /// Handle a slash command; returns false when the loop should exit.
    async fn handle_command(&mut self, command: &str) -> bool {
        let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
        match name {
            "quit" | "exit" => return false,
            "help" => Self::print_help(),
            "good" => self.send_score(1.0, rest).await,
            "bad" => self.send_score(0.0, rest).await,
            "trace" => self.show_trace().await,
            "sources" => self.print_sources(),
            "open" => self.open_source(rest),
            other => println!("Unknown command: /{other} (try /help)"),
        }
        true
    }

    fn print_help() {
        println!("  /good [comment]   rate the last answer as correct");
        println!("  /bad [comment]    rate the last answer as incorrect");
        println!("  /trace            show the trace link for the last answer");
        println!("  /sources          re-print the last source list");
        println!("  /open <n>         show source n and record the visit");
        println!("  /quit             exit");
    }

    async fn send_score(&mut self, score: f64, comment: &str) {
        let Some(run_id) = self.session.last_run_id().map(str::to_string) else {
            println!("Nothing to rate yet.");
            return;
        };
        if self.feedback_by_run.contains_key(&run_id) {
            println!("Feedback was already sent for this answer.");
            return;
        }

        let request = FeedbackRequest::score(run_id.as_str(), FEEDBACK_SCORE_KEY, score)
            .with_comment(comment.trim());
        match self.client.send_feedback(&request).await {
            Ok(response) => {
                self.feedback_by_run.insert(run_id, response.feedback_id);
                println!("Thanks for the feedback.");
            }
            Err(e) => {
                // Nothing recorded: the user may retry.
                tracing::warn!(error = %e, "Feedback submission failed");
                eprintln!("! Could not submit feedback, please try again.");
            }
        }
    }

    async fn show_trace(&self) {
        let Some(run_id) = self.session.last_run_id() else {
            println!("No answer to trace yet.");
            return;
        };
        match self.client.trace_url(run_id).await {
            Ok(url) => println!("Trace: {url}"),
            Err(e) => {
                tracing::warn!(error = %e, "Trace lookup failed");
                eprintln!("! Unable to view trace.");
            }
        }
    }

    fn print_sources(&self) {
        if self.last_sources.is_empty() {
            println!("No sources for the last answer.");
            return;
        }
        for (index, source) in self.last_sources.iter().enumerate() {
            println!("{}", crate::render::terminal::render_source(index, source));
        }
    }

    fn open_source(&self, argument: &str) {
        let Ok(number) = argument.trim().parse::<usize>() else {
            println!("Usage: /open <n>");
            return;
        };
        let Some(source) = number.checked_sub(1).and_then(|i| self.last_sources.get(i)) else {
            println!("No such source: {number}");
            return;
        };

        println!("\u{2192} {}", source.url);
        if let Some(run_id) = self.session.last_run_id() {
            spawn_feedback(
                self.client.clone(),
                FeedbackRequest::click(run_id, FEEDBACK_CLICK_KEY, source.url.as_str()),
            );
        }
    }
}
