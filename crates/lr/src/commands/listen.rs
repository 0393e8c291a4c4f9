//! `lr listen` command implementation.
//!
//! Runs the live reload client outside a browser: every reload prints a line
//! and optionally runs a command, e.g. to refresh a preview tool.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Args;
use lr_client::Page;

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the listen command.
#[derive(Args)]
pub(crate) struct ListenArgs {
    /// Websocket endpoint, e.g. ws://localhost:5000/__livereload.
    url: String,

    /// Command (and arguments) to run on every reload.
    #[arg(long, num_args = 1.., allow_hyphen_values = true, value_name = "CMD")]
    exec: Vec<String>,

    /// Enable verbose output (log connection state changes).
    #[arg(short, long)]
    pub verbose: bool,
}

impl ListenArgs {
    /// Execute the listen command until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if the Ctrl-C handler cannot be installed.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        output.field("Listening", &self.url);
        if let Some(program) = self.exec.first() {
            output.field("On reload", &self.exec.join(" "));
            tracing::debug!(program, "Reload command configured");
        }

        let page = Arc::new(CommandPage {
            command: self.exec,
            reloads: AtomicUsize::new(0),
            output: Output::new(),
        });
        let client = lr_client::spawn(self.url, page);

        let signal = tokio::signal::ctrl_c().await;
        client.shutdown().await;
        signal?;

        output.success("Stopped");
        Ok(())
    }
}

/// Page standing in for a browser tab.
struct CommandPage {
    command: Vec<String>,
    reloads: AtomicUsize,
    output: Output,
}

impl Page for CommandPage {
    fn reload(&self) {
        let count = self.reloads.fetch_add(1, Ordering::Relaxed) + 1;
        self.output.success(&format!("Reload #{count}"));

        let Some((program, args)) = self.command.split_first() else {
            return;
        };
        if let Err(e) = tokio::process::Command::new(program).args(args).spawn() {
            self.output.error(&format!("Failed to run {program}: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        listen: ListenArgs,
    }

    #[test]
    fn test_exec_takes_trailing_arguments() {
        let cli = TestCli::parse_from([
            "lr",
            "ws://localhost:5000/__livereload",
            "--exec",
            "make",
            "-C",
            "docs",
        ]);
        assert_eq!(cli.listen.url, "ws://localhost:5000/__livereload");
        assert_eq!(cli.listen.exec, vec!["make", "-C", "docs"]);
    }

    #[test]
    fn test_exec_optional() {
        let cli = TestCli::parse_from(["lr", "ws://localhost:5000/__livereload"]);
        assert!(cli.listen.exec.is_empty());
        assert!(!cli.listen.verbose);
    }
}
