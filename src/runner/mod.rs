//! Command runners - how a single script line gets executed

pub mod output;
pub mod shell;

use async_trait::async_trait;
use std::path::PathBuf;

pub use output::{CommandOutput, RunnerError};
pub use shell::{ShellRunner, ShellRunnerConfig};

/// One script line plus the environment it runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    /// The line as written in the pipeline file
    pub line: String,

    /// Directory the command runs in
    pub working_dir: PathBuf,

    /// Variables exported to the command, in precedence order
    pub env: Vec<(String, String)>,
}

/// Ordered lines that run in one shell session
///
/// State a line sets up (`export`, `cd`, `source`) is visible to the lines
/// after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellScript {
    pub lines: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

impl ShellScript {
    /// The line at `index` as a standalone command
    pub fn command(&self, index: usize) -> Option<ShellCommand> {
        self.lines.get(index).map(|line| ShellCommand {
            line: line.clone(),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
        })
    }
}

/// Results of the lines of a script that ran, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    pub lines: Vec<CommandOutput>,
}

impl ScriptOutput {
    /// Index and output of the line that stopped the script, if any
    pub fn failure(&self) -> Option<(usize, &CommandOutput)> {
        let last = self.lines.last()?;
        (!last.success()).then(|| (self.lines.len() - 1, last))
    }
}

/// Trait for command execution - allows for different implementations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and report its exit code and output
    ///
    /// A non-zero exit is a successful `run`; only failures to start or
    /// observe the command are errors.
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutput, RunnerError>;

    /// Run the lines of a script in order, stopping at the first non-zero exit
    ///
    /// The default runs each line through [`CommandRunner::run`], so lines do
    /// not share shell state. Runners backed by a real shell override it.
    async fn run_script(&self, script: &ShellScript) -> Result<ScriptOutput, RunnerError> {
        let mut output = ScriptOutput::default();
        for index in 0..script.lines.len() {
            let Some(command) = script.command(index) else {
                break;
            };
            let result = self.run(&command).await?;
            let failed = !result.success();
            output.lines.push(result);
            if failed {
                break;
            }
        }
        Ok(output)
    }
}

#[async_trait]
impl<R: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<R> {
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutput, RunnerError> {
        (**self).run(command).await
    }

    async fn run_script(&self, script: &ShellScript) -> Result<ScriptOutput, RunnerError> {
        (**self).run_script(script).await
    }
}
