//! Shell subprocess runner - runs lines through `sh -c`

use crate::runner::{CommandOutput, CommandRunner, RunnerError, ScriptOutput, ShellCommand, ShellScript};
use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Configuration for the shell runner
#[derive(Debug, Clone)]
pub struct ShellRunnerConfig {
    /// Shell executable; defaults to `sh`
    pub shell: String,

    /// Flag that makes the shell read a command string
    pub command_flag: String,
}

impl Default for ShellRunnerConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            command_flag: "-c".to_string(),
        }
    }
}

impl ShellRunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

/// Runs commands as shell subprocesses
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    config: ShellRunnerConfig,
}

impl ShellRunner {
    pub fn new(config: ShellRunnerConfig) -> Self {
        Self { config }
    }

    /// Get the shell executable
    pub fn shell(&self) -> &str {
        &self.config.shell
    }
}

impl ShellRunner {
    async fn spawn(
        &self,
        program: &str,
        working_dir: &Path,
        env: &[(String, String)],
    ) -> std::io::Result<Output> {
        Command::new(&self.config.shell)
            .arg(&self.config.command_flag)
            .arg(program)
            .current_dir(working_dir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true)
            .output()
            .await
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutput, RunnerError> {
        debug!(
            "Spawning {} for `{}` in {}",
            self.config.shell,
            command.line,
            command.working_dir.display()
        );

        let output = self
            .spawn(&command.line, &command.working_dir, &command.env)
            .await
            .map_err(|e| RunnerError::Spawn {
                command: command.line.clone(),
                reason: e.to_string(),
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code != 0 {
            warn!("`{}` exited with code {}", command.line, exit_code);
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run every line in one shell process
    ///
    /// A marker is printed to stdout and stderr before each line so the
    /// output can be split back per line. After each line its status is
    /// checked and a non-zero status ends the shell with that code.
    async fn run_script(&self, script: &ShellScript) -> Result<ScriptOutput, RunnerError> {
        if script.lines.is_empty() {
            return Ok(ScriptOutput::default());
        }

        let marker = format!("__stagehand_{}", Uuid::new_v4().simple());
        debug!(
            "Spawning {} for {} lines in {}",
            self.config.shell,
            script.lines.len(),
            script.working_dir.display()
        );

        let output = self
            .spawn(&session_program(&script.lines, &marker), &script.working_dir, &script.env)
            .await
            .map_err(|e| RunnerError::Spawn {
                command: script.lines.join("; "),
                reason: e.to_string(),
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = split_marked(&String::from_utf8_lossy(&output.stdout), &marker);
        let stderr = split_marked(&String::from_utf8_lossy(&output.stderr), &marker);

        // The shell may die before printing the first marker; blame line 0
        let started = stdout.len().clamp(1, script.lines.len());
        if exit_code != 0 {
            warn!("`{}` exited with code {}", script.lines[started - 1], exit_code);
        }

        let lines = (0..started)
            .map(|index| CommandOutput {
                exit_code: if index + 1 == started { exit_code } else { 0 },
                stdout: stdout.get(index).cloned().unwrap_or_default(),
                stderr: stderr.get(index).cloned().unwrap_or_default(),
            })
            .collect();
        Ok(ScriptOutput { lines })
    }
}

/// Shell text that runs `lines` in order behind per-line markers
fn session_program(lines: &[String], marker: &str) -> String {
    let mut program = String::new();
    for (index, line) in lines.iter().enumerate() {
        program.push_str(&format!(
            "printf '\\n%s %d\\n' '{marker}' {index}; printf '\\n%s %d\\n' '{marker}' {index} >&2\n"
        ));
        program.push_str(line);
        program.push('\n');
        program.push_str(
            "__stagehand_rc=$?; if [ \"$__stagehand_rc\" -ne 0 ]; then exit \"$__stagehand_rc\"; fi\n",
        );
    }
    program
}

/// Split captured output at the `\n<marker> <index>\n` lines
///
/// Returns one segment per marker found. Anything printed before the first
/// marker is kept with the first segment.
fn split_marked(text: &str, marker: &str) -> Vec<String> {
    let mut segments: Vec<String> = Vec::new();
    let mut rest = text;

    loop {
        let token = format!("\n{} {}\n", marker, segments.len());
        let Some(pos) = rest.find(&token) else {
            match segments.last_mut() {
                Some(last) => last.push_str(rest),
                None if !rest.is_empty() => segments.push(rest.to_string()),
                None => {}
            }
            return segments;
        };

        let before = &rest[..pos];
        match segments.last_mut() {
            Some(last) => {
                last.push_str(before);
                segments.push(String::new());
            }
            None => segments.push(before.to_string()),
        }
        rest = &rest[pos + token.len()..];
    }
}
