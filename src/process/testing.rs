// ABOUTME: In-memory stand-ins for kubectl, docker and their children used by unit tests
//
// `FakeCluster` describes how the pretend cluster answers; `ScriptedRunner`
// records every command and hands out `FakeProcess` handles whose interrupts
// can be counted afterwards.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ManagedProcess, ProcessState, ToolCommand, ToolOutput, ToolRunner};
use crate::error::{DebugError, Result};
use crate::kube::REMOTE_STOP_SCRIPT;
use crate::provision::BinaryBuilder;

/// Scripted child: emits fixed lines, then either closes or goes silent
#[derive(Debug)]
pub struct FakeProcess {
    label: String,
    lines: VecDeque<String>,
    hang: bool,
    alive: bool,
    interrupts: Arc<AtomicUsize>,
}

impl FakeProcess {
    /// Emits `lines`, then closes its output and exits
    pub fn exiting(label: &str, lines: &[&str]) -> Self {
        Self::build(label, lines, false)
    }

    /// Emits `lines`, then stays alive and silent until interrupted
    pub fn hanging(label: &str, lines: &[&str]) -> Self {
        Self::build(label, lines, true)
    }

    fn build(label: &str, lines: &[&str], hang: bool) -> Self {
        Self {
            label: label.to_string(),
            lines: lines.iter().map(|l| (*l).to_string()).collect(),
            hang,
            alive: true,
            interrupts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn interrupt_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.interrupts)
    }
}

impl ManagedProcess for FakeProcess {
    fn label(&self) -> &str {
        &self.label
    }

    async fn next_line(&mut self) -> Option<String> {
        if let Some(line) = self.lines.pop_front() {
            return Some(line);
        }
        if self.hang && self.alive {
            // Silent until the caller gives up; an interrupt ends the stream
            std::future::pending::<()>().await;
        }
        self.alive = false;
        None
    }

    fn interrupt(&mut self) -> Result<()> {
        if self.alive {
            self.interrupts.fetch_add(1, Ordering::SeqCst);
            self.alive = false;
            self.lines.clear();
        }
        Ok(())
    }

    async fn wait(&mut self, _timeout: Duration) -> Result<ProcessState> {
        self.alive = false;
        Ok(ProcessState::Exited { code: 0 })
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }
}

/// A spawned child as seen from the test
#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub command: ToolCommand,
    pub interrupts: Arc<AtomicUsize>,
}

impl SpawnRecord {
    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }
}

type RunHandler = Box<dyn Fn(&ToolCommand) -> ToolOutput + Send + Sync>;
type SpawnHandler = Box<dyn Fn(&ToolCommand) -> FakeProcess + Send + Sync>;

/// Runner answering from closures and recording what it was asked
pub struct ScriptedRunner {
    on_run: RunHandler,
    on_spawn: SpawnHandler,
    calls: Mutex<Vec<ToolCommand>>,
    spawned: Mutex<Vec<SpawnRecord>>,
}

impl ScriptedRunner {
    pub fn new(
        on_run: impl Fn(&ToolCommand) -> ToolOutput + Send + Sync + 'static,
        on_spawn: impl Fn(&ToolCommand) -> FakeProcess + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_run: Box::new(on_run),
            on_spawn: Box::new(on_spawn),
            calls: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
        }
    }

    /// Every command, one-shot or spawned, in issue order
    pub fn calls(&self) -> Vec<ToolCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn spawned(&self) -> Vec<SpawnRecord> {
        self.spawned.lock().unwrap().clone()
    }

    /// Commands containing `needle` as contiguous arguments
    pub fn calls_with(&self, needle: &[&str]) -> Vec<ToolCommand> {
        self.calls()
            .into_iter()
            .filter(|c| c.has_args(needle))
            .collect()
    }

    /// The spawned child whose subcommand is `subcommand`
    pub fn spawned_child(&self, subcommand: &str) -> Option<SpawnRecord> {
        self.spawned()
            .into_iter()
            .find(|r| r.command.args.first().map(String::as_str) == Some(subcommand))
    }
}

impl ToolRunner for ScriptedRunner {
    type Process = FakeProcess;

    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push(command.clone());
        Ok((self.on_run)(command))
    }

    fn spawn(&self, command: &ToolCommand) -> Result<FakeProcess> {
        self.calls.lock().unwrap().push(command.clone());
        let process = (self.on_spawn)(command);
        self.spawned.lock().unwrap().push(SpawnRecord {
            command: command.clone(),
            interrupts: process.interrupt_counter(),
        });
        Ok(process)
    }
}

/// How the pretend cluster behaves
#[derive(Debug, Clone)]
pub struct FakeCluster {
    /// Raw `kubectl version -o json` payload
    pub version_json: String,
    pub containers: Vec<String>,
    /// Executables found on the container PATH
    pub on_path: Vec<String>,
    /// Executables found under /tmp
    pub staged: Vec<String>,
    pub tunnel_lines: Vec<String>,
    pub tunnel_hangs: bool,
    pub server_lines: Vec<String>,
    pub server_hangs: bool,
    /// Commands whose display contains one of these fail with exit 1
    pub failing: Vec<String>,
}

impl FakeCluster {
    /// Healthy cluster at `git_version` with one `app` container that has tar
    pub fn new(git_version: &str) -> Self {
        Self {
            version_json: format!(
                r#"{{"clientVersion":{{"gitVersion":"v1.29.0"}},"serverVersion":{{"gitVersion":"{git_version}"}}}}"#
            ),
            containers: vec!["app".to_string()],
            on_path: vec!["tar".to_string()],
            staged: Vec::new(),
            tunnel_lines: vec!["Forwarding from 127.0.0.1:54321 -> 2000".to_string()],
            tunnel_hangs: true,
            server_lines: vec![
                "Attached; pid = 1".to_string(),
                "Listening on port 2000".to_string(),
            ],
            server_hangs: true,
            failing: Vec::new(),
        }
    }

    #[must_use]
    pub fn containers(mut self, names: &[&str]) -> Self {
        self.containers = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    #[must_use]
    pub fn on_path(mut self, names: &[&str]) -> Self {
        self.on_path = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    #[must_use]
    pub fn staged(mut self, names: &[&str]) -> Self {
        self.staged = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    #[must_use]
    pub fn server_output(mut self, lines: &[&str], hangs: bool) -> Self {
        self.server_lines = lines.iter().map(|l| (*l).to_string()).collect();
        self.server_hangs = hangs;
        self
    }

    #[must_use]
    pub fn tunnel_output(mut self, lines: &[&str], hangs: bool) -> Self {
        self.tunnel_lines = lines.iter().map(|l| (*l).to_string()).collect();
        self.tunnel_hangs = hangs;
        self
    }

    #[must_use]
    pub fn failing(mut self, fragment: &str) -> Self {
        self.failing.push(fragment.to_string());
        self
    }

    fn answer(&self, command: &ToolCommand) -> ToolOutput {
        let rendered = command.display();
        if self.failing.iter().any(|f| rendered.contains(f.as_str())) {
            return ToolOutput::failed(1, "error: injected failure");
        }

        match command.args.first().map(String::as_str) {
            Some("version") => ToolOutput::ok(self.version_json.clone()),
            Some("get") => ToolOutput::ok(self.containers.join(" ")),
            Some("exec") if command.has_args(&["sh", "-c", REMOTE_STOP_SCRIPT]) => {
                ToolOutput::ok("4242\n")
            }
            Some("exec") if command.args.last().map(String::as_str) == Some("--help") => {
                self.probe(command)
            }
            _ => ToolOutput::ok(""),
        }
    }

    fn probe(&self, command: &ToolCommand) -> ToolOutput {
        let Some(executable) = command.args.iter().rev().nth(1) else {
            return ToolOutput::failed(1, "error: malformed probe");
        };
        let present = match executable.strip_prefix("/tmp/") {
            Some(name) => self.staged.iter().any(|s| s == name),
            None => self.on_path.iter().any(|s| s == executable),
        };
        if present {
            ToolOutput::ok(format!("Usage: {executable} [OPTIONS]"))
        } else {
            ToolOutput::failed(
                126,
                format!(
                    "OCI runtime exec failed: exec failed: unable to start container process: \
                     exec: \"{executable}\": executable file not found in $PATH: unknown\n\
                     command terminated with exit code 126"
                ),
            )
        }
    }

    fn child(&self, command: &ToolCommand) -> FakeProcess {
        let (label, lines, hangs) = if command.args.first().map(String::as_str) == Some("port-forward") {
            ("kubectl port-forward", &self.tunnel_lines, self.tunnel_hangs)
        } else {
            ("debug server", &self.server_lines, self.server_hangs)
        };
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        if hangs {
            FakeProcess::hanging(label, &lines)
        } else {
            FakeProcess::exiting(label, &lines)
        }
    }

    pub fn runner(self) -> ScriptedRunner {
        let spawner = self.clone();
        ScriptedRunner::new(move |c| self.answer(c), move |c| spawner.child(c))
    }
}

/// Binary builder that only records requests
#[derive(Debug, Default)]
pub struct FakeBuilder {
    pub fail: bool,
    built: Mutex<Vec<String>>,
}

impl FakeBuilder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            built: Mutex::new(Vec::new()),
        }
    }

    pub fn built(&self) -> Vec<String> {
        self.built.lock().unwrap().clone()
    }
}

impl BinaryBuilder for FakeBuilder {
    async fn build_static(&self, name: &str, output_dir: &Path) -> Result<PathBuf> {
        self.built.lock().unwrap().push(name.to_string());
        if self.fail {
            return Err(DebugError::provisioning(name, "docker daemon unavailable"));
        }
        Ok(output_dir.join(name))
    }
}
