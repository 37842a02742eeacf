//! Headless supervisor: runs the configured chains in loops, auto-starting
//! daemon dependencies, persisting crash logs for failed stages, and
//! continuing the chain past failures.
//!
//! Stages run as child processes of this executable so a crash in one never
//! takes the supervisor down; an external controller can still start and
//! stop individual stages by invoking the same subcommands.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    /// Long-lived service; auto-started when a stage depends on it.
    Daemon,
    Sync,
    Maintenance,
}

#[derive(Debug, Clone, Copy)]
pub struct Script {
    pub name: &'static str,
    pub args: &'static [&'static str],
    pub script_type: ScriptType,
    pub depends_on: &'static [&'static str],
}

pub const SCRIPTS: &[Script] = &[
    Script {
        name: "daemon",
        args: &["daemon"],
        script_type: ScriptType::Daemon,
        depends_on: &[],
    },
    Script {
        name: "channels",
        args: &["sync-channels"],
        script_type: ScriptType::Sync,
        depends_on: &["daemon"],
    },
    Script {
        name: "messages",
        args: &["sync-messages"],
        script_type: ScriptType::Sync,
        depends_on: &["daemon"],
    },
    Script {
        name: "history",
        args: &["sync-history"],
        script_type: ScriptType::Sync,
        depends_on: &["daemon"],
    },
    Script {
        name: "read-sync",
        args: &["read-sync"],
        script_type: ScriptType::Sync,
        depends_on: &["daemon"],
    },
    Script {
        name: "telegraph",
        args: &["telegraph"],
        script_type: ScriptType::Maintenance,
        depends_on: &[],
    },
    Script {
        name: "thumbnails",
        args: &["thumbnails"],
        script_type: ScriptType::Maintenance,
        depends_on: &[],
    },
    Script {
        name: "hashes",
        args: &["hashes"],
        script_type: ScriptType::Maintenance,
        depends_on: &[],
    },
    Script {
        name: "search",
        args: &["search-index"],
        script_type: ScriptType::Maintenance,
        depends_on: &[],
    },
    Script {
        name: "cleanup",
        args: &["cleanup"],
        script_type: ScriptType::Maintenance,
        depends_on: &[],
    },
];

#[derive(Debug, Clone)]
pub struct Chain {
    pub name: &'static str,
    pub scripts: &'static [&'static str],
}

pub const CHAINS: &[Chain] = &[
    Chain {
        name: "sync",
        scripts: &["read-sync", "channels", "messages", "telegraph"],
    },
    Chain {
        name: "maintenance",
        scripts: &["thumbnails", "hashes", "search", "cleanup"],
    },
    Chain {
        name: "history",
        scripts: &["history"],
    },
];

pub fn script(name: &str) -> Option<&'static Script> {
    SCRIPTS.iter().find(|s| s.name == name)
}

const INTER_SCRIPT_DELAY: Duration = Duration::from_secs(1);
const INTER_ITERATION_DELAY: Duration = Duration::from_secs(5);
const DAEMON_STARTUP_DELAY: Duration = Duration::from_secs(1);

pub struct Supervisor {
    exe: PathBuf,
    logs_dir: PathBuf,
    daemons: Mutex<HashMap<&'static str, Child>>,
}

impl Supervisor {
    pub fn new(logs_dir: PathBuf) -> anyhow::Result<Self> {
        Ok(Supervisor {
            exe: std::env::current_exe()?,
            logs_dir,
            daemons: Mutex::new(HashMap::new()),
        })
    }

    /// Auto-start a daemon dependency unless its child is still alive.
    /// Sync-stage dependencies are handled by chain ordering.
    async fn ensure_daemon(&self, name: &'static str) {
        let Some(script) = script(name) else {
            return;
        };
        if script.script_type != ScriptType::Daemon {
            return;
        }
        let mut daemons = self.daemons.lock().await;
        if let Some(child) = daemons.get_mut(name) {
            if child.try_wait().ok().flatten().is_none() {
                return;
            }
            warn!("daemon '{name}' exited, restarting");
            daemons.remove(name);
        }
        info!("starting daemon '{name}'");
        match Command::new(&self.exe)
            .args(script.args)
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => {
                daemons.insert(name, child);
            }
            Err(e) => error!("failed to start daemon '{name}': {e}"),
        }
        drop(daemons);
        tokio::time::sleep(DAEMON_STARTUP_DELAY).await;
    }

    /// Run one stage to completion, capturing output. Non-zero exits are
    /// persisted to a timestamped crash log; the chain keeps going.
    async fn run_script(&self, script: &Script, shutdown: &mut watch::Receiver<bool>) {
        info!("starting '{}'", script.name);
        let mut cmd = Command::new(&self.exe);
        cmd.args(script.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("failed to start '{}': {e}", script.name);
                return;
            }
        };

        let output = tokio::select! {
            output = child.wait_with_output() => output,
            _ = shutdown.changed() => {
                // Dropping the in-flight future kills the child.
                info!("stopping '{}' (shutdown)", script.name);
                return;
            }
        };
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                error!("failed waiting for '{}': {e}", script.name);
                return;
            }
        };

        if output.status.success() {
            info!("'{}' completed", script.name);
        } else {
            let code = output.status.code().unwrap_or(-1);
            error!("'{}' failed with exit code {code}", script.name);
            self.save_crash_log(script, code, &output.stdout, &output.stderr);
        }
    }

    fn save_crash_log(&self, script: &Script, code: i32, stdout: &[u8], stderr: &[u8]) {
        if let Err(e) = std::fs::create_dir_all(&self.logs_dir) {
            error!("cannot create logs dir: {e}");
            return;
        }
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_path = self.logs_dir.join(format!("{}_{timestamp}.log", script.name));
        let mut contents = format!(
            "Script: {}\nExit code: {code}\nTime: {}\n{}\n\n",
            script.name,
            chrono::Local::now().to_rfc3339(),
            "=".repeat(50)
        );
        contents.push_str(&String::from_utf8_lossy(stdout));
        contents.push_str(&String::from_utf8_lossy(stderr));
        match std::fs::write(&log_path, contents) {
            Ok(()) => warn!("'{}' failed - log saved to {}", script.name, log_path.display()),
            Err(e) => error!("failed to save crash log: {e}"),
        }
    }

    /// Run one chain in a loop until shutdown: advance, start, wait,
    /// advance. Daemon dependencies are checked before each stage.
    pub async fn run_chain(self: Arc<Self>, chain: Chain, mut shutdown: watch::Receiver<bool>) {
        let mut iteration = 0u64;
        loop {
            iteration += 1;
            info!("chain '{}' iteration #{iteration}", chain.name);
            for name in chain.scripts {
                if *shutdown.borrow() {
                    return;
                }
                let Some(script) = script(name) else {
                    error!("chain '{}' references unknown script: {name}", chain.name);
                    return;
                };
                for dep in script.depends_on {
                    self.ensure_daemon(dep).await;
                }
                self.run_script(script, &mut shutdown).await;
                if *shutdown.borrow() {
                    return;
                }
                tokio::time::sleep(INTER_SCRIPT_DELAY).await;
            }
            tokio::time::sleep(INTER_ITERATION_DELAY).await;
        }
    }

    /// Start the daemon and every chain; stop them all on SIGINT/SIGTERM.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let (tx, rx) = watch::channel(false);

        self.ensure_daemon("daemon").await;

        let mut set = JoinSet::new();
        for chain in CHAINS {
            let supervisor = Arc::clone(&self);
            let rx = rx.clone();
            set.spawn(supervisor.run_chain(chain.clone(), rx));
        }

        wait_for_shutdown_signal().await;
        info!("shutdown signal received, stopping chains...");
        tx.send(true).ok();
        while set.join_next().await.is_some() {}

        let mut daemons = self.daemons.lock().await;
        for (name, child) in daemons.iter_mut() {
            info!("stopping daemon '{name}'");
            child.kill().await.ok();
        }
        daemons.clear();
        info!("supervisor stopped");
        Ok(())
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
