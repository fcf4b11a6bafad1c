//! File-access-monitor subprocess supervisor (spec §4.5).
//!
//! Holds zero or one live monitor child at a time. The broker never polls
//! this process outside of start/stop; it merely remembers where its
//! output is going and whether to escalate it to the client on stop.

use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::error::{BrokerError, Result};

const FAM_BINARY: &str = "SCMFileAccessMonitor";
const TERMINATE_GRACE: Duration = Duration::from_millis(500);
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct FamProcess {
    child: Child,
    tmp_output_path: String,
    final_output_path: String,
    should_upload: bool,
}

#[derive(Default)]
pub struct FamSupervisor {
    process: Option<FamProcess>,
}

impl FamSupervisor {
    pub fn new() -> Self {
        FamSupervisor { process: None }
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    pub fn start(
        &mut self,
        path_prefixes: Vec<String>,
        tmp_output_path: String,
        final_output_path: String,
        should_upload: bool,
    ) -> Result<u32> {
        if self.process.is_some() {
            return Err(BrokerError::validation(
                "a file-access monitor is already running",
            ));
        }
        let Some(first_prefix) = path_prefixes.first() else {
            return Err(BrokerError::validation(
                "expected at least one path prefix to start the file-access monitor",
            ));
        };
        for prefix in &path_prefixes {
            debug!("FAM monitoring path with prefix \"{prefix}\"");
        }
        debug!("FAM logging events to \"{tmp_output_path}\"");
        debug!("FAM output file will be moved to \"{final_output_path}\"");

        let stdout_file = File::create(Path::new(&tmp_output_path)).map_err(|err| {
            BrokerError::system(format!("opening FAM output file {tmp_output_path}"), err)
        })?;

        let child = Command::new(FAM_BINARY)
            .arg("--path-prefix")
            .arg(first_prefix)
            .arg("--events")
            .arg("NOTIFY_OPEN")
            .arg("NOTIFY_CLOSE")
            .stdout(Stdio::from(stdout_file))
            .spawn()
            .map_err(|err| BrokerError::subprocess(format!("spawning {FAM_BINARY}: {err}")))?;

        let pid = child.id();
        self.process = Some(FamProcess {
            child,
            tmp_output_path,
            final_output_path,
            should_upload,
        });
        Ok(pid)
    }

    pub fn stop(&mut self) -> Result<(String, String, bool)> {
        let mut proc = self
            .process
            .take()
            .ok_or_else(|| BrokerError::validation("no file-access monitor is running"))?;

        let pid = proc.child.id();
        if let Err(err) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("SIGTERM to FAM pid {pid} failed (already exited?): {err}");
        }

        let deadline = Instant::now() + TERMINATE_GRACE;
        let mut terminated = false;
        loop {
            match proc.child.try_wait() {
                Ok(Some(_)) => {
                    terminated = true;
                    break;
                }
                Ok(None) => {}
                Err(err) => {
                    error!("error polling FAM pid {pid}: {err}");
                    break;
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(TERMINATE_POLL_INTERVAL);
        }

        if !terminated {
            if let Err(err) = proc.child.kill() {
                error!("failed to force-kill FAM pid {pid}: {err}");
            } else {
                terminated = proc.child.wait().is_ok();
            }
        }

        if !terminated {
            // Put the bookkeeping back; the client may retry the stop.
            self.process = Some(proc);
            return Err(BrokerError::subprocess(format!(
                "failed to terminate FAM pid {pid}"
            )));
        }

        debug!("FAM pid {pid} terminated");
        Ok((proc.tmp_output_path, proc.final_output_path, proc.should_upload))
    }
}
