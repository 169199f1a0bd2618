use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use steward_core::config;
use steward_core::{Mode, Service};

use crate::error::{Error, Result};
use crate::hub::{Msg, NotificationHub};
use crate::logfile::{RotatePolicy, RotatingLog, Stream};
use crate::proc::{ProcessControl, ProcessHandle, SpawnSpec};
use crate::stat::{self, StatSnapshot};

/// Lifecycle notification from one runner incarnation. The generation
/// lets the engine discard events from an incarnation it has already
/// replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
	Started { exec: String, generation: u64 },
	Stopped { exec: String, generation: u64 },
}

#[derive(Clone)]
pub struct RunnerConfig {
	pub mode: Mode,
	pub service_dir: PathBuf,
	pub log_dir: PathBuf,
	pub stop_grace: Duration,
	pub read_chunk: usize,
	pub stat_interval: Duration,
	pub rotate: RotatePolicy,
	pub meta: BTreeMap<String, String>,
}

#[derive(Default)]
struct ProcState {
	started: bool,
	handle: Option<Box<dyn ProcessHandle>>,
}

#[derive(Default)]
struct Sampled {
	last_check: Option<Instant>,
	snapshot: StatSnapshot,
}

/// Drives a single incarnation of a service: spawn, capture output,
/// escalate signals on stop. A runner is one-shot, restarting a service
/// means building a fresh one with a new generation.
pub struct Runner {
	service: Service,
	generation: u64,
	config: RunnerConfig,
	hub: Arc<NotificationHub>,
	control: Arc<dyn ProcessControl>,
	events: mpsc::UnboundedSender<RunnerEvent>,
	process: Mutex<ProcState>,
	stats: Mutex<Sampled>,
}

impl Runner {
	pub fn new(
		service: Service,
		generation: u64,
		config: RunnerConfig,
		hub: Arc<NotificationHub>,
		control: Arc<dyn ProcessControl>,
		events: mpsc::UnboundedSender<RunnerEvent>,
	) -> Arc<Self> {
		Arc::new(Self {
			service,
			generation,
			config,
			hub,
			control,
			events,
			process: Mutex::new(ProcState::default()),
			stats: Mutex::new(Sampled::default()),
		})
	}

	pub fn exec(&self) -> &str {
		&self.service.exec
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Spawn the child and wire up output capture. Emits
	/// [`RunnerEvent::Started`] on success.
	pub async fn start(self: &Arc<Self>) -> Result<()> {
		let mut state = self.process.lock().await;
		if state.started {
			if state.handle.is_none() {
				// already ran to completion, nothing left to do
				return Ok(());
			}
			return Err(Error::AlreadyStarted {
				exec: self.service.exec.clone(),
			});
		}

		let work_dir = self.service.work_dir(&self.config.service_dir);
		config::materialize_meta_files(&self.service.args, &self.config.meta, &work_dir);
		set_executable(&self.service.exec_path(&self.config.service_dir));

		let program = program_name(&self.service.exec);
		info!("$ {} {}", program, self.service.args.join(" "));

		let spec = SpawnSpec {
			program,
			args: self.service.args.clone(),
			env: self.service.env.clone(),
			dir: work_dir,
		};
		let spawned = self.control.spawn(&spec).map_err(|source| Error::Launch {
			exec: self.service.exec.clone(),
			source,
		})?;

		let pid = spawned.handle.pid();
		state.started = true;
		state.handle = Some(spawned.handle);
		drop(state);

		debug!(pid, exec = %self.service.exec, "service launched");

		let out_log = RotatingLog::open(
			&self.config.log_dir,
			&self.service.exec,
			self.config.mode,
			Stream::Stdout,
			self.config.rotate.clone(),
		);
		let err_log = RotatingLog::open(
			&self.config.log_dir,
			&self.service.exec,
			self.config.mode,
			Stream::Stderr,
			self.config.rotate.clone(),
		);

		let topic = self.service.exec.clone();
		let out = tokio::spawn(read_stream(
			spawned.stdout,
			out_log,
			self.hub.clone(),
			topic.clone(),
			self.config.read_chunk,
		));
		let err = tokio::spawn(read_stream(
			spawned.stderr,
			err_log,
			self.hub.clone(),
			topic,
			self.config.read_chunk,
		));

		let runner = self.clone();
		tokio::spawn(async move {
			let _ = tokio::join!(out, err);
			runner.mark_exited().await;
		});

		self.emit(RunnerEvent::Started {
			exec: self.service.exec.clone(),
			generation: self.generation,
		});
		Ok(())
	}

	/// Both capture streams hit EOF, the child is gone.
	async fn mark_exited(&self) {
		let mut state = self.process.lock().await;
		let Some(mut handle) = state.handle.take() else {
			// stop() already claimed the handle and reported the exit
			return;
		};
		handle.release();
		drop(state);

		debug!(exec = %self.service.exec, "service exited");
		self.emit(RunnerEvent::Stopped {
			exec: self.service.exec.clone(),
			generation: self.generation,
		});
	}

	/// Bring the child down, escalating until the whole process group is
	/// gone. Every rung of the ladder runs even when earlier signals
	/// fail, only the final group kill decides the result. Stopping a
	/// runner that never started or already exited is a no-op.
	pub async fn stop(&self) -> Result<()> {
		// taking the handle claims the exit report, mark_exited backs off
		let mut handle = {
			let mut state = self.process.lock().await;
			match state.handle.take() {
				Some(handle) => handle,
				None => return Ok(()),
			}
		};

		if let Err(err) = handle.interrupt() {
			warn!(exec = %self.service.exec, %err, "interrupt failed");
		}
		tokio::time::sleep(self.config.stop_grace).await;

		self.emit(RunnerEvent::Stopped {
			exec: self.service.exec.clone(),
			generation: self.generation,
		});

		if let Err(err) = handle.force_kill() {
			warn!(exec = %self.service.exec, %err, "kill failed");
		}
		tokio::time::sleep(self.config.stop_grace).await;

		let group = handle.kill_group();
		handle.release();

		group.map_err(|source| Error::Escalation {
			exec: self.service.exec.clone(),
			source,
		})
	}

	/// Refresh the cached resource snapshot, at most once per
	/// configured interval.
	pub async fn check_stat(&self) {
		let pid = {
			let state = self.process.lock().await;
			match state.handle.as_ref() {
				Some(handle) => handle.pid(),
				None => return,
			}
		};

		let mut stats = self.stats.lock().await;
		if let Some(last) = stats.last_check {
			if last.elapsed() < self.config.stat_interval {
				return;
			}
		}
		stats.last_check = Some(Instant::now());
		stats.snapshot = stat::sample(pid);
	}

	pub async fn stats(&self) -> StatSnapshot {
		self.stats.lock().await.snapshot.clone()
	}

	pub async fn pid(&self) -> Option<u32> {
		let state = self.process.lock().await;
		state.handle.as_ref().map(|h| h.pid())
	}

	fn emit(&self, event: RunnerEvent) {
		let _ = self.events.send(event);
	}
}

async fn read_stream(
	mut reader: Box<dyn AsyncRead + Send + Unpin>,
	mut log: RotatingLog,
	hub: Arc<NotificationHub>,
	topic: String,
	chunk_size: usize,
) {
	let mut buf = vec![0u8; chunk_size];
	loop {
		match reader.read(&mut buf).await {
			Ok(0) | Err(_) => break,
			Ok(n) => {
				// live subscribers first, the file can wait
				hub.publish(Msg {
					topic: topic.clone(),
					content: buf[..n].to_vec(),
				})
				.await;
				log.append(&buf[..n]);
			}
		}
	}
}

/// Services are launched by file name from their own directory, so a
/// bare name needs the `./` prefix to resolve.
fn program_name(exec: &str) -> String {
	if exec.starts_with("./") || exec.starts_with('/') {
		exec.to_string()
	} else {
		format!("./{}", exec)
	}
}

fn set_executable(path: &Path) {
	use std::os::unix::fs::PermissionsExt;
	let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777));
}
