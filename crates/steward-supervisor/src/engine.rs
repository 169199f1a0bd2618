use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use steward_core::{Limits, LogFile, Mode, Service, ServiceView};

use crate::error::{Error, Result};
use crate::hub::NotificationHub;
use crate::logfile::{self, RotatePolicy};
use crate::proc::ProcessControl;
use crate::runner::{Runner, RunnerConfig, RunnerEvent};

#[derive(Clone)]
pub struct EngineConfig {
	pub mode: Mode,
	pub meta: BTreeMap<String, String>,
	pub service_dir: PathBuf,
	pub log_dir: PathBuf,
	pub limits: Limits,
}

struct Entry {
	service: Service,
	running: bool,
	generation: u64,
	runner: Option<Arc<Runner>>,
}

/// Registry of supervised services. One entry per service from the
/// config, each holding the current runner incarnation if any.
///
/// `running` flips only through [`RunnerEvent`]s whose generation
/// matches the entry, so a replaced incarnation reporting its exit late
/// cannot clobber the state of its successor.
pub struct Engine {
	entries: Mutex<Vec<Entry>>,
	hub: Arc<NotificationHub>,
	control: Arc<dyn ProcessControl>,
	config: EngineConfig,
	events_tx: mpsc::UnboundedSender<RunnerEvent>,
	events_rx: Mutex<Option<mpsc::UnboundedReceiver<RunnerEvent>>>,
	next_generation: AtomicU64,
}

impl Engine {
	pub fn new(
		config: EngineConfig,
		hub: Arc<NotificationHub>,
		control: Arc<dyn ProcessControl>,
	) -> Arc<Self> {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		Arc::new(Self {
			entries: Mutex::new(Vec::new()),
			hub,
			control,
			config,
			events_tx,
			events_rx: Mutex::new(Some(events_rx)),
			next_generation: AtomicU64::new(1),
		})
	}

	/// Register the configured services, wire up the event loop and
	/// launch everything. A service that fails to launch is logged and
	/// left stopped, the rest still come up.
	pub async fn init(self: &Arc<Self>, services: Vec<Service>) {
		{
			let mut entries = self.entries.lock().await;
			for service in services {
				entries.push(Entry {
					service,
					running: false,
					generation: 0,
					runner: None,
				});
			}
		}

		if let Some(mut rx) = self.events_rx.lock().await.take() {
			let engine = self.clone();
			tokio::spawn(async move {
				while let Some(event) = rx.recv().await {
					engine.apply(event).await;
				}
			});
		}

		let execs: Vec<String> = {
			let entries = self.entries.lock().await;
			entries.iter().map(|e| e.service.exec.clone()).collect()
		};
		for exec in execs {
			if let Err(err) = self.start_service(&exec).await {
				warn!(%exec, %err, "launch failed");
			}
		}
	}

	async fn apply(&self, event: RunnerEvent) {
		let mut entries = self.entries.lock().await;
		match event {
			RunnerEvent::Started { exec, generation } => {
				if let Some(entry) = find_mut(&mut entries, &exec) {
					if entry.generation == generation {
						entry.running = true;
					}
				}
			}
			RunnerEvent::Stopped { exec, generation } => {
				if let Some(entry) = find_mut(&mut entries, &exec) {
					if entry.generation == generation {
						entry.running = false;
					}
				}
			}
		}
	}

	/// Start a service, replacing any current incarnation. The entry
	/// only adopts the new runner once its spawn succeeded, so a failed
	/// launch leaves the service cleanly stopped.
	pub async fn start_service(&self, exec: &str) -> Result<()> {
		let mut entries = self.entries.lock().await;
		let entry = find_mut(&mut entries, exec).ok_or(Error::ServiceNotFound)?;

		if let Some(old) = entry.runner.take() {
			if let Err(err) = old.stop().await {
				warn!(exec, %err, "stopping previous incarnation failed");
			}
		}

		let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
		let runner = Runner::new(
			entry.service.clone(),
			generation,
			self.runner_config(),
			self.hub.clone(),
			self.control.clone(),
			self.events_tx.clone(),
		);
		runner.start().await?;

		entry.generation = generation;
		entry.runner = Some(runner);
		Ok(())
	}

	pub async fn stop_service(&self, exec: &str) -> Result<()> {
		let mut entries = self.entries.lock().await;
		let entry = find_mut(&mut entries, exec).ok_or(Error::ServiceNotFound)?;
		match entry.runner.take() {
			Some(runner) => runner.stop().await,
			None => Ok(()),
		}
	}

	pub async fn restart_service(&self, exec: &str) -> Result<()> {
		debug!(exec, "restart requested");
		self.start_service(exec).await
	}

	pub async fn get_service(&self, exec: &str) -> Option<Service> {
		let entries = self.entries.lock().await;
		entries
			.iter()
			.find(|e| e.service.exec == exec)
			.map(|e| e.service.clone())
	}

	/// Current view of every service with a fresh resource sample.
	pub async fn status(&self) -> Vec<ServiceView> {
		let mut entries = self.entries.lock().await;
		let mut views = Vec::with_capacity(entries.len());
		for entry in entries.iter_mut() {
			views.push(view_of(entry).await);
		}
		views
	}

	pub async fn status_of(&self, exec: &str) -> Result<ServiceView> {
		let mut entries = self.entries.lock().await;
		let entry = find_mut(&mut entries, exec).ok_or(Error::ServiceNotFound)?;
		Ok(view_of(entry).await)
	}

	/// Log files currently on disk for a service. Present even while the
	/// service is stopped, logs outlive their runner.
	pub async fn log_files(&self, exec: &str) -> Result<Vec<LogFile>> {
		let entries = self.entries.lock().await;
		if !entries.iter().any(|e| e.service.exec == exec) {
			return Err(Error::ServiceNotFound);
		}
		Ok(logfile::existing_logs(
			&self.config.log_dir,
			exec,
			self.config.mode,
		))
	}

	pub fn log_dir(&self) -> &PathBuf {
		&self.config.log_dir
	}

	pub fn service_dir(&self) -> &PathBuf {
		&self.config.service_dir
	}

	/// Stop all services concurrently and wait for every ladder to
	/// finish. The registry stays locked for the whole drain, so no new
	/// incarnation can slip in underneath.
	pub async fn shutdown(&self) {
		let mut entries = self.entries.lock().await;
		let runners: Vec<Arc<Runner>> = entries.iter_mut().filter_map(|e| e.runner.take()).collect();

		let mut handles = Vec::with_capacity(runners.len());
		for runner in runners {
			handles.push(tokio::spawn(async move {
				if let Err(err) = runner.stop().await {
					warn!(exec = runner.exec(), %err, "shutdown stop failed");
				}
			}));
		}
		for handle in handles {
			let _ = handle.await;
		}
	}

	fn runner_config(&self) -> RunnerConfig {
		let limits = &self.config.limits;
		RunnerConfig {
			mode: self.config.mode,
			service_dir: self.config.service_dir.clone(),
			log_dir: self.config.log_dir.clone(),
			stop_grace: Duration::from_millis(limits.stop_grace_ms),
			read_chunk: limits.read_chunk_bytes,
			stat_interval: Duration::from_secs(limits.stat_interval_secs),
			rotate: RotatePolicy {
				max_size: limits.max_log_size_mb * 1024 * 1024,
				max_backups: limits.max_log_backups,
				max_age_days: limits.max_log_age_days,
			},
			meta: self.config.meta.clone(),
		}
	}
}

fn find_mut<'a>(entries: &'a mut [Entry], exec: &str) -> Option<&'a mut Entry> {
	entries.iter_mut().find(|e| e.service.exec == exec)
}

async fn view_of(entry: &mut Entry) -> ServiceView {
	let (pid, stats) = match entry.runner.as_ref() {
		Some(runner) => {
			runner.check_stat().await;
			(runner.pid().await.unwrap_or(0), runner.stats().await)
		}
		None => (0, Default::default()),
	};
	ServiceView {
		pid,
		tag: entry.service.tag.clone(),
		name: entry.service.name.clone(),
		exec: entry.service.exec.clone(),
		running: entry.running,
		mem: stats.mem,
		cpu: stats.cpu,
		fd_num: stats.fd_num,
		connections: stats.connections,
		paths: stats.paths,
	}
}
