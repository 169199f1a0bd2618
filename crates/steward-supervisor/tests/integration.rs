use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Notify};

use steward_core::{Limits, Mode, Service};
use steward_supervisor::{
	Engine, EngineConfig, Error, HubConfig, NotificationHub, ProcessControl, ProcessHandle,
	RotatePolicy, Runner, RunnerConfig, SpawnSpec, SpawnedProcess, UnixSpawner,
};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_dir(name: &str) -> PathBuf {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	let dir = std::env::temp_dir().join(format!("steward-test-{}-{}", n, name));
	let _ = std::fs::create_dir_all(&dir);
	dir
}

fn test_limits() -> Limits {
	Limits {
		stop_grace_ms: 30,
		read_chunk_bytes: 2048,
		replay_chunks: 16,
		subscriber_queue: 8,
		send_deadline_ms: 200,
		stat_interval_secs: 4,
		max_log_size_mb: 1,
		max_log_backups: 2,
		max_log_age_days: 0,
	}
}

fn test_hub() -> Arc<NotificationHub> {
	NotificationHub::new(HubConfig {
		replay_chunks: 16,
		subscriber_queue: 8,
		send_deadline: Duration::from_millis(200),
	})
}

fn test_engine(
	root: &Path,
	hub: Arc<NotificationHub>,
	control: Arc<dyn ProcessControl>,
) -> Arc<Engine> {
	Engine::new(
		EngineConfig {
			mode: Mode::Staging,
			meta: BTreeMap::new(),
			service_dir: root.join("service"),
			log_dir: root.join("log"),
			limits: test_limits(),
		},
		hub,
		control,
	)
}

fn plain_service(exec: &str) -> Service {
	Service {
		name: exec.to_string(),
		tag: String::new(),
		exec: exec.to_string(),
		folder: String::new(),
		env: vec![],
		args: vec![],
	}
}

fn write_script(dir: &Path, name: &str, body: &str) {
	use std::os::unix::fs::PermissionsExt;
	let path = dir.join(name);
	std::fs::write(&path, body).unwrap();
	std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

// --- Fake process control ---

struct FakeControl {
	output: Vec<u8>,
	exit_on_its_own: bool,
	fail_spawn: bool,
	fail_group_kill: bool,
	interrupt_exits: bool,
	ops: Arc<StdMutex<Vec<String>>>,
	next_pid: AtomicU32,
}

fn fake() -> FakeControl {
	FakeControl {
		output: Vec::new(),
		exit_on_its_own: false,
		fail_spawn: false,
		fail_group_kill: false,
		interrupt_exits: false,
		ops: Arc::new(StdMutex::new(Vec::new())),
		next_pid: AtomicU32::new(4000),
	}
}

impl FakeControl {
	fn ops(&self) -> Vec<String> {
		self.ops.lock().unwrap().clone()
	}
}

impl ProcessControl for FakeControl {
	fn spawn(&self, spec: &SpawnSpec) -> io::Result<SpawnedProcess> {
		self.ops
			.lock()
			.unwrap()
			.push(format!("spawn {}", spec.program));
		if self.fail_spawn {
			return Err(io::Error::other("spawn refused"));
		}

		let (child_out, mut out_w) = tokio::io::duplex(64 * 1024);
		let (child_err, err_w) = tokio::io::duplex(8 * 1024);
		let exit = Arc::new(Notify::new());

		let output = self.output.clone();
		let exit_on_its_own = self.exit_on_its_own;
		let wait_exit = exit.clone();
		tokio::spawn(async move {
			if !output.is_empty() {
				let _ = out_w.write_all(&output).await;
			}
			if !exit_on_its_own {
				wait_exit.notified().await;
			}
			// dropping the write halves is how the fake child dies
			drop(out_w);
			drop(err_w);
		});

		Ok(SpawnedProcess {
			handle: Box::new(FakeHandle {
				pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
				ops: self.ops.clone(),
				fail_group_kill: self.fail_group_kill,
				interrupt_exits: self.interrupt_exits,
				exit,
			}),
			stdout: Box::new(child_out),
			stderr: Box::new(child_err),
		})
	}
}

struct FakeHandle {
	pid: u32,
	ops: Arc<StdMutex<Vec<String>>>,
	fail_group_kill: bool,
	interrupt_exits: bool,
	exit: Arc<Notify>,
}

impl ProcessHandle for FakeHandle {
	fn pid(&self) -> u32 {
		self.pid
	}

	fn interrupt(&self) -> io::Result<()> {
		self.ops.lock().unwrap().push("interrupt".into());
		if self.interrupt_exits {
			self.exit.notify_one();
		}
		Ok(())
	}

	fn force_kill(&self) -> io::Result<()> {
		self.ops.lock().unwrap().push("kill".into());
		Ok(())
	}

	fn kill_group(&self) -> io::Result<()> {
		self.ops.lock().unwrap().push("kill_group".into());
		if self.fail_group_kill {
			return Err(io::Error::other("group already reaped"));
		}
		self.exit.notify_one();
		Ok(())
	}

	fn release(&mut self) {
		self.ops.lock().unwrap().push("release".into());
	}
}

// --- Engine: lifecycle with fake control ---

#[tokio::test]
async fn stop_runs_the_full_escalation_ladder() {
	let root = temp_dir("ladder");
	let control = Arc::new(fake());
	let engine = test_engine(&root, test_hub(), control.clone());

	engine.init(vec![plain_service("svc")]).await;
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(engine.status_of("svc").await.unwrap().running);

	engine.stop_service("svc").await.unwrap();
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(!engine.status_of("svc").await.unwrap().running);

	assert_eq!(
		control.ops(),
		vec!["spawn ./svc", "interrupt", "kill", "kill_group", "release"]
	);

	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn group_kill_failure_surfaces_after_the_ladder() {
	let root = temp_dir("ladder-fail");
	let control = Arc::new(FakeControl {
		fail_group_kill: true,
		..fake()
	});
	let engine = test_engine(&root, test_hub(), control.clone());

	engine.init(vec![plain_service("svc")]).await;
	tokio::time::sleep(Duration::from_millis(100)).await;

	let err = engine.stop_service("svc").await.unwrap_err();
	assert!(matches!(err, Error::Escalation { .. }));

	// every rung still ran, including release
	assert_eq!(
		control.ops(),
		vec!["spawn ./svc", "interrupt", "kill", "kill_group", "release"]
	);

	// the failure does not leave the service marked running
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(!engine.status_of("svc").await.unwrap().running);

	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn early_exit_on_interrupt_still_reports_ok() {
	let root = temp_dir("interrupt-exit");
	let control = Arc::new(FakeControl {
		interrupt_exits: true,
		..fake()
	});
	let engine = test_engine(&root, test_hub(), control.clone());

	engine.init(vec![plain_service("svc")]).await;
	tokio::time::sleep(Duration::from_millis(100)).await;

	// the child dies on the first signal, the remaining rungs still run
	engine.stop_service("svc").await.unwrap();
	assert_eq!(
		control.ops(),
		vec!["spawn ./svc", "interrupt", "kill", "kill_group", "release"]
	);

	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(!engine.status_of("svc").await.unwrap().running);

	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn spawn_failure_leaves_service_stopped() {
	let root = temp_dir("spawn-fail");
	let control = Arc::new(FakeControl {
		fail_spawn: true,
		..fake()
	});
	let engine = test_engine(&root, test_hub(), control.clone());

	engine.init(vec![plain_service("svc")]).await;
	tokio::time::sleep(Duration::from_millis(100)).await;

	let view = engine.status_of("svc").await.unwrap();
	assert!(!view.running);
	assert_eq!(view.pid, 0);

	let err = engine.start_service("svc").await.unwrap_err();
	assert!(matches!(err, Error::Launch { .. }));

	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn natural_exit_flips_running_and_keeps_replay() {
	let root = temp_dir("natural-exit");
	let hub = test_hub();
	let control = Arc::new(FakeControl {
		output: b"fake-hello\n".to_vec(),
		exit_on_its_own: true,
		..fake()
	});
	let engine = test_engine(&root, hub.clone(), control.clone());

	let (id, mut rx) = hub.join("svc").await;
	engine.init(vec![plain_service("svc")]).await;

	let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv())
		.await
		.unwrap()
		.unwrap();
	assert_eq!(chunk, b"fake-hello\n");
	hub.leave(id).await;

	tokio::time::sleep(Duration::from_millis(200)).await;
	assert!(!engine.status_of("svc").await.unwrap().running);

	// late joiners still see the output of the dead incarnation
	let (id, mut rx) = hub.join("svc").await;
	let replay = rx.try_recv().unwrap();
	assert_eq!(replay, b"fake-hello\n");
	hub.leave(id).await;

	// and it made it into the log file
	let log = std::fs::read_to_string(root.join("log/svc-staging.stdout.log")).unwrap();
	assert!(log.contains("fake-hello"), "log was: {log:?}");

	let files = engine.log_files("svc").await.unwrap();
	assert!(files
		.iter()
		.any(|f| f.name == "svc-staging.stdout.log" && f.size > 0));

	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn restart_survives_stale_exit_events() {
	let root = temp_dir("restart");
	let control = Arc::new(fake());
	let engine = test_engine(&root, test_hub(), control.clone());

	engine.init(vec![plain_service("svc")]).await;
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(engine.status_of("svc").await.unwrap().running);

	engine.restart_service("svc").await.unwrap();
	tokio::time::sleep(Duration::from_millis(200)).await;

	// the old incarnation reported its exit during the restart, the
	// replacement must still be considered running
	let view = engine.status_of("svc").await.unwrap();
	assert!(view.running);
	assert!(view.pid > 0);

	let spawns = control.ops().iter().filter(|op| op.starts_with("spawn")).count();
	assert_eq!(spawns, 2);

	engine.shutdown().await;
	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn unknown_service_is_an_error() {
	let root = temp_dir("unknown");
	let engine = test_engine(&root, test_hub(), Arc::new(fake()));
	engine.init(vec![]).await;

	assert!(matches!(
		engine.start_service("ghost").await.unwrap_err(),
		Error::ServiceNotFound
	));
	assert!(matches!(
		engine.stop_service("ghost").await.unwrap_err(),
		Error::ServiceNotFound
	));
	assert!(matches!(
		engine.restart_service("ghost").await.unwrap_err(),
		Error::ServiceNotFound
	));
	assert!(matches!(
		engine.log_files("ghost").await.unwrap_err(),
		Error::ServiceNotFound
	));
	assert!(engine.get_service("ghost").await.is_none());

	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn stop_when_not_running_is_ok() {
	let root = temp_dir("stop-idle");
	let control = Arc::new(FakeControl {
		fail_spawn: true,
		..fake()
	});
	let engine = test_engine(&root, test_hub(), control.clone());

	engine.init(vec![plain_service("svc")]).await;
	assert!(engine.stop_service("svc").await.is_ok());
	assert!(engine.stop_service("svc").await.is_ok());

	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn shutdown_stops_everything() {
	let root = temp_dir("shutdown");
	let control = Arc::new(fake());
	let engine = test_engine(&root, test_hub(), control.clone());

	engine
		.init(vec![plain_service("one"), plain_service("two")])
		.await;
	tokio::time::sleep(Duration::from_millis(100)).await;

	engine.shutdown().await;
	tokio::time::sleep(Duration::from_millis(100)).await;

	for view in engine.status().await {
		assert!(!view.running, "{} still running", view.exec);
		assert_eq!(view.pid, 0);
	}

	let _ = std::fs::remove_dir_all(&root);
}

// --- Runner: one-shot semantics ---

#[tokio::test]
async fn runner_cannot_start_twice() {
	let root = temp_dir("runner-twice");
	let control = Arc::new(fake());
	let (tx, _rx) = mpsc::unbounded_channel();
	let runner = Runner::new(
		plain_service("svc"),
		7,
		RunnerConfig {
			mode: Mode::Staging,
			service_dir: root.join("service"),
			log_dir: root.join("log"),
			stop_grace: Duration::from_millis(30),
			read_chunk: 2048,
			stat_interval: Duration::from_secs(4),
			rotate: RotatePolicy {
				max_size: 1024 * 1024,
				max_backups: 2,
				max_age_days: 0,
			},
			meta: BTreeMap::new(),
		},
		test_hub(),
		control.clone(),
		tx,
	);

	runner.start().await.unwrap();
	let err = runner.start().await.unwrap_err();
	assert!(matches!(err, Error::AlreadyStarted { .. }));

	runner.stop().await.unwrap();
	let _ = std::fs::remove_dir_all(&root);
}

// --- Engine: real processes ---

#[tokio::test]
async fn real_process_output_is_captured() {
	let root = temp_dir("real-output");
	let service_dir = root.join("service");
	std::fs::create_dir_all(&service_dir).unwrap();
	write_script(&service_dir, "emit", "#!/bin/sh\necho steward-live-line\n");

	let hub = test_hub();
	let engine = test_engine(&root, hub.clone(), Arc::new(UnixSpawner));

	let (id, mut rx) = hub.join("emit").await;
	engine.init(vec![plain_service("emit")]).await;

	let chunk = tokio::time::timeout(Duration::from_secs(5), rx.recv())
		.await
		.expect("no output before timeout")
		.unwrap();
	assert!(String::from_utf8_lossy(&chunk).contains("steward-live-line"));
	hub.leave(id).await;

	// Wait for the exit to be observed
	tokio::time::sleep(Duration::from_millis(500)).await;
	assert!(!engine.status_of("emit").await.unwrap().running);

	let log = std::fs::read_to_string(root.join("log/emit-staging.stdout.log")).unwrap();
	assert!(log.contains("steward-live-line"), "log was: {log:?}");

	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn real_process_stop_kills_sleeper() {
	let root = temp_dir("real-stop");
	let service_dir = root.join("service");
	std::fs::create_dir_all(&service_dir).unwrap();
	write_script(&service_dir, "sleeper", "#!/bin/sh\nexec sleep 60\n");

	let engine = test_engine(&root, test_hub(), Arc::new(UnixSpawner));
	engine.init(vec![plain_service("sleeper")]).await;
	tokio::time::sleep(Duration::from_millis(300)).await;

	let view = engine.status_of("sleeper").await.unwrap();
	assert!(view.running);
	assert!(view.pid > 0);

	engine.stop_service("sleeper").await.unwrap();
	tokio::time::sleep(Duration::from_millis(200)).await;

	let view = engine.status_of("sleeper").await.unwrap();
	assert!(!view.running);
	assert_eq!(view.pid, 0);

	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn real_process_sees_materialized_meta_files() {
	let root = temp_dir("real-meta");
	let service_dir = root.join("service");
	std::fs::create_dir_all(&service_dir).unwrap();
	write_script(&service_dir, "reader", "#!/bin/sh\ncat \"$1\"\n");
	std::fs::write(service_dir.join("conf"), "PORT={port}\n").unwrap();

	let hub = test_hub();
	let mut meta = BTreeMap::new();
	meta.insert("{port}".to_string(), "7777".to_string());
	let engine = Engine::new(
		EngineConfig {
			mode: Mode::Staging,
			meta,
			service_dir: service_dir.clone(),
			log_dir: root.join("log"),
			limits: test_limits(),
		},
		hub.clone(),
		Arc::new(UnixSpawner),
	);

	let (id, mut rx) = hub.join("reader").await;
	let mut service = plain_service("reader");
	service.args = vec!["@conf".to_string()];
	engine.init(vec![service]).await;

	let chunk = tokio::time::timeout(Duration::from_secs(5), rx.recv())
		.await
		.expect("no output before timeout")
		.unwrap();
	assert!(
		String::from_utf8_lossy(&chunk).contains("PORT=7777"),
		"got: {:?}",
		String::from_utf8_lossy(&chunk)
	);
	hub.leave(id).await;

	let _ = std::fs::remove_dir_all(&root);
}
