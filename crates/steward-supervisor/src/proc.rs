use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

/// What to launch, fully resolved: program path relative to `dir`, plain
/// argv, and `KEY=value` env entries layered over the inherited environment.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
	pub program: String,
	pub args: Vec<String>,
	pub env: Vec<String>,
	pub dir: PathBuf,
}

/// A spawned child: the control handle plus its piped output streams.
pub struct SpawnedProcess {
	pub handle: Box<dyn ProcessHandle>,
	pub stdout: Box<dyn AsyncRead + Send + Unpin>,
	pub stderr: Box<dyn AsyncRead + Send + Unpin>,
}

/// Launches processes. Split from [`ProcessHandle`] so tests can substitute
/// a fake that scripts output and signal behavior.
pub trait ProcessControl: Send + Sync {
	fn spawn(&self, spec: &SpawnSpec) -> io::Result<SpawnedProcess>;
}

/// Signal-level control over one spawned child.
pub trait ProcessHandle: Send {
	fn pid(&self) -> u32;
	/// SIGINT to the process itself.
	fn interrupt(&self) -> io::Result<()>;
	/// SIGKILL to the process itself.
	fn force_kill(&self) -> io::Result<()>;
	/// SIGKILL to the whole process group. A group that is already gone
	/// counts as success.
	fn kill_group(&self) -> io::Result<()>;
	/// Detach from the child without waiting for it.
	fn release(&mut self);
}

/// The real thing: spawns through [`tokio::process`] with the child in its
/// own process group, signalling via `nix`.
pub struct UnixSpawner;

impl ProcessControl for UnixSpawner {
	fn spawn(&self, spec: &SpawnSpec) -> io::Result<SpawnedProcess> {
		let mut cmd = Command::new(&spec.program);
		cmd.args(&spec.args)
			.current_dir(&spec.dir)
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.process_group(0);
		for entry in &spec.env {
			if let Some((key, val)) = entry.split_once('=') {
				cmd.env(key, val);
			}
		}
		// reparented children must not outlive the daemon
		#[cfg(target_os = "linux")]
		unsafe {
			cmd.pre_exec(|| {
				nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGKILL)
					.map_err(io::Error::from)
			});
		}

		let mut child = cmd.spawn()?;
		let stdout = child
			.stdout
			.take()
			.ok_or_else(|| io::Error::other("child stdout was not piped"))?;
		let stderr = child
			.stderr
			.take()
			.ok_or_else(|| io::Error::other("child stderr was not piped"))?;
		let pid = child.id().unwrap_or(0);

		Ok(SpawnedProcess {
			handle: Box::new(UnixProcess {
				child: Some(child),
				pid,
			}),
			stdout: Box::new(stdout),
			stderr: Box::new(stderr),
		})
	}
}

struct UnixProcess {
	// kept so tokio reaps the child in the background once it exits
	child: Option<Child>,
	pid: u32,
}

impl UnixProcess {
	fn signal(&self, signal: nix::sys::signal::Signal) -> io::Result<()> {
		nix::sys::signal::kill(nix::unistd::Pid::from_raw(self.pid as i32), signal)
			.map_err(io::Error::from)
	}
}

impl ProcessHandle for UnixProcess {
	fn pid(&self) -> u32 {
		self.pid
	}

	fn interrupt(&self) -> io::Result<()> {
		self.signal(nix::sys::signal::Signal::SIGINT)
	}

	fn force_kill(&self) -> io::Result<()> {
		self.signal(nix::sys::signal::Signal::SIGKILL)
	}

	fn kill_group(&self) -> io::Result<()> {
		use nix::sys::signal::{killpg, Signal};
		match killpg(nix::unistd::Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
			Err(nix::errno::Errno::ESRCH) => Ok(()),
			other => other.map_err(io::Error::from),
		}
	}

	fn release(&mut self) {
		self.child.take();
	}
}
