use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use steward_core::clock;
use steward_core::{LogFile, Mode};

/// Which output stream of a child a log file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
	Stdout,
	Stderr,
}

impl std::fmt::Display for Stream {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Stream::Stdout => f.write_str("stdout"),
			Stream::Stderr => f.write_str("stderr"),
		}
	}
}

#[derive(Debug, Clone)]
pub struct RotatePolicy {
	pub max_size: u64,
	pub max_backups: u32,
	pub max_age_days: u32,
}

/// Base log file name for one stream of one service.
pub fn log_name(exec: &str, mode: Mode, stream: Stream) -> String {
	format!("{}-{}.{}.log", exec, mode, stream)
}

/// `{name, size}` for the base log files that exist on disk.
pub fn existing_logs(log_dir: &Path, exec: &str, mode: Mode) -> Vec<LogFile> {
	let mut files = Vec::new();
	for stream in [Stream::Stdout, Stream::Stderr] {
		let name = log_name(exec, mode, stream);
		if let Ok(meta) = fs::metadata(log_dir.join(&name)) {
			files.push(LogFile {
				name,
				size: meta.len(),
			});
		}
	}
	files
}

/// Append-only writer for one stream, renaming the file aside once it
/// crosses the size cap and pruning old backups by count and age.
pub struct RotatingLog {
	file: Option<File>,
	path: PathBuf,
	dir: PathBuf,
	exec: String,
	mode: Mode,
	stream: Stream,
	bytes_written: u64,
	policy: RotatePolicy,
}

impl RotatingLog {
	pub fn open(dir: &Path, exec: &str, mode: Mode, stream: Stream, policy: RotatePolicy) -> Self {
		let _ = fs::create_dir_all(dir);
		let path = dir.join(log_name(exec, mode, stream));
		let file = OpenOptions::new().create(true).append(true).open(&path).ok();
		let bytes_written = file
			.as_ref()
			.and_then(|f| f.metadata().ok())
			.map(|m| m.len())
			.unwrap_or(0);
		Self {
			file,
			path,
			dir: dir.to_path_buf(),
			exec: exec.to_string(),
			mode,
			stream,
			bytes_written,
			policy,
		}
	}

	/// Write one chunk as a timestamped line. I/O failures are swallowed;
	/// losing log lines must never take the capture loop down.
	pub fn append(&mut self, chunk: &[u8]) {
		if let Some(file) = self.file.as_mut() {
			let stamp = clock::line_stamp(clock::now_secs());
			let mut line = Vec::with_capacity(chunk.len() + stamp.len() + 4);
			line.extend_from_slice(stamp.as_bytes());
			line.extend_from_slice(b" > ");
			line.extend_from_slice(chunk);
			if !chunk.ends_with(b"\n") {
				line.push(b'\n');
			}
			let _ = file.write_all(&line);
			self.bytes_written += line.len() as u64;
			if self.bytes_written >= self.policy.max_size {
				self.rotate();
			}
		}
	}

	fn rotate(&mut self) {
		if let Some(file) = self.file.take() {
			drop(file);
		}

		let rotated = self.rotated_name();
		let _ = fs::rename(&self.path, self.dir.join(rotated));

		self.file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.ok();
		self.bytes_written = 0;

		self.prune();
	}

	fn rotated_name(&self) -> String {
		let (date, hour, minute) = clock::now_ymdhm();
		let stem = format!("{}-{}.{}", self.exec, self.mode, self.stream);
		let candidate = format!("{}.{}-{}.log", stem, date, hour);
		if self.dir.join(&candidate).exists() {
			format!("{}.{}-{}{}.log", stem, date, hour, minute)
		} else {
			candidate
		}
	}

	fn prune(&self) {
		let stem = format!("{}-{}.{}.", self.exec, self.mode, self.stream);
		let base = log_name(&self.exec, self.mode, self.stream);

		let entries = match fs::read_dir(&self.dir) {
			Ok(e) => e,
			Err(_) => return,
		};
		let mut backups: Vec<PathBuf> = Vec::new();
		for entry in entries.flatten() {
			let name = entry.file_name().to_string_lossy().to_string();
			if name.starts_with(&stem) && name.ends_with(".log") && name != base {
				backups.push(entry.path());
			}
		}

		if self.policy.max_age_days > 0 {
			let cutoff =
				clock::now_secs().saturating_sub(self.policy.max_age_days as u64 * 86400);
			backups.retain(|path| {
				let name = path.file_name().unwrap_or_default().to_string_lossy();
				match parse_backup_date(&name, &stem) {
					Some((y, m, d)) if clock::date_to_epoch(y, m, d) < cutoff => {
						let _ = fs::remove_file(path);
						false
					}
					_ => true,
				}
			});
		}

		if self.policy.max_backups > 0 && backups.len() > self.policy.max_backups as usize {
			backups.sort_by(|a, b| {
				let a_time = a.metadata().and_then(|m| m.modified()).ok();
				let b_time = b.metadata().and_then(|m| m.modified()).ok();
				a_time.cmp(&b_time)
			});
			let to_remove = backups.len() - self.policy.max_backups as usize;
			for path in backups.iter().take(to_remove) {
				let _ = fs::remove_file(path);
			}
		}
	}
}

/// Date embedded in a rotated backup name, `(year, month, day)`.
fn parse_backup_date(filename: &str, stem: &str) -> Option<(u32, u32, u32)> {
	let rest = filename.strip_prefix(stem)?.strip_suffix(".log")?;
	let mut parts = rest.splitn(3, '-');
	let year: u32 = parts.next()?.parse().ok()?;
	let mmdd = parts.next()?;
	if mmdd.len() != 4 {
		return None;
	}
	let month: u32 = mmdd.get(..2)?.parse().ok()?;
	let day: u32 = mmdd.get(2..)?.parse().ok()?;
	Some((year, month, day))
}
