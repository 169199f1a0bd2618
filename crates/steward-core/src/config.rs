use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::service::{Mode, Service};

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Read {
		path: String,
		#[source]
		source: io::Error,
	},
	#[error("failed to parse {path}: {source}")]
	Parse {
		path: String,
		#[source]
		source: serde_yaml::Error,
	},
	#[error("failed to write {path}: {source}")]
	Write {
		path: String,
		#[source]
		source: io::Error,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuth {
	pub username: String,
	pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub accounts: Vec<BasicAuth>,
	#[serde(default = "default_port")]
	pub port: u16,
	#[serde(default)]
	pub services: Vec<Service>,
	#[serde(default)]
	pub mode: Mode,
	#[serde(default, rename = "meta-variables")]
	pub meta_vars: BTreeMap<String, String>,
	#[serde(default)]
	pub limits: Limits,
}

fn default_port() -> u16 {
	7798
}

/// Tunables for supervision and log fan-out. Every field has a default, so
/// config files only mention what they change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
	#[serde(default = "default_stop_grace_ms")]
	pub stop_grace_ms: u64,
	#[serde(default = "default_read_chunk_bytes")]
	pub read_chunk_bytes: usize,
	#[serde(default = "default_replay_chunks")]
	pub replay_chunks: usize,
	#[serde(default = "default_subscriber_queue")]
	pub subscriber_queue: usize,
	#[serde(default = "default_send_deadline_ms")]
	pub send_deadline_ms: u64,
	#[serde(default = "default_stat_interval_secs")]
	pub stat_interval_secs: u64,
	#[serde(default = "default_max_log_size_mb")]
	pub max_log_size_mb: u64,
	#[serde(default = "default_max_log_backups")]
	pub max_log_backups: u32,
	#[serde(default = "default_max_log_age_days")]
	pub max_log_age_days: u32,
}

impl Default for Limits {
	fn default() -> Self {
		Self {
			stop_grace_ms: default_stop_grace_ms(),
			read_chunk_bytes: default_read_chunk_bytes(),
			replay_chunks: default_replay_chunks(),
			subscriber_queue: default_subscriber_queue(),
			send_deadline_ms: default_send_deadline_ms(),
			stat_interval_secs: default_stat_interval_secs(),
			max_log_size_mb: default_max_log_size_mb(),
			max_log_backups: default_max_log_backups(),
			max_log_age_days: default_max_log_age_days(),
		}
	}
}

fn default_stop_grace_ms() -> u64 {
	500
}
fn default_read_chunk_bytes() -> usize {
	2048
}
fn default_replay_chunks() -> usize {
	200
}
fn default_subscriber_queue() -> usize {
	100
}
fn default_send_deadline_ms() -> u64 {
	1000
}
fn default_stat_interval_secs() -> u64 {
	4
}
fn default_max_log_size_mb() -> u64 {
	100
}
fn default_max_log_backups() -> u32 {
	3
}
fn default_max_log_age_days() -> u32 {
	28
}

/// Load a config file and expand `meta-variables` into every service's env
/// entries.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
	let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
		path: path.display().to_string(),
		source,
	})?;
	let mut config: Config =
		serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
			path: path.display().to_string(),
			source,
		})?;

	for service in &mut config.services {
		for entry in &mut service.env {
			*entry = apply_meta(entry, &config.meta_vars);
		}
	}

	Ok(config)
}

pub fn save(config: &Config, path: &Path) -> Result<(), ConfigError> {
	let content = serde_yaml::to_string(config).map_err(|source| ConfigError::Parse {
		path: path.display().to_string(),
		source,
	})?;
	std::fs::write(path, content).map_err(|source| ConfigError::Write {
		path: path.display().to_string(),
		source,
	})
}

/// Starter config written when the daemon is launched without one.
pub fn generate_default() -> Config {
	Config {
		name: "deploy".into(),
		accounts: vec![BasicAuth {
			username: "admin".into(),
			password: "admin".into(),
		}],
		port: default_port(),
		services: vec![Service {
			name: "test".into(),
			tag: "default".into(),
			exec: "echo".into(),
			folder: String::new(),
			env: vec!["TEST=1".into()],
			args: vec!["-port=1".into(), "-conf=local.config.yaml".into()],
		}],
		mode: Mode::Staging,
		meta_vars: BTreeMap::new(),
		limits: Limits::default(),
	}
}

/// The three working subdirectories the daemon expects.
pub fn ensure_dirs() -> io::Result<()> {
	std::fs::create_dir_all("service")?;
	std::fs::create_dir_all("log")?;
	std::fs::create_dir_all("binary")
}

impl Config {
	pub fn account_map(&self) -> BTreeMap<String, String> {
		self.accounts
			.iter()
			.map(|a| (a.username.clone(), a.password.clone()))
			.collect()
	}
}

/// Replace every meta-variable key occurring in `text` with its value.
/// Longer keys win over shorter ones that prefix them.
pub fn apply_meta(text: &str, meta: &BTreeMap<String, String>) -> String {
	let mut keys: Vec<&String> = meta.keys().collect();
	keys.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
	let mut out = text.to_string();
	for key in keys {
		out = out.replace(key.as_str(), &meta[key.as_str()]);
	}
	out
}

/// Materialize `@file` argument templates.
///
/// For each `@name` token found in `args`, reads `<service_dir>/name`,
/// substitutes meta-variables, and writes the result to
/// `<service_dir>/@name`. The process is expected to read the prefixed copy.
/// Missing templates are skipped.
pub fn materialize_meta_files(args: &[String], meta: &BTreeMap<String, String>, service_dir: &Path) {
	for arg in args {
		for token in file_tokens(arg) {
			let _ = materialize_one(token, meta, service_dir);
		}
	}
}

fn materialize_one(name: &str, meta: &BTreeMap<String, String>, service_dir: &Path) -> io::Result<()> {
	let data = std::fs::read(service_dir.join(name))?;
	let data = match String::from_utf8(data) {
		Ok(text) => apply_meta(&text, meta).into_bytes(),
		Err(err) => err.into_bytes(),
	};
	std::fs::write(service_dir.join(format!("@{}", name)), data)
}

/// Names following `@` markers in an argument, up to whitespace.
fn file_tokens(arg: &str) -> Vec<&str> {
	let mut tokens = Vec::new();
	let mut rest = arg;
	while let Some(pos) = rest.find('@') {
		let tail = &rest[pos + 1..];
		let end = tail
			.find(|c: char| c.is_whitespace() || c == '@')
			.unwrap_or(tail.len());
		if end > 0 {
			tokens.push(&tail[..end]);
		}
		rest = &tail[end..];
	}
	tokens
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;
	use std::sync::atomic::{AtomicU32, Ordering};

	static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

	fn temp_dir(name: &str) -> PathBuf {
		let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
		let dir = std::env::temp_dir().join(format!(
			"steward-core-{}-{}-{}",
			name,
			std::process::id(),
			id
		));
		let _ = std::fs::remove_dir_all(&dir);
		std::fs::create_dir_all(&dir).unwrap();
		dir
	}

	#[test]
	fn test_parse_with_defaults() {
		let yaml = r#"
name: deploy
mode: prod
accounts:
  - username: ops
    password: hunter2
services:
  - name: api
    exec: api-server
"#;
		let config: Config = serde_yaml::from_str(yaml).unwrap();
		assert_eq!(config.port, 7798);
		assert_eq!(config.mode, Mode::Prod);
		assert_eq!(config.services.len(), 1);
		assert!(config.services[0].args.is_empty());
		assert_eq!(config.limits.stop_grace_ms, 500);
		assert_eq!(config.limits.replay_chunks, 200);
		assert_eq!(config.account_map().get("ops").map(String::as_str), Some("hunter2"));
	}

	#[test]
	fn test_load_expands_env_meta() {
		let dir = temp_dir("load");
		let path = dir.join("config.yaml");
		std::fs::write(
			&path,
			r#"
mode: staging
meta-variables:
  "{DB}": "postgres://localhost"
services:
  - name: api
    exec: api-server
    env:
      - "DATABASE={DB}"
"#,
		)
		.unwrap();
		let config = load(&path).unwrap();
		assert_eq!(config.services[0].env[0], "DATABASE=postgres://localhost");
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[test]
	fn test_apply_meta_longest_key_first() {
		let mut meta = BTreeMap::new();
		meta.insert("{HOST}".to_string(), "a".to_string());
		meta.insert("{HOST_PORT}".to_string(), "a:1".to_string());
		assert_eq!(apply_meta("addr={HOST_PORT}", &meta), "addr=a:1");
		assert_eq!(apply_meta("addr={HOST}", &meta), "addr=a");
	}

	#[test]
	fn test_file_tokens() {
		assert_eq!(file_tokens("-conf=@app.yaml"), vec!["app.yaml"]);
		assert_eq!(file_tokens("@a @b"), vec!["a", "b"]);
		assert!(file_tokens("plain").is_empty());
	}

	#[test]
	fn test_materialize_meta_files() {
		let dir = temp_dir("meta");
		std::fs::write(dir.join("app.yaml"), "port: {PORT}\n").unwrap();
		let mut meta = BTreeMap::new();
		meta.insert("{PORT}".to_string(), "9000".to_string());
		materialize_meta_files(&["-conf=@app.yaml".to_string()], &meta, &dir);
		let out = std::fs::read_to_string(dir.join("@app.yaml")).unwrap();
		assert_eq!(out, "port: 9000\n");
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[test]
	fn test_default_round_trip() {
		let dir = temp_dir("default");
		let path = dir.join("config.yaml");
		save(&generate_default(), &path).unwrap();
		let config = load(&path).unwrap();
		assert_eq!(config.name, "deploy");
		assert_eq!(config.accounts[0].username, "admin");
		assert_eq!(config.services[0].exec, "echo");
		let _ = std::fs::remove_dir_all(&dir);
	}
}
