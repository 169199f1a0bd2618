use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One supervised executable as declared in the config file.
///
/// Whether the service is currently running is not part of this record; the
/// engine tracks that per registry entry and reports it through
/// [`ServiceView`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
	pub name: String,
	#[serde(default)]
	pub tag: String,
	pub exec: String,
	/// Non-empty when the service ships as an extracted archive folder
	/// instead of a single binary.
	#[serde(default)]
	pub folder: String,
	/// `KEY=value` entries appended to the inherited environment.
	#[serde(default)]
	pub env: Vec<String>,
	#[serde(default)]
	pub args: Vec<String>,
}

impl Service {
	pub fn packed(&self) -> bool {
		!self.folder.is_empty()
	}

	/// Directory the process runs in: the packed folder for archive
	/// services, the service dir itself otherwise.
	pub fn work_dir(&self, service_dir: &Path) -> PathBuf {
		if self.packed() {
			service_dir.join(&self.folder)
		} else {
			service_dir.to_path_buf()
		}
	}

	pub fn exec_path(&self, service_dir: &Path) -> PathBuf {
		self.work_dir(service_dir).join(&self.exec)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
	#[default]
	Staging,
	Prod,
}

impl Mode {
	pub fn as_str(self) -> &'static str {
		match self {
			Mode::Staging => "staging",
			Mode::Prod => "prod",
		}
	}
}

impl std::fmt::Display for Mode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Wire view of a service combined with its latest process sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
	pub pid: u32,
	pub tag: String,
	pub name: String,
	pub exec: String,
	pub running: bool,
	pub mem: u64,
	pub cpu: f64,
	pub fd_num: u32,
	pub connections: Vec<String>,
	pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFile {
	pub name: String,
	pub size: u64,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn packed_service() -> Service {
		Service {
			name: "api".into(),
			tag: "v2".into(),
			exec: "api-server".into(),
			folder: "api-bundle".into(),
			env: vec![],
			args: vec![],
		}
	}

	#[test]
	fn test_packed_paths() {
		let service = packed_service();
		assert!(service.packed());
		let base = Path::new("service");
		assert_eq!(service.work_dir(base), PathBuf::from("service/api-bundle"));
		assert_eq!(
			service.exec_path(base),
			PathBuf::from("service/api-bundle/api-server")
		);
	}

	#[test]
	fn test_plain_paths() {
		let mut service = packed_service();
		service.folder = String::new();
		assert!(!service.packed());
		let base = Path::new("service");
		assert_eq!(service.work_dir(base), PathBuf::from("service"));
		assert_eq!(service.exec_path(base), PathBuf::from("service/api-server"));
	}

	#[test]
	fn test_view_serializes_camel_case() {
		let view = ServiceView {
			pid: 42,
			tag: "default".into(),
			name: "test".into(),
			exec: "echo".into(),
			running: true,
			mem: 1024,
			cpu: 1.5,
			fd_num: 7,
			connections: vec!["127.0.0.1:8080".into()],
			paths: vec![],
		};
		let json = serde_json::to_string(&view).unwrap();
		assert!(json.contains("\"fdNum\":7"));
		assert!(json.contains("\"running\":true"));
	}
}
