use std::io;
use std::path::{Path as FsPath, PathBuf};

use axum::extract::{Multipart, Path, State};
use axum::Json;
use flate2::read::GzDecoder;
use tokio::io::AsyncWriteExt;
use tracing::info;

use steward_core::clock;
use steward_core::Service;

use crate::api::{fail, ok, AppState, Resp};

const BINARY_DIR: &str = "binary";

/// Replaces a service's payload with an uploaded one: stage the file
/// under `binary/`, verify it, back up what is currently deployed, then
/// stop, swap and start.
pub async fn upload_service(
	State(state): State<AppState>,
	Path(service): Path<String>,
	multipart: Multipart,
) -> Json<Resp<String>> {
	match run_upload(&state, &service, multipart).await {
		Ok(message) => ok(message),
		Err(e) => fail(e),
	}
}

async fn run_upload(
	state: &AppState,
	exec: &str,
	mut multipart: Multipart,
) -> Result<String, String> {
	let service = state
		.engine
		.get_service(exec)
		.await
		.ok_or_else(|| "service not found".to_string())?;

	let staged = stage_upload(&service, &mut multipart).await?;

	if !payload_accepted(&staged) {
		let _ = std::fs::remove_file(&staged);
		return Err("payload is neither an executable nor a gzip archive".to_string());
	}

	back_up_current(&service, state.engine.service_dir()).map_err(|e| e.to_string())?;

	// if the old process group will not die, do not swap under it
	state
		.engine
		.stop_service(exec)
		.await
		.map_err(|e| format!("stopping before swap: {}", e))?;

	swap_in(&service, &staged, state.engine.service_dir()).map_err(|e| e.to_string())?;

	state
		.engine
		.start_service(exec)
		.await
		.map_err(|e| format!("starting replacement: {}", e))?;

	info!(exec, "payload updated");
	Ok(format!("{} updated", exec))
}

async fn stage_upload(service: &Service, multipart: &mut Multipart) -> Result<PathBuf, String> {
	let _ = std::fs::create_dir_all(BINARY_DIR);
	let staged = FsPath::new(BINARY_DIR).join(staged_name(service));

	while let Some(mut field) = multipart.next_field().await.map_err(|e| e.to_string())? {
		if field.name() != Some("file") {
			continue;
		}
		let mut file = tokio::fs::File::create(&staged)
			.await
			.map_err(|e| e.to_string())?;
		while let Some(chunk) = field.chunk().await.map_err(|e| e.to_string())? {
			file.write_all(&chunk).await.map_err(|e| e.to_string())?;
		}
		file.flush().await.map_err(|e| e.to_string())?;
		return Ok(staged);
	}

	Err("multipart field \"file\" missing".to_string())
}

fn staged_name(service: &Service) -> String {
	let stamp = clock::stamp_mmddhhmm();
	if service.packed() {
		format!("{}.tar.gz_{}", service.exec, stamp)
	} else {
		format!("{}_{}", service.exec, stamp)
	}
}

fn payload_accepted(path: &FsPath) -> bool {
	use std::io::Read;
	let mut head = [0u8; 4];
	let n = std::fs::File::open(path)
		.and_then(|mut f| f.read(&mut head))
		.unwrap_or(0);
	accepted_magic(&head[..n])
}

fn accepted_magic(head: &[u8]) -> bool {
	head.starts_with(b"\x7fELF") || head.starts_with(b"\x1f\x8b")
}

fn back_up_current(service: &Service, service_dir: &FsPath) -> io::Result<()> {
	if service.packed() {
		let folder = service_dir.join(&service.folder);
		if folder.exists() {
			let bak = service_dir.join(format!("{}.bak", service.folder));
			if bak.exists() {
				std::fs::remove_dir_all(&bak)?;
			}
			std::fs::rename(&folder, &bak)?;
		}
	} else {
		let exec = service_dir.join(&service.exec);
		if exec.exists() {
			std::fs::copy(&exec, service_dir.join(format!("{}.bak", service.exec)))?;
		}
	}
	Ok(())
}

fn swap_in(service: &Service, staged: &FsPath, service_dir: &FsPath) -> io::Result<()> {
	if service.packed() {
		let target = service_dir.join(&service.folder);
		std::fs::create_dir_all(&target)?;
		let file = std::fs::File::open(staged)?;
		let mut archive = tar::Archive::new(GzDecoder::new(file));
		archive.unpack(&target)?;
	} else {
		std::fs::rename(staged, service_dir.join(&service.exec))?;
	}
	Ok(())
}
