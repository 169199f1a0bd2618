use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, StatusCode, Uri};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_embed::RustEmbed;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use steward_core::{LogFile, ServiceView};
use steward_supervisor::{Engine, NotificationHub};

use crate::auth;
use crate::upload;

#[derive(RustEmbed)]
#[folder = "console/"]
struct ConsoleAssets;

#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<Engine>,
	pub hub: Arc<NotificationHub>,
	pub accounts: Arc<BTreeMap<String, String>>,
}

/// Response envelope shared by every API route. Errors travel inside
/// the envelope, the HTTP status stays 200.
#[derive(Serialize)]
pub struct Resp<T> {
	pub data: Option<T>,
	pub error: String,
}

pub fn ok<T: Serialize>(data: T) -> Json<Resp<T>> {
	Json(Resp {
		data: Some(data),
		error: String::new(),
	})
}

pub fn fail<T: Serialize>(error: impl std::fmt::Display) -> Json<Resp<T>> {
	Json(Resp {
		data: None,
		error: error.to_string(),
	})
}

pub fn router(
	engine: Arc<Engine>,
	hub: Arc<NotificationHub>,
	accounts: BTreeMap<String, String>,
) -> Router {
	let state = AppState {
		engine,
		hub,
		accounts: Arc::new(accounts),
	};

	let api = Router::new()
		.route("/service", get(list_services))
		.route("/service/{service}/config", get(service_config))
		.route("/service/{service}/start", post(start_service))
		.route("/service/{service}/stop", post(stop_service))
		.route("/service/{service}/restart", post(restart_service))
		.route("/service/{service}/upload", post(upload::upload_service))
		.route("/service/{service}/log", get(list_logs))
		.route("/service/{service}/log/{file}", get(download_log))
		.route("/service/{service}/output", get(ws_output))
		.layer(middleware::from_fn_with_state(state.clone(), auth::require))
		.layer(DefaultBodyLimit::max(512 * 1024 * 1024));

	Router::new()
		.nest("/api", api)
		.fallback(static_handler)
		.layer(CorsLayer::permissive())
		.with_state(state)
}

async fn list_services(State(state): State<AppState>) -> Json<Resp<Vec<ServiceView>>> {
	ok(state.engine.status().await)
}

/// One service's status view with a fresh resource sample. The raw
/// config record never leaves the daemon, `env` can hold secrets.
async fn service_config(
	State(state): State<AppState>,
	Path(service): Path<String>,
) -> Json<Resp<ServiceView>> {
	match state.engine.status_of(&service).await {
		Ok(view) => ok(view),
		Err(e) => fail(e),
	}
}

async fn start_service(
	State(state): State<AppState>,
	Path(service): Path<String>,
) -> Json<Resp<String>> {
	match state.engine.start_service(&service).await {
		Ok(()) => ok(format!("{} started", service)),
		Err(e) => fail(e),
	}
}

async fn stop_service(
	State(state): State<AppState>,
	Path(service): Path<String>,
) -> Json<Resp<String>> {
	match state.engine.stop_service(&service).await {
		Ok(()) => ok(format!("{} stopped", service)),
		Err(e) => fail(e),
	}
}

async fn restart_service(
	State(state): State<AppState>,
	Path(service): Path<String>,
) -> Json<Resp<String>> {
	match state.engine.restart_service(&service).await {
		Ok(()) => ok(format!("{} restarted", service)),
		Err(e) => fail(e),
	}
}

async fn list_logs(
	State(state): State<AppState>,
	Path(service): Path<String>,
) -> Json<Resp<Vec<LogFile>>> {
	match state.engine.log_files(&service).await {
		Ok(files) => ok(files),
		Err(e) => fail(e),
	}
}

/// Serves a log file by name, but only names the service's own listing
/// reports. Everything else in `log/` is off limits.
async fn download_log(
	State(state): State<AppState>,
	Path((service, file)): Path<(String, String)>,
) -> Response {
	let listed = match state.engine.log_files(&service).await {
		Ok(files) => files.into_iter().any(|f| f.name == file),
		Err(e) => return fail::<String>(e).into_response(),
	};
	if !listed {
		return fail::<String>("no such log file").into_response();
	}

	match tokio::fs::read(state.engine.log_dir().join(&file)).await {
		Ok(bytes) => (
			StatusCode::OK,
			[
				(
					header::CONTENT_TYPE,
					"text/plain; charset=utf-8".to_string(),
				),
				(
					header::CONTENT_DISPOSITION,
					format!("attachment; filename=\"{}\"", file),
				),
			],
			bytes,
		)
			.into_response(),
		Err(e) => fail::<String>(e).into_response(),
	}
}

/// Upgrades to the live output stream, but only for configured
/// services. Joining an arbitrary name would mint a hub topic that is
/// never dropped.
async fn ws_output(
	State(state): State<AppState>,
	Path(service): Path<String>,
	ws: WebSocketUpgrade,
) -> Response {
	if state.engine.get_service(&service).await.is_none() {
		return fail::<String>("service not found").into_response();
	}
	ws.on_upgrade(move |socket| stream_output(socket, state, service))
}

/// Joins the service topic and forwards buffered replay plus live
/// chunks until either side goes away.
async fn stream_output(mut socket: WebSocket, state: AppState, service: String) {
	let (id, mut rx) = state.hub.join(&service).await;

	loop {
		tokio::select! {
			chunk = rx.recv() => {
				match chunk {
					Some(data) => {
						let text = String::from_utf8_lossy(&data).into_owned();
						if socket.send(Message::Text(text.into())).await.is_err() {
							break;
						}
					}
					// hub dropped us, probably for being too slow
					None => break,
				}
			}
			incoming = socket.recv() => {
				match incoming {
					Some(Ok(_)) => {}
					_ => break,
				}
			}
		}
	}

	state.hub.leave(id).await;
}

async fn static_handler(uri: Uri) -> impl IntoResponse {
	let path = uri.path().trim_start_matches('/');
	let path = if path.is_empty() { "index.html" } else { path };

	if let Some(content) = ConsoleAssets::get(path) {
		return serve_asset(path, content);
	}

	if !path.contains('.') {
		if let Some(content) = ConsoleAssets::get("index.html") {
			return serve_asset("index.html", content);
		}
	}

	Response::builder()
		.status(StatusCode::NOT_FOUND)
		.body("Not Found".into())
		.unwrap()
}

fn serve_asset(path: &str, content: rust_embed::EmbeddedFile) -> Response {
	let mime = mime_guess::from_path(path).first_or_octet_stream();

	Response::builder()
		.status(StatusCode::OK)
		.header(header::CONTENT_TYPE, mime.as_ref())
		.body(content.data.into())
		.unwrap()
}
