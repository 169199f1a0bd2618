mod api;
mod auth;
mod upload;

use std::sync::Arc;
use std::time::Duration;

use steward_core::config;
use steward_supervisor::{Engine, EngineConfig, HubConfig, NotificationHub, UnixSpawner};

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt().init();

	let args: Vec<String> = std::env::args().skip(1).collect();
	let config_path = config_arg(&args).unwrap_or_else(|| "config.yaml".to_string());
	let path = std::path::Path::new(&config_path);

	if !path.exists() {
		let default = config::generate_default();
		if let Err(e) = config::save(&default, path) {
			tracing::error!("failed to write {}: {}", config_path, e);
			std::process::exit(1);
		}
		tracing::info!("wrote starter config to {}, edit it and run again", config_path);
		return;
	}

	let cfg = match config::load(path) {
		Ok(c) => c,
		Err(e) => {
			tracing::error!("failed to load {}: {}", config_path, e);
			std::process::exit(1);
		}
	};

	if let Err(e) = config::ensure_dirs() {
		tracing::error!("failed to create working directories: {}", e);
		std::process::exit(1);
	}

	let hub = NotificationHub::new(HubConfig {
		replay_chunks: cfg.limits.replay_chunks,
		subscriber_queue: cfg.limits.subscriber_queue,
		send_deadline: Duration::from_millis(cfg.limits.send_deadline_ms),
	});

	let engine = Engine::new(
		EngineConfig {
			mode: cfg.mode,
			meta: cfg.meta_vars.clone(),
			service_dir: "service".into(),
			log_dir: "log".into(),
			limits: cfg.limits.clone(),
		},
		hub.clone(),
		Arc::new(UnixSpawner),
	);
	engine.init(cfg.services.clone()).await;

	let app = api::router(engine.clone(), hub.clone(), cfg.account_map());

	let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port));
	let listener = match tokio::net::TcpListener::bind(addr).await {
		Ok(l) => l,
		Err(e) => {
			tracing::error!("failed to bind {}: {}", addr, e);
			std::process::exit(1);
		}
	};
	tracing::info!("{} listening on {} ({} mode)", cfg.name, addr, cfg.mode);

	let server = tokio::spawn(async move {
		if let Err(e) = axum::serve(listener, app).await {
			tracing::error!("server error: {}", e);
		}
	});

	tokio::select! {
		_ = server => {},
		_ = shutdown_signal() => {
			tracing::info!("shutting down");
		}
	}

	engine.shutdown().await;
	hub.close().await;
}

fn config_arg(args: &[String]) -> Option<String> {
	let mut it = args.iter();
	while let Some(arg) = it.next() {
		if arg == "-config" || arg == "--config" {
			return it.next().cloned();
		}
	}
	None
}

async fn shutdown_signal() {
	use tokio::signal::unix::{signal, SignalKind};

	let ctrl_c = tokio::signal::ctrl_c();
	match signal(SignalKind::terminate()) {
		Ok(mut term) => {
			tokio::select! {
				_ = ctrl_c => {},
				_ = term.recv() => {},
			}
		}
		Err(_) => {
			let _ = ctrl_c.await;
		}
	}
}
