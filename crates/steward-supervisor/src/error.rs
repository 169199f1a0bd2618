use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("service not found")]
	ServiceNotFound,

	#[error("failed to launch {exec}: {source}")]
	Launch {
		exec: String,
		#[source]
		source: io::Error,
	},

	#[error("{exec} is already running")]
	AlreadyStarted { exec: String },

	/// The final process-group kill of the stop escalation failed. Earlier
	/// escalation steps are best effort and never surface here.
	#[error("failed to kill process group of {exec}: {source}")]
	Escalation {
		exec: String,
		#[source]
		source: io::Error,
	},
}
