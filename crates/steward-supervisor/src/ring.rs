use std::collections::VecDeque;
use tokio::sync::Mutex;

/// Fixed-capacity ring of recent output chunks.
///
/// Backs replay for late subscribers; once full, each write evicts the
/// oldest chunk. A bounded window, not a durable log.
pub struct ChunkRing {
	chunks: Mutex<VecDeque<Vec<u8>>>,
	capacity: usize,
}

impl ChunkRing {
	pub fn new(capacity: usize) -> Self {
		Self {
			chunks: Mutex::new(VecDeque::with_capacity(capacity)),
			capacity,
		}
	}

	pub async fn write(&self, chunk: Vec<u8>) {
		if self.capacity == 0 {
			return;
		}
		let mut chunks = self.chunks.lock().await;
		if chunks.len() >= self.capacity {
			chunks.pop_front();
		}
		chunks.push_back(chunk);
	}

	/// The retained chunks, oldest first.
	pub async fn snapshot(&self) -> Vec<Vec<u8>> {
		let chunks = self.chunks.lock().await;
		chunks.iter().cloned().collect()
	}

	pub async fn reset(&self) {
		let mut chunks = self.chunks.lock().await;
		chunks.clear();
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}
}
