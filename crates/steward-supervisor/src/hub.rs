use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::ring::ChunkRing;

/// A unit of captured output on its way to viewers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
	pub topic: String,
	pub content: Vec<u8>,
}

/// Identifies one subscription, for [`NotificationHub::leave`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Debug, Clone)]
pub struct HubConfig {
	/// Chunks buffered per topic for replay to late joiners.
	pub replay_chunks: usize,
	/// Queue depth per subscriber before slow consumers start eating into
	/// the send deadline.
	pub subscriber_queue: usize,
	/// How long a publish waits on one subscriber before dropping it.
	pub send_deadline: Duration,
}

struct Topic {
	ring: ChunkRing,
	subs: Vec<(SubscriberId, mpsc::Sender<Vec<u8>>)>,
}

impl Topic {
	fn new(replay_chunks: usize) -> Self {
		Self {
			ring: ChunkRing::new(replay_chunks),
			subs: Vec::new(),
		}
	}

	async fn fan_out(&self, content: &[u8], deadline: Duration) -> Vec<SubscriberId> {
		let mut stale = Vec::new();
		for (id, tx) in &self.subs {
			if let Err(err) = tx.send_timeout(content.to_vec(), deadline).await {
				debug!(subscriber = id.0, "dropping subscriber: {}", err);
				stale.push(*id);
			}
		}
		stale
	}
}

struct HubState {
	topics: HashMap<String, Topic>,
	sub_topic: HashMap<SubscriberId, String>,
}

impl HubState {
	fn remove_sub(&mut self, id: SubscriberId) {
		if let Some(topic) = self.sub_topic.remove(&id) {
			if let Some(t) = self.topics.get_mut(&topic) {
				t.subs.retain(|(sid, _)| *sid != id);
			}
		}
	}
}

/// Per-topic fan-out of output chunks with a bounded replay buffer.
///
/// One instance serves the whole daemon; runners publish into it and the
/// WebSocket layer joins topics out of it.
pub struct NotificationHub {
	state: RwLock<HubState>,
	config: HubConfig,
	next_id: AtomicU64,
}

impl NotificationHub {
	pub fn new(config: HubConfig) -> Arc<Self> {
		Arc::new(Self {
			state: RwLock::new(HubState {
				topics: HashMap::new(),
				sub_topic: HashMap::new(),
			}),
			config,
			next_id: AtomicU64::new(1),
		})
	}

	/// Buffer a chunk on its topic and deliver it to current subscribers.
	///
	/// The topic is created on first publish so that viewers joining later
	/// still get history. Subscribers that fail the send deadline are
	/// dropped, which closes their receiver.
	pub async fn publish(&self, msg: Msg) {
		let Msg { topic, content } = msg;
		let mut stale = Vec::new();
		let mut buffered = false;
		{
			let state = self.state.read().await;
			if let Some(t) = state.topics.get(&topic) {
				t.ring.write(content.clone()).await;
				stale = t.fan_out(&content, self.config.send_deadline).await;
				buffered = true;
			}
		}
		if !buffered {
			let mut state = self.state.write().await;
			let t = state
				.topics
				.entry(topic)
				.or_insert_with(|| Topic::new(self.config.replay_chunks));
			t.ring.write(content.clone()).await;
			stale = t.fan_out(&content, self.config.send_deadline).await;
		}
		for id in stale {
			self.leave(id).await;
		}
	}

	/// Subscribe to a topic.
	///
	/// The receiver yields every chunk currently buffered for the topic,
	/// then live chunks in publish order. Delivery is best effort: a
	/// consumer that stays blocked past the send deadline is dropped
	/// mid-stream and sees its channel close.
	pub async fn join(&self, topic: &str) -> (SubscriberId, mpsc::Receiver<Vec<u8>>) {
		let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
		let mut state = self.state.write().await;
		let t = state
			.topics
			.entry(topic.to_string())
			.or_insert_with(|| Topic::new(self.config.replay_chunks));
		let replay = t.ring.snapshot().await;
		// capacity covers the full replay, so queueing it cannot fail
		let (tx, rx) = mpsc::channel(self.config.subscriber_queue.max(replay.len() + 1));
		for chunk in replay {
			let _ = tx.try_send(chunk);
		}
		t.subs.push((id, tx));
		state.sub_topic.insert(id, topic.to_string());
		(id, rx)
	}

	/// Drop a subscription. Safe to call for an id that is already gone.
	pub async fn leave(&self, id: SubscriberId) {
		let mut state = self.state.write().await;
		state.remove_sub(id);
	}

	/// Drop every topic and subscriber, closing all receivers.
	pub async fn close(&self) {
		let mut state = self.state.write().await;
		state.topics.clear();
		state.sub_topic.clear();
	}
}
