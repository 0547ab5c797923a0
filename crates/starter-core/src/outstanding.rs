use std::sync::Arc;
use tokio::sync::watch;

/// Count of reader tasks still working.
///
/// Work is held through [`Slot`] guards, so every increment is paired with
/// exactly one decrement when the guard drops, also on panic or abort.
#[derive(Clone)]
pub struct Outstanding {
	count: Arc<watch::Sender<usize>>,
}

impl Default for Outstanding {
	fn default() -> Self {
		Self::new()
	}
}

impl Outstanding {
	pub fn new() -> Self {
		let (tx, _) = watch::channel(0);
		Self { count: Arc::new(tx) }
	}

	pub fn acquire(&self) -> Slot {
		self.count.send_modify(|n| *n += 1);
		Slot {
			count: Arc::clone(&self.count),
		}
	}

	/// Takes a new slot before `previous` is released, so the count never
	/// touches zero in between.
	pub fn acquire_replacing(&self, previous: Slot) -> Slot {
		let next = self.acquire();
		drop(previous);
		next
	}

	pub fn count(&self) -> usize {
		*self.count.borrow()
	}

	/// Resolves once no slot is held.
	pub async fn wait_idle(&self) {
		let mut rx = self.count.subscribe();
		// the sender lives in self, so this cannot fail
		let _ = rx.wait_for(|n| *n == 0).await;
	}
}

/// One unit of outstanding work.
pub struct Slot {
	count: Arc<watch::Sender<usize>>,
}

impl Drop for Slot {
	fn drop(&mut self) {
		self.count.send_modify(|n| *n = n.saturating_sub(1));
	}
}
