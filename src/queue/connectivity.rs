//! Online/offline signal shared between the platform and the sync queue.

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Transitions buffered per listener before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 64;

/// Current connectivity plus change notifications.
///
/// The platform layer reports transitions with [`Connectivity::set_online`];
/// everyone else reads or subscribes. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct Connectivity {
  state: Arc<watch::Sender<bool>>,
  events: broadcast::Sender<bool>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (state, _) = watch::channel(online);
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Self {
      state: Arc::new(state),
      events,
    }
  }

  pub fn is_online(&self) -> bool {
    *self.state.borrow()
  }

  /// Record the current connectivity. Listeners only hear about changes.
  pub fn set_online(&self, online: bool) {
    // Publishing under the watch lock keeps event order equal to state order
    let changed = self.state.send_if_modified(|current| {
      if *current == online {
        return false;
      }
      *current = online;
      // No receivers is fine
      let _ = self.events.send(online);
      true
    });

    if changed {
      debug!(online, "Connectivity changed");
    }
  }

  /// Latest connectivity value; intermediate changes may be coalesced.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.state.subscribe()
  }

  /// Every transition from now on, in order.
  pub fn transitions(&self) -> broadcast::Receiver<bool> {
    self.events.subscribe()
  }

  /// Run `on_online` / `on_offline` on every transition.
  ///
  /// Transitions reported after this call are delivered in order, even if
  /// several land before the listener task first runs. Must be called from
  /// within a tokio runtime. The listener task ends when every clone of this
  /// signal has been dropped, or when the returned handle is aborted.
  pub fn add_listeners<On, Off>(&self, on_online: On, on_offline: Off) -> JoinHandle<()>
  where
    On: Fn() + Send + 'static,
    Off: Fn() + Send + 'static,
  {
    let mut rx = self.transitions();

    tokio::spawn(async move {
      loop {
        match rx.recv().await {
          Ok(true) => on_online(),
          Ok(false) => on_offline(),
          Err(RecvError::Lagged(skipped)) => {
            warn!(skipped, "Connectivity listener fell behind");
          }
          Err(RecvError::Closed) => break,
        }
      }
    })
  }
}

impl Default for Connectivity {
  fn default() -> Self {
    Self::new(true)
  }
}
