//! Downstream delivery of arranged trees.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use tabdrome_shared::WindowId;
use tabdrome_tabulator::SerializedNode;

/// Receives each window's tree after a flush.
pub trait TreeDelivery: Send + Sync {
    /// Called at most once per window per flush.
    fn deliver(&self, window_id: WindowId, tree: &SerializedNode);

    /// The window closed; no further trees will be delivered for it.
    fn window_removed(&self, _window_id: WindowId) {}
}

/// What subscribers of a [`ClientBridge`] receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BridgeMessage {
    Tree {
        window_id: WindowId,
        tree: SerializedNode,
    },
    WindowClosed {
        window_id: WindowId,
    },
}

#[derive(Debug, Default)]
struct BridgeState {
    latest: BTreeMap<WindowId, SerializedNode>,
    subscribers: Vec<mpsc::UnboundedSender<BridgeMessage>>,
}

impl BridgeState {
    fn broadcast(&mut self, message: &BridgeMessage) {
        self.subscribers
            .retain(|tx| tx.send(message.clone()).is_ok());
    }
}

/// Keeps the latest tree per window and fans it out to UI subscribers.
///
/// New subscribers first receive the current tree of every open window.
/// Subscribers whose receiver was dropped are pruned on the next send.
#[derive(Debug, Clone, Default)]
pub struct ClientBridge {
    state: Arc<Mutex<BridgeState>>,
}

impl ClientBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BridgeMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        for (&window_id, tree) in &state.latest {
            // The receiver is still in hand, so this cannot fail.
            let _ = tx.send(BridgeMessage::Tree {
                window_id,
                tree: tree.clone(),
            });
        }
        state.subscribers.push(tx);
        rx
    }

    pub fn latest(&self, window_id: WindowId) -> Option<SerializedNode> {
        self.state.lock().latest.get(&window_id).cloned()
    }

    pub fn windows(&self) -> Vec<WindowId> {
        self.state.lock().latest.keys().copied().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

impl TreeDelivery for ClientBridge {
    fn deliver(&self, window_id: WindowId, tree: &SerializedNode) {
        trace!(%window_id, serial = tree.serial, "delivering tree");
        let mut state = self.state.lock();
        state.latest.insert(window_id, tree.clone());
        state.broadcast(&BridgeMessage::Tree {
            window_id,
            tree: tree.clone(),
        });
    }

    fn window_removed(&self, window_id: WindowId) {
        let mut state = self.state.lock();
        if state.latest.remove(&window_id).is_some() {
            state.broadcast(&BridgeMessage::WindowClosed { window_id });
        }
    }
}

#[cfg(test)]
mod tests {
    use tabdrome_tabulator::GroupTree;

    use super::*;

    fn tree(serial: u64) -> SerializedNode {
        GroupTree::new().serialize(serial)
    }

    #[test]
    fn late_subscriber_gets_current_trees() {
        let bridge = ClientBridge::new();
        bridge.deliver(WindowId(1), &tree(3));
        bridge.deliver(WindowId(2), &tree(4));
        bridge.deliver(WindowId(1), &tree(5));

        let mut rx = bridge.subscribe();
        let first = rx.try_recv().unwrap();
        assert_eq!(
            first,
            BridgeMessage::Tree {
                window_id: WindowId(1),
                tree: tree(5)
            }
        );
        assert!(matches!(rx.try_recv().unwrap(), BridgeMessage::Tree { window_id: WindowId(2), .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fans_out_and_prunes_closed_subscribers() {
        let bridge = ClientBridge::new();
        let mut a = bridge.subscribe();
        let b = bridge.subscribe();
        drop(b);

        bridge.deliver(WindowId(1), &tree(1));
        assert_eq!(bridge.subscriber_count(), 1);
        assert!(matches!(a.try_recv().unwrap(), BridgeMessage::Tree { .. }));
    }

    #[test]
    fn window_removal_forgets_tree() {
        let bridge = ClientBridge::new();
        let mut rx = bridge.subscribe();
        bridge.deliver(WindowId(7), &tree(1));
        bridge.window_removed(WindowId(7));
        bridge.window_removed(WindowId(7));

        assert!(bridge.latest(WindowId(7)).is_none());
        assert!(bridge.windows().is_empty());
        assert!(matches!(rx.try_recv().unwrap(), BridgeMessage::Tree { .. }));
        assert_eq!(
            rx.try_recv().unwrap(),
            BridgeMessage::WindowClosed { window_id: WindowId(7) }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn messages_serialize_with_type_tag() {
        let json = serde_json::to_value(BridgeMessage::WindowClosed { window_id: WindowId(2) }).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "window_closed", "windowId": 2 }));
    }
}
