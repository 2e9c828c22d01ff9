//! Runtime log
//!
//! Bounded history of what happened during a session. Log items reference
//! flow states by id, and a referenced flow state is kept alive by the
//! garbage collector until the item is evicted.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::domain::flow_state::FlowStateId;
use crate::domain::path::{ComponentRef, ConnectionRef};
use crate::types::LogItemType;

/// One entry in the runtime log
#[derive(Debug, Clone, PartialEq)]
pub struct LogItem {
    /// Session-unique id, increasing
    pub id: u64,
    /// When the item was recorded
    pub date: DateTime<Utc>,
    /// Severity / category
    pub item_type: LogItemType,
    /// Human readable message
    pub message: String,
    /// Flow state the item belongs to
    pub flow_state: Option<FlowStateId>,
    /// Component the item belongs to
    pub component: Option<ComponentRef>,
    /// Connection line the item belongs to
    pub connection_line: Option<ConnectionRef>,
}

impl LogItem {
    /// Create a log item; the id is assigned when it is added to a log
    pub fn new(item_type: LogItemType, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            date: Utc::now(),
            item_type,
            message: message.into(),
            flow_state: None,
            component: None,
            connection_line: None,
        }
    }

    /// Attach a flow state
    pub fn with_flow_state(mut self, flow_state: FlowStateId) -> Self {
        self.flow_state = Some(flow_state);
        self
    }

    /// Attach a component
    pub fn with_component(mut self, component: ComponentRef) -> Self {
        self.component = Some(component);
        self
    }

    /// Attach a connection line
    pub fn with_connection_line(mut self, connection_line: ConnectionRef) -> Self {
        self.connection_line = Some(connection_line);
        self
    }
}

/// The session log
#[derive(Debug, Clone)]
pub struct RuntimeLogs {
    items: VecDeque<LogItem>,
    next_id: u64,
    max_items: usize,
}

impl RuntimeLogs {
    /// Create a log keeping at most `max_items` entries; 0 keeps everything
    pub fn new(max_items: usize) -> Self {
        Self {
            items: VecDeque::new(),
            next_id: 1,
            max_items,
        }
    }

    /// Append an item, assigning its id; returns the id
    pub fn add(&mut self, mut item: LogItem) -> u64 {
        item.id = self.next_id;
        self.next_id += 1;
        self.push(item)
    }

    /// Append an item that already has an id, as when restoring a snapshot
    pub fn add_restored(&mut self, item: LogItem) -> u64 {
        self.next_id = self.next_id.max(item.id + 1);
        self.push(item)
    }

    fn push(&mut self, item: LogItem) -> u64 {
        let id = item.id;
        match tracing::Level::from(item.item_type) {
            tracing::Level::ERROR => {
                tracing::error!(item_type = %item.item_type, flow_state = ?item.flow_state, "{}", item.message)
            }
            tracing::Level::WARN => {
                tracing::warn!(item_type = %item.item_type, flow_state = ?item.flow_state, "{}", item.message)
            }
            tracing::Level::INFO => {
                tracing::info!(item_type = %item.item_type, flow_state = ?item.flow_state, "{}", item.message)
            }
            _ => tracing::debug!(item_type = %item.item_type, flow_state = ?item.flow_state, "{}", item.message),
        }

        self.items.push_back(item);
        if self.max_items > 0 {
            while self.items.len() > self.max_items {
                self.items.pop_front();
            }
        }
        id
    }

    /// Retained items, oldest first
    pub fn items(&self) -> impl Iterator<Item = &LogItem> {
        self.items.iter()
    }

    /// Most recent item
    pub fn last(&self) -> Option<&LogItem> {
        self.items.back()
    }

    /// Number of retained items
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the log is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every item
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Whether any retained item references the flow state
    pub fn references(&self, flow_state: &FlowStateId) -> bool {
        self.items
            .iter()
            .any(|item| item.flow_state.as_ref() == Some(flow_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Records the level of every event
    struct LevelRecorder(Arc<Mutex<Vec<Level>>>);

    impl<S: Subscriber> Layer<S> for LevelRecorder {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            self.0.lock().unwrap().push(*event.metadata().level());
        }
    }

    #[test]
    fn test_items_reach_tracing_at_their_level() {
        let levels = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(LevelRecorder(levels.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let mut logs = RuntimeLogs::new(0);
            logs.add(LogItem::new(LogItemType::Fatal, "fatal"));
            logs.add(LogItem::new(LogItemType::Warning, "warning"));
            logs.add(LogItem::new(LogItemType::Scpi, "scpi"));
            logs.add(LogItem::new(LogItemType::Info, "info"));
            logs.add(LogItem::new(LogItemType::Debug, "debug"));
        });

        assert_eq!(
            *levels.lock().unwrap(),
            vec![Level::ERROR, Level::WARN, Level::INFO, Level::INFO, Level::DEBUG]
        );
    }

    #[test]
    fn test_ids_are_increasing() {
        let mut logs = RuntimeLogs::new(0);
        let first = logs.add(LogItem::new(LogItemType::Info, "one"));
        let second = logs.add(LogItem::new(LogItemType::Info, "two"));
        assert!(second > first);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs.last().map(|i| i.message.as_str()), Some("two"));
    }

    #[test]
    fn test_retention_limit_evicts_oldest() {
        let fs = FlowStateId::new();
        let mut logs = RuntimeLogs::new(2);
        logs.add(LogItem::new(LogItemType::Info, "old").with_flow_state(fs.clone()));
        assert!(logs.references(&fs));

        logs.add(LogItem::new(LogItemType::Info, "a"));
        logs.add(LogItem::new(LogItemType::Info, "b"));

        assert_eq!(logs.len(), 2);
        assert!(!logs.references(&fs));
    }

    #[test]
    fn test_add_restored_keeps_id() {
        let mut logs = RuntimeLogs::new(0);
        let mut item = LogItem::new(LogItemType::Warning, "restored");
        item.id = 41;
        assert_eq!(logs.add_restored(item), 41);
        assert_eq!(logs.add(LogItem::new(LogItemType::Info, "next")), 42);
    }
}
