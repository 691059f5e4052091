//! Materialized view refresh on table status events.

use crate::error::{CoreError, CoreResult};
use ledgerline_protocol::{ObjectType, TableStatusEvent};
use tracing::{debug, info};

/// Finds and rebuilds the materialized views that read from a table.
pub trait ViewRefresher: Send + Sync {
    /// Returns the ids of views that depend on `table_id`.
    fn dependent_views(&self, table_id: &str) -> CoreResult<Vec<String>>;

    /// Schedules a rebuild of one view.
    fn refresh(&self, view_id: &str) -> CoreResult<()>;
}

/// Reacts to a table becoming available by refreshing its dependent views.
///
/// Only `AVAILABLE` transitions matter here; every other state belongs to
/// the table build pipeline and is ignored.
#[derive(Debug)]
pub struct MaterializedViewTrigger<R> {
    refresher: R,
}

impl<R: ViewRefresher> MaterializedViewTrigger<R> {
    /// Creates a trigger.
    pub fn new(refresher: R) -> Self {
        Self { refresher }
    }

    /// Returns the refresher.
    pub fn refresher(&self) -> &R {
        &self.refresher
    }

    /// Handles one event.
    ///
    /// Returns true if dependent views were refreshed. Events for any
    /// object type other than `TABLE_STATUS_EVENT` are rejected with
    /// [`CoreError::IllegalState`].
    pub fn handle(&self, event: &TableStatusEvent) -> CoreResult<bool> {
        if event.object_type != ObjectType::TableStatusEvent {
            return Err(CoreError::illegal_state(format!(
                "unsupported object type: expected {}, got {}",
                ObjectType::TableStatusEvent,
                event.object_type
            )));
        }
        if !event.is_available() {
            debug!(table = %event.object_id, state = %event.state, "ignoring table state");
            return Ok(false);
        }

        let views = self.refresher.dependent_views(&event.object_id)?;
        for view in &views {
            self.refresher.refresh(view)?;
        }
        info!(table = %event.object_id, views = views.len(), "refreshed dependent views");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerline_protocol::TableState;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Views {
        refreshed: Mutex<Vec<String>>,
    }

    impl ViewRefresher for Views {
        fn dependent_views(&self, table_id: &str) -> CoreResult<Vec<String>> {
            Ok(vec![format!("{table_id}-mv1"), format!("{table_id}-mv2")])
        }

        fn refresh(&self, view_id: &str) -> CoreResult<()> {
            self.refreshed.lock().push(view_id.to_string());
            Ok(())
        }
    }

    #[test]
    fn available_refreshes_dependents() {
        let trigger = MaterializedViewTrigger::new(Views::default());
        let refreshed = trigger
            .handle(&TableStatusEvent::new("t1", TableState::Available))
            .unwrap();
        assert!(refreshed);
        assert_eq!(*trigger.refresher().refreshed.lock(), vec!["t1-mv1", "t1-mv2"]);
    }

    #[test]
    fn other_states_are_ignored() {
        let trigger = MaterializedViewTrigger::new(Views::default());
        for state in [TableState::Processing, TableState::ProcessingFailed] {
            assert!(!trigger.handle(&TableStatusEvent::new("t1", state)).unwrap());
        }
        assert!(trigger.refresher().refreshed.lock().is_empty());
    }

    #[test]
    fn wrong_object_type_is_illegal() {
        let trigger = MaterializedViewTrigger::new(Views::default());
        let mut event = TableStatusEvent::new("t1", TableState::Available);
        event.object_type = ObjectType::Table;
        let err = trigger.handle(&event).unwrap_err();
        assert!(matches!(err, CoreError::IllegalState { .. }));
    }
}
