use std::sync::Arc;

use crate::comments::CommentThread;
use crate::engagement::{CounterMode, EngagementCounter};
use crate::follows::FollowGraph;
use crate::notifications::{NotificationFanout, NotificationInbox, PreferenceStore};
use crate::progress::{ReadCountTrigger, ReadProgressTracker};
use crate::push::{DeviceRegistry, PushDispatcher, PushGateway, PushRelayTrigger};
use crate::store::Store;
use crate::triggers::TriggerRuntime;

/// Every client-facing component wired to one store.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub comments: CommentThread,
    pub likes: EngagementCounter,
    pub progress: ReadProgressTracker,
    pub fanout: NotificationFanout,
    pub inbox: NotificationInbox,
    pub preferences: PreferenceStore,
    pub follows: FollowGraph,
    pub devices: DeviceRegistry,
}

impl Services {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_counter_mode(store, CounterMode::default())
    }

    pub fn with_counter_mode(store: Arc<dyn Store>, mode: CounterMode) -> Self {
        let fanout = NotificationFanout::new(store.clone());
        Self {
            comments: CommentThread::new(store.clone(), fanout.clone()),
            likes: EngagementCounter::new(store.clone(), fanout.clone()).with_mode(mode),
            progress: ReadProgressTracker::new(store.clone()),
            inbox: NotificationInbox::new(store.clone()),
            preferences: PreferenceStore::new(store.clone()),
            follows: FollowGraph::new(store.clone(), fanout.clone()),
            devices: DeviceRegistry::new(store.clone()),
            fanout,
            store,
        }
    }

    /// Server-side triggers: read aggregates and the push relay.
    pub fn triggers(&self, gateway: Arc<dyn PushGateway>) -> TriggerRuntime {
        let dispatcher = PushDispatcher::new(self.store.clone(), gateway);
        TriggerRuntime::new(self.store.clone())
            .register(ReadCountTrigger::new(self.store.clone()))
            .register(PushRelayTrigger::new(self.store.clone(), dispatcher))
    }
}
