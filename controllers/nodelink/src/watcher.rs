//! Informers: watch streams feeding read-only caches and event subscribers.
//!
//! Each informer applies its watch stream to a reflector store and then
//! translates the stream into `on_add`/`on_update`/`on_delete` calls:
//! - an object already in the cache is an update, otherwise an add
//! - objects from a relist are dispatched only after the relist completes,
//!   so subscribers never observe a cache that lags the event
//! - objects cached before a relist but missing from it are delivered as
//!   deletes, since the watch never saw them go away
//! - on every resync tick each cached object is delivered again as an update

use crate::error::ControllerError;
use crate::handlers::EventHandler;
use futures::{Stream, StreamExt};
use kube::{Api, Resource};
use kube_runtime::reflector::{self, ObjectRef, Store, store::Writer};
use kube_runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Bookkeeping for an in-progress relist.
struct Relist<K: Resource>
where
    K::DynamicType: Eq + Hash,
{
    /// Cache contents when the relist started
    previous: Vec<Arc<K>>,
    /// Objects seen so far, with the cached version they replace
    applied: Vec<(Option<Arc<K>>, Arc<K>)>,
    seen: HashSet<ObjectRef<K>>,
}

/// Translates watch events into cache writes and subscriber calls.
pub struct EventDispatcher<K: Resource + Clone + 'static>
where
    K::DynamicType: Eq + Hash + Clone,
{
    writer: Writer<K>,
    reader: Store<K>,
    handler: Arc<dyn EventHandler<K>>,
    relist: Option<Relist<K>>,
}

impl<K> EventDispatcher<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    pub fn new(handler: Arc<dyn EventHandler<K>>) -> Self {
        let (reader, writer) = reflector::store();
        Self {
            writer,
            reader,
            handler,
            relist: None,
        }
    }

    /// Read-only handle to the cache this dispatcher writes.
    pub fn store(&self) -> Store<K> {
        self.reader.clone()
    }

    pub fn dispatch(&mut self, event: watcher::Event<K>) {
        match &event {
            watcher::Event::Init => {
                self.relist = Some(Relist {
                    previous: self.reader.state(),
                    applied: Vec::new(),
                    seen: HashSet::new(),
                });
                self.writer.apply_watcher_event(&event);
            }
            watcher::Event::InitApply(obj) => {
                let obj_ref = ObjectRef::from_obj(obj);
                let old = self.reader.get(&obj_ref);
                self.writer.apply_watcher_event(&event);
                if let Some(relist) = self.relist.as_mut() {
                    relist.seen.insert(obj_ref);
                    relist.applied.push((old, Arc::new(obj.clone())));
                }
            }
            watcher::Event::InitDone => {
                self.writer.apply_watcher_event(&event);
                if let Some(relist) = self.relist.take() {
                    for (old, new) in relist.applied {
                        self.notify_applied(old, &new);
                    }
                    for gone in relist.previous {
                        if !relist.seen.contains(&ObjectRef::from_obj(gone.as_ref())) {
                            self.handler.on_delete(&gone);
                        }
                    }
                }
            }
            watcher::Event::Apply(obj) => {
                let old = self.reader.get(&ObjectRef::from_obj(obj));
                self.writer.apply_watcher_event(&event);
                self.notify_applied(old, &Arc::new(obj.clone()));
            }
            watcher::Event::Delete(obj) => {
                self.writer.apply_watcher_event(&event);
                self.handler.on_delete(&Arc::new(obj.clone()));
            }
        }
    }

    /// Delivers every cached object to the subscriber as an update.
    ///
    /// Skipped while a relist is in progress; its completion dispatches
    /// everything anyway.
    pub fn resync(&self) {
        if self.relist.is_some() {
            return;
        }
        for obj in self.reader.state() {
            self.handler.on_update(&obj, &obj);
        }
    }

    /// Feeds `stream` into the cache and subscriber until it ends, resyncing
    /// every `resync_period` when one is set.
    pub async fn pump<S>(
        &mut self,
        mut stream: S,
        resync_period: Option<Duration>,
        resource_name: &str,
    ) -> Result<(), ControllerError>
    where
        S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Unpin,
    {
        let mut resync = resync_period.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        if matches!(event, watcher::Event::InitDone) {
                            debug!("{} informer list complete", resource_name);
                        }
                        self.dispatch(event);
                    }
                    Some(Err(e)) => warn!("{} watch error (retrying): {}", resource_name, e),
                    None => break,
                },
                () = next_tick(resync.as_mut()) => {
                    debug!("Resyncing {} informer", resource_name);
                    self.resync();
                }
            }
        }

        Err(ControllerError::Watch(format!("{resource_name} watch stream ended")))
    }

    fn notify_applied(&self, old: Option<Arc<K>>, new: &Arc<K>) {
        match old {
            Some(old) => self.handler.on_update(&old, new),
            None => self.handler.on_add(new),
        }
    }
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Watches one resource kind and feeds its cache and subscriber.
pub struct Informer<K: Resource + Clone + 'static>
where
    K::DynamicType: Eq + Hash + Clone,
{
    api: Api<K>,
    dispatcher: EventDispatcher<K>,
    resource_name: &'static str,
    resync_period: Option<Duration>,
}

impl<K> Informer<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    pub fn new(
        api: Api<K>,
        handler: Arc<dyn EventHandler<K>>,
        resource_name: &'static str,
        resync_period: Option<Duration>,
    ) -> Self {
        Self {
            api,
            dispatcher: EventDispatcher::new(handler),
            resource_name,
            resync_period,
        }
    }

    pub fn store(&self) -> Store<K> {
        self.dispatcher.store()
    }

    /// Runs until the watch stream ends, which only happens if the stream is dropped.
    ///
    /// Watch errors are logged and retried with backoff.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Starting {} informer", self.resource_name);

        let stream = Box::pin(watcher(self.api, watcher::Config::default()).default_backoff());
        self.dispatcher
            .pump(stream, self.resync_period, self.resource_name)
            .await
    }
}
