//! Render Scheduler
//!
//! A property write never repaints. It marks the owning view dirty and
//! returns; the scheduler collects dirty views and re-renders them together
//! on the next tick.
//!
//! # Algorithm
//!
//! 1. `schedule(view)` inserts the view into the dirty set. A view that is
//!    already pending is not inserted twice, so any number of writes between
//!    two ticks costs one re-render.
//! 2. `tick()` takes the whole dirty set and re-renders each view that is
//!    still alive, in the order it was first marked.
//! 3. Views marked dirty while the batch renders land in the next batch.
//!
//! `run` drives `tick` from an async frame loop.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Weak;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::node::View;
use crate::config::StateConfig;
use crate::state::SubscriberId;

/// Batches dirty views into render ticks.
pub struct RenderScheduler {
    /// Views waiting for the next tick, in marking order.
    dirty: RefCell<IndexMap<SubscriberId, Weak<View>>>,

    /// Completed ticks.
    ticks: Cell<u64>,
}

impl RenderScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self {
            dirty: RefCell::new(IndexMap::new()),
            ticks: Cell::new(0),
        }
    }

    /// Queue a view for the next tick. Returns `false` if it was already queued.
    pub fn schedule(&self, id: SubscriberId, view: Weak<View>) -> bool {
        let mut dirty = self.dirty.borrow_mut();
        if dirty.contains_key(&id) {
            trace!(view = %id, "RenderScheduler: already pending");
            return false;
        }
        dirty.insert(id, view);
        trace!(view = %id, pending = dirty.len(), "RenderScheduler: scheduled");
        true
    }

    /// Drop a view from the pending batch. The view is no longer marked as
    /// needing an update, so its next change schedules it again.
    pub fn cancel(&self, id: SubscriberId) -> bool {
        let removed = self.dirty.borrow_mut().shift_remove(&id);
        match removed {
            Some(view) => {
                if let Some(view) = view.upgrade() {
                    view.clear_needs_update();
                }
                trace!(view = %id, "RenderScheduler: cancelled");
                true
            }
            None => false,
        }
    }

    /// Whether a view is waiting for the next tick.
    pub fn is_scheduled(&self, id: SubscriberId) -> bool {
        self.dirty.borrow().contains_key(&id)
    }

    /// Number of views waiting for the next tick.
    pub fn pending(&self) -> usize {
        self.dirty.borrow().len()
    }

    /// Re-render every pending view once. Returns how many views rendered.
    pub fn tick(&self) -> usize {
        let batch = std::mem::take(&mut *self.dirty.borrow_mut());
        self.ticks.set(self.ticks.get() + 1);
        if batch.is_empty() {
            return 0;
        }

        let mut rendered = 0;
        for (id, view) in batch {
            match view.upgrade() {
                Some(view) if !view.is_deleted() => {
                    view.rerender();
                    rendered += 1;
                }
                _ => trace!(view = %id, "RenderScheduler: view gone before its tick"),
            }
        }

        debug!(tick = self.ticks.get(), rendered, "RenderScheduler: tick");
        rendered
    }

    /// Number of ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks.get()
    }

    /// Tick once per `frame` until `shutdown` resolves. Returns the tick count.
    ///
    /// Views are not `Send`, so this runs on the current thread (a
    /// current-thread runtime or a `LocalSet`).
    pub async fn run<F>(&self, frame: Duration, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(frame);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        debug!(frame_ms = frame.as_millis() as u64, "RenderScheduler: frame loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }
        debug!(ticks = self.ticks.get(), "RenderScheduler: frame loop stopped");
        self.ticks.get()
    }

    /// [`run`](Self::run) with the frame interval of the installed [`StateConfig`].
    pub async fn run_configured<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        self.run(StateConfig::current().frame_interval(), shutdown).await
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ObservedProperty, PropertySubscriber, SubscriberManager};
    use std::rc::Rc;

    fn view(scheduler: &Rc<RenderScheduler>) -> Rc<View> {
        View::new("Counter", Rc::clone(scheduler))
    }

    #[test]
    fn writes_between_ticks_coalesce() {
        SubscriberManager::reset();
        let scheduler = Rc::new(RenderScheduler::new());
        let view = view(&scheduler);
        let count = view.declare_state("count", 0);
        view.set_render({
            let count = count.clone();
            move |_| {
                count.get();
            }
        });
        scheduler.tick();
        assert_eq!(view.render_count(), 1);

        count.set(1);
        count.set(2);
        count.set(3);
        assert_eq!(scheduler.pending(), 1);

        assert_eq!(scheduler.tick(), 1);
        assert_eq!(view.render_count(), 2);
        assert_eq!(scheduler.tick(), 0);
    }

    #[test]
    fn cancelled_view_does_not_render() {
        SubscriberManager::reset();
        let scheduler = Rc::new(RenderScheduler::new());
        let view = view(&scheduler);
        assert!(scheduler.is_scheduled(view.id()));

        assert!(scheduler.cancel(view.id()));
        assert_eq!(scheduler.tick(), 0);
        assert_eq!(view.render_count(), 0);
    }

    #[test]
    fn cancelled_view_renders_on_next_change() {
        SubscriberManager::reset();
        let scheduler = Rc::new(RenderScheduler::new());
        let view = view(&scheduler);
        let count = view.declare_state("count", 0);
        view.set_render({
            let count = count.clone();
            move |_| {
                count.get();
            }
        });
        scheduler.tick();

        count.set(1);
        assert!(scheduler.cancel(view.id()));
        assert!(!view.needs_update());

        count.set(2);
        assert!(view.needs_update());
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.tick(), 1);
        assert_eq!(view.render_count(), 2);
    }

    #[test]
    fn dropped_view_is_skipped() {
        SubscriberManager::reset();
        let scheduler = Rc::new(RenderScheduler::new());
        drop(view(&scheduler));

        assert_eq!(scheduler.tick(), 0);
        assert_eq!(scheduler.tick_count(), 1);
    }

    #[tokio::test]
    async fn frame_loop_renders_until_shutdown() {
        SubscriberManager::reset();
        let scheduler = Rc::new(RenderScheduler::new());
        let view = view(&scheduler);

        let ticks = scheduler
            .run(Duration::from_millis(1), tokio::time::sleep(Duration::from_millis(20)))
            .await;

        assert!(ticks >= 1);
        assert_eq!(view.render_count(), 1);
        assert_eq!(scheduler.pending(), 0);
    }
}
