//! Render Context
//!
//! The render context tracks which view is currently rendering. Properties
//! read while a view renders subscribe that view lazily, without an explicit
//! subscribe call, and record themselves as the view's dependencies.
//!
//! # Implementation
//!
//! We use a thread-local stack. Entering a render pushes the view; dropping
//! the returned guard pops it. Nested renders (a parent rendering a child
//! inline) see the innermost view.

use std::cell::RefCell;
use std::rc::Weak;

use super::subscriber::{MultiPropertySubscriber, SubscriberId};

thread_local! {
    static RENDER_STACK: RefCell<Vec<RenderEntry>> = RefCell::new(Vec::new());
}

/// An entry in the render stack.
struct RenderEntry {
    /// The rendering view.
    view_id: SubscriberId,
    /// Handle used to subscribe the view to properties it reads.
    view: Weak<dyn MultiPropertySubscriber>,
    /// Properties read during this render, in first-read order.
    dependencies: Vec<SubscriberId>,
}

/// Guard that pops the render context when dropped.
///
/// This keeps the stack balanced even if a render function panics.
pub struct RenderContext {
    view_id: SubscriberId,
}

impl RenderContext {
    /// Enter a render pass for the given view.
    pub fn enter(view_id: SubscriberId, view: Weak<dyn MultiPropertySubscriber>) -> Self {
        RENDER_STACK.with(|stack| {
            stack.borrow_mut().push(RenderEntry {
                view_id,
                view,
                dependencies: Vec::new(),
            });
        });

        Self { view_id }
    }

    /// Check if a view is currently rendering.
    pub fn is_active() -> bool {
        RENDER_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The identity of the innermost rendering view, if any.
    pub fn current_view() -> Option<SubscriberId> {
        RENDER_STACK.with(|stack| stack.borrow().last().map(|entry| entry.view_id))
    }

    pub(crate) fn current() -> Option<(SubscriberId, Weak<dyn MultiPropertySubscriber>)> {
        RENDER_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| (entry.view_id, Weak::clone(&entry.view)))
        })
    }

    /// Record that the current view read `property`.
    pub fn track_read(property: SubscriberId) {
        RENDER_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if !entry.dependencies.contains(&property) {
                    entry.dependencies.push(property);
                }
            }
        });
    }

    /// Properties read so far in the innermost render.
    pub fn get_dependencies() -> Vec<SubscriberId> {
        RENDER_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.clone())
                .unwrap_or_default()
        })
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        RENDER_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.view_id, self.view_id,
                    "RenderContext mismatch: expected {:?}, got {:?}",
                    self.view_id, entry.view_id
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PropertySubscriber;
    use std::rc::Rc;

    struct NullView(SubscriberId);

    impl PropertySubscriber for NullView {
        fn id(&self) -> SubscriberId {
            self.0
        }

        fn about_to_be_deleted(&self, _owning_view: Option<SubscriberId>) {}
    }

    impl MultiPropertySubscriber for NullView {
        fn property_has_changed(&self, _info: Option<&str>) {}
    }

    fn handle(id: SubscriberId) -> (Rc<NullView>, Weak<dyn MultiPropertySubscriber>) {
        let view = Rc::new(NullView(id));
        let weak = Rc::downgrade(&view);
        let weak: Weak<dyn MultiPropertySubscriber> = weak;
        (view, weak)
    }

    #[test]
    fn context_tracks_view() {
        let id = SubscriberId::new();
        let (_view, weak) = handle(id);

        assert!(!RenderContext::is_active());
        assert!(RenderContext::current_view().is_none());

        {
            let _ctx = RenderContext::enter(id, weak);
            assert!(RenderContext::is_active());
            assert_eq!(RenderContext::current_view(), Some(id));
        }

        assert!(!RenderContext::is_active());
        assert!(RenderContext::current_view().is_none());
    }

    #[test]
    fn reads_are_deduplicated() {
        let id = SubscriberId::new();
        let (_view, weak) = handle(id);
        let _ctx = RenderContext::enter(id, weak);

        let a = SubscriberId::new();
        let b = SubscriberId::new();
        RenderContext::track_read(a);
        RenderContext::track_read(b);
        RenderContext::track_read(a);

        assert_eq!(RenderContext::get_dependencies(), vec![a, b]);
    }

    #[test]
    fn nested_contexts() {
        let outer = SubscriberId::new();
        let inner = SubscriberId::new();
        let (_outer_view, outer_weak) = handle(outer);
        let (_inner_view, inner_weak) = handle(inner);

        {
            let _outer_ctx = RenderContext::enter(outer, outer_weak);
            RenderContext::track_read(SubscriberId::from(1));

            {
                let _inner_ctx = RenderContext::enter(inner, inner_weak);
                assert_eq!(RenderContext::current_view(), Some(inner));
                RenderContext::track_read(SubscriberId::from(2));
                assert_eq!(RenderContext::get_dependencies(), vec![SubscriberId::from(2)]);
            }

            assert_eq!(RenderContext::current_view(), Some(outer));
            assert_eq!(RenderContext::get_dependencies(), vec![SubscriberId::from(1)]);
        }

        assert!(RenderContext::current_view().is_none());
    }
}
