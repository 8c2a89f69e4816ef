//! View Tree
//!
//! Views own observed state and re-render when it changes. Rendering is
//! deferred: a change marks the view dirty and the [`RenderScheduler`]
//! re-renders all dirty views together on its next tick.

mod node;
mod scheduler;

pub use node::View;
pub use scheduler::RenderScheduler;
