//! StateMgmt Core
//!
//! This crate provides the state management runtime for declarative UI
//! views. It implements:
//!
//! - Observed properties for scalar and object-typed state
//! - Two-way links and one-way props that share state down the view tree
//! - A subscriber registry with explicit teardown
//! - View nodes with read tracking and batched re-rendering
//! - Local, application, environment and persistent storage
//!
//! Everything runs on one thread. A property write notifies its
//! subscribers synchronously but never repaints; it marks the affected
//! views dirty and the [`RenderScheduler`](view::RenderScheduler) renders
//! them together on its next tick.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `state`: properties, subscribers, the registry and render tracking
//! - `view`: view nodes and the render scheduler
//! - `storage`: name-keyed storage shared between views
//! - `config`: per-thread runtime policy
//! - `error`: the error taxonomy
//!
//! # Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use statemgmt_core::state::ObservedProperty;
//! use statemgmt_core::view::{RenderScheduler, View};
//!
//! let scheduler = Rc::new(RenderScheduler::new());
//! let parent = View::new("Parent", Rc::clone(&scheduler));
//! let count = parent.declare_state("count", 0);
//!
//! let child = View::new_child(&parent, "Child");
//! let link = child.declare_link("count", count.clone())?;
//!
//! link.set(5);                   // written through to the parent's state
//! assert_eq!(count.get(), 5);
//! scheduler.tick();              // both views re-render once
//! ```

pub mod config;
pub mod error;
pub mod state;
pub mod storage;
pub mod view;

pub use config::{StateConfig, ViolationPolicy};
pub use error::{Result, StateError};
