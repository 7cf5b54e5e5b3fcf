//! Comm host: the channel primitives the bridge runs on.
//!
//! - **hub**: in-process comm manager (targets, comms, frame delivery)
//! - **manager**: the [`WidgetManager`] seam and its lab/classic variants

pub mod hub;
pub mod manager;

pub use hub::{Comm, CommManager, Connection, FrameReceiver, MessageReceiver, TargetListener};
pub use manager::{ClassicManager, LabManager, ReadySignal, Readiness, WidgetManager};
