//! GaitRec records gait sessions: several participants walk around with a
//! phone each while a fixed camera films them. The phones run a sensor
//! logger app that POSTs batches of motion readings (accelerometer,
//! gyroscope, orientation, gravity) over HTTP; every reading is tagged with
//! the participant's current activity and phone placement and stored in a
//! per-participant table. At the same time the camera stream is saved to a
//! video file, with one timestamped row per frame so the two can be lined
//! up afterwards.
//!
//! The moving parts, in the order data flows through them:
//!
//! - [server] accepts requests and hands `/data` bodies to [intake].
//! - [intake] resolves the device through the [registry], normalizes the
//!   payload ([payload]), applies the per-subject [throttle], and pushes
//!   records into the bounded [queue].
//! - [writer] drains the queue into SQLite through [store] on its own
//!   thread.
//! - [video] runs the camera on another thread.
//! - [shutdown] ties it all together: one signal, raised once, that every
//!   loop checks.

#![warn(missing_docs)]
pub mod args;
pub mod config;
pub mod gui;
pub mod intake;
pub mod payload;
pub mod queue;
pub mod record;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod stats;
pub mod store;
pub mod subject;
pub mod throttle;
pub mod video;
pub mod writer;
