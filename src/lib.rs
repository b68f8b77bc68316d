//! procwatch: samples the process table at a fixed interval, derives
//! per-process activity metrics, and raises desktop notifications when a
//! process burns CPU or grows its resident set beyond configured limits
//! for a sustained period.

pub mod alerts;
pub mod collector;
pub mod config;
pub mod detector;
pub mod metrics;
pub mod notifier;
pub mod protocol;
pub mod sampler;
pub mod socket;
