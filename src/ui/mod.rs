//! # UI Module
//!
//! Styling helpers for the device list and listening panel.

pub mod styles;
