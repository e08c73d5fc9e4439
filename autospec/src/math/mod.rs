//! Numerical helpers shared by segmentation and cross-correlation.

pub mod statistics;
