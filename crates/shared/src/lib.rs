//! Types shared between the asset gateway, the viewer seam and front ends.

pub mod domain;
pub mod error;
pub mod protocol;
