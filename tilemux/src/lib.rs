//! TileMux - Concurrent tile processing and spatial picking for 3D maps
//!
//! This library provides two subsystems of a tile-based 3D map engine:
//! a worker-pool dispatch layer that farms tile decoding and tiling out to
//! external worker processes, and a pick engine that resolves screen
//! coordinates to the map features under them.
//!
//! - [`worker`]: request/response multiplexing over a pool of workers, with
//!   per-request timeouts, cancellation, and shared-pool lifecycle.
//! - [`pick`]: ray-based intersection over visible tiles, their cross-tile
//!   dependencies, anchors, and screen-space labels.
//! - [`geo`]: quadtree tile addressing and Morton codes.
//! - [`geometry`]: the `f64` ray/box primitives picking is built on.

pub mod geo;
pub mod geometry;
pub mod pick;
pub mod worker;
