//! Per-IO generators: direction, block size, and offset.
//!
//! For every loop iteration the worker asks these three generators what to do
//! next: [`direction::DirChooser`] picks read/write/trim from the configured
//! mix, [`bs::BsSplitter`] draws a block size from the per-direction
//! distribution, and [`offset::OffsetGenerator`] produces the next file
//! offset honoring sequentiality, zones, and the no-repeat random map.
//!
//! All three draw from dedicated PRNG streams so their sequences never
//! perturb one another.

pub mod bs;
pub mod direction;
pub mod offset;

pub use bs::BsSplitter;
pub use direction::DirChooser;
pub use offset::{CursorState, OffsetGenerator};
