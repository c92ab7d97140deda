//! Optional peripheral drivers layered on top of the kernel proper.
//!
//! None of these are wired into the scheduler or syscall gate; they exist
//! for a board that may or may not be attached to the serial line.

pub mod tux;
