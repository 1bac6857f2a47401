//! Processing passes, run in order by the pipeline.
//!
//! Each pass reads the previous pass's output from `AudioState` and
//! writes its own.

pub mod pass_0;
pub mod pass_1;
pub mod pass_2;
pub mod pass_3;
pub mod pass_4;
