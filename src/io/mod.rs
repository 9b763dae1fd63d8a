//! Narrow interfaces to the outside world: key injection and pixel sampling.
//!
//! - `keys`: the [`KeySender`] capability and its Enigo-backed implementation.
//! - `pixels`: the [`PixelSampler`] capability, capture plans and frames.

pub mod keys;
pub mod pixels;

pub use keys::{EnigoKeySender, KeyError, KeySender, parse_key};
pub use pixels::{CapturePlan, PixelFrame, PixelSampler, ProfileEchoSampler, SampleError, SampleKey};
