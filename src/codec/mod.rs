//! Codec layer.
//!
//! Everything that touches pixels lives here: decoding uploads, the four
//! encoders, and the geometric and colour transforms the crop path needs.
//! The policy layer above only decides which of these to call and with what
//! parameters.
//!
//! # Components
//!
//! - [`ImageCodec`]: trait the policy drives, so tests can substitute a fake
//! - [`StandardCodec`]: implementation on the `image` crate
//! - [`EncodeSettings`]: per-format encoder parameters
//! - [`transform`]: rotation, extraction and colour normalisation

mod encoder;
pub mod transform;

#[cfg(feature = "avif")]
pub use encoder::AVIF_SPEED;
pub use encoder::{EncodeSettings, ImageCodec, StandardCodec};
