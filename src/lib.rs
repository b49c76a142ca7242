//! # Smart Photo
//!
//! Subject-aware framing, quality scoring and rotating photo pools for
//! home-screen widgets.
//!
//! # Architecture
//!
//! ```text
//! source bytes ──▶ pipeline ──▶ master + small / medium / large renders
//!                     │
//!          focus ─────┤  (subject boxes → cropper → one crop per size)
//!                     ▼
//!                  scorer ──▶ score + flags
//!                     │
//!  asset source ──▶ shuffle ──▶ manifest (rotating, score-ordered pool)
//! ```
//!
//! Every persisted value ([`types::SmartPhotoSpec`],
//! [`manifest::ShuffleManifest`]) is a plain serde value. Operations take a
//! snapshot and return a new one together with the store files it stopped
//! referencing; callers save first and delete afterwards.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`geometry`] | Normalised rects, aspect maths, aspect-locked expansion |
//! | [`focus`] | Subject detector trait, coordinate adapter, focus box weighting |
//! | [`cropper`] | Crop selection per output size from focus boxes |
//! | [`imaging`] | Decode, straighten, turn, crop, resample, budgeted JPEG encode |
//! | [`pipeline`] | Prepare, re-crop, regenerate and override single photos |
//! | [`scorer`] | Content and technical quality score |
//! | [`candidates`] | Pool rules, memories windows, anti-repeat thinning, interleave |
//! | [`manifest`] | Pool state, rotation and pure edits |
//! | [`shuffle`] | Builds pools from an asset source and prepares them in batches |
//! | [`source`] | Asset source trait and a directory-backed library |
//! | [`store`] | Named blob store trait, directory and in-memory stores |
//! | [`config`] | `config.toml` loading, merging and validation |
//! | [`types`] | Size classes, render targets and the persisted photo spec |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Explicit Settings
//!
//! Render targets, budgets and scorer constants are resolved once into
//! [`config::Settings`] and passed into every constructor. Nothing reads
//! global defaults, so tests run any configuration side by side.
//!
//! ## Capabilities as Traits
//!
//! Detection ([`focus::SubjectDetector`]), decoding and encoding
//! ([`imaging::ImageCodec`]), storage ([`store::ByteStore`]) and the photo
//! library ([`source::AssetSource`]) are `Sync` traits. The core never
//! touches a path or a platform API directly; tests swap in recording mocks.
//!
//! ## Content-Addressed Renders
//!
//! Render files are named after a digest of their bytes. A re-render that
//! produces the same pixels keeps its name, and a new file never overwrites
//! one that a saved spec or manifest still references.

pub mod candidates;
pub mod config;
pub mod cropper;
pub mod focus;
pub mod geometry;
pub mod imaging;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod scorer;
pub mod shuffle;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
