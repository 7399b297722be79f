//! The volume-packed blob store: volume files, volume groups, the
//! embedded index store, the blob engine built on top of them, the
//! thumbnail cache, and process lifecycle (`spec.md` §4.2–§4.7).

pub mod engine;
pub mod index;
pub mod lifecycle;
pub mod thumbnail;
pub mod volume;
pub mod volume_group;

pub use engine::BlobEngine;
pub use index::{IndexStore, Op};
pub use lifecycle::{Lifecycle, NoopTransport, Transport};
pub use thumbnail::{ImageCrateResizer, ImageResizer, ResizedImage, ThumbnailCache};
pub use volume::VolumeFile;
pub use volume_group::VolumeGroup;
