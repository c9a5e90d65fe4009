//! Data objects and their lifecycle: image payloads, per-device residency
//! with reference counting, streaming frame sequences and the scene-graph
//! attachment point.

pub mod dynamic;
pub mod image;
pub mod object;
pub(crate) mod residency;
pub mod scene;

pub use dynamic::{ConsumerId, DynamicData};
pub use image::ImageDescriptor;
pub use object::{DataObject, ImageReadAccess, ImageWriteAccess};
pub use scene::{SceneNode, Transform, IDENTITY};
