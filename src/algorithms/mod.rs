//! Algorithm leaves implementing the process-node contract.

pub mod gaussian;
pub mod threshold;

pub use gaussian::GaussianSmoothing;
pub use threshold::BinaryThresholding;
