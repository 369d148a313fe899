//! Rolling statistics and soft-DTW numeric kernels used by the dataset
//! binarizer and by whatever model a board node invokes.

pub mod moments;
pub mod pack;
pub mod softdtw;

pub use moments::{RollingMoments, WindowedMoments};
pub use pack::{FieldAccessor, Normalizable, RollingPack};
pub use softdtw::{softdtw_backward, softdtw_cost, softdtw_forward, Tensor3};
