pub mod camera;
pub mod extraction;
pub mod generation;
pub mod image_ref;
pub mod rate_limit;
pub mod storage;
