pub mod drive_helpers;
pub mod episode;
pub mod estimator;
pub mod obstacle;
pub mod sensors;
pub mod vehicle;
