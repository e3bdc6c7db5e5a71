pub mod config;
pub mod errors;
pub mod ext_kal_fltr;
pub mod filters;
pub mod linalg;
