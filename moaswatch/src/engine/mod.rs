pub mod detector;
pub mod scoring;
