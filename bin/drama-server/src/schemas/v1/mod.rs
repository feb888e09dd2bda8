pub mod episode;
pub mod generation;
pub mod task;
pub mod video_merge;
