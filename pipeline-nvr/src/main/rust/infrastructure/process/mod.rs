mod ffmpeg_launcher;

pub use ffmpeg_launcher::{FfmpegLauncher, FfmpegProcess};
