use std::path::{Path, PathBuf};

#[cfg(windows)]
const ENCODER_BINARY: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const ENCODER_BINARY: &str = "ffmpeg";

/// Command line of one encrypted-HLS recording process
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderCommand {
    program: PathBuf,
    input_url: String,
    key_info_file: PathBuf,
    segment_pattern: PathBuf,
    playlist: PathBuf,
    segment_seconds: u32,
}

impl EncoderCommand {
    pub fn new(
        program: PathBuf,
        input_url: impl Into<String>,
        key_info_file: PathBuf,
        segment_pattern: PathBuf,
        playlist: PathBuf,
        segment_seconds: u32,
    ) -> Self {
        Self {
            program,
            input_url: input_url.into(),
            key_info_file,
            segment_pattern,
            playlist,
            segment_seconds,
        }
    }

    /// Accepts either the binary itself or the directory holding it
    pub fn resolve_program(path: &Path) -> PathBuf {
        let is_binary = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with("ffmpeg"))
            .unwrap_or(false);
        if is_binary && !path.is_dir() {
            path.to_path_buf()
        } else {
            path.join(ENCODER_BINARY)
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn input_url(&self) -> &str {
        &self.input_url
    }

    pub fn playlist(&self) -> &Path {
        &self.playlist
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(40);
        if self.input_url.to_ascii_lowercase().starts_with("rtsp") {
            args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
        }
        args.extend(
            [
                "-fflags",
                "+genpts+discardcorrupt",
                "-i",
                self.input_url.as_str(),
                "-map",
                "0:v:0",
                "-map",
                "0:a:0?",
                "-c:v",
                "copy",
                "-c:a",
                "aac",
                "-b:a",
                "128k",
                "-ar",
                "48000",
                "-ac",
                "2",
                "-f",
                "hls",
                "-hls_time",
            ]
            .map(String::from),
        );
        args.push(self.segment_seconds.to_string());
        args.extend(["-hls_list_size".to_string(), "0".to_string()]);
        args.push("-hls_key_info_file".to_string());
        args.push(self.key_info_file.display().to_string());
        args.extend(["-strftime".to_string(), "1".to_string()]);
        args.push("-hls_segment_filename".to_string());
        args.push(self.segment_pattern.display().to_string());
        args.push("-y".to_string());
        args.push(self.playlist.display().to_string());
        args
    }
}
