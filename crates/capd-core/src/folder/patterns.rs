//! File-name patterns shared by the folder classifier and safe cleanup.

use regex::Regex;
use std::sync::LazyLock;

const VIDEO_EXTS: &[&str] = &["mp4", "mkv", "webm", "avi", "mov", "flv", "wmv"];
const PARTIAL_EXTS: &[&str] = &["part", "ytdl"];
const AUXILIARY_EXTS: &[&str] = &[
    "jpg",
    "jpeg",
    "png",
    "webp",
    "json",
    "description",
    "txt",
    "vtt",
    "srt",
    "ass",
    "lrc",
    "m4a",
    "aac",
    "opus",
    "ogg",
];
const AUDIO_EXTS: &[&str] = &["m4a", "opus", "ogg"];

static VIDEO_FRAGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.f\d+\.(mp4|webm|mkv)$").expect("valid fragment regex"));

fn extension(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

fn has_ext(name: &str, exts: &[&str]) -> bool {
    extension(name).is_some_and(|e| exts.contains(&e.as_str()))
}

/// `Title.f299.mp4` style video-container fragment.
pub fn is_video_fragment(name: &str) -> bool {
    VIDEO_FRAGMENT.is_match(name)
}

/// Finished video container (fragments excluded).
pub fn is_final_video(name: &str) -> bool {
    has_ext(name, VIDEO_EXTS) && !is_video_fragment(name)
}

/// In-progress download: `.part` / `.ytdl` or a video fragment.
pub fn is_partial(name: &str) -> bool {
    has_ext(name, PARTIAL_EXTS) || is_video_fragment(name)
}

/// Thumbnails, subtitles, metadata sidecars and stray audio tracks.
pub fn is_auxiliary(name: &str) -> bool {
    has_ext(name, AUXILIARY_EXTS)
}

/// Media that a cleanup must never delete.
pub fn is_protected(name: &str) -> bool {
    has_ext(name, VIDEO_EXTS) || has_ext(name, PARTIAL_EXTS) || has_ext(name, AUDIO_EXTS)
}
