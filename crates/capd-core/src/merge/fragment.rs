//! Fragment file names: `<title>.f<format id>.<ext>`.

use regex::Regex;
use std::sync::LazyLock;

static FRAGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.+)\.f(\d+)\.(mp4|webm|mkv|m4a|opus|ogg)$").expect("valid fragment regex")
});

// Video format ids the capture tool is known to produce, grouped by codec.
const VIDEO_FORMAT_IDS: &[&str] = &[
    // VP9 / AV1 high quality
    "299", "298", "303", "302", "308", "315", "313", "271",
    // H.264
    "137", "136", "135", "134", "133", "160",
    // VP9
    "248", "247", "244", "243", "242", "278",
    // AV1
    "616", "614", "612", "610", "608", "606", "604", "602", "600", "598", "596", "594", "571",
    // HDR
    "337", "336", "335", "334", "333", "332", "331", "330", "329",
    // AV1
    "400", "401", "402",
    // VP9
    "699", "698", "697", "696", "695", "694",
];

const AUDIO_FORMAT_IDS: &[&str] = &[
    "140", "141", "139", "251", "250", "249", "258", "256", "327", "328",
];

const AUDIO_EXTS: &[&str] = &["m4a", "opus", "ogg"];

/// Parsed fragment file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub file_name: String,
    pub title: String,
    pub format_id: String,
    /// Lowercase container extension.
    pub ext: String,
}

impl Fragment {
    pub fn parse(file_name: &str) -> Option<Self> {
        let caps = FRAGMENT.captures(file_name)?;
        Some(Self {
            file_name: file_name.to_string(),
            title: caps[1].to_string(),
            format_id: caps[2].to_string(),
            ext: caps[3].to_ascii_lowercase(),
        })
    }

    pub fn has_audio_ext(&self) -> bool {
        AUDIO_EXTS.contains(&self.ext.as_str())
    }
}

pub fn is_fragment(file_name: &str) -> bool {
    FRAGMENT.is_match(file_name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Video,
    Audio,
}

/// Decide whether `frag` is the audio or video half of a pair.
///
/// Rule order: known audio id, audio extension, known video id, then the
/// pairing heuristic (a same-titled audio-extension sibling makes it video).
/// `None` means the fragment cannot be placed and is left alone.
pub fn classify(frag: &Fragment, siblings: &[Fragment]) -> Option<FragmentKind> {
    let id = frag.format_id.as_str();
    if AUDIO_FORMAT_IDS.contains(&id) || frag.has_audio_ext() {
        return Some(FragmentKind::Audio);
    }
    if VIDEO_FORMAT_IDS.contains(&id) {
        return Some(FragmentKind::Video);
    }
    let paired = siblings
        .iter()
        .any(|s| s.file_name != frag.file_name && s.title == frag.title && s.has_audio_ext());
    paired.then_some(FragmentKind::Video)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(name: &str) -> Fragment {
        Fragment::parse(name).unwrap()
    }

    #[test]
    fn parses_title_id_and_ext() {
        let f = frag("My Stream 2024.f299.MP4");
        assert_eq!(f.title, "My Stream 2024");
        assert_eq!(f.format_id, "299");
        assert_eq!(f.ext, "mp4");
        assert!(Fragment::parse("My Stream.mp4").is_none());
        assert!(Fragment::parse("My Stream.f299.mp4.part").is_none());
    }

    #[test]
    fn known_ids_win() {
        let v = frag("T.f299.mp4");
        let a = frag("T.f140.mp4");
        assert_eq!(classify(&v, &[]), Some(FragmentKind::Video));
        assert_eq!(classify(&a, &[]), Some(FragmentKind::Audio));
    }

    #[test]
    fn audio_extension_fallback() {
        let a = frag("T.f9999.opus");
        assert_eq!(classify(&a, &[]), Some(FragmentKind::Audio));
    }

    #[test]
    fn unknown_video_id_needs_audio_sibling() {
        let v = frag("T.f9001.webm");
        assert_eq!(classify(&v, &[v.clone()]), None);
        let siblings = vec![v.clone(), frag("T.f9002.m4a")];
        assert_eq!(classify(&v, &siblings), Some(FragmentKind::Video));
        let other_title = vec![v.clone(), frag("Other.f9002.m4a")];
        assert_eq!(classify(&v, &other_title), None);
    }
}
