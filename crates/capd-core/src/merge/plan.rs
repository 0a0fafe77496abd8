use std::collections::BTreeMap;

use super::fragment::{self, Fragment, FragmentKind};

/// One title's fragments and the output they merge into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub title: String,
    /// In name order; the first one is merged, all are cleaned up on success.
    pub videos: Vec<String>,
    pub audios: Vec<String>,
    pub output: String,
}

impl MergePlan {
    pub fn video(&self) -> &str {
        &self.videos[0]
    }

    pub fn audio(&self) -> &str {
        &self.audios[0]
    }

    pub fn fragments(&self) -> impl Iterator<Item = &String> {
        self.videos.iter().chain(self.audios.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderPlan {
    /// A non-fragment final video is already present.
    AlreadyMerged,
    /// No complete audio + video pair.
    Nothing,
    Pairs(Vec<MergePlan>),
}

/// `webm` video merges into `mkv`; everything else into `mp4`.
pub fn output_ext(video_ext: &str) -> &'static str {
    if video_ext.eq_ignore_ascii_case("webm") {
        "mkv"
    } else {
        "mp4"
    }
}

fn is_final_container(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    (lower.ends_with(".mp4") || lower.ends_with(".mkv") || lower.ends_with(".webm"))
        && !fragment::is_fragment(name)
}

/// Work out what to merge from a folder's file names. Pure.
pub fn plan_folder(names: &[String]) -> FolderPlan {
    if names.iter().any(|n| is_final_container(n)) {
        return FolderPlan::AlreadyMerged;
    }

    let mut sorted: Vec<&String> = names.iter().collect();
    sorted.sort();
    let frags: Vec<Fragment> = sorted.iter().filter_map(|n| Fragment::parse(n)).collect();

    let mut by_title: BTreeMap<&str, (Vec<&Fragment>, Vec<&Fragment>)> = BTreeMap::new();
    for f in &frags {
        let slot = by_title.entry(f.title.as_str()).or_default();
        match fragment::classify(f, &frags) {
            Some(FragmentKind::Video) => slot.0.push(f),
            Some(FragmentKind::Audio) => slot.1.push(f),
            None => {}
        }
    }

    let plans: Vec<MergePlan> = by_title
        .into_iter()
        .filter(|(_, (v, a))| !v.is_empty() && !a.is_empty())
        .map(|(title, (videos, audios))| MergePlan {
            title: title.to_string(),
            output: format!("{}.{}", title, output_ext(&videos[0].ext)),
            videos: videos.iter().map(|f| f.file_name.clone()).collect(),
            audios: audios.iter().map(|f| f.file_name.clone()).collect(),
        })
        .collect();

    if plans.is_empty() {
        FolderPlan::Nothing
    } else {
        FolderPlan::Pairs(plans)
    }
}
