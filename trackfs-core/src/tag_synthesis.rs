//! Tag synthesis (spec §4.D step 3): the ordered rules that turn an album's
//! inherited tags plus one cue track into the final per-track tag set.

use regex::Regex;

use crate::model::{CueAlbumInfo, ResolvedTrack};
use crate::tags::TagMap;

pub fn synthesize(
    inherited: &TagMap,
    track: &ResolvedTrack,
    album_info: &CueAlbumInfo,
    ignore_tags: &Regex,
) -> TagMap {
    let mut tags = inherited.clone();

    tags.remove_matching(ignore_tags);

    if !tags.contains("ALBUMARTIST") {
        if let Some(artist) = tags.get_first("ARTIST").map(str::to_string) {
            tags.set_one("ALBUMARTIST", artist);
        }
    }
    if !tags.contains("ALBUM") {
        if let Some(title) = tags.get_first("TITLE").map(str::to_string) {
            tags.set_one("ALBUM", title);
        }
    }

    if let Some(title) = &track.cue.title {
        tags.set_one("TITLE", title.clone());
    }
    if !track.cue.performer.is_empty() {
        tags.set("ARTIST", track.cue.performer.clone());
    }
    if !track.cue.songwriter.is_empty() {
        tags.set("COMPOSER", track.cue.songwriter.clone());
    }

    if let Some(album_title) = &album_info.title {
        tags.fill_if_absent("ALBUM", vec![album_title.clone()]);
    }
    if !album_info.performer.is_empty() {
        tags.fill_if_absent("ALBUMARTIST", album_info.performer.clone());
    }

    tags.set_one("TRACKNUMBER", format!("{:02}", track.cue.ordinal));

    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CueIndex, CueTrack};

    fn track(ordinal: u32, title: Option<&str>, performer: Vec<&str>) -> ResolvedTrack {
        ResolvedTrack {
            cue: CueTrack {
                ordinal,
                title: title.map(str::to_string),
                performer: performer.into_iter().map(str::to_string).collect(),
                songwriter: vec![],
                indices: vec![CueIndex { number: 1, sample: 0 }],
            },
            start_sample: 0,
            end_sample: 100,
        }
    }

    #[test]
    fn spec_scenario_three_tag_overrides() {
        let mut inherited = TagMap::new();
        inherited.set_one("ARTIST", "Alice");
        inherited.set_one("TITLE", "Live");
        let ignore = Regex::new(r"(?i)CUE_TRACK.*|COMMENT").unwrap();
        let cue_track = track(1, None, vec!["Bob", "Carol"]);
        let album_info = CueAlbumInfo::default();

        let tags = synthesize(&inherited, &cue_track, &album_info, &ignore);

        assert_eq!(
            tags.get("ARTIST"),
            Some(["Bob".to_string(), "Carol".to_string()].as_slice())
        );
        assert_eq!(tags.get_first("ALBUMARTIST"), Some("Alice"));
        assert_eq!(tags.get_first("ALBUM"), Some("Live"));
        assert_eq!(tags.get_first("TITLE"), Some("Live"));
        assert_eq!(tags.get_first("TRACKNUMBER"), Some("01"));
        assert!(tags.get("CUESHEET").is_none());
        assert!(tags.get("COMMENT").is_none());
    }

    #[test]
    fn cue_title_overrides_inherited_title() {
        let mut inherited = TagMap::new();
        inherited.set_one("TITLE", "Whole Album");
        let ignore = Regex::new(r"(?i)CUE_TRACK.*|COMMENT").unwrap();
        let cue_track = track(3, Some("Track Three"), vec![]);
        let tags = synthesize(&inherited, &cue_track, &CueAlbumInfo::default(), &ignore);
        assert_eq!(tags.get_first("TITLE"), Some("Track Three"));
        assert_eq!(tags.get_first("TRACKNUMBER"), Some("03"));
    }

    #[test]
    fn album_level_cue_info_never_overwrites_existing() {
        let mut inherited = TagMap::new();
        inherited.set_one("ALBUM", "Existing Album");
        let ignore = Regex::new(r"(?i)CUE_TRACK.*|COMMENT").unwrap();
        let cue_track = track(1, None, vec![]);
        let mut album_info = CueAlbumInfo::default();
        album_info.title = Some("Cue Album".into());
        let tags = synthesize(&inherited, &cue_track, &album_info, &ignore);
        assert_eq!(tags.get_first("ALBUM"), Some("Existing Album"));
    }

    #[test]
    fn ignore_tags_and_newline_values_dropped() {
        let mut inherited = TagMap::new();
        inherited.set_one("CUESHEET", "a\nb");
        inherited.set_one("CUE_TRACK00_MSF", "00:00:00");
        inherited.set_one("COMMENT", "hi");
        let ignore = Regex::new(r"(?i)CUE_TRACK.*|COMMENT").unwrap();
        let cue_track = track(1, None, vec![]);
        let tags = synthesize(&inherited, &cue_track, &CueAlbumInfo::default(), &ignore);
        assert!(tags.get("CUESHEET").is_none());
        assert!(tags.get("CUE_TRACK00_MSF").is_none());
        assert!(tags.get("COMMENT").is_none());
    }
}
