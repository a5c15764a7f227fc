//! Primary file selection

use super::FileEntry;

/// Extensions treated as playable video, lowercase.
pub const VIDEO_EXTENSIONS: [&str; 9] = [
    "mp4", "mkv", "avi", "mov", "webm", "flv", "wmv", "mpg", "mpeg",
];

/// Picks the file to stream: the first video in pack order, else the first
/// file. `None` only for an empty pack.
pub fn select_primary_file(files: &[FileEntry]) -> Option<&FileEntry> {
    files
        .iter()
        .find(|file| is_video(&file.name))
        .or_else(|| files.first())
}

fn is_video(name: &str) -> bool {
    name.rsplit_once('.').is_some_and(|(_, ext)| {
        VIDEO_EXTENSIONS
            .iter()
            .any(|video| ext.eq_ignore_ascii_case(video))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(names: &[&str]) -> Vec<FileEntry> {
        names
            .iter()
            .enumerate()
            .map(|(index, name)| FileEntry {
                index,
                name: name.to_string(),
                path: format!("pack/{name}"),
                length: 100,
            })
            .collect()
    }

    #[test]
    fn test_first_video_in_pack_order_wins() {
        let files = entries(&["readme.nfo", "sample.MKV", "movie.mp4"]);
        assert_eq!(select_primary_file(&files).unwrap().index, 1);
    }

    #[test]
    fn test_falls_back_to_first_file() {
        let files = entries(&["notes.txt", "cover.jpg"]);
        assert_eq!(select_primary_file(&files).unwrap().index, 0);
    }

    #[test]
    fn test_empty_pack_has_no_selection() {
        assert!(select_primary_file(&[]).is_none());
    }

    #[test]
    fn test_extension_must_follow_dot() {
        let files = entries(&["mp4", "clip.mpeg"]);
        assert_eq!(select_primary_file(&files).unwrap().name, "clip.mpeg");
    }
}
