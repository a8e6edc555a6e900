//! Per-job working directory layout and artifact key naming.

use std::path::{Path, PathBuf};

use crate::message::JobMessage;

pub const TEMPLATE_DIR: &str = "written";
pub const CROPPED_DIR: &str = "1_cropped";
pub const INFERENCE_DIR: &str = "2_inference";
pub const SVG_DIR: &str = "3_svg";
pub const FONTS_DIR: &str = "4_fonts";

/// True when `s` can be used as exactly one path component.
pub fn is_path_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && !s.contains(['/', '\\', '\0'])
}

/// Map an arbitrary identifier onto a single safe path component.
pub fn sanitize_segment(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        "_job".to_string()
    } else {
        cleaned
    }
}

/// Directory tree owned by a single job attempt.
///
/// The root is keyed by the correlation id so that two jobs sharing a font name
/// never touch the same directories. Inside the root the stages see the
/// conventional `1_cropped/<font>` ... `4_fonts/<font>.*` layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLayout {
    root: PathBuf,
    font_name: String,
}

impl JobLayout {
    pub fn new(work_root: impl AsRef<Path>, correlation_id: &str, font_name: impl Into<String>) -> Self {
        Self {
            root: work_root.as_ref().join(sanitize_segment(correlation_id)),
            font_name: font_name.into(),
        }
    }

    pub fn for_message(work_root: impl AsRef<Path>, message: &JobMessage) -> Self {
        Self::new(work_root, &message.request_uuid, message.font_name.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn font_name(&self) -> &str {
        &self.font_name
    }

    /// Scratch directory the input template is downloaded into.
    pub fn template_dir(&self) -> PathBuf {
        self.root.join(TEMPLATE_DIR)
    }

    pub fn template_path(&self, member_id: &str, extension: &str) -> PathBuf {
        self.template_dir()
            .join(format!("{}-{}.{}", member_id, self.font_name, extension))
    }

    pub fn cropped_dir(&self) -> PathBuf {
        self.root.join(CROPPED_DIR).join(&self.font_name)
    }

    pub fn inference_dir(&self) -> PathBuf {
        self.root.join(INFERENCE_DIR).join(&self.font_name)
    }

    pub fn svg_dir(&self) -> PathBuf {
        self.root.join(SVG_DIR).join(&self.font_name)
    }

    pub fn fonts_dir(&self) -> PathBuf {
        self.root.join(FONTS_DIR)
    }

    pub fn font_ttf(&self) -> PathBuf {
        self.fonts_dir().join(format!("{}.ttf", self.font_name))
    }

    pub fn font_woff2(&self) -> PathBuf {
        self.fonts_dir().join(format!("{}.woff2", self.font_name))
    }

    /// Directories removed once the job is terminal, in deletion order.
    ///
    /// The root comes last; by then it only holds empty stage parents.
    pub fn scratch_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.template_dir(),
            self.cropped_dir(),
            self.inference_dir(),
            self.svg_dir(),
            self.fonts_dir(),
            self.root.clone(),
        ]
    }
}

/// Deterministic object keys for a job's artifacts.
///
/// Derived only from message identifiers, so a redelivered job overwrites the
/// objects of its earlier attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKeys {
    pub font_ttf: String,
    pub font_woff2: String,
    pub log: String,
}

impl ArtifactKeys {
    pub fn for_message(message: &JobMessage) -> Self {
        let file_key = message.file_key.trim_matches('/');
        Self {
            font_ttf: format!("fonts/{file_key}.ttf"),
            font_woff2: format!("fonts/{file_key}.woff2"),
            log: format!("{}.log", message.font_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(file_key: &str) -> JobMessage {
        JobMessage {
            font_id: "42".into(),
            file_key: file_key.into(),
            member_id: "7".into(),
            font_name: "Brush".into(),
            font_eng_name: "Brush".into(),
            template_url: "t.png".into(),
            author: "kim".into(),
            request_uuid: "abc-123".into(),
        }
    }

    #[test]
    fn layout_is_keyed_by_correlation_id() {
        let layout = JobLayout::for_message("/work", &message("k"));
        assert_eq!(layout.root(), Path::new("/work/abc-123"));
        assert_eq!(layout.cropped_dir(), Path::new("/work/abc-123/1_cropped/Brush"));
        assert_eq!(layout.inference_dir(), Path::new("/work/abc-123/2_inference/Brush"));
        assert_eq!(layout.svg_dir(), Path::new("/work/abc-123/3_svg/Brush"));
        assert_eq!(layout.font_ttf(), Path::new("/work/abc-123/4_fonts/Brush.ttf"));
        assert_eq!(layout.font_woff2(), Path::new("/work/abc-123/4_fonts/Brush.woff2"));
        assert_eq!(
            layout.template_path("7", "png"),
            Path::new("/work/abc-123/written/7-Brush.png")
        );
    }

    #[test]
    fn scratch_dirs_end_with_the_root() {
        let layout = JobLayout::new("/work", "id", "F");
        let dirs = layout.scratch_dirs();
        assert_eq!(dirs.first(), Some(&layout.template_dir()));
        assert_eq!(dirs.last(), Some(&PathBuf::from("/work/id")));
    }

    #[test]
    fn correlation_ids_cannot_escape_the_root() {
        assert_eq!(sanitize_segment("../../etc"), "______etc");
        assert_eq!(sanitize_segment(".."), "_job");
        assert_eq!(sanitize_segment(""), "_job");
        assert_eq!(sanitize_segment("3f2b-9c1e_x"), "3f2b-9c1e_x");
    }

    #[test]
    fn artifact_keys_are_deterministic() {
        let first = ArtifactKeys::for_message(&message("m7/f42"));
        let again = ArtifactKeys::for_message(&message("/m7/f42/"));
        assert_eq!(first, again);
        assert_eq!(first.font_ttf, "fonts/m7/f42.ttf");
        assert_eq!(first.font_woff2, "fonts/m7/f42.woff2");
        assert_eq!(first.log, "42.log");
    }

    #[test]
    fn path_segment_rules() {
        assert!(is_path_segment("손글씨"));
        assert!(is_path_segment("My Font"));
        assert!(!is_path_segment(""));
        assert!(!is_path_segment(".."));
        assert!(!is_path_segment("a/b"));
        assert!(!is_path_segment("a\\b"));
    }
}
