//! Projection of a flat listing onto a folder view.
//!
//! Everything here is a pure function of the requested prefix and one page
//! of listing results; no tree is ever stored.

use crate::backends::common::ListPage;
use crate::{DELIMITER, ObjectInfo};

/// What a caller needs to render one folder of a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderView {
    /// Bucket being browsed.
    pub bucket: String,
    /// The folder being shown; empty for the bucket root.
    pub prefix: String,
    /// Sub-folders, each ending in `/`.
    pub folders: Vec<String>,
    /// Objects in this folder, never including the folder's own marker.
    pub files: Vec<ObjectInfo>,
    /// Non-empty segments of the prefix.
    pub breadcrumbs: Vec<String>,
    /// Prefix of the enclosing folder; empty means the bucket root.
    pub parent_path: String,
    /// The provider had more entries than one page carried.
    pub truncated: bool,
}

impl FolderView {
    /// Classifies one listing page under `prefix`.
    pub fn project(bucket: &str, prefix: &str, page: ListPage) -> Self {
        let truncated = page.is_truncated();
        let files = page
            .objects
            .into_iter()
            .filter(|obj| obj.key != prefix)
            .collect();
        let breadcrumbs = breadcrumbs(prefix);
        let parent_path = parent_of(&breadcrumbs);
        Self {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            folders: page.common_prefixes,
            files,
            breadcrumbs,
            parent_path,
            truncated,
        }
    }

    /// Keys of the files, in listing order.
    pub fn file_keys(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.key.as_str())
    }

    /// True at the top of the bucket, where there is no parent link.
    pub fn is_root(&self) -> bool {
        self.breadcrumbs.is_empty()
    }

    /// Each breadcrumb paired with the prefix that opens it.
    pub fn breadcrumb_trail(&self) -> Vec<(&str, String)> {
        let mut path = String::new();
        self.breadcrumbs
            .iter()
            .map(|name| {
                path.push_str(name);
                path.push_str(DELIMITER);
                (name.as_str(), path.clone())
            })
            .collect()
    }
}

/// `"docs/images/"` → `["docs", "images"]`.
pub fn breadcrumbs(prefix: &str) -> Vec<String> {
    prefix
        .split(DELIMITER)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// `"docs/images/"` → `"docs/"`; single segments and the root → `""`.
pub fn parent_path(prefix: &str) -> String {
    parent_of(&breadcrumbs(prefix))
}

fn parent_of(breadcrumbs: &[String]) -> String {
    match breadcrumbs.split_last() {
        Some((_, [])) | None => String::new(),
        Some((_, ancestors)) => {
            let mut parent = ancestors.join(DELIMITER);
            parent.push_str(DELIMITER);
            parent
        }
    }
}

/// Last segment of a key: `"a/b/x.txt"` → `"x.txt"`.
pub fn file_name(key: &str) -> &str {
    key.rsplit(DELIMITER).next().unwrap_or(key)
}

/// Key of a file named `name` inside the folder `prefix`.
pub fn child_key(prefix: &str, name: &str) -> String {
    format!("{prefix}{name}")
}

/// Marker key of a sub-folder named `name` inside `prefix`.
pub fn child_folder(prefix: &str, name: &str) -> String {
    format!("{prefix}{}{DELIMITER}", name.trim_matches('/'))
}

/// Resolves a copy or move target. A destination that is empty or ends in
/// `/` names a folder, and the source's file name is kept.
pub fn destination_key(src_key: &str, destination: &str) -> String {
    if destination.is_empty() || destination.ends_with(DELIMITER) {
        child_key(destination, file_name(src_key))
    } else {
        destination.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(key: &str) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: Some(0),
            last_modified: None,
            etag: None,
        }
    }

    #[test]
    fn test_breadcrumbs_and_parent() {
        assert_eq!(breadcrumbs("docs/images/"), vec!["docs", "images"]);
        assert_eq!(parent_path("docs/images/"), "docs/");
        assert_eq!(parent_path("docs/"), "");
        assert!(breadcrumbs("").is_empty());
        assert_eq!(parent_path(""), "");
    }

    #[test]
    fn test_empty_segments_are_dropped() {
        assert_eq!(breadcrumbs("/a//b/"), vec!["a", "b"]);
        assert_eq!(parent_path("a//b/c"), "a/b/");
        assert_eq!(parent_path("docs"), "");
    }

    #[test]
    fn test_project_excludes_own_marker() {
        let page = ListPage {
            common_prefixes: vec![],
            objects: vec![obj("docs/"), obj("docs/readme.txt")],
            next_continuation_token: None,
        };
        let view = FolderView::project("demo", "docs/", page);
        assert!(view.folders.is_empty());
        assert_eq!(view.file_keys().collect::<Vec<_>>(), vec!["docs/readme.txt"]);
        assert_eq!(view.breadcrumbs, vec!["docs"]);
        assert_eq!(view.parent_path, "");
        assert!(!view.truncated);
        assert!(!view.is_root());
    }

    #[test]
    fn test_project_root() {
        let page = ListPage {
            common_prefixes: vec!["docs/".into(), "images/".into()],
            objects: vec![obj("top.txt")],
            next_continuation_token: Some("token".into()),
        };
        let view = FolderView::project("demo", "", page);
        assert_eq!(view.folders, vec!["docs/", "images/"]);
        assert_eq!(view.file_keys().collect::<Vec<_>>(), vec!["top.txt"]);
        assert!(view.is_root());
        assert!(view.truncated);
    }

    #[test]
    fn test_breadcrumb_trail() {
        let view = FolderView::project("demo", "a/b/c/", ListPage::default());
        assert_eq!(
            view.breadcrumb_trail(),
            vec![
                ("a", "a/".to_string()),
                ("b", "a/b/".to_string()),
                ("c", "a/b/c/".to_string()),
            ]
        );
    }

    #[test]
    fn test_key_helpers() {
        assert_eq!(file_name("a/b/x.txt"), "x.txt");
        assert_eq!(file_name("x.txt"), "x.txt");
        assert_eq!(child_key("docs/", "notes.pdf"), "docs/notes.pdf");
        assert_eq!(child_key("", "notes.pdf"), "notes.pdf");
        assert_eq!(child_folder("docs/", "/drafts/"), "docs/drafts/");
        assert_eq!(child_folder("", "drafts"), "drafts/");
    }

    #[test]
    fn test_destination_key() {
        assert_eq!(destination_key("a/x.txt", "b/"), "b/x.txt");
        assert_eq!(destination_key("a/x.txt", ""), "x.txt");
        assert_eq!(destination_key("a/x.txt", "b/y.txt"), "b/y.txt");
    }
}
