//! The uniform item model every source adapter produces.

use serde::{Deserialize, Serialize};

/// Upstream size field.
///
/// Upstream formats disagree: directory listings report sizes as text
/// (`"219862"`, `"3.7 KB"`, or the `"-"` directory sentinel) while JSON
/// APIs report numbers. Both shapes are kept as-is and normalized on
/// demand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeValue {
    Number(u64),
    Text(String),
}

impl SizeValue {
    /// The `-` sentinel directories carry in listings.
    #[must_use]
    pub fn dir_sentinel() -> Self {
        Self::Text("-".to_string())
    }

    /// Whether this is a zero or sentinel size, not a real byte count.
    #[must_use]
    pub fn is_empty_or_sentinel(&self) -> bool {
        match self {
            Self::Number(n) => *n == 0,
            Self::Text(t) => {
                let t = t.trim();
                t.is_empty() || t == "0" || t == "-"
            }
        }
    }

    /// Byte count, when the upstream reported a plain number.
    #[must_use]
    pub fn as_bytes(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(t) => t.trim().parse().ok(),
        }
    }
}

impl std::fmt::Display for SizeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(t) => f.write_str(t),
        }
    }
}

/// One discovered remote artifact or directory.
///
/// Produced transiently by a source adapter and diffed against the recorded
/// binary entries; never persisted itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    /// Entry name; directories keep their trailing `/`.
    pub name: String,

    pub is_dir: bool,

    /// Download URL; empty for directories.
    pub url: String,

    pub size: SizeValue,

    /// Upstream-formatted date string.
    pub date: String,

    /// Download statuses to tolerate for this item (e.g. a CDN that answers
    /// 403 for retracted artifacts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_download_statuses: Option<Vec<u16>>,
}

impl SourceItem {
    /// Create a directory item.
    pub fn dir(name: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            url: String::new(),
            size: SizeValue::dir_sentinel(),
            date: date.into(),
            ignore_download_statuses: None,
        }
    }

    /// Create a file item.
    pub fn file(
        name: impl Into<String>,
        url: impl Into<String>,
        size: SizeValue,
        date: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            url: url.into(),
            size,
            date: date.into(),
            ignore_download_statuses: None,
        }
    }
}

/// One batch of a lazy, restartable traversal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub items: Vec<SourceItem>,

    /// Opaque continuation cursor; `None` ends the branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<serde_json::Value>,
}

impl FetchResult {
    /// A final batch with no continuation.
    #[must_use]
    pub fn finished(items: Vec<SourceItem>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_value_deserializes_both_shapes() {
        let number: SizeValue = serde_json::from_value(serde_json::json!(219_862)).unwrap();
        assert_eq!(number, SizeValue::Number(219_862));
        assert_eq!(number.as_bytes(), Some(219_862));

        let text: SizeValue = serde_json::from_value(serde_json::json!("3.7 KB")).unwrap();
        assert_eq!(text, SizeValue::Text("3.7 KB".to_string()));
        assert_eq!(text.as_bytes(), None);
    }

    #[test]
    fn sentinel_sizes_are_not_real() {
        assert!(SizeValue::dir_sentinel().is_empty_or_sentinel());
        assert!(SizeValue::Text("0".to_string()).is_empty_or_sentinel());
        assert!(SizeValue::Number(0).is_empty_or_sentinel());
        assert!(!SizeValue::Text("219862".to_string()).is_empty_or_sentinel());
        assert!(!SizeValue::Number(1).is_empty_or_sentinel());
    }

    #[test]
    fn dir_items_have_no_url() {
        let item = SourceItem::dir("4.0.0/", "2020-02-06T19:40:50.366Z");
        assert!(item.is_dir);
        assert!(item.url.is_empty());
        assert_eq!(item.size, SizeValue::dir_sentinel());
    }
}
