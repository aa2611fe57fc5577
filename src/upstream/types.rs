//! Podcast index types
//!
//! The index is owned by the publishing pipeline. Only the asset path fields
//! are interpreted here; everything else passes through verbatim.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Deserialize an asset path that might be a string, null or something else.
/// Anything that is not a string is treated as "no path".
fn deserialize_optional_path<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct OptionalPathVisitor;

    impl<'de> de::Visitor<'de> for OptionalPathVisitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a path string or null")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Option<String>, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_string<E: de::Error>(self, value: String) -> Result<Option<String>, E> {
            Ok(Some(value))
        }

        fn visit_none<E: de::Error>(self) -> Result<Option<String>, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Option<String>, E> {
            Ok(None)
        }

        fn visit_bool<E: de::Error>(self, _: bool) -> Result<Option<String>, E> {
            Ok(None)
        }

        fn visit_i64<E: de::Error>(self, _: i64) -> Result<Option<String>, E> {
            Ok(None)
        }

        fn visit_u64<E: de::Error>(self, _: u64) -> Result<Option<String>, E> {
            Ok(None)
        }

        fn visit_f64<E: de::Error>(self, _: f64) -> Result<Option<String>, E> {
            Ok(None)
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Option<String>, A::Error> {
            while seq.next_element::<de::IgnoredAny>()?.is_some() {}
            Ok(None)
        }

        fn visit_map<A: de::MapAccess<'de>>(self, mut map: A) -> Result<Option<String>, A::Error> {
            while map.next_entry::<de::IgnoredAny, de::IgnoredAny>()?.is_some() {}
            Ok(None)
        }
    }

    deserializer.deserialize_any(OptionalPathVisitor)
}

/// Read the episode list; a missing, null or non-list value reads as empty
fn deserialize_podcasts<'de, D>(deserializer: D) -> Result<Vec<IndexItem>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().map(IndexItem::from).collect(),
        _ => Vec::new(),
    })
}

/// The podcast index as published upstream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodcastIndex {
    /// Episodes, in upstream order
    #[serde(default, deserialize_with = "deserialize_podcasts")]
    pub podcasts: Vec<IndexItem>,
    /// Any other top-level fields (update time, totals, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One element of the episode list
///
/// Only JSON objects are episodes; anything else is kept as-is.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum IndexItem {
    Entry(PodcastEntry),
    Other(Value),
}

impl IndexItem {
    pub fn as_entry(&self) -> Option<&PodcastEntry> {
        match self {
            IndexItem::Entry(entry) => Some(entry),
            IndexItem::Other(_) => None,
        }
    }

    pub fn as_entry_mut(&mut self) -> Option<&mut PodcastEntry> {
        match self {
            IndexItem::Entry(entry) => Some(entry),
            IndexItem::Other(_) => None,
        }
    }
}

impl From<Value> for IndexItem {
    fn from(value: Value) -> Self {
        if !value.is_object() {
            return IndexItem::Other(value);
        }
        match PodcastEntry::deserialize(&value) {
            Ok(entry) => IndexItem::Entry(entry),
            Err(_) => IndexItem::Other(value),
        }
    }
}

impl From<PodcastEntry> for IndexItem {
    fn from(entry: PodcastEntry) -> Self {
        IndexItem::Entry(entry)
    }
}

/// One episode of the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodcastEntry {
    /// Remote audio path, usually relative to the base URL
    #[serde(
        default,
        deserialize_with = "deserialize_optional_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub audio_path: Option<String>,
    /// Remote transcript path, usually relative to the base URL
    #[serde(
        default,
        deserialize_with = "deserialize_optional_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub transcript_path: Option<String>,
    /// Served URL of the mirrored audio file
    #[serde(
        default,
        deserialize_with = "deserialize_optional_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub local_audio_path: Option<String>,
    /// Served URL of the mirrored transcript
    #[serde(
        default,
        deserialize_with = "deserialize_optional_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub local_transcript_path: Option<String>,
    /// Identifier, title, date and other metadata
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PodcastEntry {
    /// Episode identifier rendered as a string, for logging
    pub fn id(&self) -> Option<String> {
        match self.extra.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl PodcastIndex {
    /// Number of elements in the episode list
    pub fn len(&self) -> usize {
        self.podcasts.len()
    }

    /// Episodes that are JSON objects
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut PodcastEntry> {
        self.podcasts.iter_mut().filter_map(IndexItem::as_entry_mut)
    }

    /// Episode at `i`, if that element is an object
    pub fn entry(&self, i: usize) -> Option<&PodcastEntry> {
        self.podcasts.get(i).and_then(IndexItem::as_entry)
    }

    pub fn is_empty(&self) -> bool {
        self.podcasts.is_empty()
    }
}
