//! Marker location records and their wire forms.

use std::fmt;

use indexmap::IndexMap;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Id used for locations that do not belong to a persisted marker.
pub const TRANSIENT_LOCATION_ID: &str = "$transientLocation";

/// Flags describing how a relocation treated the original span.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationMeta {
    #[serde(default, skip_serializing_if = "is_false")]
    pub start_was_deleted: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub end_was_deleted: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub entirely_deleted: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub content_changed: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl LocationMeta {
    pub fn is_empty(&self) -> bool {
        *self == LocationMeta::default()
    }
}

/// A 1-based line/column span owned by one marker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerLocation {
    pub id: String,
    pub line_start: u32,
    pub col_start: u32,
    pub line_end: u32,
    pub col_end: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<LocationMeta>,
}

impl MarkerLocation {
    pub fn new(id: impl Into<String>, line_start: u32, col_start: u32, line_end: u32, col_end: u32) -> Self {
        Self {
            id: id.into(),
            line_start,
            col_start,
            line_end,
            col_end,
            meta: None,
        }
    }

    pub fn is_entirely_deleted(&self) -> bool {
        self.meta.is_some_and(|m| m.entirely_deleted)
    }

    pub fn from_array(id: impl Into<String>, array: &LocationArray) -> Self {
        Self {
            id: id.into(),
            line_start: array.line_start,
            col_start: array.col_start,
            line_end: array.line_end,
            col_end: array.col_end,
            meta: array.meta,
        }
    }

    pub fn to_array(&self) -> LocationArray {
        LocationArray {
            line_start: self.line_start,
            col_start: self.col_start,
            line_end: self.line_end,
            col_end: self.col_end,
            meta: self.meta,
        }
    }

    /// Convert to a 0-based editor range, clamping at zero.
    pub fn to_range(&self) -> Range {
        Range {
            start: Position {
                line: self.line_start.saturating_sub(1),
                character: self.col_start.saturating_sub(1),
            },
            end: Position {
                line: self.line_end.saturating_sub(1),
                character: self.col_end.saturating_sub(1),
            },
        }
    }

    /// Build a transient location from a 0-based editor range.
    pub fn from_range(range: &Range) -> Self {
        Self::new(
            TRANSIENT_LOCATION_ID,
            range.start.line + 1,
            range.start.character + 1,
            range.end.line + 1,
            range.end.character + 1,
        )
    }

    /// Placeholder for a marker whose file no longer has any content.
    pub fn empty_file_location() -> Self {
        Self {
            meta: Some(LocationMeta {
                start_was_deleted: true,
                end_was_deleted: true,
                entirely_deleted: true,
                content_changed: false,
            }),
            ..Self::new(TRANSIENT_LOCATION_ID, 1, 1, 1, 1)
        }
    }
}

impl fmt::Display for MarkerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.line_start, self.col_start, self.line_end, self.col_end
        )
    }
}

/// Compact server form: `[lineStart, colStart, lineEnd, colEnd, meta?]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocationArray {
    pub line_start: u32,
    pub col_start: u32,
    pub line_end: u32,
    pub col_end: u32,
    pub meta: Option<LocationMeta>,
}

impl LocationArray {
    pub fn new(line_start: u32, col_start: u32, line_end: u32, col_end: u32) -> Self {
        Self {
            line_start,
            col_start,
            line_end,
            col_end,
            meta: None,
        }
    }
}

impl Serialize for LocationArray {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.meta.is_some() { 5 } else { 4 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.line_start)?;
        seq.serialize_element(&self.col_start)?;
        seq.serialize_element(&self.line_end)?;
        seq.serialize_element(&self.col_end)?;
        if let Some(meta) = &self.meta {
            seq.serialize_element(meta)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for LocationArray {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ArrayVisitor;

        impl<'de> Visitor<'de> for ArrayVisitor {
            type Value = LocationArray;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an array [lineStart, colStart, lineEnd, colEnd, meta?]")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<LocationArray, A::Error> {
                let line_start = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let col_start = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let line_end = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                let col_end = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(3, &self))?;
                let meta: Option<Option<LocationMeta>> = seq.next_element()?;
                // Tolerate trailing elements from newer servers.
                while seq.next_element::<de::IgnoredAny>()?.is_some() {}
                Ok(LocationArray {
                    line_start,
                    col_start,
                    line_end,
                    col_end,
                    meta: meta.flatten(),
                })
            }
        }

        deserializer.deserialize_seq(ArrayVisitor)
    }
}

/// 0-based editor position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// 0-based editor range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// Why a marker could not be placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotLocatedReason {
    MissingOriginalLocation,
    MissingOriginalCommit,
    CodeblockDeleted,
    Unknown,
}

impl fmt::Display for NotLocatedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NotLocatedReason::MissingOriginalLocation => "MISSING_ORIGINAL_LOCATION",
            NotLocatedReason::MissingOriginalCommit => "MISSING_ORIGINAL_COMMIT",
            NotLocatedReason::CodeblockDeleted => "CODEBLOCK_DELETED",
            NotLocatedReason::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingLocation {
    pub reason: NotLocatedReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl MissingLocation {
    pub fn new(reason: NotLocatedReason, details: impl Into<String>) -> Self {
        Self {
            reason,
            details: Some(details.into()),
        }
    }
}

/// Located and not-located markers for one request, keyed by marker id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationsResult {
    pub locations: IndexMap<String, MarkerLocation>,
    pub missing_locations: IndexMap<String, MissingLocation>,
}

impl LocationsResult {
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty() && self.missing_locations.is_empty()
    }

    /// Record a not-located marker, dropping any location previously
    /// recorded for it.
    pub fn mark_missing(&mut self, marker_id: &str, missing: MissingLocation) {
        self.locations.shift_remove(marker_id);
        self.missing_locations.insert(marker_id.to_string(), missing);
    }

    /// Record a located marker, clearing any earlier not-located entry.
    pub fn mark_located(&mut self, location: MarkerLocation) {
        self.missing_locations.shift_remove(&location.id);
        self.locations.insert(location.id.clone(), location);
    }
}
