//! Turns the extraction engine's raw description of a source into the
//! client-facing `MediaInfo` schema.
//!
//! Every raw field is optional. Missing values are replaced by defaults, so
//! normalization itself never fails.

use serde::{Deserialize, Serialize};
use serde_json::Number;

/// Marker the engine uses (and the relay emits) for an absent codec.
pub const CODEC_NONE: &str = "none";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawMediaInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<Number>,
    pub formats: Option<Vec<RawFormat>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub format_note: Option<String>,
    pub height: Option<f64>,
    pub acodec: Option<String>,
    pub vcodec: Option<String>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<Number>,
    pub formats: Vec<FormatVariant>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatVariant {
    pub id: String,
    pub ext: String,
    pub quality: String,
    pub acodec: String,
    pub vcodec: String,
    pub filesize: Option<u64>,
    pub url: String,
}

/// Keeps the engine's ordering and drops variants without a playable URL.
pub fn normalize(raw: RawMediaInfo, fallback_label: &str) -> MediaInfo {
    let formats = raw
        .formats
        .unwrap_or_default()
        .iter()
        .filter_map(|format| normalize_format(format, fallback_label))
        .collect();

    MediaInfo {
        title: raw.title,
        thumbnail: raw.thumbnail,
        duration: raw.duration,
        formats,
    }
}

pub fn normalize_format(format: &RawFormat, fallback_label: &str) -> Option<FormatVariant> {
    let url = non_empty(format.url.as_deref())?.to_string();

    Some(FormatVariant {
        id: format.format_id.clone().unwrap_or_default(),
        ext: format.ext.clone().unwrap_or_default(),
        quality: derive_label(format, fallback_label),
        acodec: codec_or_none(format.acodec.as_deref()),
        vcodec: codec_or_none(format.vcodec.as_deref()),
        filesize: resolve_filesize(format),
        url,
    })
}

pub fn derive_label(format: &RawFormat, fallback_label: &str) -> String {
    let acodec = non_empty(format.acodec.as_deref()).filter(|codec| *codec != CODEC_NONE);
    if let Some(acodec) = acodec
        && format.vcodec.as_deref() == Some(CODEC_NONE)
    {
        return format!("AUDIO {acodec}");
    }

    let note = non_empty(format.format_note.as_deref());

    if let Some(height) = format.height.filter(|height| *height > 0.0) {
        let label = format!("{}p {}", height.round() as u64, note.unwrap_or_default());
        return label.trim().to_string();
    }

    note.or_else(|| non_empty(format.ext.as_deref()))
        .unwrap_or(fallback_label)
        .to_string()
}

/// Exact size wins over the approximation. Zero counts as unknown.
pub fn resolve_filesize(format: &RawFormat) -> Option<u64> {
    format
        .filesize
        .filter(|size| *size > 0.0)
        .or(format.filesize_approx.filter(|size| *size > 0.0))
        .map(|size| size.round() as u64)
}

fn codec_or_none(codec: Option<&str>) -> String {
    non_empty(codec).unwrap_or(CODEC_NONE).to_string()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
