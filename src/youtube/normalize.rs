use chrono::{DateTime, NaiveDateTime, Utc};

use crate::errors::IngestError;
use crate::store::NormalizedVideo;

use super::models::{RawResult, SearchItem, Thumbnail, Thumbnails};

/// Maps one raw search item onto a `NormalizedVideo`.
///
/// Only a missing video id or an unreadable `publishedAt` rejects the record.
/// Text fields default to empty strings and the thumbnail falls back
/// `high -> medium -> default -> ""`.
pub fn normalize(raw: RawResult) -> Result<NormalizedVideo, IngestError> {
    let item: SearchItem = serde_json::from_value(raw.0)
        .map_err(|e| IngestError::malformed(format!("unexpected record shape: {}", e)))?;

    let external_id = item
        .video_id()
        .ok_or_else(|| IngestError::malformed("missing video id"))?
        .to_string();

    let snippet = item.snippet.unwrap_or_default();

    let published_at = snippet
        .published_at
        .as_deref()
        .ok_or_else(|| IngestError::malformed(format!("missing publishedAt for {}", external_id)))
        .and_then(parse_published_at)?;

    Ok(NormalizedVideo {
        external_id,
        title: snippet.title.unwrap_or_default(),
        description: snippet.description.unwrap_or_default(),
        published_at,
        thumbnail_url: select_thumbnail(snippet.thumbnails.as_ref()),
        channel_title: snippet.channel_title.unwrap_or_default(),
    })
}

/// Accepts RFC 3339 (`Z`, offsets, fractional seconds) and, failing that, a
/// zone-less `YYYY-MM-DDTHH:MM:SS[.f]` read as UTC.
pub fn parse_published_at(value: &str) -> Result<DateTime<Utc>, IngestError> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| IngestError::malformed(format!("unparsable publishedAt {:?}: {}", value, e)))
}

fn select_thumbnail(thumbnails: Option<&Thumbnails>) -> String {
    let Some(thumbnails) = thumbnails else {
        return String::new();
    };
    [&thumbnails.high, &thumbnails.medium, &thumbnails.default]
        .into_iter()
        .filter_map(|t| t.as_ref().and_then(Thumbnail::usable_url))
        .next()
        .unwrap_or_default()
}

impl Thumbnail {
    fn usable_url(&self) -> Option<String> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawResult {
        RawResult(value)
    }

    #[test]
    fn full_record_normalizes() {
        let video = normalize(raw(json!({
            "kind": "youtube#searchResult",
            "id": { "kind": "youtube#video", "videoId": "dQw4w9WgXcQ" },
            "snippet": {
                "publishedAt": "2024-05-01T10:15:30Z",
                "channelId": "UC123",
                "title": "Match highlights",
                "description": "All the wickets",
                "thumbnails": {
                    "default": { "url": "https://i.ytimg.com/vi/dQw4w9WgXcQ/default.jpg" },
                    "medium": { "url": "https://i.ytimg.com/vi/dQw4w9WgXcQ/mqdefault.jpg" },
                    "high": { "url": "https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg", "width": 480, "height": 360 }
                },
                "channelTitle": "ICC"
            }
        })))
        .unwrap();

        assert_eq!(video.external_id, "dQw4w9WgXcQ");
        assert_eq!(video.title, "Match highlights");
        assert_eq!(video.description, "All the wickets");
        assert_eq!(video.channel_title, "ICC");
        assert_eq!(video.thumbnail_url, "https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg");
        assert_eq!(video.published_at, Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 30).unwrap());
    }

    #[test]
    fn thumbnail_falls_back_to_default() {
        let video = normalize(raw(json!({
            "id": { "videoId": "v1" },
            "snippet": {
                "publishedAt": "2024-05-01T10:15:30Z",
                "thumbnails": { "default": { "url": "https://example.com/default.jpg" } }
            }
        })))
        .unwrap();
        assert_eq!(video.thumbnail_url, "https://example.com/default.jpg");
    }

    #[test]
    fn thumbnail_prefers_medium_over_default() {
        let video = normalize(raw(json!({
            "id": { "videoId": "v1" },
            "snippet": {
                "publishedAt": "2024-05-01T10:15:30Z",
                "thumbnails": {
                    "default": { "url": "https://example.com/default.jpg" },
                    "medium": { "url": "https://example.com/medium.jpg" },
                    "high": { "url": "" }
                }
            }
        })))
        .unwrap();
        assert_eq!(video.thumbnail_url, "https://example.com/medium.jpg");
    }

    #[test]
    fn missing_thumbnails_and_text_default_to_empty() {
        let video = normalize(raw(json!({
            "id": { "videoId": "v2" },
            "snippet": { "publishedAt": "2024-05-01T10:15:30Z", "title": null }
        })))
        .unwrap();
        assert_eq!(video.thumbnail_url, "");
        assert_eq!(video.title, "");
        assert_eq!(video.description, "");
        assert_eq!(video.channel_title, "");
    }

    #[test]
    fn missing_or_blank_id_is_malformed() {
        for record in [
            json!({ "snippet": { "publishedAt": "2024-05-01T10:15:30Z" } }),
            json!({ "id": { "kind": "youtube#channel", "channelId": "UC1" }, "snippet": { "publishedAt": "2024-05-01T10:15:30Z" } }),
            json!({ "id": { "videoId": null }, "snippet": { "publishedAt": "2024-05-01T10:15:30Z" } }),
            json!({ "id": { "videoId": "  " }, "snippet": { "publishedAt": "2024-05-01T10:15:30Z" } }),
        ] {
            let err = normalize(raw(record)).unwrap_err();
            assert!(matches!(err, IngestError::MalformedRecord { .. }), "{:?}", err);
        }
    }

    #[test]
    fn bare_string_id_is_accepted() {
        let video = normalize(raw(json!({
            "id": "plainId",
            "snippet": { "publishedAt": "2024-05-01T10:15:30Z" }
        })))
        .unwrap();
        assert_eq!(video.external_id, "plainId");
    }

    #[test]
    fn bad_timestamp_is_malformed() {
        let err = normalize(raw(json!({
            "id": { "videoId": "v3" },
            "snippet": { "publishedAt": "yesterday" }
        })))
        .unwrap_err();
        assert!(matches!(err, IngestError::MalformedRecord { .. }));

        let err = normalize(raw(json!({ "id": { "videoId": "v3" } }))).unwrap_err();
        assert!(matches!(err, IngestError::MalformedRecord { .. }));
    }

    #[test]
    fn non_object_record_is_malformed() {
        let err = normalize(raw(json!("just a string"))).unwrap_err();
        assert!(matches!(err, IngestError::MalformedRecord { .. }));
    }

    #[test]
    fn timestamps_are_parsed_leniently() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 30).unwrap();
        assert_eq!(parse_published_at("2024-05-01T10:15:30Z").unwrap(), expected);
        assert_eq!(parse_published_at("2024-05-01T12:15:30+02:00").unwrap(), expected);
        assert_eq!(parse_published_at("2024-05-01T10:15:30").unwrap(), expected);
        assert_eq!(
            parse_published_at("2024-05-01T10:15:30.250Z").unwrap(),
            expected + chrono::Duration::milliseconds(250)
        );
        assert!(parse_published_at("01/05/2024").is_err());
    }
}
