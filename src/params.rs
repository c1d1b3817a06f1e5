//! Render request parameters.
//!
//! A [`RenderRequest`] is the raw, all-optional form of a request as it
//! arrives over HTTP (query string for GET/HEAD, JSON body for POST).
//! Validating it yields a [`RenderJob`], the immutable envelope handed to the
//! dispatcher, keyed by a freshly generated correlation id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Default and maximum values
pub const DEF_QUALITY: u8 = 85;
pub const DEF_DELAY: u64 = 0;
pub const DEF_WIDTH: u32 = 1600;
pub const DEF_HEIGHT: u32 = 1200;
pub const DEF_ZOOM: f32 = 1.0;

pub const MAX_QUALITY: u8 = 100;
pub const MAX_DELAY: u64 = 10000;
pub const MAX_WIDTH: u32 = 4096;
pub const MAX_HEIGHT: u32 = 4096;
pub const MAX_ZOOM: f32 = 5.0;

/// Hard ceiling for a measured full-page document height
pub const MAX_DOCUMENT_HEIGHT: u32 = 32768;

/// How the response body is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Raw,
    Base64,
    Html,
}

impl OutputMode {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(Self::Raw),
            "base64" => Some(Self::Base64),
            "html" => Some(Self::Html),
            _ => None,
        }
    }
}

/// Image encoding for the captured surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpg,
    Jpeg,
    Png,
}

impl ImageFormat {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "jpg" => Some(Self::Jpg),
            "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Jpg | Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// Raw request fields before validation.
///
/// Every field is optional; a missing field falls back to its documented
/// default during validation. A client-supplied `id` is ignored and replaced
/// with a freshly generated one.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RenderRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub ua: Option<String>,
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub delay: Option<u64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub zoom: Option<f32>,
    #[serde(default)]
    pub full: Option<bool>,
}

impl RenderRequest {
    /// Build a raw request from query-string parameters (GET/HEAD).
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self> {
        fn parsed<T: std::str::FromStr>(
            query: &HashMap<String, String>,
            name: &str,
        ) -> Result<Option<T>> {
            match query.get(name).map(|s| s.trim()).filter(|s| !s.is_empty()) {
                None => Ok(None),
                Some(raw) => raw
                    .parse::<T>()
                    .map(Some)
                    .map_err(|_| Error::Validation(format!("invalid {} {}", name, raw))),
            }
        }

        Ok(Self {
            id: None,
            url: query.get("url").cloned(),
            output: query.get("output").cloned(),
            format: query.get("format").cloned(),
            ua: query.get("ua").cloned(),
            quality: parsed(query, "quality")?,
            delay: parsed(query, "delay")?,
            width: parsed(query, "width")?,
            height: parsed(query, "height")?,
            zoom: parsed(query, "zoom")?,
            full: query
                .get("full")
                .map(|v| v == "true" || v == "1"),
        })
    }

    /// Validate the raw fields into a job envelope, generating its id.
    ///
    /// Fails on the first invalid field. Values above their documented
    /// maximum are rejected, never clamped.
    pub fn validate(self) -> Result<RenderJob> {
        let url = self.url.unwrap_or_default().trim().to_string();
        if url.is_empty() {
            return Err(Error::Validation("empty url".to_string()));
        }
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url
        } else {
            format!("http://{}", url)
        };
        if url::Url::parse(&url).is_err() {
            return Err(Error::Validation(format!("invalid url {}", url)));
        }

        let output = match self.output.as_deref() {
            None | Some("") => OutputMode::Raw,
            Some(s) => OutputMode::parse(s)
                .ok_or_else(|| Error::Validation(format!("invalid output {}", s)))?,
        };
        let format = match self.format.as_deref() {
            None | Some("") => ImageFormat::Jpg,
            Some(s) => ImageFormat::parse(s)
                .ok_or_else(|| Error::Validation(format!("invalid format {}", s)))?,
        };

        // Zero means "unset" for every numeric field, as in form parsing.
        let quality = self.quality.filter(|&v| v != 0).unwrap_or(DEF_QUALITY);
        if quality > MAX_QUALITY {
            return Err(Error::Validation(format!("quality maximum is {}", MAX_QUALITY)));
        }
        let delay = self.delay.unwrap_or(DEF_DELAY);
        if delay > MAX_DELAY {
            return Err(Error::Validation(format!("delay maximum is {}", MAX_DELAY)));
        }
        let width = self.width.filter(|&v| v != 0).unwrap_or(DEF_WIDTH);
        if width > MAX_WIDTH {
            return Err(Error::Validation(format!("width maximum is {}", MAX_WIDTH)));
        }
        let height = self.height.filter(|&v| v != 0).unwrap_or(DEF_HEIGHT);
        if height > MAX_HEIGHT {
            return Err(Error::Validation(format!("height maximum is {}", MAX_HEIGHT)));
        }
        let zoom = self.zoom.filter(|&v| v != 0.0).unwrap_or(DEF_ZOOM);
        if !zoom.is_finite() || zoom < 0.0 {
            return Err(Error::Validation(format!("invalid zoom {}", zoom)));
        }
        if zoom > MAX_ZOOM {
            return Err(Error::Validation(format!("zoom maximum is {}", MAX_ZOOM)));
        }

        Ok(RenderJob {
            id: fresh_id(),
            url,
            output,
            format,
            ua: self.ua.filter(|s| !s.is_empty()),
            quality,
            delay,
            width,
            height,
            zoom,
            full: self.full.unwrap_or(false),
        })
    }
}

/// A validated render job.
///
/// Immutable after submission; only the dispatcher touches the viewport
/// height again, while resolving a full-page capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderJob {
    /// Correlation id; unique for the lifetime of any in-flight job
    pub id: String,
    pub url: String,
    pub output: OutputMode,
    pub format: ImageFormat,
    pub ua: Option<String>,
    pub quality: u8,
    /// Settle delay before capture, in milliseconds
    pub delay: u64,
    pub width: u32,
    pub height: u32,
    pub zoom: f32,
    /// Capture the full document height instead of the requested viewport
    pub full: bool,
}

impl RenderJob {
    /// Download filename for raw output, derived from the URL and format.
    pub fn filename(&self) -> String {
        format!("{}.{}", self.url, self.format.as_str())
    }
}

// Random 128-bit id, hex-encoded; never derived from the request content so
// identical URLs in flight get independent ids.
fn fresh_id() -> String {
    Uuid::new_v4().simple().to_string()
}
