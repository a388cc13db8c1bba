/// Icon resolution for incoming notifications.
///
/// Sources are tried in priority order and any failure falls through to the
/// next one, ending at a placeholder:
///
/// ```text
///   hint image_path / image-path  → file
///   app_icon argument             → file (if it looks like a path) or theme name
///   hint icon_data                → legacy raw pixels (deprecated)
///   placeholder
/// ```
///
/// Nothing here ever fails a `notify` call.
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use notif_proto::protocol::{
    IconPayload, NotificationRequest, RawIcon, HINT_ICON_DATA, HINT_IMAGE_PATH,
    HINT_IMAGE_PATH_DASHED,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Largest accepted raw icon edge, in pixels.
pub const MAX_RAW_ICON_EDGE: i32 = 1000;

#[derive(Debug, Error)]
pub enum IconError {
    #[error("icon size {width}x{height} outside 0..={max}", max = MAX_RAW_ICON_EDGE)]
    Dimensions { width: i32, height: i32 },
    #[error("unsupported bits per sample: {0}")]
    BitsPerSample(i32),
    #[error("{channels} channels do not match has_alpha={has_alpha}")]
    Channels { channels: i32, has_alpha: bool },
    #[error("pixel buffer is {actual} bytes, rowstride*height is {expected}")]
    BufferLength { expected: i64, actual: usize },
    #[error("rowstride {rowstride} is shorter than a {width}px row")]
    RowStride { rowstride: i32, width: i32 },
    #[error("cannot load icon file {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Four bytes per pixel, last one alpha.
    Rgba8,
    /// Three bytes per pixel, opaque.
    Rgb8,
}

/// Owned pixel buffer; never borrows from the request it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconImage {
    pub width: u32,
    pub height: u32,
    pub rowstride: usize,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Icon {
    Image(IconImage),
    Themed(String),
    Placeholder,
}

impl Icon {
    pub fn to_payload(&self) -> IconPayload {
        match self {
            Icon::Image(img) => IconPayload::Pixels {
                width: img.width,
                height: img.height,
                rowstride: img.rowstride,
                has_alpha: img.format == PixelFormat::Rgba8,
                data: img.data.clone(),
            },
            Icon::Themed(name) => IconPayload::Themed { name: name.clone() },
            Icon::Placeholder => IconPayload::Placeholder,
        }
    }
}

// ── raw-pixel decoder ─────────────────────────────────────────────────────────

/// Validates a legacy `icon_data` hint and copies it into an `IconImage`.
pub fn decode_raw(raw: &RawIcon) -> Result<IconImage, IconError> {
    if !(0..=MAX_RAW_ICON_EDGE).contains(&raw.width)
        || !(0..=MAX_RAW_ICON_EDGE).contains(&raw.height)
    {
        return Err(IconError::Dimensions {
            width: raw.width,
            height: raw.height,
        });
    }

    if raw.bits_per_sample != 8 {
        return Err(IconError::BitsPerSample(raw.bits_per_sample));
    }

    let format = match (raw.channels, raw.has_alpha) {
        (4, true) => PixelFormat::Rgba8,
        (3, false) => PixelFormat::Rgb8,
        (channels, has_alpha) => return Err(IconError::Channels { channels, has_alpha }),
    };

    let expected = i64::from(raw.rowstride) * i64::from(raw.height);
    if expected != raw.data.len() as i64 {
        return Err(IconError::BufferLength {
            expected,
            actual: raw.data.len(),
        });
    }

    // Every row must hold its pixels, or a reader would run off the buffer.
    if i64::from(raw.rowstride) < i64::from(raw.width) * i64::from(raw.channels) {
        return Err(IconError::RowStride {
            rowstride: raw.rowstride,
            width: raw.width,
        });
    }

    Ok(IconImage {
        width: raw.width as u32,
        height: raw.height as u32,
        rowstride: raw.rowstride as usize,
        format,
        data: raw.data.clone(),
    })
}

// ── files ─────────────────────────────────────────────────────────────────────

/// Decodes an image file and scales it down to fit `size`×`size`.
pub fn load_file(path: &Path, size: u32) -> Result<IconImage, IconError> {
    let img = image::open(path).map_err(|source| IconError::File {
        path: path.to_path_buf(),
        source,
    })?;

    let img = if img.width() > size || img.height() > size {
        debug!(
            orig_w = img.width(),
            orig_h = img.height(),
            size,
            "Scaling icon to fit"
        );
        img.resize(size, size, FilterType::Lanczos3)
    } else {
        img
    };

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(IconImage {
        width,
        height,
        rowstride: width as usize * 4,
        format: PixelFormat::Rgba8,
        data: rgba.into_raw(),
    })
}

fn as_local_path(value: &str) -> Option<&Path> {
    let value = value.strip_prefix("file://").unwrap_or(value);
    if value.starts_with('/') {
        Some(Path::new(value))
    } else {
        None
    }
}

// ── resolution ────────────────────────────────────────────────────────────────

/// Picks the icon for a request.  See the module docs for the order.
pub fn resolve(request: &NotificationRequest, size: u32) -> Icon {
    let image_path = request
        .hint(HINT_IMAGE_PATH)
        .or_else(|| request.hint(HINT_IMAGE_PATH_DASHED))
        .and_then(|v| v.as_str());

    if let Some(value) = image_path {
        match as_local_path(value) {
            Some(path) => match load_file(path, size) {
                Ok(img) => return Icon::Image(img),
                Err(e) => warn!("image-path hint unusable: {}", e),
            },
            // Hint may also carry a theme name.
            None if !value.is_empty() => return Icon::Themed(value.to_string()),
            None => {}
        }
    }

    if !request.app_icon.is_empty() {
        match as_local_path(&request.app_icon) {
            Some(path) => match load_file(path, size) {
                Ok(img) => return Icon::Image(img),
                Err(e) => warn!("app_icon unusable: {}", e),
            },
            None => return Icon::Themed(request.app_icon.clone()),
        }
    }

    if let Some(raw) = request.hint(HINT_ICON_DATA).and_then(|v| v.as_icon()) {
        warn!(
            app = %request.app_name,
            "icon_data hint is deprecated, use image-path instead"
        );
        match decode_raw(raw) {
            Ok(img) => return Icon::Image(img),
            Err(e) => warn!("Rejected icon_data hint: {}", e),
        }
    }

    Icon::Placeholder
}
