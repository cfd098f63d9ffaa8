use std::io::Cursor;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use base64::Engine;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ColorType, ImageEncoder, ImageFormat, RgbaImage};

use crate::canvas::downscale_to_fit;
use crate::error::DecodeError;

/// Prefix of every pixel payload stored in history snapshots.
pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

// ============================================================================
// DECODED IMAGE
// ============================================================================

/// Everything a decode job hands back to the engine.  The job keeps no
/// references once this value is sent.
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub full: Arc<RgbaImage>,
    /// Present when the full image exceeds the display bound.
    pub display_proxy: Option<Arc<RgbaImage>>,
    /// Present when the full image exceeds the interaction bound.
    pub interaction_proxy: Option<Arc<RgbaImage>>,
    pub width: u32,
    pub height: u32,
    pub dpi: f64,
}

/// Size bounds and fallbacks applied while decoding.
#[derive(Clone, Copy, Debug)]
pub struct DecodeLimits {
    pub max_display_size: u32,
    pub low_res_proxy_size: u32,
    pub default_dpi: f64,
}

impl From<&crate::settings::EngineSettings> for DecodeLimits {
    fn from(s: &crate::settings::EngineSettings) -> Self {
        Self {
            max_display_size: s.max_display_size,
            low_res_proxy_size: s.low_res_proxy_size,
            default_dpi: s.default_dpi,
        }
    }
}

/// Decode `bytes`, resolve the DPI and build whichever proxies the size calls for.
pub fn decode_image(bytes: &[u8], limits: &DecodeLimits) -> Result<DecodedImage, DecodeError> {
    let dpi = read_dpi(bytes).unwrap_or(limits.default_dpi);
    let full = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = full.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::Dimensions { width, height });
    }

    let display_proxy = downscale_to_fit(&full, limits.max_display_size, FilterType::Triangle).map(Arc::new);
    let interaction_proxy = downscale_to_fit(&full, limits.low_res_proxy_size, FilterType::Triangle).map(Arc::new);

    Ok(DecodedImage {
        full: Arc::new(full),
        display_proxy,
        interaction_proxy,
        width,
        height,
        dpi,
    })
}

// ============================================================================
// DPI METADATA
// ============================================================================

/// Resolution embedded in the encoded bytes, if any format-specific
/// metadata carries one.  Callers fall back to their default DPI.
pub fn read_dpi(bytes: &[u8]) -> Option<f64> {
    let dpi = match image::guess_format(bytes).ok()? {
        ImageFormat::Jpeg => jpeg_dpi(bytes),
        ImageFormat::Png => png_dpi(bytes),
        ImageFormat::Tiff => tiff_dpi(bytes),
        _ => None,
    }?;
    (dpi.is_finite() && dpi > 0.0).then(|| dpi.round())
}

fn png_dpi(bytes: &[u8]) -> Option<f64> {
    let reader = png::Decoder::new(Cursor::new(bytes)).read_info().ok()?;
    let dims = reader.info().pixel_dims?;
    match dims.unit {
        png::Unit::Meter => Some(dims.xppu as f64 * 0.0254),
        png::Unit::Unspecified => None,
    }
}

fn tiff_dpi(bytes: &[u8]) -> Option<f64> {
    use tiff::decoder::ifd::Value;
    use tiff::tags::Tag;

    let mut decoder = tiff::decoder::Decoder::new(Cursor::new(bytes)).ok()?;
    let res = match decoder.find_tag(Tag::XResolution).ok()?? {
        Value::Rational(n, d) if d != 0 => n as f64 / d as f64,
        _ => return None,
    };
    // ResolutionUnit: 2 = inch (default), 3 = centimetre
    let unit = decoder
        .find_tag(Tag::ResolutionUnit)
        .ok()
        .flatten()
        .and_then(|v| v.into_u32().ok())
        .unwrap_or(2);
    Some(if unit == 3 { res * 2.54 } else { res })
}

/// Walk the JPEG marker segments up to start-of-scan.  EXIF resolution wins
/// over the JFIF density when both are present.
fn jpeg_dpi(bytes: &[u8]) -> Option<f64> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }
    let mut jfif = None;
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            break;
        }
        let marker = bytes[pos + 1];
        // Start of scan or end of image
        if marker == 0xDA || marker == 0xD9 {
            break;
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        if len < 2 || pos + 2 + len > bytes.len() {
            break;
        }
        let segment = &bytes[pos + 4..pos + 2 + len];
        match marker {
            0xE1 if segment.starts_with(b"Exif\0\0") => {
                if let Some(dpi) = exif_x_resolution(&segment[6..]) {
                    return Some(dpi);
                }
            }
            0xE0 if segment.starts_with(b"JFIF\0") && segment.len() >= 12 => {
                let units = segment[7];
                let density = u16::from_be_bytes([segment[8], segment[9]]) as f64;
                jfif = match units {
                    1 if density > 0.0 => Some(density),
                    2 if density > 0.0 => Some(density * 2.54),
                    _ => jfif,
                };
            }
            _ => {}
        }
        pos += 2 + len;
    }
    jfif
}

/// `XResolution` from IFD0 of an EXIF TIFF block.
fn exif_x_resolution(tiff: &[u8]) -> Option<f64> {
    let little = match tiff.get(0..2)? {
        b"II" => true,
        b"MM" => false,
        _ => return None,
    };
    let u16_at = |off: usize| -> Option<u16> {
        let b = tiff.get(off..off + 2)?;
        Some(if little { u16::from_le_bytes([b[0], b[1]]) } else { u16::from_be_bytes([b[0], b[1]]) })
    };
    let u32_at = |off: usize| -> Option<u32> {
        let b = tiff.get(off..off + 4)?;
        let arr = [b[0], b[1], b[2], b[3]];
        Some(if little { u32::from_le_bytes(arr) } else { u32::from_be_bytes(arr) })
    };

    let ifd = u32_at(4)? as usize;
    let count = u16_at(ifd)? as usize;
    let mut resolution = None;
    let mut unit = 2;
    for i in 0..count {
        let entry = ifd + 2 + i * 12;
        let tag = u16_at(entry)?;
        let kind = u16_at(entry + 2)?;
        match (tag, kind) {
            // XResolution, RATIONAL
            (0x011A, 5) => {
                let off = u32_at(entry + 8)? as usize;
                let (num, den) = (u32_at(off)?, u32_at(off + 4)?);
                if den != 0 {
                    resolution = Some(num as f64 / den as f64);
                }
            }
            // ResolutionUnit, SHORT
            (0x0128, 3) => unit = u16_at(entry + 8)?,
            _ => {}
        }
    }
    resolution.map(|r| if unit == 3 { r * 2.54 } else { r })
}

// ============================================================================
// SNAPSHOT PAYLOADS
// ============================================================================

/// Encode pixels as a `data:image/png;base64,…` string.
pub fn encode_png_data_url(img: &RgbaImage) -> Result<String, DecodeError> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(DecodeError::Dimensions { width: w, height: h });
    }
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(img.as_raw(), w, h, ColorType::Rgba8)
        .map_err(|e| DecodeError::Encode(e.to_string()))?;
    let mut out = String::with_capacity(PNG_DATA_URL_PREFIX.len() + png.len() * 4 / 3 + 4);
    out.push_str(PNG_DATA_URL_PREFIX);
    base64::engine::general_purpose::STANDARD.encode_string(&png, &mut out);
    Ok(out)
}

pub fn decode_png_data_url(payload: &str) -> Result<RgbaImage, DecodeError> {
    let encoded = payload
        .strip_prefix(PNG_DATA_URL_PREFIX)
        .ok_or_else(|| DecodeError::Payload("missing data-url prefix".into()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| DecodeError::Payload(e.to_string()))?;
    let img = image::load_from_memory_with_format(&bytes, ImageFormat::Png)?;
    Ok(img.to_rgba8())
}

// ============================================================================
// REMOTE ASSETS
// ============================================================================

/// Maps a storage location to an opaque URL the host can fetch.  Signing,
/// expiry and transport stay on the host side.
pub trait AssetResolver: Send + Sync {
    fn resolve(&self, bucket: &str, path: &str) -> String;
}

// ============================================================================
// ASYNC DECODE SERVICE
// ============================================================================

/// Identifies one submitted decode job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecodeTicket(pub u64);

/// Sent exactly once per submitted job.
#[derive(Debug)]
pub enum DecodeOutcome {
    Decoded { ticket: DecodeTicket, image: DecodedImage },
    Failed { ticket: DecodeTicket, error: DecodeError },
}

impl DecodeOutcome {
    pub fn ticket(&self) -> DecodeTicket {
        match self {
            DecodeOutcome::Decoded { ticket, .. } | DecodeOutcome::Failed { ticket, .. } => *ticket,
        }
    }
}

/// Runs decodes on the rayon pool and hands results back over a channel.
/// The owning thread never blocks unless it asks to via [`DecodeService::wait_next`].
pub struct DecodeService {
    sender: Sender<DecodeOutcome>,
    receiver: Receiver<DecodeOutcome>,
    next_ticket: u64,
    in_flight: usize,
}

impl Default for DecodeService {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeService {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver, next_ticket: 1, in_flight: 0 }
    }

    pub fn submit(&mut self, bytes: Vec<u8>, limits: DecodeLimits) -> DecodeTicket {
        let ticket = DecodeTicket(self.next_ticket);
        self.next_ticket += 1;
        self.in_flight += 1;

        let sender = self.sender.clone();
        rayon::spawn(move || {
            let outcome = match decode_image(&bytes, &limits) {
                Ok(image) => DecodeOutcome::Decoded { ticket, image },
                Err(error) => DecodeOutcome::Failed { ticket, error },
            };
            // The engine may have been dropped meanwhile.
            let _ = sender.send(outcome);
        });
        ticket
    }

    /// Jobs submitted but not yet collected.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn try_next(&mut self) -> Option<DecodeOutcome> {
        let outcome = self.receiver.try_recv().ok()?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(outcome)
    }

    /// Block until the next outcome or `deadline`, whichever comes first.
    pub fn wait_next(&mut self, deadline: Instant) -> Option<DecodeOutcome> {
        if self.in_flight == 0 {
            return None;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.receiver.recv_timeout(remaining.max(Duration::from_millis(1))) {
            Ok(outcome) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Some(outcome)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn limits() -> DecodeLimits {
        DecodeLimits { max_display_size: 8192, low_res_proxy_size: 1000, default_dpi: 96.0 }
    }

    fn png_bytes(w: u32, h: u32, ppm: Option<u32>) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, w, h);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            if let Some(ppm) = ppm {
                encoder.set_pixel_dims(Some(png::PixelDimensions { xppu: ppm, yppu: ppm, unit: png::Unit::Meter }));
            }
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&vec![200u8; (w * h * 4) as usize]).unwrap();
        }
        out
    }

    #[test]
    fn png_phys_chunk_gives_dpi() {
        assert_eq!(read_dpi(&png_bytes(2, 2, Some(11811))), Some(300.0));
        assert_eq!(read_dpi(&png_bytes(2, 2, None)), None);
    }

    #[test]
    fn jfif_density_in_dots_per_inch() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        bytes.extend_from_slice(b"JFIF\0");
        bytes.extend_from_slice(&[0x01, 0x01, 0x01, 0x01, 0x2C, 0x01, 0x2C, 0x00, 0x00]);
        bytes.extend_from_slice(&[0xFF, 0xD9]);
        assert_eq!(read_dpi(&bytes), Some(300.0));
    }

    #[test]
    fn exif_resolution_beats_jfif() {
        // Little-endian TIFF block: header, one IFD entry, rational at offset 26.
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"II*\0");
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&0x011Au16.to_le_bytes());
        tiff.extend_from_slice(&5u16.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&26u32.to_le_bytes());
        tiff.extend_from_slice(&0u32.to_le_bytes());
        tiff.extend_from_slice(&144u32.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());

        let mut app1 = b"Exif\0\0".to_vec();
        app1.extend_from_slice(&tiff);

        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        bytes.extend_from_slice(b"JFIF\0");
        bytes.extend_from_slice(&[0x01, 0x01, 0x01, 0x00, 0x48, 0x00, 0x48, 0x00, 0x00]);
        bytes.extend_from_slice(&[0xFF, 0xE1]);
        bytes.extend_from_slice(&((app1.len() + 2) as u16).to_be_bytes());
        bytes.extend_from_slice(&app1);
        bytes.extend_from_slice(&[0xFF, 0xD9]);
        assert_eq!(read_dpi(&bytes), Some(144.0));
    }

    #[test]
    fn unknown_bytes_have_no_dpi() {
        assert_eq!(read_dpi(b"definitely not an image"), None);
    }

    #[test]
    fn decode_builds_proxies_only_when_oversized() {
        let small = decode_image(&png_bytes(40, 20, None), &limits()).unwrap();
        assert_eq!((small.width, small.height, small.dpi), (40, 20, 96.0));
        assert!(small.display_proxy.is_none());
        assert!(small.interaction_proxy.is_none());

        let tight = DecodeLimits { max_display_size: 30, low_res_proxy_size: 10, default_dpi: 72.0 };
        let big = decode_image(&png_bytes(40, 20, None), &tight).unwrap();
        assert_eq!(big.display_proxy.as_ref().unwrap().dimensions(), (30, 15));
        assert_eq!(big.interaction_proxy.as_ref().unwrap().dimensions(), (10, 5));
        assert_eq!(big.dpi, 72.0);
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(decode_image(b"nope", &limits()), Err(DecodeError::Decode(_))));
    }

    #[test]
    fn data_url_payload_is_lossless() {
        let mut img = RgbaImage::from_pixel(3, 2, Rgba([9, 8, 7, 6]));
        img.put_pixel(2, 1, Rgba([255, 0, 128, 0]));
        let payload = encode_png_data_url(&img).unwrap();
        assert!(payload.starts_with(PNG_DATA_URL_PREFIX));
        assert_eq!(decode_png_data_url(&payload).unwrap(), img);
        assert!(decode_png_data_url("data:image/jpeg;base64,AAAA").is_err());
    }

    #[test]
    fn service_reports_each_job_once() {
        let mut service = DecodeService::new();
        let ok = service.submit(png_bytes(4, 4, None), limits());
        let bad = service.submit(b"broken".to_vec(), limits());
        assert_eq!(service.in_flight(), 2);

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen = Vec::new();
        while let Some(outcome) = service.wait_next(deadline) {
            match &outcome {
                DecodeOutcome::Decoded { image, .. } => assert_eq!(image.width, 4),
                DecodeOutcome::Failed { .. } => {}
            }
            seen.push(outcome.ticket());
        }
        seen.sort();
        assert_eq!(seen, vec![ok, bad]);
        assert_eq!(service.in_flight(), 0);
        assert!(service.try_next().is_none());
    }
}
