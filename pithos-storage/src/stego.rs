/// Steganographic codec
///
/// Embeds arbitrary bytes inside a structurally valid 24-bit BMP so that
/// image-only backends accept them. The pixel data carries a small frame
/// (magic, version, payload length, SHA-256 digest) followed by the
/// payload, so decoding recovers the exact byte count and detects
/// corruption regardless of carrier padding or filename. Callers must
/// upload carriers with original-quality flags; any re-encode by the
/// backend destroys the payload.
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use pithos_core::{PithosError, PithosResult};
use sha2::{Digest, Sha256};

/// Marker at the start of the pixel data of every carrier.
const MAGIC: &[u8; 4] = b"PSTG";
const VERSION: u8 = 1;
/// magic + version + u64 length + SHA-256 digest
const FRAME_LEN: usize = 4 + 1 + 8 + 32;
/// BMP file header + BITMAPINFOHEADER
const PIXEL_OFFSET: usize = 54;

/// Reversible bytes-into-image codec
#[derive(Debug, Clone, Copy, Default)]
pub struct StegoCodec;

impl StegoCodec {
    pub fn new() -> Self {
        Self
    }

    /// Wrap a payload into a valid BMP carrier.
    pub fn encode(&self, payload: &[u8]) -> PithosResult<Vec<u8>> {
        let digest = Sha256::digest(payload);

        let mut frame = Vec::with_capacity(FRAME_LEN + payload.len());
        frame.extend_from_slice(MAGIC);
        frame.push(VERSION);
        frame.write_u64::<LittleEndian>(payload.len() as u64)?;
        frame.extend_from_slice(&digest);
        frame.extend_from_slice(payload);

        // Square-ish image; width padded to a multiple of four so the
        // 24-bit row stride needs no per-row padding and the frame stays
        // contiguous in the pixel data.
        let pixels = frame.len().div_ceil(3);
        let mut width = (f64::sqrt(pixels as f64).ceil() as usize).max(4);
        width = (width + 3) & !3;
        let height = pixels.div_ceil(width).max(1);
        let image_size = width * 3 * height;

        let file_size = PIXEL_OFFSET + image_size;
        if file_size > u32::MAX as usize {
            return Err(PithosError::Serialization(
                "payload too large for a BMP carrier".to_string(),
            ));
        }

        let mut out = Vec::with_capacity(file_size);
        out.extend_from_slice(b"BM");
        out.write_u32::<LittleEndian>(file_size as u32)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(PIXEL_OFFSET as u32)?;
        // BITMAPINFOHEADER; negative height = top-down rows, which keeps
        // the frame byte order identical to the payload byte order.
        out.write_u32::<LittleEndian>(40)?;
        out.write_i32::<LittleEndian>(width as i32)?;
        out.write_i32::<LittleEndian>(-(height as i32))?;
        out.write_u16::<LittleEndian>(1)?;
        out.write_u16::<LittleEndian>(24)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(image_size as u32)?;
        out.write_i32::<LittleEndian>(2835)?;
        out.write_i32::<LittleEndian>(2835)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(0)?;
        out.extend_from_slice(&frame);
        out.resize(file_size, 0);
        Ok(out)
    }

    /// Recover the exact payload from a carrier produced by `encode`.
    pub fn decode(&self, carrier: &[u8]) -> PithosResult<Vec<u8>> {
        let body = self
            .carrier_body(carrier)
            .ok_or_else(|| PithosError::Decode("not a steganographic carrier".to_string()))?;

        if body.len() < FRAME_LEN {
            return Err(PithosError::Decode("carrier frame truncated".to_string()));
        }
        if body[4] != VERSION {
            return Err(PithosError::Decode(format!(
                "unsupported carrier version {}",
                body[4]
            )));
        }

        let len = LittleEndian::read_u64(&body[5..13]) as usize;
        let payload_start = FRAME_LEN;
        if body.len() < payload_start + len {
            return Err(PithosError::Decode(
                "declared payload length exceeds carrier".to_string(),
            ));
        }

        let payload = &body[payload_start..payload_start + len];
        let digest = Sha256::digest(payload);
        if digest.as_slice() != &body[13..45] {
            return Err(PithosError::Decode(
                "carrier payload checksum mismatch".to_string(),
            ));
        }

        Ok(payload.to_vec())
    }

    /// Cheap sniff: is this blob one of our carriers?
    pub fn is_carrier(&self, carrier: &[u8]) -> bool {
        self.carrier_body(carrier).is_some()
    }

    fn carrier_body<'a>(&self, carrier: &'a [u8]) -> Option<&'a [u8]> {
        if carrier.len() < PIXEL_OFFSET || &carrier[..2] != b"BM" {
            return None;
        }
        let offset = LittleEndian::read_u32(&carrier[10..14]) as usize;
        if offset < PIXEL_OFFSET || offset + MAGIC.len() > carrier.len() {
            return None;
        }
        let body = &carrier[offset..];
        if body.starts_with(MAGIC) {
            Some(body)
        } else {
            None
        }
    }
}
