//! Encoded polyline format (delta + zigzag + base-32, 1e5 precision).

use crate::models::Coordinate;

const SCALE: f64 = 1e5;
const CHAR_OFFSET: u8 = 63;
const CONTINUATION: u64 = 0x20;
const CHUNK_MASK: u64 = 0x1f;
/// Real coordinate deltas need at most 6 chunks; anything past 8 is garbage.
const MAX_SHIFT: u32 = 35;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolylineError {
    #[error("invalid polyline byte {byte:#04x} at position {position}")]
    InvalidCharacter { position: usize, byte: u8 },
    #[error("polyline truncated at position {position}")]
    Truncated { position: usize },
    #[error("polyline value starting at position {position} overflows")]
    Overflow { position: usize },
}

pub fn decode_polyline(encoded: &str) -> Result<Vec<Coordinate>, PolylineError> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();
    let mut index = 0;
    let mut lat = 0i64;
    let mut lng = 0i64;

    while index < bytes.len() {
        lat += read_delta(bytes, &mut index)?;
        if index >= bytes.len() {
            // A latitude without its longitude.
            return Err(PolylineError::Truncated { position: index });
        }
        lng += read_delta(bytes, &mut index)?;
        points.push(Coordinate::new(lat as f64 / SCALE, lng as f64 / SCALE));
    }

    Ok(points)
}

fn read_delta(bytes: &[u8], index: &mut usize) -> Result<i64, PolylineError> {
    let start = *index;
    let mut result = 0u64;
    let mut shift = 0u32;

    loop {
        let Some(&byte) = bytes.get(*index) else {
            return Err(PolylineError::Truncated { position: *index });
        };
        if !(CHAR_OFFSET..=126).contains(&byte) {
            return Err(PolylineError::InvalidCharacter {
                position: *index,
                byte,
            });
        }
        if shift > MAX_SHIFT {
            return Err(PolylineError::Overflow { position: start });
        }
        *index += 1;

        let chunk = u64::from(byte - CHAR_OFFSET);
        result |= (chunk & CHUNK_MASK) << shift;
        shift += 5;
        if chunk < CONTINUATION {
            break;
        }
    }

    let magnitude = (result >> 1) as i64;
    Ok(if result & 1 == 1 { !magnitude } else { magnitude })
}

pub fn encode_polyline(points: &[Coordinate]) -> String {
    let mut encoded = String::with_capacity(points.len() * 8);
    let mut prev_lat = 0i64;
    let mut prev_lng = 0i64;

    for point in points {
        let lat = (point.lat * SCALE).round() as i64;
        let lng = (point.lng * SCALE).round() as i64;
        write_delta(&mut encoded, lat - prev_lat);
        write_delta(&mut encoded, lng - prev_lng);
        prev_lat = lat;
        prev_lng = lng;
    }

    encoded
}

fn write_delta(out: &mut String, delta: i64) {
    let mut value = if delta < 0 {
        !(delta << 1) as u64
    } else {
        (delta << 1) as u64
    };
    while value >= CONTINUATION {
        out.push(((CONTINUATION | (value & CHUNK_MASK)) as u8 + CHAR_OFFSET) as char);
        value >>= 5;
    }
    out.push((value as u8 + CHAR_OFFSET) as char);
}
