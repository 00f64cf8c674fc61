//! Geohash cells, neighbor arithmetic and cell sets.
//!
//! A cell is the canonical base-32 string. Internally every operation works on
//! the de-interleaved integer grid position of a cell (`GridPos`), so neighbor
//! lookup is a ±1 step on the latitude/longitude axes instead of the classic
//! border/neighbor lookup tables:
//!
//! ```text
//! bit index   0    1    2    3    4    5  ...
//! axis        lon  lat  lon  lat  lon  lat
//! ```
//!
//! Longitude wraps around the antimeridian. Latitude saturates at the poles:
//! the "north" neighbor of a cell touching the north pole is the cell itself.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::Coordinate;
use crate::routing::KM_PER_DEGREE;

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// 12 characters = 60 bits, the most that fits a `u64` grid position.
pub const MAX_PRECISION: u8 = 12;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeohashError {
    #[error("geohash precision must be between 1 and {MAX_PRECISION}, got {0}")]
    InvalidPrecision(u8),
    #[error("invalid geohash character {0:?}")]
    InvalidCharacter(char),
    #[error("geohash must not be empty")]
    Empty,
    #[error("coordinate out of range: lat={lat}, lng={lng}")]
    CoordinateOutOfRange { lat: f64, lng: f64 },
}

/// Number of base-32 characters in a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Precision(u8);

impl Precision {
    /// ~1.2 km x 0.6 km cells.
    pub const SIX: Precision = Precision(6);
    /// ~150 m x 150 m cells.
    pub const SEVEN: Precision = Precision(7);

    pub const fn new(chars: u8) -> Result<Self, GeohashError> {
        if chars == 0 || chars > MAX_PRECISION {
            return Err(GeohashError::InvalidPrecision(chars));
        }
        Ok(Self(chars))
    }

    pub fn chars(self) -> usize {
        self.0 as usize
    }

    fn bits(self) -> u32 {
        5 * self.0 as u32
    }

    fn lng_bits(self) -> u32 {
        self.bits().div_ceil(2)
    }

    fn lat_bits(self) -> u32 {
        self.bits() / 2
    }
}

impl TryFrom<u8> for Precision {
    type Error = GeohashError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Precision::new(value)
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    /// (latitude step, longitude step) in grid units.
    fn delta(self) -> (i64, i64) {
        match self {
            Direction::North => (1, 0),
            Direction::NorthEast => (1, 1),
            Direction::East => (0, 1),
            Direction::SouthEast => (-1, 1),
            Direction::South => (-1, 0),
            Direction::SouthWest => (-1, -1),
            Direction::West => (0, -1),
            Direction::NorthWest => (1, -1),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::NorthEast => Direction::SouthWest,
            Direction::East => Direction::West,
            Direction::SouthEast => Direction::NorthWest,
            Direction::South => Direction::North,
            Direction::SouthWest => Direction::NorthEast,
            Direction::West => Direction::East,
            Direction::NorthWest => Direction::SouthEast,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

/// A single geohash cell, always lowercase canonical base-32.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GeohashCell(String);

impl GeohashCell {
    pub fn parse(raw: &str) -> Result<Self, GeohashError> {
        if raw.is_empty() {
            return Err(GeohashError::Empty);
        }
        let len = u8::try_from(raw.len()).map_err(|_| GeohashError::InvalidPrecision(u8::MAX))?;
        Precision::new(len)?;
        let normalized = raw.to_ascii_lowercase();
        if let Some(bad) = normalized.chars().find(|c| base32_value(*c).is_none()) {
            return Err(GeohashError::InvalidCharacter(bad));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn precision(&self) -> Precision {
        // Length is validated on construction.
        Precision(self.0.len() as u8)
    }

    pub fn neighbor(&self, direction: Direction) -> GeohashCell {
        let (dlat, dlng) = direction.delta();
        self.grid().offset(dlat, dlng).to_cell()
    }

    /// The eight adjacent cells, in `Direction::ALL` order.
    pub fn neighbors(&self) -> [GeohashCell; 8] {
        let grid = self.grid();
        Direction::ALL.map(|direction| {
            let (dlat, dlng) = direction.delta();
            grid.offset(dlat, dlng).to_cell()
        })
    }

    pub fn bounds(&self) -> CellBounds {
        let grid = self.grid();
        let (lat_step, lng_step) = cell_size_degrees(grid.precision);
        let min_lat = -90.0 + grid.lat as f64 * lat_step;
        let min_lng = -180.0 + grid.lng as f64 * lng_step;
        CellBounds {
            min_lat,
            max_lat: min_lat + lat_step,
            min_lng,
            max_lng: min_lng + lng_step,
        }
    }

    fn grid(&self) -> GridPos {
        let precision = self.precision();
        let mut lat = 0u64;
        let mut lng = 0u64;
        let mut bit_index = 0u32;
        for c in self.0.chars() {
            // Characters are validated on construction.
            let value = base32_value(c).unwrap_or(0);
            for shift in (0..5).rev() {
                let bit = u64::from((value >> shift) & 1);
                if bit_index % 2 == 0 {
                    lng = (lng << 1) | bit;
                } else {
                    lat = (lat << 1) | bit;
                }
                bit_index += 1;
            }
        }
        GridPos {
            lat,
            lng,
            precision,
        }
    }
}

impl fmt::Display for GeohashCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GeohashCell {
    type Error = GeohashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        GeohashCell::parse(&value)
    }
}

impl From<GeohashCell> for String {
    fn from(cell: GeohashCell) -> Self {
        cell.0
    }
}

fn base32_value(c: char) -> Option<u8> {
    BASE32
        .iter()
        .position(|b| *b as char == c)
        .map(|index| index as u8)
}

/// De-interleaved cell position on the latitude/longitude grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GridPos {
    lat: u64,
    lng: u64,
    precision: Precision,
}

impl GridPos {
    fn from_coordinate(coord: Coordinate, precision: Precision) -> Self {
        let lat_cells = 1u64 << precision.lat_bits();
        let lng_cells = 1u64 << precision.lng_bits();
        let lat = ((coord.lat + 90.0) / 180.0 * lat_cells as f64) as u64;
        let lng = ((coord.lng + 180.0) / 360.0 * lng_cells as f64) as u64;
        Self {
            lat: lat.min(lat_cells - 1),
            lng: lng.min(lng_cells - 1),
            precision,
        }
    }

    fn offset(self, dlat: i64, dlng: i64) -> Self {
        let lat_max = (1i64 << self.precision.lat_bits()) - 1;
        let lng_cells = 1i64 << self.precision.lng_bits();
        let lat = (self.lat as i64 + dlat).clamp(0, lat_max);
        let lng = (self.lng as i64 + dlng).rem_euclid(lng_cells);
        Self {
            lat: lat as u64,
            lng: lng as u64,
            precision: self.precision,
        }
    }

    fn to_cell(self) -> GeohashCell {
        let total_bits = self.precision.bits();
        let mut lng_shift = self.precision.lng_bits();
        let mut lat_shift = self.precision.lat_bits();
        let mut interleaved = 0u64;
        for bit_index in 0..total_bits {
            let bit = if bit_index % 2 == 0 {
                lng_shift -= 1;
                (self.lng >> lng_shift) & 1
            } else {
                lat_shift -= 1;
                (self.lat >> lat_shift) & 1
            };
            interleaved = (interleaved << 1) | bit;
        }

        let chars = self.precision.chars();
        let encoded = (0..chars)
            .map(|i| {
                let shift = 5 * (chars - 1 - i);
                BASE32[((interleaved >> shift) & 0x1f) as usize] as char
            })
            .collect();
        GeohashCell(encoded)
    }
}

/// Encode a coordinate into the cell containing it.
pub fn encode(coord: Coordinate, precision: Precision) -> Result<GeohashCell, GeohashError> {
    if !coord.is_valid() {
        return Err(GeohashError::CoordinateOutOfRange {
            lat: coord.lat,
            lng: coord.lng,
        });
    }
    Ok(GridPos::from_coordinate(coord, precision).to_cell())
}

/// Cells within Chebyshev grid distance `rings` of the cell containing
/// `center`. `rings == 1` is the cell plus its eight neighbors.
pub fn cells_around(
    center: Coordinate,
    rings: u32,
    precision: Precision,
) -> Result<GeohashSet, GeohashError> {
    let origin = encode(center, precision)?.grid();
    let rings = i64::from(rings);
    let mut set = GeohashSet::new();
    for dlat in -rings..=rings {
        for dlng in -rings..=rings {
            set.insert(origin.offset(dlat, dlng).to_cell());
        }
    }
    Ok(set)
}

/// (latitude span, longitude span) of a cell in degrees.
pub fn cell_size_degrees(precision: Precision) -> (f64, f64) {
    (
        180.0 / (1u64 << precision.lat_bits()) as f64,
        360.0 / (1u64 << precision.lng_bits()) as f64,
    )
}

/// Approximate (width, height) of a cell in kilometers at `latitude`.
pub fn cell_dimensions_km(precision: Precision, latitude: f64) -> (f64, f64) {
    let (lat_degrees, lng_degrees) = cell_size_degrees(precision);
    let width = lng_degrees * KM_PER_DEGREE * latitude.to_radians().cos().abs();
    let height = lat_degrees * KM_PER_DEGREE;
    (width, height)
}

/// Order-irrelevant, duplicate-free collection of cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeohashSet(BTreeSet<GeohashCell>);

impl GeohashSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cell: GeohashCell) -> bool {
        self.0.insert(cell)
    }

    /// Insert a cell together with its eight neighbors.
    pub fn insert_with_neighbors(&mut self, cell: GeohashCell) {
        for neighbor in cell.neighbors() {
            self.0.insert(neighbor);
        }
        self.0.insert(cell);
    }

    pub fn contains(&self, cell: &GeohashCell) -> bool {
        self.0.contains(cell)
    }

    /// True when the two sets share at least one cell.
    pub fn intersects(&self, other: &GeohashSet) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.iter().any(|cell| large.contains(cell))
    }

    pub fn union(mut self, other: GeohashSet) -> GeohashSet {
        self.0.extend(other.0);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeohashCell> {
        self.0.iter()
    }

    /// Parse stored cell strings, rejecting anything malformed.
    pub fn from_strings<I, S>(raw: I) -> Result<Self, GeohashError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter()
            .map(|s| GeohashCell::parse(s.as_ref()))
            .collect()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|cell| cell.as_str().to_owned()).collect()
    }
}

impl FromIterator<GeohashCell> for GeohashSet {
    fn from_iter<T: IntoIterator<Item = GeohashCell>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<GeohashCell> for GeohashSet {
    fn extend<T: IntoIterator<Item = GeohashCell>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for GeohashSet {
    type Item = GeohashCell;
    type IntoIter = std::collections::btree_set::IntoIter<GeohashCell>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(chars: u8) -> Precision {
        Precision::new(chars).unwrap()
    }

    fn cell(raw: &str) -> GeohashCell {
        GeohashCell::parse(raw).unwrap()
    }

    #[test]
    fn encodes_reference_points() {
        let jutland = Coordinate::new(57.64911, 10.40744);
        assert_eq!(encode(jutland, p(11)).unwrap().as_str(), "u4pruydqqvj");
        let spain = Coordinate::new(42.6, -5.6);
        assert_eq!(encode(spain, p(5)).unwrap().as_str(), "ezs42");
    }

    #[test]
    fn encodes_bangalore_route_endpoints() {
        let koramangala = Coordinate::new(12.9716, 77.5946);
        let manyata = Coordinate::new(13.0358, 77.6431);
        assert_eq!(encode(koramangala, Precision::SIX).unwrap().as_str(), "tdr1v9");
        assert_eq!(encode(manyata, Precision::SIX).unwrap().as_str(), "tdr4nv");
    }

    #[test]
    fn rejects_invalid_precision_and_coordinates() {
        assert_eq!(Precision::new(0), Err(GeohashError::InvalidPrecision(0)));
        assert_eq!(Precision::new(13), Err(GeohashError::InvalidPrecision(13)));
        let err = encode(Coordinate::new(91.0, 0.0), Precision::SIX).unwrap_err();
        assert!(matches!(err, GeohashError::CoordinateOutOfRange { .. }));
    }

    #[test]
    fn parse_validates_alphabet() {
        assert_eq!(GeohashCell::parse(""), Err(GeohashError::Empty));
        assert_eq!(
            GeohashCell::parse("dqcja"),
            Err(GeohashError::InvalidCharacter('a'))
        );
        assert_eq!(cell("DQCJQ").as_str(), "dqcjq");
    }

    #[test]
    fn neighbors_match_known_layout() {
        let c = cell("dqcjq");
        let names: Vec<String> = c.neighbors().iter().map(|n| n.to_string()).collect();
        assert_eq!(
            names,
            vec!["dqcjw", "dqcjx", "dqcjr", "dqcjp", "dqcjn", "dqcjj", "dqcjm", "dqcjt"]
        );
    }

    #[test]
    fn antimeridian_wraps_longitude() {
        let east_edge = encode(Coordinate::new(0.0, 179.99), p(4)).unwrap();
        let east = east_edge.neighbor(Direction::East);
        assert!(east.bounds().min_lng <= -179.9);
        assert_eq!(east.neighbor(Direction::West), east_edge);
    }

    #[test]
    fn poles_saturate_instead_of_panicking() {
        let top = encode(Coordinate::new(90.0, 0.0), p(5)).unwrap();
        assert_eq!(top.neighbor(Direction::North), top);
        let bottom = encode(Coordinate::new(-90.0, 0.0), p(5)).unwrap();
        assert_eq!(bottom.neighbor(Direction::South), bottom);
        assert_eq!(bottom.neighbors().len(), 8);
    }

    #[test]
    fn cells_around_one_ring_is_cell_plus_neighbors() {
        let center = Coordinate::new(12.9716, 77.5946);
        let set = cells_around(center, 1, Precision::SIX).unwrap();
        let home = encode(center, Precision::SIX).unwrap();
        assert_eq!(set.len(), 9);
        assert!(set.contains(&home));
        assert!(home.neighbors().iter().all(|n| set.contains(n)));

        let wider = cells_around(center, 3, Precision::SIX).unwrap();
        assert_eq!(wider.len(), 49);
        assert!(set.iter().all(|c| wider.contains(c)));
    }

    #[test]
    fn set_intersection() {
        let a: GeohashSet = ["tdr1v9", "tdr1v8"].iter().map(|s| cell(s)).collect();
        let b: GeohashSet = ["tdr1v8", "tdr4nv"].iter().map(|s| cell(s)).collect();
        let c: GeohashSet = ["u4pru"].iter().map(|s| cell(s)).collect();
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(!GeohashSet::new().intersects(&a));
    }

    #[test]
    fn cell_dimensions_at_precision_six() {
        let (width, height) = cell_dimensions_km(Precision::SIX, 0.0);
        assert!((width - 1.22).abs() < 0.01);
        assert!((height - 0.61).abs() < 0.01);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn valid_coord() -> impl Strategy<Value = Coordinate> {
            (-89.9..=89.9, -179.9..=179.9).prop_map(|(lat, lng)| Coordinate::new(lat, lng))
        }

        proptest! {
            #[test]
            fn prop_encode_is_deterministic_and_contains_point(
                coord in valid_coord(),
                chars in 1u8..=MAX_PRECISION
            ) {
                let precision = Precision::new(chars).unwrap();
                let a = encode(coord, precision).unwrap();
                let b = encode(coord, precision).unwrap();
                prop_assert_eq!(&a, &b);
                prop_assert_eq!(a.as_str().len(), chars as usize);
                let bounds = a.bounds();
                prop_assert!(bounds.min_lat - 1e-9 <= coord.lat && coord.lat <= bounds.max_lat + 1e-9);
                prop_assert!(bounds.min_lng - 1e-9 <= coord.lng && coord.lng <= bounds.max_lng + 1e-9);
            }

            #[test]
            fn prop_neighbor_adjacency_is_symmetric(
                coord in valid_coord(),
                chars in 1u8..=9u8
            ) {
                let home = encode(coord, Precision::new(chars).unwrap()).unwrap();
                // Polar rows saturate, so adjacency is only symmetric away from them.
                prop_assume!(home.neighbor(Direction::North) != home);
                prop_assume!(home.neighbor(Direction::South) != home);
                for (i, neighbor) in home.neighbors().iter().enumerate() {
                    let back = neighbor.neighbor(Direction::ALL[i].opposite());
                    prop_assert_eq!(&back, &home);
                    prop_assert!(neighbor.neighbors().contains(&home));
                }
            }
        }
    }
}
