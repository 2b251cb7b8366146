//! Minimal WKT reader for parcel outlines.
//!
//! Only `POLYGON` and `MULTIPOLYGON` are understood, which is all the map
//! service returns. Z/M ordinates are read and dropped.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::PlotRecord;

pub type Point = (f64, f64);
pub type Ring = Vec<Point>;

/// A polygon: exterior ring first, then any holes.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub rings: Vec<Ring>,
}

impl Polygon {
    pub fn exterior(&self) -> Option<&Ring> {
        self.rings.first()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Polygon(Polygon),
    MultiPolygon(Vec<Polygon>),
}

impl Geometry {
    pub fn polygons(&self) -> &[Polygon] {
        match self {
            Geometry::Polygon(p) => std::slice::from_ref(p),
            Geometry::MultiPolygon(ps) => ps,
        }
    }

    pub fn points(&self) -> impl Iterator<Item = &Point> {
        self.polygons()
            .iter()
            .flat_map(|p| p.rings.iter())
            .flat_map(|r| r.iter())
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(self.points().copied())
    }
}

/// Parse a WKT `POLYGON` or `MULTIPOLYGON`, optionally `SRID=n;`-prefixed.
pub fn parse(text: &str) -> EngineResult<Geometry> {
    let text = text.trim();
    let text = match text.split_once(';') {
        Some((srid, rest)) if srid.trim().to_ascii_uppercase().starts_with("SRID=") => rest,
        _ => text,
    };

    let mut cursor = Cursor::new(text);
    let tag = cursor.word().to_ascii_uppercase();
    let geometry = match tag.as_str() {
        "POLYGON" => Geometry::Polygon(cursor.polygon()?),
        "MULTIPOLYGON" => Geometry::MultiPolygon(cursor.list(Cursor::polygon)?),
        other => {
            return Err(EngineError::Parse(format!(
                "Unsupported WKT geometry type '{other}'"
            )))
        }
    };

    cursor.skip_ws();
    if !cursor.at_end() {
        return Err(cursor.error("trailing characters"));
    }
    Ok(geometry)
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn word(&mut self) -> &'a str {
        self.skip_ws();
        let rest = self.rest();
        let len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn expect(&mut self, ch: char) -> EngineResult<()> {
        self.skip_ws();
        if self.peek() == Some(ch) {
            self.pos += ch.len_utf8();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{ch}'")))
        }
    }

    /// `( item , item ... )`
    fn list<T>(&mut self, item: fn(&mut Self) -> EngineResult<T>) -> EngineResult<Vec<T>> {
        self.expect('(')?;
        let mut items = vec![item(self)?];
        loop {
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                    items.push(item(self)?);
                }
                Some(')') => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
    }

    fn polygon(&mut self) -> EngineResult<Polygon> {
        Ok(Polygon {
            rings: self.list(Self::ring)?,
        })
    }

    fn ring(&mut self) -> EngineResult<Ring> {
        self.list(Self::point)
    }

    fn point(&mut self) -> EngineResult<Point> {
        let x = self.number()?;
        let y = self.number()?;
        // Z / M ordinates
        loop {
            self.skip_ws();
            match self.peek() {
                Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                    self.number()?;
                }
                _ => break,
            }
        }
        Ok((x, y))
    }

    fn number(&mut self) -> EngineResult<f64> {
        self.skip_ws();
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
            .unwrap_or(rest.len());
        let token = &rest[..len];
        let value = token
            .parse::<f64>()
            .map_err(|_| self.error(&format!("invalid number '{token}'")))?;
        self.pos += len;
        Ok(value)
    }

    fn error(&self, msg: &str) -> EngineError {
        EngineError::Parse(format!("WKT {msg} at offset {}", self.pos))
    }
}

/// Axis-aligned extent in the geometry's own coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn from_points(points: impl IntoIterator<Item = Point>) -> Option<Self> {
        let mut iter = points.into_iter();
        let (x, y) = iter.next()?;
        let mut bbox = BoundingBox {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        };
        for (x, y) in iter {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        Some(bbox)
    }

    /// Extent of every parseable geometry in `records`. Unparseable ones
    /// are skipped.
    pub fn of_records<'a>(records: impl IntoIterator<Item = &'a PlotRecord>) -> Option<Self> {
        records
            .into_iter()
            .filter_map(|r| match parse(&r.the_geom) {
                Ok(g) => g.bounding_box(),
                Err(e) => {
                    tracing::debug!("Skipping plot {} in extent: {e}", r.plot_no);
                    None
                }
            })
            .reduce(|a, b| a.union(&b))
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Grow each side by `ratio` of the box's width / height.
    pub fn padded(&self, ratio: f64) -> BoundingBox {
        let dx = (self.max_x - self.min_x) * ratio;
        let dy = (self.max_y - self.min_y) * ratio;
        BoundingBox {
            min_x: self.min_x - dx,
            min_y: self.min_y - dy,
            max_x: self.max_x + dx,
            max_y: self.max_y + dy,
        }
    }

    /// `minx,miny,maxx,maxy` as used by WMS `BBOX` parameters.
    pub fn to_bbox_param(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}
