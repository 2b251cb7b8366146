//! Core data types: location codes, cache keys, and parsed plot records.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{EngineError, EngineResult};

/// Length of the category prefix (`RVM` / `UVM`) in a giscode.
const PREFIX_LEN: usize = 3;
/// Length of the district part of a giscode.
const DISTRICT_LEN: usize = 2;
/// Length of the taluka part of a giscode.
const TALUKA_LEN: usize = 2;

/// Administrative classification of a village.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Rural,
    Urban,
}

impl Category {
    /// Single-letter code used in hierarchy lookups (`R` / `U`).
    pub fn code(self) -> &'static str {
        match self {
            Category::Rural => "R",
            Category::Urban => "U",
        }
    }

    /// Giscode prefix for this category.
    pub fn prefix(self) -> &'static str {
        match self {
            Category::Rural => "RVM",
            Category::Urban => "UVM",
        }
    }

    /// Parse a single-letter category code, case-insensitively.
    pub fn from_code(code: &str) -> EngineResult<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "R" => Ok(Category::Rural),
            "U" => Ok(Category::Urban),
            other => Err(EngineError::Parse(format!(
                "Unknown category '{other}'. Use 'R' or 'U'."
            ))),
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "RVM" => Some(Category::Rural),
            "UVM" => Some(Category::Urban),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Hierarchical address of a village: category, district, taluka, village.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationCode {
    pub category: Category,
    pub district: String,
    pub taluka: String,
    pub village: String,
}

impl LocationCode {
    pub fn new(category: Category, district: &str, taluka: &str, village: &str) -> Self {
        Self {
            category,
            district: district.to_string(),
            taluka: taluka.to_string(),
            village: village.to_string(),
        }
    }

    /// Split a flat giscode back into its parts.
    ///
    /// Layout: prefix (3) + district (2) + taluka (2) + village (remainder).
    pub fn parse(giscode: &str) -> EngineResult<Self> {
        let giscode = giscode.trim();
        let min_len = PREFIX_LEN + DISTRICT_LEN + TALUKA_LEN + 1;
        if !giscode.is_ascii() || giscode.len() < min_len {
            return Err(EngineError::Parse(format!(
                "Giscode '{giscode}' is too short or not ASCII"
            )));
        }

        let (prefix, rest) = giscode.split_at(PREFIX_LEN);
        let category = Category::from_prefix(prefix).ok_or_else(|| {
            EngineError::Parse(format!("Giscode '{giscode}' has unknown prefix '{prefix}'"))
        })?;
        let (district, rest) = rest.split_at(DISTRICT_LEN);
        let (taluka, village) = rest.split_at(TALUKA_LEN);

        Ok(Self::new(category, district, taluka, village))
    }

    /// Flat identifier understood by the backend.
    pub fn giscode(&self) -> String {
        format!(
            "{}{}{}{}",
            self.category.prefix(),
            self.district,
            self.taluka,
            self.village
        )
    }
}

impl fmt::Display for LocationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.giscode())
    }
}

/// Cache key: one parcel within one village.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlotKey {
    pub giscode: String,
    pub plot_no: String,
}

impl PlotKey {
    pub fn new(location: &LocationCode, plot_no: &str) -> Self {
        Self {
            giscode: location.giscode(),
            plot_no: plot_no.to_string(),
        }
    }

    /// Single-string form of the key, e.g. `RVM2502...0000_17`.
    pub fn composite(&self) -> String {
        format!("{}_{}", self.giscode, self.plot_no)
    }
}

impl fmt::Display for PlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.giscode, self.plot_no)
    }
}

/// One `key: value` block from a plot's info text, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap(Vec<(String, String)>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field. A repeated key overwrites the earlier value in place.
    pub fn insert(&mut self, key: &str, value: &str) {
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value.to_string();
        } else {
            self.0.push((key.to_string(), value.to_string()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldMapVisitor;

        impl<'de> Visitor<'de> for FieldMapVisitor {
            type Value = FieldMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of string fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldMap, A::Error> {
                let mut map = FieldMap::new();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    map.insert(&k, &v);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(FieldMapVisitor)
    }
}

/// A fetched and parsed parcel. Also the on-disk cache entry format: every
/// record carries its own key fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotRecord {
    pub giscode: String,
    pub plot_no: String,
    /// Parcel outline as WKT.
    pub the_geom: String,
    /// Ownership and area blocks from the info text.
    #[serde(default)]
    pub parsed_records: Vec<FieldMap>,
    /// Report link, rewritten to the local proxy path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
}

impl PlotRecord {
    pub fn key(&self) -> PlotKey {
        PlotKey {
            giscode: self.giscode.clone(),
            plot_no: self.plot_no.clone(),
        }
    }
}

/// One entry of a district / taluka / village dropdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub code: String,
    #[serde(alias = "value", default)]
    pub label: String,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number code, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_giscode_roundtrip() {
        let loc = LocationCode::parse("RVM2502272500020303690000").unwrap();
        assert_eq!(loc.category, Category::Rural);
        assert_eq!(loc.district, "25");
        assert_eq!(loc.taluka, "02");
        assert_eq!(loc.village, "272500020303690000");
        assert_eq!(loc.giscode(), "RVM2502272500020303690000");
    }

    #[test]
    fn test_urban_prefix() {
        let loc = LocationCode::new(Category::Urban, "05", "02", "1234");
        assert_eq!(loc.giscode(), "UVM05021234");
        assert_eq!(LocationCode::parse("UVM05021234").unwrap(), loc);
    }

    #[test]
    fn test_parse_rejects_bad_giscodes() {
        assert!(LocationCode::parse("XVM0502270500020047510000").is_err());
        assert!(LocationCode::parse("RVM0502").is_err());
        assert!(LocationCode::parse("").is_err());
    }

    #[test]
    fn test_category_codes() {
        assert_eq!(Category::from_code("r").unwrap(), Category::Rural);
        assert_eq!(Category::from_code("U").unwrap(), Category::Urban);
        assert!(Category::from_code("V").is_err());
    }

    #[test]
    fn test_plot_key_composite() {
        let loc = LocationCode::new(Category::Rural, "05", "02", "99");
        let key = PlotKey::new(&loc, "17/A");
        assert_eq!(key.composite(), "RVM050299_17/A");
        assert_eq!(key.to_string(), key.composite());
    }

    #[test]
    fn test_field_map_keeps_source_order() {
        let map: FieldMap = [("Survey No.", "1"), ("Area", "2.5"), ("Owner", "X")]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"Survey No.":"1","Area":"2.5","Owner":"X"}"#);

        let back: FieldMap = serde_json::from_str(&json).unwrap();
        let keys: Vec<&str> = back.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Survey No.", "Area", "Owner"]);
    }

    #[test]
    fn test_level_entry_accepts_backend_shape() {
        let entry: LevelEntry =
            serde_json::from_str(r#"{"code": 25, "value": "Pune", "extra": true}"#).unwrap();
        assert_eq!(entry.code, "25");
        assert_eq!(entry.label, "Pune");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["label"], "Pune");
    }
}
