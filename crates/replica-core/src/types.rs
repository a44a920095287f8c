//! Attribute type registry.
//!
//! Every attribute type the remote datamodel may publish maps to exactly one
//! [`TypeBinding`]: the SQL column type used for generated tables, the encoder
//! producing the bulk-load text for a JSON value, and the comparison used when
//! diffing rows. Unknown type names never reach this module; they are rejected
//! when the configuration is validated.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Spatial reference used for all geometries published by the remote source
/// (ETRS89 / UTM zone 32N).
pub const SRID: u32 = 25832;

/// Error produced when a remote value cannot be encoded for its attribute type.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The JSON value does not have the shape the attribute type requires
    #[error("attribute '{attribute}' of type {attribute_type}: cannot encode value {value}")]
    UnexpectedValue {
        attribute: String,
        attribute_type: AttributeType,
        value: String,
    },

    /// A GeoJSON geometry type we cannot express as EWKT
    #[error("attribute '{attribute}': unsupported geometry type '{geometry_type}'")]
    UnsupportedGeometry {
        attribute: String,
        geometry_type: String,
    },
}

/// Closed set of attribute types understood by the replication client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Uuid,
    String,
    Integer,
    Real,
    Boolean,
    /// Timestamp with time zone
    Timestamp,
    /// Timestamp without time zone
    LocalDateTime,
    /// `[x, y]` coordinate pair
    Point2d,
    /// GeoJSON geometry
    Geometry,
    /// GeoJSON geometry with z coordinates
    Geometry3d,
}

/// How two values of a column are compared when computing row differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistinctClause {
    /// `a IS DISTINCT FROM b`
    IsDistinctFrom,
    /// `a::text IS DISTINCT FROM b::text`, for types without a usable equality operator
    TextIsDistinctFrom,
}

/// Encoder turning a remote JSON value into bulk-load text, `None` meaning NULL.
pub type Encoder = fn(&Value) -> Result<Option<String>, EncodeFailure>;

/// Encoder failure before the attribute context is attached.
#[derive(Debug)]
pub enum EncodeFailure {
    UnexpectedValue,
    UnsupportedGeometry(String),
}

/// Registry entry for one attribute type.
#[derive(Clone, Copy)]
pub struct TypeBinding {
    /// SQL type used when generating table DDL
    pub sql_type: &'static str,
    /// Bulk-load encoder
    pub encoder: Encoder,
    /// Comparison used by row diffing
    pub distinct_clause: DistinctClause,
}

impl fmt::Debug for TypeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeBinding")
            .field("sql_type", &self.sql_type)
            .field("distinct_clause", &self.distinct_clause)
            .finish()
    }
}

impl AttributeType {
    /// Every supported type, in registry order.
    pub const ALL: [AttributeType; 10] = [
        AttributeType::Uuid,
        AttributeType::String,
        AttributeType::Integer,
        AttributeType::Real,
        AttributeType::Boolean,
        AttributeType::Timestamp,
        AttributeType::LocalDateTime,
        AttributeType::Point2d,
        AttributeType::Geometry,
        AttributeType::Geometry3d,
    ];

    /// Name used by the remote datamodel.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::Uuid => "uuid",
            AttributeType::String => "string",
            AttributeType::Integer => "integer",
            AttributeType::Real => "real",
            AttributeType::Boolean => "boolean",
            AttributeType::Timestamp => "timestamp",
            AttributeType::LocalDateTime => "localdatetime",
            AttributeType::Point2d => "point2d",
            AttributeType::Geometry => "geometry",
            AttributeType::Geometry3d => "geometry3d",
        }
    }

    /// Registry lookup. Exhaustive over the enum, so a new type cannot be
    /// added without a binding.
    pub fn binding(&self) -> TypeBinding {
        match self {
            AttributeType::Uuid => TypeBinding {
                sql_type: "uuid",
                encoder: encode_string,
                distinct_clause: DistinctClause::IsDistinctFrom,
            },
            AttributeType::String => TypeBinding {
                sql_type: "text",
                encoder: encode_string,
                distinct_clause: DistinctClause::IsDistinctFrom,
            },
            AttributeType::Integer => TypeBinding {
                sql_type: "bigint",
                encoder: encode_integer,
                distinct_clause: DistinctClause::IsDistinctFrom,
            },
            AttributeType::Real => TypeBinding {
                sql_type: "double precision",
                encoder: encode_number,
                distinct_clause: DistinctClause::IsDistinctFrom,
            },
            AttributeType::Boolean => TypeBinding {
                sql_type: "boolean",
                encoder: encode_boolean,
                distinct_clause: DistinctClause::IsDistinctFrom,
            },
            AttributeType::Timestamp => TypeBinding {
                sql_type: "timestamptz",
                encoder: encode_string,
                distinct_clause: DistinctClause::IsDistinctFrom,
            },
            AttributeType::LocalDateTime => TypeBinding {
                sql_type: "timestamp",
                encoder: encode_string,
                distinct_clause: DistinctClause::IsDistinctFrom,
            },
            AttributeType::Point2d => TypeBinding {
                sql_type: "geometry(Point, 25832)",
                encoder: encode_point2d,
                distinct_clause: DistinctClause::TextIsDistinctFrom,
            },
            AttributeType::Geometry => TypeBinding {
                sql_type: "geometry(Geometry, 25832)",
                encoder: encode_geojson,
                distinct_clause: DistinctClause::TextIsDistinctFrom,
            },
            AttributeType::Geometry3d => TypeBinding {
                sql_type: "geometry(GeometryZ, 25832)",
                encoder: encode_geojson,
                distinct_clause: DistinctClause::TextIsDistinctFrom,
            },
        }
    }

    /// Encode `value` for attribute `attribute`, attaching context to failures.
    pub fn encode(&self, attribute: &str, value: &Value) -> Result<Option<String>, EncodeError> {
        (self.binding().encoder)(value).map_err(|failure| match failure {
            EncodeFailure::UnexpectedValue => EncodeError::UnexpectedValue {
                attribute: attribute.to_string(),
                attribute_type: *self,
                value: value.to_string(),
            },
            EncodeFailure::UnsupportedGeometry(geometry_type) => {
                EncodeError::UnsupportedGeometry {
                    attribute: attribute.to_string(),
                    geometry_type,
                }
            }
        })
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a type name is not in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAttributeType(pub String);

impl FromStr for AttributeType {
    type Err = UnknownAttributeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttributeType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownAttributeType(s.to_string()))
    }
}

// ============================================================================
// Encoders
// ============================================================================

fn encode_string(value: &Value) -> Result<Option<String>, EncodeFailure> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(EncodeFailure::UnexpectedValue),
    }
}

fn encode_integer(value: &Value) -> Result<Option<String>, EncodeFailure> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Some(n.to_string())),
        _ => Err(EncodeFailure::UnexpectedValue),
    }
}

fn encode_number(value: &Value) -> Result<Option<String>, EncodeFailure> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(EncodeFailure::UnexpectedValue),
    }
}

fn encode_boolean(value: &Value) -> Result<Option<String>, EncodeFailure> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(true) => Ok(Some("true".to_string())),
        Value::Bool(false) => Ok(Some("false".to_string())),
        _ => Err(EncodeFailure::UnexpectedValue),
    }
}

fn encode_point2d(value: &Value) -> Result<Option<String>, EncodeFailure> {
    match value {
        Value::Null => Ok(None),
        Value::Array(_) => Ok(Some(format!("SRID={SRID};POINT({})", position(value)?))),
        _ => Err(EncodeFailure::UnexpectedValue),
    }
}

fn encode_geojson(value: &Value) -> Result<Option<String>, EncodeFailure> {
    let geometry = match value {
        Value::Null => return Ok(None),
        Value::Object(geometry) => geometry,
        _ => return Err(EncodeFailure::UnexpectedValue),
    };
    let geometry_type = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or(EncodeFailure::UnexpectedValue)?;
    let coordinates = geometry
        .get("coordinates")
        .ok_or(EncodeFailure::UnexpectedValue)?;

    let wkt = match geometry_type {
        "Point" => format!("POINT({})", position(coordinates)?),
        "LineString" => format!("LINESTRING{}", positions(coordinates)?),
        "Polygon" => format!("POLYGON{}", rings(coordinates)?),
        "MultiPoint" => {
            let points = elements(coordinates)?
                .iter()
                .map(|p| position(p).map(|p| format!("({p})")))
                .collect::<Result<Vec<_>, _>>()?;
            format!("MULTIPOINT({})", points.join(","))
        }
        "MultiLineString" => format!("MULTILINESTRING{}", rings(coordinates)?),
        "MultiPolygon" => {
            let polygons = elements(coordinates)?
                .iter()
                .map(rings)
                .collect::<Result<Vec<_>, _>>()?;
            format!("MULTIPOLYGON({})", polygons.join(","))
        }
        other => return Err(EncodeFailure::UnsupportedGeometry(other.to_string())),
    };
    Ok(Some(format!("SRID={SRID};{wkt}")))
}

fn elements(value: &Value) -> Result<&Vec<Value>, EncodeFailure> {
    value.as_array().ok_or(EncodeFailure::UnexpectedValue)
}

/// `[x, y(, z)]` -> `x y( z)`
fn position(value: &Value) -> Result<String, EncodeFailure> {
    let ordinates = elements(value)?;
    if ordinates.len() < 2 || ordinates.len() > 3 {
        return Err(EncodeFailure::UnexpectedValue);
    }
    let ordinates = ordinates
        .iter()
        .map(|o| match o {
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(EncodeFailure::UnexpectedValue),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ordinates.join(" "))
}

/// `[[x, y], ...]` -> `(x y,...)`
fn positions(value: &Value) -> Result<String, EncodeFailure> {
    let positions = elements(value)?
        .iter()
        .map(position)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", positions.join(",")))
}

/// `[[[x, y], ...], ...]` -> `((x y,...),...)`
fn rings(value: &Value) -> Result<String, EncodeFailure> {
    let rings = elements(value)?
        .iter()
        .map(positions)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", rings.join(",")))
}
