//! Payload values stored by the object and attribute channels.
//!
//! A closed set of scalar, array and geometric variants rather than an
//! open object model; every variant round-trips through a container
//! directory holding a `kind` byte plus typed entries.

use glam::DVec3;

use crate::container::IndexedFile;
use crate::util::{Box3d, DMat4, Error, Result};

const KIND_ENTRY: &str = "kind";
const VALUE_ENTRY: &str = "value";
const POSITIONS_ENTRY: &str = "positions";
const FACE_COUNTS_ENTRY: &str = "faceCounts";
const FACE_INDICES_ENTRY: &str = "faceIndices";

/// A value sampled by the object or an attribute channel.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    IntArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
    Matrix(DMat4),
    Box3(Box3d),
    /// A point cloud; carries an intrinsic bound.
    Points { positions: Vec<DVec3> },
    /// A polygon mesh; carries an intrinsic bound.
    Mesh {
        positions: Vec<DVec3>,
        face_counts: Vec<i64>,
        face_indices: Vec<i64>,
    },
}

/// On-disk discriminant for each variant.
#[repr(u8)]
enum PayloadKind {
    Bool = 0,
    Int = 1,
    Double = 2,
    String = 3,
    IntArray = 4,
    DoubleArray = 5,
    StringArray = 6,
    Matrix = 7,
    Box3 = 8,
    Points = 9,
    Mesh = 10,
}

impl Payload {
    fn kind_byte(&self) -> u8 {
        match self {
            Self::Bool(_) => PayloadKind::Bool as u8,
            Self::Int(_) => PayloadKind::Int as u8,
            Self::Double(_) => PayloadKind::Double as u8,
            Self::String(_) => PayloadKind::String as u8,
            Self::IntArray(_) => PayloadKind::IntArray as u8,
            Self::DoubleArray(_) => PayloadKind::DoubleArray as u8,
            Self::StringArray(_) => PayloadKind::StringArray as u8,
            Self::Matrix(_) => PayloadKind::Matrix as u8,
            Self::Box3(_) => PayloadKind::Box3 as u8,
            Self::Points { .. } => PayloadKind::Points as u8,
            Self::Mesh { .. } => PayloadKind::Mesh as u8,
        }
    }

    /// Intrinsic bound of geometric payloads; `None` for plain data.
    pub fn bound(&self) -> Option<Box3d> {
        match self {
            Self::Points { positions } | Self::Mesh { positions, .. } => {
                let mut b = Box3d::EMPTY;
                for p in positions {
                    b.extend_by_point(*p);
                }
                Some(b)
            }
            _ => None,
        }
    }

    /// Persist this payload as entries under `dir`.
    pub fn save(&self, dir: &IndexedFile) -> Result<()> {
        dir.write(KIND_ENTRY, &self.kind_byte())?;
        match self {
            Self::Bool(v) => dir.write(VALUE_ENTRY, &(*v as u8)),
            Self::Int(v) => dir.write(VALUE_ENTRY, v),
            Self::Double(v) => dir.write(VALUE_ENTRY, v),
            Self::String(v) => dir.write(VALUE_ENTRY, v),
            Self::IntArray(v) => dir.write_array(VALUE_ENTRY, v),
            Self::DoubleArray(v) => dir.write_array(VALUE_ENTRY, v),
            Self::StringArray(v) => dir.write_array(VALUE_ENTRY, v),
            Self::Matrix(m) => dir.write_array(VALUE_ENTRY, &m.to_cols_array()),
            Self::Box3(b) => dir.write_array(
                VALUE_ENTRY,
                &[b.min.x, b.min.y, b.min.z, b.max.x, b.max.y, b.max.z],
            ),
            Self::Points { positions } => {
                dir.write_array(POSITIONS_ENTRY, &flatten_points(positions))
            }
            Self::Mesh {
                positions,
                face_counts,
                face_indices,
            } => {
                dir.write_array(POSITIONS_ENTRY, &flatten_points(positions))?;
                dir.write_array(FACE_COUNTS_ENTRY, face_counts)?;
                dir.write_array(FACE_INDICES_ENTRY, face_indices)
            }
        }
    }

    /// Load a payload saved by [`Self::save`].
    pub fn load(dir: &IndexedFile) -> Result<Self> {
        let kind: u8 = dir.read(KIND_ENTRY)?;
        match kind {
            k if k == PayloadKind::Bool as u8 => {
                Ok(Self::Bool(dir.read::<u8>(VALUE_ENTRY)? != 0))
            }
            k if k == PayloadKind::Int as u8 => Ok(Self::Int(dir.read(VALUE_ENTRY)?)),
            k if k == PayloadKind::Double as u8 => Ok(Self::Double(dir.read(VALUE_ENTRY)?)),
            k if k == PayloadKind::String as u8 => Ok(Self::String(dir.read(VALUE_ENTRY)?)),
            k if k == PayloadKind::IntArray as u8 => {
                Ok(Self::IntArray(dir.read_array(VALUE_ENTRY)?))
            }
            k if k == PayloadKind::DoubleArray as u8 => {
                Ok(Self::DoubleArray(dir.read_array(VALUE_ENTRY)?))
            }
            k if k == PayloadKind::StringArray as u8 => {
                Ok(Self::StringArray(dir.read_array(VALUE_ENTRY)?))
            }
            k if k == PayloadKind::Matrix as u8 => {
                let v: Vec<f64> = dir.read_array_expecting(VALUE_ENTRY, Some(16))?;
                let cols: [f64; 16] = v
                    .try_into()
                    .map_err(|_| Error::corrupt("matrix payload with wrong length"))?;
                Ok(Self::Matrix(DMat4::from_cols_array(&cols)))
            }
            k if k == PayloadKind::Box3 as u8 => {
                let v: Vec<f64> = dir.read_array_expecting(VALUE_ENTRY, Some(6))?;
                Ok(Self::Box3(Box3d::new(
                    DVec3::new(v[0], v[1], v[2]),
                    DVec3::new(v[3], v[4], v[5]),
                )))
            }
            k if k == PayloadKind::Points as u8 => Ok(Self::Points {
                positions: unflatten_points(&dir.read_array(POSITIONS_ENTRY)?)?,
            }),
            k if k == PayloadKind::Mesh as u8 => Ok(Self::Mesh {
                positions: unflatten_points(&dir.read_array(POSITIONS_ENTRY)?)?,
                face_counts: dir.read_array(FACE_COUNTS_ENTRY)?,
                face_indices: dir.read_array(FACE_INDICES_ENTRY)?,
            }),
            other => Err(Error::corrupt(format!("unknown payload kind {other}"))),
        }
    }

    /// Linear interpolation between two samples of the same shape.
    ///
    /// Returns `None` when interpolation is undefined for the payload
    /// (discrete kinds, or arrays/geometry of mismatched shape); callers
    /// fall back to the nearer sample.
    pub fn interpolate(a: &Self, b: &Self, x: f64) -> Option<Self> {
        match (a, b) {
            (Self::Double(va), Self::Double(vb)) => Some(Self::Double(va + (vb - va) * x)),
            (Self::DoubleArray(va), Self::DoubleArray(vb)) if va.len() == vb.len() => {
                Some(Self::DoubleArray(
                    va.iter()
                        .zip(vb)
                        .map(|(a, b)| a + (b - a) * x)
                        .collect(),
                ))
            }
            (Self::Matrix(ma), Self::Matrix(mb)) => {
                Some(Self::Matrix(crate::util::lerp_matrix(ma, mb, x)))
            }
            (Self::Box3(ba), Self::Box3(bb)) => Some(Self::Box3(Box3d::lerp(ba, bb, x))),
            (Self::Points { positions: pa }, Self::Points { positions: pb })
                if pa.len() == pb.len() =>
            {
                Some(Self::Points {
                    positions: pa.iter().zip(pb).map(|(a, b)| a.lerp(*b, x)).collect(),
                })
            }
            (
                Self::Mesh {
                    positions: pa,
                    face_counts: ca,
                    face_indices: ia,
                },
                Self::Mesh {
                    positions: pb,
                    face_counts: cb,
                    face_indices: ib,
                },
            ) if pa.len() == pb.len() && ca == cb && ia == ib => Some(Self::Mesh {
                positions: pa.iter().zip(pb).map(|(a, b)| a.lerp(*b, x)).collect(),
                face_counts: ca.clone(),
                face_indices: ia.clone(),
            }),
            _ => None,
        }
    }
}

fn flatten_points(points: &[DVec3]) -> Vec<f64> {
    let mut out = Vec::with_capacity(points.len() * 3);
    for p in points {
        out.extend_from_slice(&[p.x, p.y, p.z]);
    }
    out
}

fn unflatten_points(values: &[f64]) -> Result<Vec<DVec3>> {
    if values.len() % 3 != 0 {
        return Err(Error::corrupt("point array length not divisible by 3"));
    }
    Ok(values
        .chunks_exact(3)
        .map(|c| DVec3::new(c[0], c[1], c[2]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_of_points() {
        let p = Payload::Points {
            positions: vec![
                DVec3::new(-1.0, 0.0, 0.0),
                DVec3::new(2.0, 3.0, -4.0),
            ],
        };
        let b = p.bound().unwrap();
        assert_eq!(b.min, DVec3::new(-1.0, 0.0, -4.0));
        assert_eq!(b.max, DVec3::new(2.0, 3.0, 0.0));
    }

    #[test]
    fn test_plain_data_has_no_bound() {
        assert!(Payload::Double(1.0).bound().is_none());
        assert!(Payload::StringArray(vec!["a".into()]).bound().is_none());
    }

    #[test]
    fn test_interpolate_double() {
        let a = Payload::Double(1.0);
        let b = Payload::Double(3.0);
        assert_eq!(
            Payload::interpolate(&a, &b, 0.5),
            Some(Payload::Double(2.0))
        );
    }

    #[test]
    fn test_interpolate_points_same_topology() {
        let a = Payload::Points {
            positions: vec![DVec3::ZERO],
        };
        let b = Payload::Points {
            positions: vec![DVec3::new(2.0, 0.0, 0.0)],
        };
        let mid = Payload::interpolate(&a, &b, 0.5).unwrap();
        match mid {
            Payload::Points { positions } => {
                assert_eq!(positions[0], DVec3::new(1.0, 0.0, 0.0))
            }
            _ => panic!("expected points"),
        }
    }

    #[test]
    fn test_interpolate_undefined() {
        assert!(Payload::interpolate(
            &Payload::String("a".into()),
            &Payload::String("b".into()),
            0.5
        )
        .is_none());
        assert!(Payload::interpolate(
            &Payload::DoubleArray(vec![1.0]),
            &Payload::DoubleArray(vec![1.0, 2.0]),
            0.5
        )
        .is_none());
        assert!(
            Payload::interpolate(&Payload::Int(1), &Payload::Double(2.0), 0.5).is_none()
        );
    }
}
