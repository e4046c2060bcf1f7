//! Turns the engine's flat landmark/vertex arrays into renderable geometry.
//!
//! Vertex payloads arrive interleaved (`x, y, z, aux...` per vertex). They are
//! viewed with stride/offset addressing and copied into planar arrays: one
//! `n x 3` position array and an optional `n x k` auxiliary array (UVs for
//! face meshes, a pseudo-color for pose joints).

pub mod records;
pub mod skeleton;
pub mod transform;

use ndarray::{Array2, ArrayView2, s};

use crate::error::MalformedPayloadError;

pub use records::{FaceVertex, HandLandmark, PoseLandmark, decode_records};
pub use skeleton::SkeletonTopology;
pub use transform::RigidTransform;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuxSemantic {
    TexCoord,
    Color,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuxLayout {
    pub semantic: AuxSemantic,
    pub offset: usize,
    pub components: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: usize,
    pub position_offset: usize,
    pub aux: Option<AuxLayout>,
}

impl VertexLayout {
    /// x, y, z, u, v
    pub const FACE_MESH: VertexLayout = VertexLayout {
        stride: 5,
        position_offset: 0,
        aux: Some(AuxLayout {
            semantic: AuxSemantic::TexCoord,
            offset: 3,
            components: 2,
        }),
    };

    /// x, y, z, visibility, presence. Visibility is rendered as a 1-float color.
    pub const POSE_WORLD: VertexLayout = VertexLayout {
        stride: 5,
        position_offset: 0,
        aux: Some(AuxLayout {
            semantic: AuxSemantic::Color,
            offset: 3,
            components: 1,
        }),
    };

    pub const HAND: VertexLayout = VertexLayout {
        stride: 3,
        position_offset: 0,
        aux: None,
    };

    fn validate(&self) -> Result<(), MalformedPayloadError> {
        if self.stride == 0 {
            return Err(MalformedPayloadError::Layout("stride is zero".into()));
        }
        if self.position_offset + 3 > self.stride {
            return Err(MalformedPayloadError::Layout(format!(
                "position at offset {} does not fit stride {}",
                self.position_offset, self.stride
            )));
        }
        if let Some(aux) = self.aux {
            if aux.components == 0 || aux.offset + aux.components > self.stride {
                return Err(MalformedPayloadError::Layout(format!(
                    "{} aux components at offset {} do not fit stride {}",
                    aux.components, aux.offset, self.stride
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Primitive {
    Triangles,
    Lines,
    Points,
}

impl Primitive {
    pub fn indices_per_primitive(self) -> usize {
        match self {
            Primitive::Triangles => 3,
            Primitive::Lines => 2,
            Primitive::Points => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeometryElement {
    pub primitive: Primitive,
    pub indices: Vec<u32>,
}

impl GeometryElement {
    pub fn primitive_count(&self) -> usize {
        self.indices.len() / self.primitive.indices_per_primitive()
    }

    /// Groups the flat index list into primitives, e.g. `[a, b, c]` triangles.
    pub fn primitives(&self) -> std::slice::ChunksExact<'_, u32> {
        self.indices
            .chunks_exact(self.primitive.indices_per_primitive())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuxChannel {
    pub semantic: AuxSemantic,
    pub values: Array2<f32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReconstructedGeometry {
    /// `vertex_count x 3`
    pub positions: Array2<f32>,
    pub aux: Option<AuxChannel>,
    pub elements: Vec<GeometryElement>,
}

impl ReconstructedGeometry {
    pub fn empty() -> Self {
        Self {
            positions: Array2::zeros((0, 3)),
            aux: None,
            elements: Vec::new(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.nrows()
    }

    pub fn index_count(&self) -> usize {
        self.elements.iter().map(|e| e.indices.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count() == 0 && self.index_count() == 0
    }

    pub fn element(&self, primitive: Primitive) -> Option<&GeometryElement> {
        self.elements.iter().find(|e| e.primitive == primitive)
    }

    pub fn position(&self, vertex: usize) -> Option<[f32; 3]> {
        if vertex >= self.vertex_count() {
            return None;
        }
        let row = self.positions.row(vertex);
        Some([row[0], row[1], row[2]])
    }
}

/// Rebuilds a renderable geometry from one interleaved payload.
///
/// With a `topology` the result holds a point element (one per vertex) and a
/// line element (the topology's bones); `flat_indices` is ignored. Without
/// one, `flat_indices` is a triangle list.
///
/// Array lengths that do not divide evenly are rejected rather than
/// truncated.
pub fn reconstruct_mesh(
    flat_vertices: &[f32],
    flat_indices: &[u32],
    layout: &VertexLayout,
    topology: Option<&SkeletonTopology>,
) -> Result<ReconstructedGeometry, MalformedPayloadError> {
    layout.validate()?;

    if flat_vertices.len() % layout.stride != 0 {
        return Err(MalformedPayloadError::StrideMismatch {
            len: flat_vertices.len(),
            stride: layout.stride,
        });
    }
    if flat_vertices.is_empty() {
        return Ok(ReconstructedGeometry::empty());
    }

    let vertex_count = flat_vertices.len() / layout.stride;
    let interleaved = ArrayView2::from_shape((vertex_count, layout.stride), flat_vertices)
        .map_err(|err| MalformedPayloadError::Layout(err.to_string()))?;

    let position_end = layout.position_offset + 3;
    let positions = interleaved
        .slice(s![.., layout.position_offset..position_end])
        .to_owned();
    let aux = layout.aux.map(|aux| AuxChannel {
        semantic: aux.semantic,
        values: interleaved
            .slice(s![.., aux.offset..aux.offset + aux.components])
            .to_owned(),
    });

    let elements = match topology {
        Some(topology) => skeleton_elements(topology, vertex_count)?,
        None => vec![triangle_element(flat_indices, vertex_count)?],
    };

    Ok(ReconstructedGeometry {
        positions,
        aux,
        elements,
    })
}

fn triangle_element(
    flat_indices: &[u32],
    vertex_count: usize,
) -> Result<GeometryElement, MalformedPayloadError> {
    if flat_indices.len() % 3 != 0 {
        return Err(MalformedPayloadError::PartialTriangle(flat_indices.len()));
    }
    check_indices(flat_indices, vertex_count)?;

    Ok(GeometryElement {
        primitive: Primitive::Triangles,
        indices: flat_indices.to_vec(),
    })
}

fn skeleton_elements(
    topology: &SkeletonTopology,
    vertex_count: usize,
) -> Result<Vec<GeometryElement>, MalformedPayloadError> {
    let lines = topology.line_indices();
    check_indices(&lines, vertex_count)?;

    let points = (0..vertex_count as u32).collect();

    Ok(vec![
        GeometryElement {
            primitive: Primitive::Points,
            indices: points,
        },
        GeometryElement {
            primitive: Primitive::Lines,
            indices: lines,
        },
    ])
}

fn check_indices(indices: &[u32], vertex_count: usize) -> Result<(), MalformedPayloadError> {
    match indices.iter().find(|&&i| i as usize >= vertex_count) {
        Some(&index) => Err(MalformedPayloadError::IndexOutOfRange {
            index,
            vertex_count,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_JOINTS: SkeletonTopology = SkeletonTopology {
        name: "chain",
        joint_count: 3,
        edges: &[(0, 1), (1, 2)],
    };

    #[test]
    fn face_mesh_splits_positions_and_uvs() {
        let flat = [0.0, 0.0, 0.0, 0.1, 0.2, 1.0, 1.0, 1.0, 0.3, 0.4];
        let geometry = reconstruct_mesh(&flat, &[0, 1, 1], &VertexLayout::FACE_MESH, None).unwrap();

        assert_eq!(geometry.vertex_count(), 2);
        assert_eq!(geometry.position(0), Some([0.0, 0.0, 0.0]));
        assert_eq!(geometry.position(1), Some([1.0, 1.0, 1.0]));

        let aux = geometry.aux.as_ref().unwrap();
        assert_eq!(aux.semantic, AuxSemantic::TexCoord);
        assert_eq!(aux.values.shape(), &[2, 2]);
        assert_eq!(aux.values.row(0).to_vec(), vec![0.1, 0.2]);
        assert_eq!(aux.values.row(1).to_vec(), vec![0.3, 0.4]);

        assert_eq!(geometry.elements.len(), 1);
        let triangles = &geometry.elements[0];
        assert_eq!(triangles.primitive, Primitive::Triangles);
        assert_eq!(triangles.indices, vec![0, 1, 1]);
        assert_eq!(triangles.primitive_count(), 1);
    }

    #[test]
    fn skeleton_emits_points_and_lines() {
        let flat = [
            0.0, 0.0, 0.0, 0.9, 1.0, //
            1.0, 0.0, 0.0, 0.8, 1.0, //
            2.0, 0.0, 0.0, 0.7, 1.0,
        ];
        let geometry =
            reconstruct_mesh(&flat, &[], &VertexLayout::POSE_WORLD, Some(&THREE_JOINTS)).unwrap();

        let points = geometry.element(Primitive::Points).unwrap();
        let lines = geometry.element(Primitive::Lines).unwrap();
        assert_eq!(points.primitive_count(), 3);
        assert_eq!(lines.primitive_count(), 2);
        assert!(points.indices.iter().chain(&lines.indices).all(|&i| i < 3));
        assert_eq!(
            lines.primitives().map(|p| p.to_vec()).collect::<Vec<_>>(),
            vec![vec![0, 1], vec![1, 2]]
        );

        let color = geometry.aux.unwrap();
        assert_eq!(color.semantic, AuxSemantic::Color);
        assert_eq!(color.values.column(0).to_vec(), vec![0.9, 0.8, 0.7]);
    }

    #[test]
    fn rejects_length_not_divisible_by_stride() {
        let flat = [0.0; 7];
        let err = reconstruct_mesh(&flat, &[], &VertexLayout::FACE_MESH, None).unwrap_err();
        assert_eq!(err, MalformedPayloadError::StrideMismatch { len: 7, stride: 5 });
    }

    #[test]
    fn empty_input_is_empty_geometry() {
        let geometry = reconstruct_mesh(&[], &[], &VertexLayout::FACE_MESH, None).unwrap();
        assert!(geometry.is_empty());
        assert_eq!(geometry.vertex_count(), 0);
        assert_eq!(geometry.index_count(), 0);

        let skeleton =
            reconstruct_mesh(&[], &[], &VertexLayout::POSE_WORLD, Some(&skeleton::POSE)).unwrap();
        assert!(skeleton.is_empty());
    }

    #[test]
    fn rejects_partial_triangles() {
        let flat = [0.0; 15];
        let err = reconstruct_mesh(&flat, &[0, 1], &VertexLayout::FACE_MESH, None).unwrap_err();
        assert_eq!(err, MalformedPayloadError::PartialTriangle(2));
    }

    #[test]
    fn rejects_out_of_range_triangle_index() {
        let flat = [0.0; 10];
        let err = reconstruct_mesh(&flat, &[0, 1, 2], &VertexLayout::FACE_MESH, None).unwrap_err();
        assert_eq!(
            err,
            MalformedPayloadError::IndexOutOfRange {
                index: 2,
                vertex_count: 2
            }
        );
    }

    #[test]
    fn rejects_topology_larger_than_payload() {
        // 21 hand joints against the 33-joint pose skeleton
        let flat = vec![0.0; 21 * 5];
        let err = reconstruct_mesh(&flat, &[], &VertexLayout::POSE_WORLD, Some(&skeleton::POSE))
            .unwrap_err();
        assert!(matches!(
            err,
            MalformedPayloadError::IndexOutOfRange {
                vertex_count: 21,
                ..
            }
        ));
    }

    #[test]
    fn full_pose_payload() {
        let flat: Vec<f32> = (0..33 * 5).map(|v| v as f32).collect();
        let geometry =
            reconstruct_mesh(&flat, &[], &VertexLayout::POSE_WORLD, Some(&skeleton::POSE)).unwrap();
        assert_eq!(geometry.vertex_count(), 33);
        assert_eq!(geometry.element(Primitive::Lines).unwrap().primitive_count(), 35);
        assert_eq!(geometry.position(1), Some([5.0, 6.0, 7.0]));
    }

    #[test]
    fn hand_layout_has_no_aux() {
        let flat = vec![0.5; 21 * 3];
        let geometry =
            reconstruct_mesh(&flat, &[], &VertexLayout::HAND, Some(&skeleton::HAND)).unwrap();
        assert_eq!(geometry.vertex_count(), 21);
        assert!(geometry.aux.is_none());
    }

    #[test]
    fn rejects_invalid_layout() {
        let layout = VertexLayout {
            stride: 4,
            position_offset: 2,
            aux: None,
        };
        let err = reconstruct_mesh(&[0.0; 8], &[], &layout, None).unwrap_err();
        assert!(matches!(err, MalformedPayloadError::Layout(_)));
    }
}
