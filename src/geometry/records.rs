//! Typed views over the engine's flat landmark arrays.

use crate::error::MalformedPayloadError;

use super::skeleton::{POSE_LEFT_HIP, POSE_RIGHT_HIP};

pub trait VertexRecord: Sized {
    const STRIDE: usize;

    fn from_chunk(chunk: &[f32]) -> Self;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

impl VertexRecord for FaceVertex {
    const STRIDE: usize = 5;

    fn from_chunk(c: &[f32]) -> Self {
        Self {
            position: [c[0], c[1], c[2]],
            uv: [c[3], c[4]],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseLandmark {
    pub position: [f32; 3],
    pub visibility: f32,
    pub presence: f32,
}

impl VertexRecord for PoseLandmark {
    const STRIDE: usize = 5;

    fn from_chunk(c: &[f32]) -> Self {
        Self {
            position: [c[0], c[1], c[2]],
            visibility: c[3],
            presence: c[4],
        }
    }
}

impl PoseLandmark {
    /// Midpoint between the two hip joints, the usual anchor for a pose skeleton.
    pub fn hip_center(landmarks: &[PoseLandmark]) -> Option<[f32; 3]> {
        let left = landmarks.get(POSE_LEFT_HIP)?.position;
        let right = landmarks.get(POSE_RIGHT_HIP)?.position;
        Some([
            (left[0] + right[0]) / 2.0,
            (left[1] + right[1]) / 2.0,
            (left[2] + right[2]) / 2.0,
        ])
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HandLandmark {
    pub position: [f32; 3],
}

impl VertexRecord for HandLandmark {
    const STRIDE: usize = 3;

    fn from_chunk(c: &[f32]) -> Self {
        Self {
            position: [c[0], c[1], c[2]],
        }
    }
}

pub fn decode_records<R: VertexRecord>(flat: &[f32]) -> Result<Vec<R>, MalformedPayloadError> {
    if flat.len() % R::STRIDE != 0 {
        return Err(MalformedPayloadError::StrideMismatch {
            len: flat.len(),
            stride: R::STRIDE,
        });
    }
    Ok(flat.chunks_exact(R::STRIDE).map(R::from_chunk).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_face_vertices() {
        let flat = [0.0, 0.0, 0.0, 0.1, 0.2, 1.0, 1.0, 1.0, 0.3, 0.4];
        let vertices: Vec<FaceVertex> = decode_records(&flat).unwrap();
        assert_eq!(vertices.len(), 2);
        assert_eq!(vertices[1].position, [1.0, 1.0, 1.0]);
        assert_eq!(vertices[1].uv, [0.3, 0.4]);
    }

    #[test]
    fn hip_center_of_pose() {
        let mut flat = vec![0.0; 33 * 5];
        flat[POSE_LEFT_HIP * 5] = 2.0;
        flat[POSE_RIGHT_HIP * 5] = 4.0;
        flat[POSE_RIGHT_HIP * 5 + 2] = -1.0;
        let landmarks: Vec<PoseLandmark> = decode_records(&flat).unwrap();
        assert_eq!(PoseLandmark::hip_center(&landmarks), Some([3.0, 0.0, -0.5]));
        assert_eq!(PoseLandmark::hip_center(&landmarks[..10]), None);
    }

    #[test]
    fn rejects_partial_record() {
        let err = decode_records::<HandLandmark>(&[0.0; 4]).unwrap_err();
        assert_eq!(err, MalformedPayloadError::StrideMismatch { len: 4, stride: 3 });
    }
}
