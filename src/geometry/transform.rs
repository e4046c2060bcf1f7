use crate::error::MalformedPayloadError;

/// 4x4 rigid transform stored column-major, the layout the engine emits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RigidTransform {
    pub columns: [[f32; 4]; 4],
}

impl RigidTransform {
    pub const IDENTITY: RigidTransform = RigidTransform {
        columns: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub fn from_column_major(flat: &[f32]) -> Result<Self, MalformedPayloadError> {
        if flat.len() != 16 {
            return Err(MalformedPayloadError::TransformLength(flat.len()));
        }
        let mut columns = [[0.0; 4]; 4];
        for (column, chunk) in columns.iter_mut().zip(flat.chunks_exact(4)) {
            column.copy_from_slice(chunk);
        }
        Ok(Self { columns })
    }

    pub fn translation(&self) -> [f32; 3] {
        let t = self.columns[3];
        [t[0], t[1], t[2]]
    }

    /// Average length of the three basis columns.
    pub fn uniform_scale(&self) -> f32 {
        let len = |c: [f32; 4]| (c[0] * c[0] + c[1] * c[1] + c[2] * c[2]).sqrt();
        (len(self.columns[0]) + len(self.columns[1]) + len(self.columns[2])) / 3.0
    }

    pub fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let c = &self.columns;
        let mut out = [0.0; 3];
        for (row, value) in out.iter_mut().enumerate() {
            *value = c[0][row] * p[0] + c[1][row] * p[1] + c[2][row] * p[2] + c[3][row];
        }
        out
    }
}
