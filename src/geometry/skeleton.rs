/// Static table of joint pairs rendered as bones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SkeletonTopology {
    pub name: &'static str,
    pub joint_count: usize,
    pub edges: &'static [(u32, u32)],
}

impl SkeletonTopology {
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Largest joint index referenced by any edge.
    pub fn max_joint(&self) -> Option<u32> {
        self.edges.iter().map(|&(a, b)| a.max(b)).max()
    }

    pub fn line_indices(&self) -> Vec<u32> {
        self.edges.iter().flat_map(|&(a, b)| [a, b]).collect()
    }
}

const HAND_EDGES: &[(u32, u32)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (5, 9),
    (9, 13),
    (13, 17),
];

// Face contour, torso, arms with hand tips, legs with feet.
const POSE_EDGES: &[(u32, u32)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (0, 4),
    (4, 5),
    (5, 6),
    (6, 8),
    (9, 10),
    (11, 12),
    (11, 13),
    (13, 15),
    (15, 17),
    (15, 19),
    (15, 21),
    (17, 19),
    (12, 14),
    (14, 16),
    (16, 18),
    (16, 20),
    (16, 22),
    (18, 20),
    (11, 23),
    (12, 24),
    (23, 24),
    (23, 25),
    (24, 26),
    (25, 27),
    (26, 28),
    (27, 29),
    (28, 30),
    (29, 31),
    (30, 32),
    (27, 31),
    (28, 32),
];

pub const HAND: SkeletonTopology = SkeletonTopology {
    name: "hand",
    joint_count: 21,
    edges: HAND_EDGES,
};

pub const POSE: SkeletonTopology = SkeletonTopology {
    name: "pose",
    joint_count: 33,
    edges: POSE_EDGES,
};

pub const POSE_LEFT_HIP: usize = 23;
pub const POSE_RIGHT_HIP: usize = 24;
