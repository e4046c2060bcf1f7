use serde::{Deserialize, Serialize};

use crate::{
    geometry::{
        VertexLayout,
        skeleton::{self, SkeletonTopology},
    },
    types::ResultChannel,
};

/// Which prebuilt graph is loaded. Fixes the channels the engine emits and
/// how landmark and geometry payloads are laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphProfile {
    FaceGeometry,
    FaceMesh,
    #[default]
    Pose,
    MultiPose,
    Hand,
    Iris,
    /// Style transfer style graphs that only return a processed image.
    ImageToImage,
}

impl GraphProfile {
    pub fn label(&self) -> &'static str {
        match self {
            GraphProfile::FaceGeometry => "face geometry",
            GraphProfile::FaceMesh => "face mesh",
            GraphProfile::Pose => "pose",
            GraphProfile::MultiPose => "multi-pose",
            GraphProfile::Hand => "hand",
            GraphProfile::Iris => "iris",
            GraphProfile::ImageToImage => "image-to-image",
        }
    }

    pub fn channels(&self) -> &'static [ResultChannel] {
        use ResultChannel::*;
        match self {
            GraphProfile::FaceGeometry => &[Pixel, Transform, Geometry],
            GraphProfile::FaceMesh | GraphProfile::Iris => &[Pixel, Transform],
            GraphProfile::Pose | GraphProfile::MultiPose => &[Pixel, Landmarks],
            GraphProfile::Hand => &[Pixel, Transform, Landmarks],
            GraphProfile::ImageToImage => &[Pixel],
        }
    }

    pub fn emits(&self, channel: ResultChannel) -> bool {
        self.channels().contains(&channel)
    }

    /// Layout and bones for `LandmarkSet` payloads.
    pub fn landmark_layout(&self) -> Option<(VertexLayout, &'static SkeletonTopology)> {
        match self {
            GraphProfile::Pose | GraphProfile::MultiPose => {
                Some((VertexLayout::POSE_WORLD, &skeleton::POSE))
            }
            GraphProfile::Hand => Some((VertexLayout::HAND, &skeleton::HAND)),
            _ => None,
        }
    }

    /// Layout for `IndexedGeometry` payloads.
    pub fn geometry_layout(&self) -> Option<VertexLayout> {
        match self {
            GraphProfile::FaceGeometry => Some(VertexLayout::FACE_MESH),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_profile_emits_pixels() {
        for profile in [
            GraphProfile::FaceGeometry,
            GraphProfile::FaceMesh,
            GraphProfile::Pose,
            GraphProfile::MultiPose,
            GraphProfile::Hand,
            GraphProfile::Iris,
            GraphProfile::ImageToImage,
        ] {
            assert!(profile.emits(ResultChannel::Pixel), "{}", profile.label());
            assert_eq!(
                profile.emits(ResultChannel::Landmarks),
                profile.landmark_layout().is_some()
            );
            assert_eq!(
                profile.emits(ResultChannel::Geometry),
                profile.geometry_layout().is_some()
            );
        }
    }

    #[test]
    fn pose_uses_world_landmark_layout() {
        let (layout, topology) = GraphProfile::Pose.landmark_layout().unwrap();
        assert_eq!(layout, VertexLayout::POSE_WORLD);
        assert_eq!(topology.joint_count, 33);
    }
}
