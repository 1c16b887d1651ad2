//! Landmark connection sets.
//!
//! Indices refer to the face mesh (468 points, followed by 10 iris points in the
//! 478-point variant) and the 21-point hand skeleton.

use crate::detection::Landmark;
use spade::{DelaunayTriangulation, Point2, Triangulation};

pub type Connection = (usize, usize);

/// Points of the face mesh proper, without the iris
pub const FACE_MESH_POINTS: usize = 468;

#[rustfmt::skip]
pub const FACE_OVAL: &[Connection] = &[
    (10, 338), (338, 297), (297, 332), (332, 284), (284, 251), (251, 389),
    (389, 356), (356, 454), (454, 323), (323, 361), (361, 288), (288, 397),
    (397, 365), (365, 379), (379, 378), (378, 400), (400, 377), (377, 152),
    (152, 148), (148, 176), (176, 149), (149, 150), (150, 136), (136, 172),
    (172, 58), (58, 132), (132, 93), (93, 234), (234, 127), (127, 162),
    (162, 21), (21, 54), (54, 103), (103, 67), (67, 109), (109, 10),
];

#[rustfmt::skip]
pub const FACE_LEFT_EYE: &[Connection] = &[
    (263, 249), (249, 390), (390, 373), (373, 374), (374, 380), (380, 381),
    (381, 382), (382, 362), (263, 466), (466, 388), (388, 387), (387, 386),
    (386, 385), (385, 384), (384, 398), (398, 362),
];

#[rustfmt::skip]
pub const FACE_RIGHT_EYE: &[Connection] = &[
    (33, 7), (7, 163), (163, 144), (144, 145), (145, 153), (153, 154),
    (154, 155), (155, 133), (33, 246), (246, 161), (161, 160), (160, 159),
    (159, 158), (158, 157), (157, 173), (173, 133),
];

#[rustfmt::skip]
pub const HAND_CONNECTIONS: &[Connection] = &[
    (0, 1), (1, 2), (2, 3), (3, 4),
    (0, 5), (5, 6), (6, 7), (7, 8),
    (5, 9), (9, 10), (10, 11), (11, 12),
    (9, 13), (13, 14), (14, 15), (15, 16),
    (13, 17), (0, 17), (17, 18), (18, 19), (19, 20),
];

/// Triangle mesh over the face mesh points of one subject.
///
/// Edges of the Delaunay triangulation of the landmarks' image positions; iris
/// points and positions that cannot be triangulated are left out.
pub fn face_tesselation(landmarks: &[Landmark]) -> Vec<Connection> {
    let mut mesh: DelaunayTriangulation<Point2<f64>> = DelaunayTriangulation::new();
    // Vertex index in the mesh -> landmark index
    let mut landmark_of = Vec::with_capacity(FACE_MESH_POINTS);

    for (index, landmark) in landmarks.iter().take(FACE_MESH_POINTS).enumerate() {
        let Ok(vertex) = mesh.insert(Point2::new(landmark.x as f64, landmark.y as f64)) else {
            continue;
        };
        // Coincident points reuse the existing vertex
        if vertex.index() == landmark_of.len() {
            landmark_of.push(index);
        }
    }

    mesh.undirected_edges()
        .filter_map(|edge| {
            let [a, b] = edge.vertices();
            Some((*landmark_of.get(a.fix().index())?, *landmark_of.get(b.fix().index())?))
        })
        .collect()
}
