pub mod builder;
pub mod export;
pub mod extrusion;
pub mod ply;
pub mod stl;
pub mod triangulation;
pub mod validation;

pub use builder::{Triangle, shade};
pub use export::{CommandExporter, ExportReport, MeshExporter, StlExporter};
pub use extrusion::{FaceKind, TerrainParams, VolumetricMesh, boundary_edges, build_volumetric_mesh};
pub use stl::write_stl;
pub use triangulation::delaunay;
pub use validation::{ValidationReport, validate_and_fix};
