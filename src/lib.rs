//! lot3d - Turn detected land-parcel boundaries into metric 3D terrain assets

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod frontage;
pub mod geometry;
pub mod mesh;
pub mod pipeline;
pub mod slope;
pub mod store;
pub mod tabular;
