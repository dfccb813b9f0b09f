pub mod agent;
pub mod frame;
pub mod link;
pub mod mesh;
pub mod node;
pub mod query;
pub mod transport;

pub use mesh::Mesh;
pub use mesh::MeshPlatform;
