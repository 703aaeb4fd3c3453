mod profile;
pub mod tree_render;

pub use profile::*;
pub use tree_render::TreeRender;
