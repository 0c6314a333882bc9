pub mod render_state;
pub mod renderer;
pub mod shader;

pub use render_state::RenderState;
pub use renderer::{DrawCmd, Renderer, Viewport};
pub use shader::{ShaderCache, ShaderVariant, SharedLayouts};
