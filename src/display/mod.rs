pub mod sdl;

pub use sdl::DisplayPump;
