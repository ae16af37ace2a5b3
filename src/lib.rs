// kiln - Vulkan rendering runtime
//
// ┌─────────────────────────────────────────────────────────────────┐
// │  render    Renderer: update → batches → submit → present        │
// │  graph     render graph boundary + built-in runtime             │
// │  backend   instance, device, queues, sync, swapchain, commands  │
// │  resource  hot-reloadable assets (shaders)                      │
// └─────────────────────────────────────────────────────────────────┘

pub mod backend;
pub mod config;
pub mod error;
pub mod graph;
pub mod render;
pub mod resource;

pub use error::{RenderError, RenderResult};
