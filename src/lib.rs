//! Vulkan rendering backend for [Dear ImGui](https://github.com/ocornut/imgui)
//! via [`ash`], built on top of [`gpu-allocator`](gpu_allocator).
//!
//! The backend owns an [`imgui::Context`] plus every GPU resource the UI
//! needs (growable vertex/index/uniform buffers, a descriptor set arena, the
//! font atlas and a fixed alpha-blended pipeline) and compiles each frame's
//! draw lists into an externally owned command buffer. It never submits work
//! or touches the swapchain; frame pacing and synchronization stay with the
//! application.
//!
//! Per frame the driver calls [`ImguiBackend::new_frame`], builds its UI
//! through the returned [`imgui::Ui`], and then records the result with
//! [`ImguiBackend::cmd_render_frame`]. Application images become usable by
//! UI widgets through [`ImguiBackend::register_texture`]; the backend
//! brackets each frame with the layout transitions that keep those images
//! shader-readable inside the render pass and restores their prior layout
//! afterwards.
//!
//! With the default `winit` feature enabled, window events are forwarded via
//! [`ImguiBackend::handle_event`].

mod backend;
mod buffer;
mod command;
mod descriptor;
mod error;
#[cfg(feature = "winit")]
mod event;
mod pipeline;
mod texture;
mod transform;
mod transition;

pub use backend::ImguiBackend;
pub use buffer::GrowableBuffer;
pub use error::BackendError;
pub use texture::TextureSlot;

pub use imgui;
