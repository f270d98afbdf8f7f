// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers around ash objects. Anything owning a native handle
// holds an Arc<VulkanDevice> so the device outlives it.

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod render_pass;
pub mod resources;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod uniform;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
