// Renderer - owns every GPU object and drives the frame loop
//
// Device-lifetime objects (buffers, texture, descriptors, command buffers,
// sync) are created once. Swapchain-sized targets and the pipeline live in a
// resource tracker and are replayed when the swapchain is replaced or the
// shaders change on disk.
//
// FRAME FLOW:
// 1. Wait for this slot's fence (GPU done with its buffers)
// 2. Acquire a swapchain image; out of date -> recreate next frame
// 3. Write scene and object uniforms for this slot
// 4. Record and submit the command buffer
// 5. Present; suboptimal -> recreate next frame

pub mod scene;
pub mod targets;

use crate::backend::buffer::Buffer;
use crate::backend::command::CommandPool;
use crate::backend::descriptor::{BindingDesc, DescriptorSets};
use crate::backend::image::{find_depth_format, Image, Sampler, TextureData};
use crate::backend::pipeline::{scissor, viewport};
use crate::backend::resources::ResourceTracker;
use crate::backend::swapchain::SwapchainRequest;
use crate::backend::sync::FrameSync;
use crate::backend::uniform::{dynamic_stride, Std140Layout, UniformBuffers};
use crate::backend::{Swapchain, VulkanDevice};
use crate::camera::Camera;
use crate::config::Config;
use crate::error::RenderError;
use crate::hot_reload::ShaderWatcher;
use crate::mesh::Mesh;
use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use scene::{Light, PointLight, SceneObject, MAX_OBJECTS};
use std::sync::Arc;
use std::time::Instant;
use targets::{load_shaders, SwapchainContext, TargetIds};
use winit::window::Window;

const SCENE_BINDING: u32 = 0;
const OBJECT_BINDING: u32 = 1;
const ALBEDO_BINDING: u32 = 2;

fn descriptor_bindings() -> [BindingDesc; 3] {
    [
        BindingDesc::new(
            SCENE_BINDING,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        ),
        BindingDesc::new(
            OBJECT_BINDING,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            vk::ShaderStageFlags::VERTEX,
        ),
        BindingDesc::new(
            ALBEDO_BINDING,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        ),
    ]
}

pub struct Renderer {
    // ─────────────────────────────────────────────────────────────────────────
    // SWAPCHAIN-DEPENDENT (tracked)
    // ─────────────────────────────────────────────────────────────────────────
    tracker: ResourceTracker<SwapchainContext>,
    targets: TargetIds,
    ctx: SwapchainContext,

    // ─────────────────────────────────────────────────────────────────────────
    // DEVICE-LIFETIME
    // ─────────────────────────────────────────────────────────────────────────
    descriptors: DescriptorSets,
    scene_layout: Std140Layout,
    scene_uniforms: UniformBuffers,
    object_layout: Std140Layout,
    object_stride: usize,
    /// One dynamic uniform buffer per frame in flight, MAX_OBJECTS slices each
    object_buffers: Vec<Buffer>,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    // Referenced only through the descriptor sets and command buffers
    _texture: Image,
    _sampler: Sampler,
    command_buffers: Vec<vk::CommandBuffer>,
    frame_sync: Vec<FrameSync>,
    _command_pool: CommandPool,
    shader_watcher: Option<ShaderWatcher>,
    device: Arc<VulkanDevice>,

    // ─────────────────────────────────────────────────────────────────────────
    // SCENE
    // ─────────────────────────────────────────────────────────────────────────
    pub camera: Camera,
    light: Light,
    point_lights: Vec<PointLight>,
    objects: Vec<SceneObject>,
    start: Instant,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE
    // ─────────────────────────────────────────────────────────────────────────
    clear_color: [f32; 4],
    present_mode: vk::PresentModeKHR,
    preferred_format: vk::Format,
    window_size: (u32, u32),
    current_frame: usize,
    needs_resize: bool,
    is_minimized: bool,
}

impl Renderer {
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let device = VulkanDevice::new(&config.window.title, window, enable_validation)?;

        let size = window.inner_size();
        let frames = config.graphics.max_frames_in_flight;
        let present_mode = config.present_mode();
        let preferred_format = config.preferred_format();

        // ─────────────────────────────────────────────────────────────────────
        // Commands and synchronization
        // ─────────────────────────────────────────────────────────────────────
        let command_pool = CommandPool::new(&device)?;
        let command_buffers = command_pool.allocate(frames as u32)?;
        let frame_sync = (0..frames)
            .map(|_| FrameSync::new(&device))
            .collect::<Result<Vec<_>>>()?;

        // ─────────────────────────────────────────────────────────────────────
        // Geometry and texture
        // ─────────────────────────────────────────────────────────────────────
        let mesh = Mesh::cube();
        let vertex_buffer = Buffer::device_local(
            &device,
            &command_pool,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &mesh.vertices,
            "cube vertices",
        )?;
        let index_buffer = Buffer::device_local(
            &device,
            &command_pool,
            vk::BufferUsageFlags::INDEX_BUFFER,
            &mesh.indices,
            "cube indices",
        )?;

        let texture_data = TextureData::load_or_checkerboard(config.assets.texture.as_deref());
        let texture = Image::texture(&device, &command_pool, &texture_data, "albedo")?;
        let sampler = Sampler::new(&device)?;

        // ─────────────────────────────────────────────────────────────────────
        // Uniforms and descriptors
        // ─────────────────────────────────────────────────────────────────────
        let scene_layout = scene::scene_layout()?;
        let scene_uniforms = UniformBuffers::new(&device, scene_layout.clone(), frames)?;

        let object_layout = scene::object_layout()?;
        let object_stride = dynamic_stride(object_layout.size(), device.min_uniform_offset_alignment())?;
        let object_buffers = (0..frames)
            .map(|frame| {
                Buffer::new(
                    &device,
                    (object_stride * MAX_OBJECTS) as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                    &format!("objects[{}]", frame),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        log::debug!(
            "Object block {} bytes, dynamic stride {}",
            object_layout.size(),
            object_stride
        );

        let descriptors = DescriptorSets::new(&device, &descriptor_bindings(), frames as u32)?;
        for frame in 0..frames {
            descriptors.write_buffer(
                frame,
                SCENE_BINDING,
                scene_uniforms.buffer(frame).handle,
                scene_uniforms.layout().size() as vk::DeviceSize,
            )?;
            descriptors.write_buffer(
                frame,
                OBJECT_BINDING,
                object_buffers[frame].handle,
                object_layout.size() as vk::DeviceSize,
            )?;
            descriptors.write_image(frame, ALBEDO_BINDING, texture.view, sampler.handle)?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // Swapchain and tracked targets
        // ─────────────────────────────────────────────────────────────────────
        let swapchain = Swapchain::new(
            device.clone(),
            SwapchainRequest {
                width: size.width,
                height: size.height,
                present_mode,
                preferred_format,
            },
            None,
        )?;

        let ctx = SwapchainContext {
            device: device.clone(),
            swapchain,
            depth_format: find_depth_format(&device)?,
            descriptor_layout: descriptors.layout,
            shader_dir: config.assets.shader_dir.clone(),
        };

        let mut tracker = ResourceTracker::new();
        let targets = match TargetIds::register(&mut tracker, &ctx) {
            Ok(targets) => targets,
            Err(e) => {
                tracker.destroy_all(&ctx);
                return Err(e);
            }
        };

        let shader_watcher = if config.debug.hot_reload {
            ShaderWatcher::new(&config.assets.shader_dir)
                .map_err(|e| log::warn!("Shader hot reload disabled: {:#}", e))
                .ok()
        } else {
            None
        };

        let objects = scene::fit_to_capacity(scene::demo_objects());
        log::info!(
            "Vulkan initialized successfully! {} objects, {} frames in flight",
            objects.len(),
            frames
        );

        Ok(Self {
            tracker,
            targets,
            ctx,
            descriptors,
            scene_layout,
            scene_uniforms,
            object_layout,
            object_stride,
            object_buffers,
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count(),
            _texture: texture,
            _sampler: sampler,
            command_buffers,
            frame_sync,
            _command_pool: command_pool,
            shader_watcher,
            device,
            camera: Camera::new(&config.camera, &config.controls),
            light: Light::default(),
            point_lights: scene::demo_point_lights(),
            objects,
            start: Instant::now(),
            clear_color: config.graphics.clear_color,
            present_mode,
            preferred_format,
            window_size: (size.width, size.height),
            current_frame: 0,
            needs_resize: false,
            is_minimized: size.width == 0 || size.height == 0,
        })
    }

    /// Window size changed; the swapchain is rebuilt before the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.window_size = (width, height);
        if width == 0 || height == 0 {
            self.is_minimized = true;
        } else {
            self.is_minimized = false;
            self.needs_resize = true;
        }
    }

    pub fn request_recreate(&mut self) {
        self.needs_resize = true;
    }

    /// Render one frame. Returns false when nothing was presented.
    pub fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }

        if self.shader_watcher.as_ref().is_some_and(|watcher| watcher.poll()) {
            self.reload_shaders()?;
        }

        if self.needs_resize {
            self.recreate_swapchain()?;
            if self.is_minimized {
                return Ok(false);
            }
        }

        let frame = self.current_frame;
        let sync = &self.frame_sync[frame];
        let (image_available, render_finished, fence) =
            (sync.image_available, sync.render_finished, sync.in_flight_fence);

        sync.wait()?;

        let image_index = match self.ctx.swapchain.acquire_next_image(u64::MAX, image_available) {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    self.needs_resize = true;
                }
                index
            }
            Err(e) if RenderError::is_out_of_date(&e) => {
                log::debug!("Swapchain out of date on acquire");
                self.needs_resize = true;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let cmd = self.command_buffers[frame];
        let recorded = match self.update_uniforms(frame) {
            Ok(()) => self.record(cmd, frame, image_index),
            Err(e) => Err(e),
        };
        if let Err(e) = recorded {
            self.abandon_frame(frame)?;
            return Err(e);
        }

        // Only reset once work is certain to be submitted, or the next wait
        // on this fence would never return
        self.frame_sync[frame].reset()?;

        let wait_semaphores = [image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], fence)
        }
        .context("Failed to submit frame")?;

        if self.ctx.swapchain.present(
            self.device.present_queue,
            image_index,
            &signal_semaphores,
        )? {
            self.needs_resize = true;
        }

        self.current_frame = (frame + 1) % self.frame_sync.len();
        Ok(true)
    }

    /// Give back a frame whose image was acquired but could not be recorded.
    ///
    /// An empty submit consumes the acquire semaphore and signals the fence,
    /// so the slot stays usable. The acquired image is never presented; the
    /// swapchain is replaced before the next frame to get it back.
    fn abandon_frame(&mut self, frame: usize) -> Result<()> {
        let sync = &self.frame_sync[frame];
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);

        sync.reset()?;
        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], sync.in_flight_fence)
        }
        .context("Failed to submit empty frame")?;

        self.needs_resize = true;
        Ok(())
    }

    fn update_uniforms(&mut self, frame: usize) -> Result<()> {
        let time = self.start.elapsed().as_secs_f32();
        let aspect = self.ctx.swapchain.aspect_ratio();

        let writer = scene::write_scene(
            &self.scene_layout,
            &self.camera,
            aspect,
            &self.light,
            &self.point_lights,
            time,
        )?;
        self.scene_uniforms.update(frame, &writer)?;

        let bytes = scene::pack_objects(&self.object_layout, self.object_stride, &self.objects, time)?;
        self.object_buffers[frame].write(0, &bytes)
    }

    fn record(&self, cmd: vk::CommandBuffer, frame: usize, image_index: u32) -> Result<()> {
        let device = &self.device.device;
        let extent = self.ctx.swapchain.extent;

        let render_pass = self
            .tracker
            .get(self.targets.render_pass)
            .context("Render pass is not available")?
            .handle;
        let framebuffer = *self
            .tracker
            .get(self.targets.framebuffers)
            .and_then(|framebuffers| framebuffers.handles.get(image_index as usize))
            .context("Framebuffer is not available")?;
        let pipeline = self
            .tracker
            .get(self.targets.pipeline)
            .context("Scene pipeline is not available")?
            .handles()?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(scissor(extent))
            .clear_values(&clear_values);

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
            device.cmd_set_viewport(cmd, 0, &[viewport(extent)]);
            device.cmd_set_scissor(cmd, 0, &[scissor(extent)]);

            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.handle, 0, vk::IndexType::UINT32);

            for object in 0..self.objects.len() {
                let dynamic_offset = (object * self.object_stride) as u32;
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline.layout,
                    0,
                    &[self.descriptors.sets[frame]],
                    &[dynamic_offset],
                );
                device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
            }

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }

    fn swapchain_request(&self) -> SwapchainRequest {
        SwapchainRequest {
            width: self.window_size.0,
            height: self.window_size.1,
            present_mode: self.present_mode,
            preferred_format: self.preferred_format,
        }
    }

    /// Replace the swapchain and replay every tracked target against it.
    fn recreate_swapchain(&mut self) -> Result<()> {
        let (width, height) = self.window_size;
        if width == 0 || height == 0 {
            self.is_minimized = true;
            return Ok(());
        }

        self.device.wait_idle()?;

        // Framebuffers reference the old image views
        self.tracker.destroy_all(&self.ctx);

        let swapchain = Swapchain::new(
            self.device.clone(),
            self.swapchain_request(),
            Some(&self.ctx.swapchain),
        )?;
        self.ctx.swapchain = swapchain;

        self.tracker.recreate_all(&self.ctx)?;
        self.needs_resize = false;
        log::info!(
            "Swapchain recreated at {}x{}, {:?} (generation {})",
            width,
            height,
            self.ctx.swapchain.present_mode,
            self.tracker.generation()
        );
        Ok(())
    }

    fn reload_shaders(&mut self) -> Result<()> {
        log::info!("Shader change detected, rebuilding pipeline");

        // A half-written file fails here; the next write event retries
        let (vertex, fragment) = match load_shaders(&self.device, &self.ctx.shader_dir) {
            Ok(modules) => modules,
            Err(e) => {
                log::warn!("Keeping current pipeline: {:#}", e);
                return Ok(());
            }
        };

        self.device.wait_idle()?;

        // No working pipeline to protect, e.g. after a failed resize
        if !self.tracker.is_live(self.targets.pipeline) {
            return self.tracker.recreate_from(&self.ctx, self.targets.pipeline);
        }

        let swapped = self
            .tracker
            .update(&self.ctx, self.targets.pipeline, |pipeline, ctx, prior| {
                pipeline.swap_shaders(ctx, prior, &vertex, &fragment)
            });
        if let Err(e) = swapped {
            log::warn!("Keeping current pipeline: {:#}", e);
        }
        Ok(())
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle failed during shutdown: {:#}", e);
        }
        self.tracker.destroy_all(&self.ctx);
        // Remaining fields release themselves; each holds the device alive
    }
}
