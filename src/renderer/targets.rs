// Swapchain-dependent render targets
//
// Everything here is rebuilt through the resource tracker whenever the
// swapchain is replaced. Registration order is depth, render pass,
// framebuffers, pipeline; each reads its predecessors through `Prior`.

use crate::backend::image::Image;
use crate::backend::pipeline::{create_graphics_pipeline, PipelineDesc, PipelineHandles};
use crate::backend::render_pass::{create_framebuffers, create_render_pass, destroy_framebuffers};
use crate::backend::resources::{DeviceResource, Prior, ResourceId, ResourceTracker};
use crate::backend::shader::ShaderModule;
use crate::backend::{Swapchain, VulkanDevice};
use anyhow::{Context, Result};
use ash::vk;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const VERTEX_SHADER: &str = "scene.vert.spv";
pub const FRAGMENT_SHADER: &str = "scene.frag.spv";

/// What the tracked resources are created against
pub struct SwapchainContext {
    pub device: Arc<VulkanDevice>,
    pub swapchain: Swapchain,
    pub depth_format: vk::Format,
    pub descriptor_layout: vk::DescriptorSetLayout,
    pub shader_dir: PathBuf,
}

#[derive(Default)]
pub struct DepthTarget {
    image: Option<Image>,
}

impl DepthTarget {
    pub fn view(&self) -> Result<vk::ImageView> {
        self.image
            .as_ref()
            .map(|image| image.view)
            .context("Depth target has no image")
    }
}

impl DeviceResource<SwapchainContext> for DepthTarget {
    fn create(&mut self, ctx: &SwapchainContext, _prior: &Prior<'_, SwapchainContext>) -> Result<()> {
        self.image = Some(Image::depth(&ctx.device, ctx.swapchain.extent, ctx.depth_format)?);
        Ok(())
    }

    fn destroy(&mut self, _ctx: &SwapchainContext) {
        self.image = None;
    }

    fn label(&self) -> &'static str {
        "depth target"
    }
}

#[derive(Default)]
pub struct MainRenderPass {
    pub handle: vk::RenderPass,
}

impl DeviceResource<SwapchainContext> for MainRenderPass {
    fn create(&mut self, ctx: &SwapchainContext, _prior: &Prior<'_, SwapchainContext>) -> Result<()> {
        self.handle = create_render_pass(&ctx.device, ctx.swapchain.format, ctx.depth_format)?;
        Ok(())
    }

    fn destroy(&mut self, ctx: &SwapchainContext) {
        unsafe { ctx.device.device.destroy_render_pass(self.handle, None) };
        self.handle = vk::RenderPass::null();
    }

    fn label(&self) -> &'static str {
        "render pass"
    }
}

pub struct Framebuffers {
    depth: ResourceId<DepthTarget>,
    render_pass: ResourceId<MainRenderPass>,
    pub handles: Vec<vk::Framebuffer>,
}

impl Framebuffers {
    pub fn new(depth: ResourceId<DepthTarget>, render_pass: ResourceId<MainRenderPass>) -> Self {
        Self {
            depth,
            render_pass,
            handles: Vec::new(),
        }
    }
}

impl DeviceResource<SwapchainContext> for Framebuffers {
    fn create(&mut self, ctx: &SwapchainContext, prior: &Prior<'_, SwapchainContext>) -> Result<()> {
        let depth_view = prior.require(self.depth)?.view()?;
        let render_pass = prior.require(self.render_pass)?.handle;

        self.handles = create_framebuffers(
            &ctx.device,
            &ctx.swapchain.image_views,
            depth_view,
            render_pass,
            ctx.swapchain.extent,
        )?;
        Ok(())
    }

    fn destroy(&mut self, ctx: &SwapchainContext) {
        destroy_framebuffers(&ctx.device, &self.handles);
        self.handles.clear();
    }

    fn label(&self) -> &'static str {
        "framebuffers"
    }
}

/// The scene pipeline. Shaders are read from disk on every create, so a
/// replay after a shader change picks up the new SPIR-V.
pub struct ScenePipeline {
    render_pass: ResourceId<MainRenderPass>,
    desc: PipelineDesc,
    handles: Option<PipelineHandles>,
}

impl ScenePipeline {
    pub fn new(render_pass: ResourceId<MainRenderPass>) -> Self {
        Self {
            render_pass,
            desc: PipelineDesc::default(),
            handles: None,
        }
    }

    pub fn handles(&self) -> Result<&PipelineHandles> {
        self.handles.as_ref().context("Scene pipeline is not built")
    }

    fn build(
        &self,
        ctx: &SwapchainContext,
        prior: &Prior<'_, SwapchainContext>,
        vertex: &ShaderModule,
        fragment: &ShaderModule,
    ) -> Result<PipelineHandles> {
        let render_pass = prior.require(self.render_pass)?.handle;
        create_graphics_pipeline(
            &ctx.device,
            render_pass,
            &[vertex, fragment],
            &[ctx.descriptor_layout],
            &self.desc,
        )
    }

    /// Build a pipeline from already loaded shaders and swap it in. The
    /// current pipeline is only destroyed once the new one exists, and the
    /// GPU must be idle.
    pub fn swap_shaders(
        &mut self,
        ctx: &SwapchainContext,
        prior: &Prior<'_, SwapchainContext>,
        vertex: &ShaderModule,
        fragment: &ShaderModule,
    ) -> Result<()> {
        let handles = self.build(ctx, prior, vertex, fragment)?;
        if let Some(old) = self.handles.replace(handles) {
            old.destroy(&ctx.device);
        }
        log::info!("Swapped in scene pipeline from {:?}", ctx.shader_dir);
        Ok(())
    }
}

impl DeviceResource<SwapchainContext> for ScenePipeline {
    fn create(&mut self, ctx: &SwapchainContext, prior: &Prior<'_, SwapchainContext>) -> Result<()> {
        let (vertex, fragment) = load_shaders(&ctx.device, &ctx.shader_dir)?;
        self.handles = Some(self.build(ctx, prior, &vertex, &fragment)?);
        log::info!("Built scene pipeline from {:?}", ctx.shader_dir);
        Ok(())
    }

    fn destroy(&mut self, ctx: &SwapchainContext) {
        if let Some(handles) = self.handles.take() {
            handles.destroy(&ctx.device);
        }
    }

    fn label(&self) -> &'static str {
        "scene pipeline"
    }
}

pub fn load_shaders(device: &Arc<VulkanDevice>, shader_dir: &Path) -> Result<(ShaderModule, ShaderModule)> {
    let vertex = ShaderModule::from_file(
        device,
        vk::ShaderStageFlags::VERTEX,
        &shader_dir.join(VERTEX_SHADER),
    )?;
    let fragment = ShaderModule::from_file(
        device,
        vk::ShaderStageFlags::FRAGMENT,
        &shader_dir.join(FRAGMENT_SHADER),
    )?;
    Ok((vertex, fragment))
}

/// Handles to the tracked targets, in registration order
pub struct TargetIds {
    pub render_pass: ResourceId<MainRenderPass>,
    pub framebuffers: ResourceId<Framebuffers>,
    pub pipeline: ResourceId<ScenePipeline>,
}

impl TargetIds {
    pub fn register(
        tracker: &mut ResourceTracker<SwapchainContext>,
        ctx: &SwapchainContext,
    ) -> Result<Self> {
        let depth = tracker.register(ctx, DepthTarget::default())?;
        let render_pass = tracker.register(ctx, MainRenderPass::default())?;
        let framebuffers = tracker.register(ctx, Framebuffers::new(depth, render_pass))?;
        let pipeline = tracker.register(ctx, ScenePipeline::new(render_pass))?;

        Ok(Self {
            render_pass,
            framebuffers,
            pipeline,
        })
    }
}
