// Descriptor set layout, pool and per-frame sets
//
// The pool is sized from the layout: for every descriptor type, the count
// across all bindings times the number of sets we will allocate.

use super::VulkanDevice;
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

/// Backend-independent description of one binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingDesc {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl BindingDesc {
    pub const fn new(binding: u32, ty: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            ty,
            count: 1,
            stages,
        }
    }
}

/// One pool size per descriptor type, in first-seen order.
pub fn pool_sizes(bindings: &[BindingDesc], set_count: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for binding in bindings {
        let count = binding.count * set_count;
        match sizes.iter_mut().find(|size| size.ty == binding.ty) {
            Some(size) => size.descriptor_count += count,
            None => sizes.push(vk::DescriptorPoolSize {
                ty: binding.ty,
                descriptor_count: count,
            }),
        }
    }
    sizes
}

/// A layout, the pool sized for it, and the sets allocated from it.
pub struct DescriptorSets {
    pub layout: vk::DescriptorSetLayout,
    pub pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
    bindings: Vec<BindingDesc>,
    device: Arc<VulkanDevice>,
}

impl DescriptorSets {
    pub fn new(device: &Arc<VulkanDevice>, bindings: &[BindingDesc], set_count: u32) -> Result<Self> {
        let layout_bindings: Vec<_> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(binding.ty)
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);
        let layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .context("Failed to create descriptor set layout")?;

        // Fill in handles as they are created so Drop can clean up on failure
        let mut this = Self {
            layout,
            pool: vk::DescriptorPool::null(),
            sets: Vec::new(),
            bindings: bindings.to_vec(),
            device: device.clone(),
        };

        let sizes = pool_sizes(bindings, set_count);
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&sizes)
            .max_sets(set_count);
        this.pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        let layouts = vec![layout; set_count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(this.pool)
            .set_layouts(&layouts);
        this.sets = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor sets")?;

        log::info!(
            "Allocated {} descriptor sets ({} bindings, pool sizes {:?})",
            set_count,
            bindings.len(),
            sizes
                .iter()
                .map(|size| (size.ty, size.descriptor_count))
                .collect::<Vec<_>>()
        );

        Ok(this)
    }

    fn binding_type(&self, binding: u32) -> Result<vk::DescriptorType> {
        self.bindings
            .iter()
            .find(|desc| desc.binding == binding)
            .map(|desc| desc.ty)
            .with_context(|| format!("Descriptor layout has no binding {}", binding))
    }

    /// Point `binding` of set `index` at a buffer range.
    pub fn write_buffer(
        &self,
        index: usize,
        binding: u32,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) -> Result<()> {
        let ty = self.binding_type(binding)?;
        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(range)];

        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.sets[index])
            .dst_binding(binding)
            .descriptor_type(ty)
            .buffer_info(&buffer_info);

        unsafe { self.device.device.update_descriptor_sets(&[write], &[]) };
        Ok(())
    }

    /// Point `binding` of set `index` at a sampled image.
    pub fn write_image(
        &self,
        index: usize,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<()> {
        let ty = self.binding_type(binding)?;
        let image_info = [vk::DescriptorImageInfo::default()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(view)
            .sampler(sampler)];

        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.sets[index])
            .dst_binding(binding)
            .descriptor_type(ty)
            .image_info(&image_info);

        unsafe { self.device.device.update_descriptor_sets(&[write], &[]) };
        Ok(())
    }
}

impl Drop for DescriptorSets {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees its sets
            if self.pool != vk::DescriptorPool::null() {
                self.device.device.destroy_descriptor_pool(self.pool, None);
            }
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}
