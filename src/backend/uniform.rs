// Uniform buffer layout (std140) and per-frame uniform buffers
//
// Shaders declare uniform blocks with std140 packing. The layout here mirrors
// the rules so CPU-side values land at the offsets the shader reads:
//
//   float/int/uint   align 4,  size 4
//   vec2             align 8,  size 8
//   vec3             align 16, size 12  (a following scalar may fill the gap)
//   vec4             align 16, size 16
//   matN             N columns of vec4 stride
//   arrays           element stride rounded up to 16
//   block size       rounded up to 16

use super::buffer::Buffer;
use super::VulkanDevice;
use crate::error::RenderError;
use anyhow::{Context, Result};
use ash::vk;
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

const VEC4_ALIGN: usize = 16;

/// Round `value` up to the next multiple of `alignment` (a power of two;
/// zero means no alignment requirement).
pub const fn align_up(value: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}

/// Byte stride between per-object slices of one dynamic uniform buffer.
pub fn dynamic_stride(block_size: usize, min_offset_alignment: vk::DeviceSize) -> Result<usize> {
    let alignment = min_offset_alignment as usize;
    if alignment != 0 && !alignment.is_power_of_two() {
        return Err(RenderError::UniformLayout(format!(
            "minUniformBufferOffsetAlignment {} is not a power of two",
            alignment
        ))
        .into());
    }
    Ok(align_up(block_size, alignment))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformType {
    Float,
    Int,
    UInt,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
}

impl UniformType {
    fn size(self) -> usize {
        match self {
            UniformType::Float | UniformType::Int | UniformType::UInt => 4,
            UniformType::Vec2 => 8,
            UniformType::Vec3 => 12,
            UniformType::Vec4 => 16,
            UniformType::Mat3 => 3 * VEC4_ALIGN,
            UniformType::Mat4 => 4 * VEC4_ALIGN,
        }
    }

    fn align(self) -> usize {
        match self {
            UniformType::Float | UniformType::Int | UniformType::UInt => 4,
            UniformType::Vec2 => 8,
            UniformType::Vec3 | UniformType::Vec4 | UniformType::Mat3 | UniformType::Mat4 => {
                VEC4_ALIGN
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformField {
    pub name: String,
    pub ty: UniformType,
    /// `Some(n)` for arrays
    pub count: Option<usize>,
    pub offset: usize,
    pub stride: usize,
}

impl UniformField {
    pub fn size(&self) -> usize {
        match self.count {
            Some(count) => self.stride * count,
            None => self.ty.size(),
        }
    }
}

/// Resolved std140 layout of one uniform block.
#[derive(Debug, Clone, PartialEq)]
pub struct Std140Layout {
    fields: Vec<UniformField>,
    size: usize,
}

impl Std140Layout {
    pub fn builder() -> Std140LayoutBuilder {
        Std140LayoutBuilder::default()
    }

    /// Block size, already rounded up to 16 bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fields(&self) -> &[UniformField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Debug, Default)]
pub struct Std140LayoutBuilder {
    fields: Vec<UniformField>,
    cursor: usize,
    error: Option<String>,
}

impl Std140LayoutBuilder {
    pub fn field(self, name: &str, ty: UniformType) -> Self {
        self.push(name, ty, None)
    }

    pub fn array(self, name: &str, ty: UniformType, count: usize) -> Self {
        self.push(name, ty, Some(count))
    }

    fn push(mut self, name: &str, ty: UniformType, count: Option<usize>) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.fields.iter().any(|field| field.name == name) {
            self.error = Some(format!("duplicate field '{}'", name));
            return self;
        }
        if count == Some(0) {
            self.error = Some(format!("array '{}' has zero elements", name));
            return self;
        }

        let (align, stride) = match count {
            Some(_) => {
                let align = align_up(ty.align(), VEC4_ALIGN);
                (align, align_up(ty.size(), VEC4_ALIGN))
            }
            None => (ty.align(), ty.size()),
        };

        let offset = align_up(self.cursor, align);
        let field = UniformField {
            name: name.to_string(),
            ty,
            count,
            offset,
            stride,
        };
        self.cursor = offset + field.size();
        self.fields.push(field);
        self
    }

    pub fn build(self) -> Result<Std140Layout> {
        if let Some(error) = self.error {
            return Err(RenderError::UniformLayout(error).into());
        }
        if self.fields.is_empty() {
            return Err(RenderError::UniformLayout("uniform block has no fields".into()).into());
        }
        Ok(Std140Layout {
            size: align_up(self.cursor, VEC4_ALIGN),
            fields: self.fields,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
}

impl UniformValue {
    fn ty(&self) -> UniformType {
        match self {
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::UInt(_) => UniformType::UInt,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Mat3(_) => UniformType::Mat3,
            UniformValue::Mat4(_) => UniformType::Mat4,
        }
    }

    fn write_to(&self, out: &mut [u8]) {
        fn floats(out: &mut [u8], values: &[f32]) {
            out[..values.len() * 4].copy_from_slice(bytemuck::cast_slice(values));
        }

        match *self {
            UniformValue::Float(v) => floats(out, &[v]),
            UniformValue::Int(v) => out[..4].copy_from_slice(&v.to_ne_bytes()),
            UniformValue::UInt(v) => out[..4].copy_from_slice(&v.to_ne_bytes()),
            UniformValue::Vec2(v) => floats(out, &v.to_array()),
            UniformValue::Vec3(v) => floats(out, &v.to_array()),
            UniformValue::Vec4(v) => floats(out, &v.to_array()),
            UniformValue::Mat3(m) => {
                for (column, chunk) in m.to_cols_array_2d().iter().zip(out.chunks_mut(VEC4_ALIGN)) {
                    floats(chunk, column);
                }
            }
            UniformValue::Mat4(m) => floats(out, &m.to_cols_array()),
        }
    }
}

macro_rules! uniform_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for UniformValue {
            fn from(value: $ty) -> Self {
                UniformValue::$variant(value)
            }
        })*
    };
}

uniform_value_from! {
    f32 => Float,
    i32 => Int,
    u32 => UInt,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    Mat3 => Mat3,
    Mat4 => Mat4,
}

/// Packs values into a zeroed byte image of a [`Std140Layout`].
pub struct Std140Writer<'a> {
    layout: &'a Std140Layout,
    bytes: Vec<u8>,
}

impl<'a> Std140Writer<'a> {
    pub fn new(layout: &'a Std140Layout) -> Self {
        Self {
            layout,
            bytes: vec![0; layout.size()],
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) -> Result<&mut Self> {
        let field = self.lookup(name)?;
        if field.count.is_some() {
            return Err(RenderError::UniformLayout(format!(
                "'{}' is an array, use set_element",
                name
            ))
            .into());
        }
        let offset = field.offset;
        self.write(field.ty, offset, name, value.into())
    }

    pub fn set_element(
        &mut self,
        name: &str,
        index: usize,
        value: impl Into<UniformValue>,
    ) -> Result<&mut Self> {
        let field = self.lookup(name)?;
        let count = field.count.ok_or_else(|| {
            RenderError::UniformLayout(format!("'{}' is not an array", name))
        })?;
        if index >= count {
            return Err(RenderError::UniformLayout(format!(
                "index {} out of bounds for '{}' ({} elements)",
                index, name, count
            ))
            .into());
        }
        let offset = field.offset + index * field.stride;
        self.write(field.ty, offset, name, value.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn lookup(&self, name: &str) -> Result<&'a UniformField> {
        let layout: &'a Std140Layout = self.layout;
        layout
            .field(name)
            .ok_or_else(|| RenderError::UniformLayout(format!("unknown field '{}'", name)).into())
    }

    fn write(
        &mut self,
        ty: UniformType,
        offset: usize,
        name: &str,
        value: UniformValue,
    ) -> Result<&mut Self> {
        if value.ty() != ty {
            return Err(RenderError::UniformLayout(format!(
                "'{}' expects {:?}, got {:?}",
                name,
                ty,
                value.ty()
            ))
            .into());
        }
        value.write_to(&mut self.bytes[offset..offset + ty.size()]);
        Ok(self)
    }
}

/// One host-visible uniform buffer per frame in flight.
pub struct UniformBuffers {
    buffers: Vec<Buffer>,
    layout: Std140Layout,
}

impl UniformBuffers {
    pub fn new(device: &Arc<VulkanDevice>, layout: Std140Layout, frames: usize) -> Result<Self> {
        let buffers = (0..frames)
            .map(|frame| {
                Buffer::new(
                    device,
                    layout.size() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                    &format!("uniforms[{}]", frame),
                )
            })
            .collect::<Result<Vec<_>>>()
            .context("Failed to create uniform buffers")?;

        log::info!(
            "Created {} uniform buffers of {} bytes",
            buffers.len(),
            layout.size()
        );
        for field in layout.fields() {
            log::debug!("  {} {:?} at {} ({} bytes)", field.name, field.ty, field.offset, field.size());
        }

        Ok(Self { buffers, layout })
    }

    pub fn layout(&self) -> &Std140Layout {
        &self.layout
    }

    pub fn buffer(&self, frame: usize) -> &Buffer {
        &self.buffers[frame]
    }

    /// Upload a packed block into the buffer of `frame`.
    pub fn update(&mut self, frame: usize, writer: &Std140Writer<'_>) -> Result<()> {
        self.buffers[frame].write(0, writer.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn offset(layout: &Std140Layout, name: &str) -> Option<usize> {
        layout.field(name).map(|field| field.offset)
    }

    fn read_f32(bytes: &[u8], offset: usize) -> f32 {
        f32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn scene_block() -> Std140Layout {
        Std140Layout::builder()
            .field("view", UniformType::Mat4)
            .field("projection", UniformType::Mat4)
            .field("light_direction", UniformType::Vec4)
            .field("light_color", UniformType::Vec4)
            .field("camera_position", UniformType::Vec3)
            .field("time", UniformType::Float)
            .build()
            .unwrap()
    }

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 256), 256);
        assert_eq!(align_up(13, 0), 13);
    }

    #[test]
    fn dynamic_stride_respects_device_alignment() {
        assert_eq!(dynamic_stride(176, 256).unwrap(), 256);
        assert_eq!(dynamic_stride(176, 16).unwrap(), 176);
        assert_eq!(dynamic_stride(300, 256).unwrap(), 512);
        assert!(dynamic_stride(64, 48).is_err());
    }

    #[test]
    fn scalar_fills_the_tail_of_a_vec3() {
        let layout = scene_block();
        assert_eq!(offset(&layout, "view"), Some(0));
        assert_eq!(offset(&layout, "projection"), Some(64));
        assert_eq!(offset(&layout, "light_direction"), Some(128));
        assert_eq!(offset(&layout, "light_color"), Some(144));
        assert_eq!(offset(&layout, "camera_position"), Some(160));
        assert_eq!(offset(&layout, "time"), Some(172));
        assert_eq!(layout.size(), 176);
    }

    #[test]
    fn vec3_after_scalar_is_pushed_to_sixteen() {
        let layout = Std140Layout::builder()
            .field("a", UniformType::Float)
            .field("b", UniformType::Vec3)
            .field("c", UniformType::Vec2)
            .field("d", UniformType::Float)
            .build()
            .unwrap();

        assert_eq!(offset(&layout, "b"), Some(16));
        assert_eq!(offset(&layout, "c"), Some(32));
        assert_eq!(offset(&layout, "d"), Some(40));
        assert_eq!(layout.size(), 48);
    }

    #[test]
    fn arrays_use_vec4_stride() {
        let layout = Std140Layout::builder()
            .field("count", UniformType::Int)
            .array("weights", UniformType::Float, 3)
            .array("bones", UniformType::Mat4, 2)
            .field("tail", UniformType::Float)
            .build()
            .unwrap();

        let weights = layout.field("weights").unwrap();
        assert_eq!(weights.offset, 16);
        assert_eq!(weights.stride, 16);
        assert_eq!(weights.size(), 48);

        let bones = layout.field("bones").unwrap();
        assert_eq!(bones.offset, 64);
        assert_eq!(bones.stride, 64);

        assert_eq!(offset(&layout, "tail"), Some(192));
        assert_eq!(layout.size(), 208);
    }

    #[test]
    fn mat3_columns_are_padded() {
        let layout = Std140Layout::builder()
            .field("normal_matrix", UniformType::Mat3)
            .field("after", UniformType::Float)
            .build()
            .unwrap();
        assert_eq!(offset(&layout, "after"), Some(48));

        let mut writer = Std140Writer::new(&layout);
        let m = Mat3::from_cols(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(4.0, 5.0, 6.0),
            Vec3::new(7.0, 8.0, 9.0),
        );
        writer.set("normal_matrix", m).unwrap();

        let bytes = writer.bytes();
        assert_relative_eq!(read_f32(bytes, 0), 1.0);
        assert_relative_eq!(read_f32(bytes, 8), 3.0);
        assert_relative_eq!(read_f32(bytes, 12), 0.0);
        assert_relative_eq!(read_f32(bytes, 16), 4.0);
        assert_relative_eq!(read_f32(bytes, 32), 7.0);
        assert_relative_eq!(read_f32(bytes, 40), 9.0);
    }

    #[test]
    fn writer_places_values_at_their_offsets() {
        let layout = scene_block();
        let mut writer = Std140Writer::new(&layout);
        writer
            .set("projection", Mat4::from_scale(Vec3::splat(2.0)))
            .unwrap()
            .set("camera_position", Vec3::new(1.0, 2.0, 3.0))
            .unwrap()
            .set("time", 0.5f32)
            .unwrap();

        let bytes = writer.bytes().to_vec();
        assert_eq!(bytes.len(), 176);
        assert_relative_eq!(read_f32(&bytes, 0), 0.0);
        assert_relative_eq!(read_f32(&bytes, 64), 2.0);
        assert_relative_eq!(read_f32(&bytes, 64 + 60), 1.0);
        assert_relative_eq!(read_f32(&bytes, 168), 3.0);
        assert_relative_eq!(read_f32(&bytes, 172), 0.5);
    }

    #[test]
    fn writer_checks_types_names_and_bounds() {
        let layout = Std140Layout::builder()
            .field("scale", UniformType::Float)
            .array("offsets", UniformType::Vec4, 2)
            .build()
            .unwrap();
        let mut writer = Std140Writer::new(&layout);

        assert!(writer.set("scale", Vec2::ONE).is_err());
        assert!(writer.set("missing", 1.0f32).is_err());
        assert!(writer.set("offsets", Vec4::ONE).is_err());
        assert!(writer.set_element("scale", 0, 1.0f32).is_err());
        assert!(writer.set_element("offsets", 2, Vec4::ONE).is_err());

        writer.set_element("offsets", 1, Vec4::new(5.0, 6.0, 7.0, 8.0)).unwrap();
        assert_relative_eq!(read_f32(writer.bytes(), 32), 5.0);
        assert_relative_eq!(read_f32(writer.bytes(), 44), 8.0);
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        assert!(Std140Layout::builder().build().is_err());
        assert!(Std140Layout::builder()
            .field("a", UniformType::Float)
            .field("a", UniformType::Int)
            .build()
            .is_err());
        assert!(Std140Layout::builder()
            .array("empty", UniformType::Vec4, 0)
            .build()
            .is_err());
    }
}
