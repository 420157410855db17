//! Render pass, descriptor layout and graphics pipeline
//!
//! [`PipelineResources`] depends only on the swapchain's color format and the
//! device's depth format, so it survives plain resizes and is rebuilt through
//! [`PipelineResources::rebuild_for_format`] when a recreation changes the
//! format.

use std::io::Cursor;
use std::path::Path;

use ash::vk;

use super::backend::{GpuDevice, GpuEntry, GraphicsPipelineDesc, RenderPassDesc};
use super::device_context::DeviceContext;
use super::error::{RenderError, RenderResult};
use super::vertex::Vertex;
use crate::config::{RendererConfig, ShaderConfig};
use crate::foundation::logging::Logger;

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Descriptor binding of the uniform buffer
pub const UNIFORM_BINDING: u32 = 0;

/// Descriptor binding of the combined image sampler
pub const SAMPLER_BINDING: u32 = 1;

/// Read a SPIR-V binary into words
pub fn load_shader(path: impl AsRef<Path>) -> RenderResult<Vec<u32>> {
    let path = path.as_ref();
    let fail = |what: String| RenderError::PipelineCreation {
        reason: format!("shader {}: {what}", path.display()),
    };

    let bytes = std::fs::read(path).map_err(|e| fail(format!("failed to read: {e}")))?;
    if bytes.is_empty() {
        return Err(fail("file is empty".to_string()));
    }
    if bytes.len() % 4 != 0 {
        return Err(fail(format!("size {} is not a multiple of 4 bytes", bytes.len())));
    }

    let words = ash::util::read_spv(&mut Cursor::new(&bytes)).map_err(|e| fail(format!("invalid SPIR-V: {e}")))?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(fail("missing SPIR-V magic number".to_string()));
    }
    Ok(words)
}

/// Shader module destroyed when dropped
struct ShaderModule<'a, D: GpuDevice> {
    device: &'a D,
    module: vk::ShaderModule,
}

impl<'a, D: GpuDevice> ShaderModule<'a, D> {
    fn from_file(device: &'a D, path: &str) -> RenderResult<Self> {
        let code = load_shader(path)?;
        let module = device
            .create_shader_module(&code)
            .map_err(|e| RenderError::PipelineCreation {
                reason: format!("shader module creation for {path} failed: {e:?}"),
            })?;
        Ok(Self { device, module })
    }
}

impl<D: GpuDevice> Drop for ShaderModule<'_, D> {
    fn drop(&mut self) {
        self.device.destroy_shader_module(self.module);
    }
}

/// Single-subpass render pass with a color and an optional depth attachment
pub fn create_render_pass<D: GpuDevice>(
    device: &D,
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
) -> RenderResult<vk::RenderPass> {
    let mut attachments = vec![vk::AttachmentDescription {
        format: color_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }];

    let mut stage_mask = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut access_mask = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    let depth_ref = depth_format.map(|format| {
        attachments.push(vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        });
        stage_mask |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        access_mask |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    });

    let desc = RenderPassDesc {
        attachments,
        color_refs: vec![vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }],
        depth_ref,
        dependencies: vec![vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: stage_mask,
            dst_stage_mask: stage_mask,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: access_mask,
            dependency_flags: vk::DependencyFlags::empty(),
        }],
    };

    device.create_render_pass(&desc).map_err(RenderError::RenderPassCreation)
}

/// Uniform buffer for the vertex stage, plus a sampler for the fragment stage when textured
pub fn create_descriptor_set_layout<D: GpuDevice>(device: &D, textured: bool) -> RenderResult<vk::DescriptorSetLayout> {
    let mut bindings = vec![vk::DescriptorSetLayoutBinding {
        binding: UNIFORM_BINDING,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::VERTEX,
        ..Default::default()
    }];
    if textured {
        bindings.push(vk::DescriptorSetLayoutBinding {
            binding: SAMPLER_BINDING,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        });
    }
    device
        .create_descriptor_set_layout(&bindings)
        .map_err(RenderError::DescriptorSetLayoutCreation)
}

/// Build the graphics pipeline; shader modules never outlive this call
pub fn create_graphics_pipeline<D: GpuDevice>(
    device: &D,
    shaders: &ShaderConfig,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    depth_test: bool,
) -> RenderResult<vk::Pipeline> {
    let vertex = ShaderModule::from_file(device, &shaders.vertex_shader_path)?;
    let fragment = ShaderModule::from_file(device, &shaders.fragment_shader_path)?;

    let desc = GraphicsPipelineDesc {
        vertex_module: vertex.module,
        fragment_module: fragment.module,
        vertex_bindings: vec![Vertex::binding_description()],
        vertex_attributes: Vertex::attribute_descriptions().to_vec(),
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        samples: vk::SampleCountFlags::TYPE_1,
        depth_test,
        dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
        layout,
        render_pass,
    };

    device
        .create_graphics_pipeline(&desc)
        .map_err(|e| RenderError::PipelineCreation {
            reason: format!("vkCreateGraphicsPipelines failed: {e:?}"),
        })
}

/// Render pass, descriptor-set layout, pipeline layout and pipeline
pub struct PipelineResources<D: GpuDevice> {
    device: D,
    render_pass: vk::RenderPass,
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
    textured: bool,
    shaders: ShaderConfig,
    log: Logger,
}

impl<D: GpuDevice> PipelineResources<D> {
    /// Build every pipeline object for a swapchain color format
    pub fn new<E: GpuEntry<Device = D>>(
        context: &DeviceContext<E>,
        color_format: vk::Format,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        let depth_format = if config.enable_depth {
            Some(context.find_depth_format()?)
        } else {
            None
        };

        let mut resources = Self {
            device: context.device().clone(),
            render_pass: vk::RenderPass::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            color_format,
            depth_format,
            textured: config.enable_texture,
            shaders: config.shaders.clone(),
            log: context.log().clone(),
        };

        resources.render_pass = create_render_pass(&resources.device, color_format, depth_format)?;
        resources.descriptor_set_layout = create_descriptor_set_layout(&resources.device, resources.textured)?;
        resources.pipeline_layout = resources
            .device
            .create_pipeline_layout(&[resources.descriptor_set_layout])
            .map_err(|e| RenderError::PipelineCreation {
                reason: format!("pipeline layout creation failed: {e:?}"),
            })?;
        resources.pipeline = create_graphics_pipeline(
            &resources.device,
            &resources.shaders,
            resources.pipeline_layout,
            resources.render_pass,
            depth_format.is_some(),
        )
        .map_err(|e| {
            resources.log.error(format!("{e}"));
            e
        })?;

        resources.log.info(format!(
            "Graphics pipeline created (color {color_format:?}, depth {depth_format:?}, textured {})",
            resources.textured
        ));
        Ok(resources)
    }

    /// Whether a swapchain in `color_format` needs a new render pass and pipeline
    pub fn needs_rebuild(&self, color_format: vk::Format) -> bool {
        self.color_format != color_format
    }

    /// Recreate the render pass and pipeline, keeping both layouts
    pub fn rebuild_for_format(&mut self, color_format: vk::Format, depth_format: Option<vk::Format>) -> RenderResult<()> {
        self.destroy_pipeline_and_pass();
        self.color_format = color_format;
        self.depth_format = depth_format;

        self.render_pass = create_render_pass(&self.device, color_format, depth_format)?;
        self.pipeline = create_graphics_pipeline(
            &self.device,
            &self.shaders,
            self.pipeline_layout,
            self.render_pass,
            depth_format.is_some(),
        )?;
        self.log
            .info(format!("Pipeline rebuilt for swapchain format {color_format:?}"));
        Ok(())
    }

    fn destroy_pipeline_and_pass(&mut self) {
        if self.pipeline != vk::Pipeline::null() {
            self.device.destroy_pipeline(self.pipeline);
            self.pipeline = vk::Pipeline::null();
        }
        if self.render_pass != vk::RenderPass::null() {
            self.device.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
    }

    /// Render pass handle
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Descriptor-set layout used for every frame's set
    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.descriptor_set_layout
    }

    /// Pipeline layout
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Graphics pipeline
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Color format the render pass was built for
    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    /// Depth format, when depth testing is enabled
    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }

    /// Whether the layout has a sampler binding
    pub fn is_textured(&self) -> bool {
        self.textured
    }
}

impl<D: GpuDevice> Drop for PipelineResources<D> {
    fn drop(&mut self) {
        self.destroy_pipeline_and_pass();
        if self.pipeline_layout != vk::PipelineLayout::null() {
            self.device.destroy_pipeline_layout(self.pipeline_layout);
        }
        if self.descriptor_set_layout != vk::DescriptorSetLayout::null() {
            self.device.destroy_descriptor_set_layout(self.descriptor_set_layout);
        }
    }
}
