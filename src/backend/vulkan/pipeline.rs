// Graphics and compute pipeline objects
//
// `PipelineObjects` owns everything one pipeline needs at record time: the
// pipeline, its layouts and the descriptor pool its binding sets come from.

use super::descriptor::{DescriptorPool, DescriptorSet};
use super::driver::{GraphicsPipelineDesc, VulkanDriver};
use super::VulkanBackend;
use crate::error::{device_fatal, RendererError, Result};
use crate::types::{ShaderBlockType, ShaderStage};
use ash::vk;
use parking_lot::Mutex;
use std::sync::Arc;

/// One entry of a pipeline's single descriptor set
#[derive(Debug, Clone, Copy)]
pub struct BindingSlot {
    pub binding: u32,
    pub block_type: ShaderBlockType,
    pub stage: ShaderStage,
}

pub struct PipelineObjects {
    driver: Arc<dyn VulkanDriver>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layout: vk::DescriptorSetLayout,
    bind_point: vk::PipelineBindPoint,
    descriptors: Mutex<DescriptorPool>,
}

/// Layout objects shared by both pipeline kinds, destroyed if a later step fails
struct Layouts<'d> {
    driver: &'d Arc<dyn VulkanDriver>,
    set_layout: vk::DescriptorSetLayout,
    layout: vk::PipelineLayout,
    armed: bool,
}

impl<'d> Layouts<'d> {
    fn new(driver: &'d Arc<dyn VulkanDriver>, slots: &[BindingSlot]) -> Result<Self> {
        let bindings: Vec<_> = slots
            .iter()
            .map(|slot| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(slot.binding)
                    .descriptor_type(slot.block_type.descriptor_type())
                    .descriptor_count(1)
                    .stage_flags(slot.stage.to_vk())
                    .build()
            })
            .collect();

        let set_layout = driver
            .create_descriptor_set_layout(&bindings)
            .map_err(device_fatal("create descriptor set layout"))?;
        let layout = match driver.create_pipeline_layout(&[set_layout]) {
            Ok(layout) => layout,
            Err(err) => {
                driver.destroy_descriptor_set_layout(set_layout);
                return Err(device_fatal("create pipeline layout")(err));
            }
        };

        Ok(Self {
            driver,
            set_layout,
            layout,
            armed: true,
        })
    }

    fn disarm(mut self) -> (vk::DescriptorSetLayout, vk::PipelineLayout) {
        self.armed = false;
        (self.set_layout, self.layout)
    }
}

impl Drop for Layouts<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.driver.destroy_pipeline_layout(self.layout);
            self.driver.destroy_descriptor_set_layout(self.set_layout);
        }
    }
}

/// Create modules for every stage, run `build`, then release the modules
fn with_modules<T>(
    driver: &Arc<dyn VulkanDriver>,
    stages: &[(ShaderStage, Vec<u32>)],
    build: impl FnOnce(&[(ShaderStage, vk::ShaderModule)]) -> Result<T>,
) -> Result<T> {
    let mut modules = Vec::with_capacity(stages.len());
    let mut created = Ok(());
    for (stage, code) in stages {
        match driver.create_shader_module(code) {
            Ok(module) => modules.push((*stage, module)),
            Err(err) => {
                created = Err(device_fatal("create shader module")(err));
                break;
            }
        }
    }

    let result = created.and_then(|_| build(&modules));
    for (_, module) in modules {
        driver.destroy_shader_module(module);
    }
    result
}

fn module_for(modules: &[(ShaderStage, vk::ShaderModule)], stage: ShaderStage) -> Result<vk::ShaderModule> {
    modules
        .iter()
        .find(|(s, _)| *s == stage)
        .map(|(_, module)| *module)
        .ok_or_else(|| RendererError::invalid(format!("pipeline is missing a {stage:?} shader")))
}

fn pool_for(driver: &Arc<dyn VulkanDriver>, slots: &[BindingSlot], capacity: u32) -> Result<DescriptorPool> {
    let types: Vec<_> = slots
        .iter()
        .map(|slot| slot.block_type.descriptor_type())
        .collect();
    // A pool needs at least one size entry even for binding-less pipelines
    let mut sizes = DescriptorPool::sizes_for(&types, capacity);
    if sizes.is_empty() {
        sizes = DescriptorPool::sizes_for(&[vk::DescriptorType::UNIFORM_BUFFER], 1);
    }
    DescriptorPool::new(driver.clone(), capacity, &sizes)
}

/// Vertex layout handed to graphics pipeline creation
pub struct VertexLayout<'a> {
    pub stride: u32,
    pub attributes: &'a [vk::VertexInputAttributeDescription],
}

/// Fixed-function choices for a graphics pipeline
pub struct GraphicsState {
    pub cull_mode: vk::CullModeFlags,
    pub topology: vk::PrimitiveTopology,
}

impl PipelineObjects {
    pub fn graphics(
        backend: &VulkanBackend,
        stages: &[(ShaderStage, Vec<u32>)],
        slots: &[BindingSlot],
        vertex: VertexLayout<'_>,
        state: GraphicsState,
        descriptor_capacity: u32,
    ) -> Result<Self> {
        let driver = backend.driver();
        let layouts = Layouts::new(driver, slots)?;
        let descriptors = pool_for(driver, slots, descriptor_capacity)?;

        let pipeline = with_modules(driver, stages, |modules| {
            let desc = GraphicsPipelineDesc {
                vertex_shader: module_for(modules, ShaderStage::Vertex)?,
                fragment_shader: module_for(modules, ShaderStage::Fragment)?,
                layout: layouts.layout,
                color_format: backend.color_format(),
                cull_mode: state.cull_mode,
                topology: state.topology,
                vertex_stride: vertex.stride,
                vertex_attributes: vertex.attributes,
            };
            driver
                .create_graphics_pipeline(&desc)
                .map_err(device_fatal("create graphics pipeline"))
        })?;

        let (set_layout, layout) = layouts.disarm();
        Ok(Self {
            driver: driver.clone(),
            pipeline,
            layout,
            set_layout,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            descriptors: Mutex::new(descriptors),
        })
    }

    pub fn compute(
        backend: &VulkanBackend,
        stages: &[(ShaderStage, Vec<u32>)],
        slots: &[BindingSlot],
        descriptor_capacity: u32,
    ) -> Result<Self> {
        let driver = backend.driver();
        let layouts = Layouts::new(driver, slots)?;
        let descriptors = pool_for(driver, slots, descriptor_capacity)?;

        let pipeline = with_modules(driver, stages, |modules| {
            let shader = module_for(modules, ShaderStage::Compute)?;
            driver
                .create_compute_pipeline(shader, layouts.layout)
                .map_err(device_fatal("create compute pipeline"))
        })?;

        let (set_layout, layout) = layouts.disarm();
        Ok(Self {
            driver: driver.clone(),
            pipeline,
            layout,
            set_layout,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            descriptors: Mutex::new(descriptors),
        })
    }

    pub fn driver(&self) -> &Arc<dyn VulkanDriver> {
        &self.driver
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    /// Fresh descriptor set for this pipeline's binding layout
    pub fn allocate_set(&self) -> Result<DescriptorSet> {
        self.descriptors
            .lock()
            .allocate_set(self.set_layout, self.layout)
    }

    pub fn outstanding_sets(&self) -> u32 {
        self.descriptors.lock().outstanding()
    }

    pub fn bind(&self, cmd: vk::CommandBuffer) {
        self.driver.cmd_bind_pipeline(cmd, self.bind_point, self.pipeline);
    }
}

impl Drop for PipelineObjects {
    fn drop(&mut self) {
        self.driver.destroy_pipeline(self.pipeline);
        self.driver.destroy_pipeline_layout(self.layout);
        self.driver.destroy_descriptor_set_layout(self.set_layout);
    }
}
