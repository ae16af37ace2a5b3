// Shader modules
//
// A Shader owns one SPIR-V module and rebuilds it whenever its file changes.
// Consumers compare `generation` to notice a reload.

use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::Device;
use crate::error::{RenderResult, VkResultExt};
use crate::resource::Resource;

pub struct Shader {
    module: Option<vk::ShaderModule>,
    stage: vk::ShaderStageFlags,
    generation: u64,
    device: Arc<Device>,
}

impl Shader {
    /// An empty shader; the module is created by the first `reload`.
    pub fn new(device: Arc<Device>, stage: vk::ShaderStageFlags) -> Self {
        Self {
            module: None,
            stage,
            generation: 0,
            device,
        }
    }

    pub fn for_path(device: Arc<Device>, path: &Path) -> Option<Self> {
        stage_from_path(path).map(|stage| Self::new(device, stage))
    }

    pub fn module(&self) -> Option<vk::ShaderModule> {
        self.module
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Resource for Shader {
    fn reload(&mut self, bytes: &[u8]) -> RenderResult<()> {
        // read_spv checks the length and magic number and fixes alignment.
        let code = ash::util::read_spv(&mut Cursor::new(bytes))?;
        let info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { self.device.raw().create_shader_module(&info, None) }
            .describe("vkCreateShaderModule")?;

        if let Some(old) = self.module.replace(module) {
            unsafe { self.device.raw().destroy_shader_module(old, None) };
        }
        self.generation += 1;
        Ok(())
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            unsafe { self.device.raw().destroy_shader_module(module, None) };
        }
    }
}

/// Stage from a `name.<stage>.spv` file name.
pub fn stage_from_path(path: &Path) -> Option<vk::ShaderStageFlags> {
    if path.extension()? != "spv" {
        return None;
    }
    let stem = Path::new(path.file_stem()?);
    let stage = match stem.extension()?.to_str()? {
        "vert" => vk::ShaderStageFlags::VERTEX,
        "frag" => vk::ShaderStageFlags::FRAGMENT,
        "comp" => vk::ShaderStageFlags::COMPUTE,
        "geom" => vk::ShaderStageFlags::GEOMETRY,
        "tesc" => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        "tese" => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        "task" => vk::ShaderStageFlags::TASK_EXT,
        "mesh" => vk::ShaderStageFlags::MESH_EXT,
        _ => return None,
    };
    Some(stage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_comes_from_the_inner_extension() {
        let stage = |p: &str| stage_from_path(Path::new(p));
        assert_eq!(stage("shaders/clear.frag.spv"), Some(vk::ShaderStageFlags::FRAGMENT));
        assert_eq!(stage("blit.comp.spv"), Some(vk::ShaderStageFlags::COMPUTE));
        assert_eq!(stage("a/b/fullscreen.vert.spv"), Some(vk::ShaderStageFlags::VERTEX));
        assert_eq!(stage("clear.frag"), None);
        assert_eq!(stage("clear.spv"), None);
        assert_eq!(stage("clear.pixel.spv"), None);
    }
}
