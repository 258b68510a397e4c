// Shader module loading
//
// Vulkan consumes SPIR-V words. A `ShaderModule` owns its handle outright:
// it cannot be copied, only moved, and is destroyed exactly once on drop.

use anyhow::Result;
use ash::vk;
use std::ffi::CStr;
use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{GraphicsContext, RenderError};

pub const ENTRY_POINT: &CStr = c"main";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// Decode SPIR-V words from a byte stream (size, alignment and magic checked)
pub fn read_spirv<R: Read + Seek>(reader: &mut R) -> io::Result<Vec<u32>> {
    ash::util::read_spv(reader)
}

/// Read a compiled shader from disk
pub fn load_spirv(path: &Path) -> Result<Vec<u32>, RenderError> {
    let mut file = File::open(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => RenderError::ShaderNotFound(path.to_path_buf()),
        _ => RenderError::ShaderRead {
            path: path.to_path_buf(),
            source,
        },
    })?;

    read_spirv(&mut file).map_err(|source| RenderError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })
}

pub struct ShaderModule {
    pub module: vk::ShaderModule,
    pub stage: ShaderStage,
    pub path: PathBuf,
    context: Arc<GraphicsContext>,
}

impl ShaderModule {
    pub fn load(context: Arc<GraphicsContext>, path: impl AsRef<Path>, stage: ShaderStage) -> Result<Self> {
        let path = path.as_ref();
        let code = load_spirv(path)?;
        log::debug!("Loaded {:?} shader {:?} ({} words)", stage, path, code.len());

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { context.device.device.create_shader_module(&create_info, None) }
            .map_err(RenderError::init("shader module"))?;

        Ok(Self {
            module,
            stage,
            path: path.to_path_buf(),
            context,
        })
    }

    /// Stage description for pipeline creation
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage.flags())
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.context
                .device
                .device
                .destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn decodes_little_endian_words() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let mut cursor = Cursor::new(words_to_bytes(&words));
        assert_eq!(read_spirv(&mut cursor).unwrap(), words);
    }

    #[test]
    fn rejects_truncated_blob() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000]);
        bytes.pop();
        assert!(read_spirv(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn missing_file_is_not_found() {
        let path = Path::new("shaders/definitely-not-here.spv");
        assert!(matches!(
            load_spirv(path),
            Err(RenderError::ShaderNotFound(p)) if p == path
        ));
    }

    #[test]
    fn blob_without_magic_is_rejected() {
        let bytes = words_to_bytes(&[0xdead_beef, 0]);
        assert!(read_spirv(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn stage_tags_map_to_stage_bits() {
        assert_eq!(ShaderStage::Vertex.flags(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(ShaderStage::Fragment.flags(), vk::ShaderStageFlags::FRAGMENT);
    }
}
