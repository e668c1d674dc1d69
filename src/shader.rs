//! Shader sources and shader modules.
//!
//! SPIR-V (`.spv` files) is always accepted. GLSL sources need the `shaderc`
//! feature.
use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
};

use ash::vk;

use crate::{Error, Result, VulkanDevice};

/// Longest string still considered a file path.
const MAX_PATH_LENGTH: usize = 260;

/// Pipeline stage a shader runs in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader.
    Vertex,
    /// Tessellation control shader.
    TessellationControl,
    /// Tessellation evaluation shader.
    TessellationEvaluation,
    /// Geometry shader.
    Geometry,
    /// Fragment shader.
    Fragment,
    /// Compute shader.
    Compute,
    /// Ray generation shader.
    RayGen,
    /// Ray intersection shader.
    Intersection,
    /// Ray any-hit shader.
    AnyHit,
    /// Ray closest-hit shader.
    ClosestHit,
    /// Ray miss shader.
    Miss,
    /// Callable shader.
    Callable,
    /// Task shader.
    Task,
    /// Mesh shader.
    Mesh,
}

impl ShaderStage {
    /// The matching Vulkan stage flag.
    pub fn flags(self) -> vk::ShaderStageFlags {
        use vk::ShaderStageFlags as F;
        match self {
            ShaderStage::Vertex => F::VERTEX,
            ShaderStage::TessellationControl => F::TESSELLATION_CONTROL,
            ShaderStage::TessellationEvaluation => F::TESSELLATION_EVALUATION,
            ShaderStage::Geometry => F::GEOMETRY,
            ShaderStage::Fragment => F::FRAGMENT,
            ShaderStage::Compute => F::COMPUTE,
            ShaderStage::RayGen => F::RAYGEN_KHR,
            ShaderStage::Intersection => F::INTERSECTION_KHR,
            ShaderStage::AnyHit => F::ANY_HIT_KHR,
            ShaderStage::ClosestHit => F::CLOSEST_HIT_KHR,
            ShaderStage::Miss => F::MISS_KHR,
            ShaderStage::Callable => F::CALLABLE_KHR,
            ShaderStage::Task => F::TASK_NV,
            ShaderStage::Mesh => F::MESH_NV,
        }
    }

    /// Human readable name, used in compilation errors.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::TessellationControl => "tess control",
            ShaderStage::TessellationEvaluation => "tess evaluation",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
            ShaderStage::RayGen => "raygen",
            ShaderStage::Intersection => "intersection",
            ShaderStage::AnyHit => "any-hit",
            ShaderStage::ClosestHit => "closest hit",
            ShaderStage::Miss => "miss",
            ShaderStage::Callable => "callable",
            ShaderStage::Task => "task",
            ShaderStage::Mesh => "mesh",
        }
    }

    #[cfg(feature = "shaderc")]
    fn shader_kind(self) -> shaderc::ShaderKind {
        use shaderc::ShaderKind as K;
        match self {
            ShaderStage::Vertex => K::Vertex,
            ShaderStage::TessellationControl => K::TessControl,
            ShaderStage::TessellationEvaluation => K::TessEvaluation,
            ShaderStage::Geometry => K::Geometry,
            ShaderStage::Fragment => K::Fragment,
            ShaderStage::Compute => K::Compute,
            ShaderStage::RayGen => K::RayGeneration,
            ShaderStage::Intersection => K::Intersection,
            ShaderStage::AnyHit => K::AnyHit,
            ShaderStage::ClosestHit => K::ClosestHit,
            ShaderStage::Miss => K::Miss,
            ShaderStage::Callable => K::Callable,
            ShaderStage::Task => K::Task,
            ShaderStage::Mesh => K::Mesh,
        }
    }
}

/// A shader given either as a file path or as the source text itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    /// A file path or the shader text itself.
    pub source: String,
    /// Stage the shader runs in.
    pub stage: ShaderStage,
}

impl ShaderSource {
    /// Shader from a path or inline text.
    #[inline]
    pub fn new(source: impl Into<String>, stage: ShaderStage) -> Self {
        ShaderSource {
            source: source.into(),
            stage,
        }
    }

    /// Whether `source` names an existing file.
    pub fn is_path(&self) -> bool {
        self.source.len() <= MAX_PATH_LENGTH && Path::new(&self.source).is_file()
    }

    /// Resolves the source into SPIR-V words, reading and compiling as
    /// needed.
    pub fn spirv(&self) -> Result<Vec<u32>> {
        if !self.is_path() {
            return self.compile(&self.source, "shader.glsl");
        }

        let path = PathBuf::from(&self.source);
        let io_error = |source| Error::Io {
            path: path.clone(),
            source,
        };
        if path.extension().map_or(false, |ext| ext == "spv") {
            let bytes = fs::read(&path).map_err(io_error)?;
            return ash::util::read_spv(&mut Cursor::new(bytes)).map_err(io_error);
        }
        let text = fs::read_to_string(&path).map_err(io_error)?;
        self.compile(&text, &self.source)
    }

    #[cfg(feature = "shaderc")]
    fn compile(&self, text: &str, name: &str) -> Result<Vec<u32>> {
        use shaderc::{CompileOptions, Compiler, EnvVersion, TargetEnv};

        let failed = |log: String| Error::ShaderCompilation {
            stage: self.stage.name(),
            log,
        };
        let compiler = Compiler::new().ok_or_else(|| failed("shaderc is not available".into()))?;
        let mut options =
            CompileOptions::new().ok_or_else(|| failed("shaderc is not available".into()))?;
        options.set_target_env(TargetEnv::Vulkan, EnvVersion::Vulkan1_1 as u32);

        let artifact = compiler
            .compile_into_spirv(text, self.stage.shader_kind(), name, "main", Some(&options))
            .map_err(|err| failed(err.to_string()))?;
        if artifact.get_num_warnings() > 0 {
            log::warn!("{}", artifact.get_warning_messages());
        }
        Ok(artifact.as_binary().to_vec())
    }

    #[cfg(not(feature = "shaderc"))]
    fn compile(&self, _text: &str, name: &str) -> Result<Vec<u32>> {
        Err(Error::ShaderCompilation {
            stage: self.stage.name(),
            log: format!(
                "{name}: SPIR-V input is required, enable the `shaderc` feature to compile GLSL"
            ),
        })
    }
}

/// A shader module and the stage it was built for.
#[derive(Debug, Copy, Clone)]
pub struct VulkanShader {
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl VulkanShader {
    /// Loads or compiles `source` and creates the shader module.
    pub fn create(device: &VulkanDevice, source: &ShaderSource) -> Result<Self> {
        let code = source.spirv()?;
        let module_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { device.device().create_shader_module(&module_info, None)? };
        Ok(VulkanShader {
            module,
            stage: source.stage,
        })
    }

    /// The shader module handle.
    #[inline]
    pub fn module(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage the module was created for.
    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Destroys the shader module.
    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        if self.module != vk::ShaderModule::null() {
            device.device().destroy_shader_module(self.module, None);
            self.module = vk::ShaderModule::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_flags_and_names() {
        assert_eq!(ShaderStage::Vertex.flags(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(
            ShaderStage::Fragment.flags(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(ShaderStage::Miss.flags(), vk::ShaderStageFlags::MISS_KHR);
        assert_eq!(ShaderStage::TessellationControl.name(), "tess control");
        assert_eq!(ShaderStage::AnyHit.name(), "any-hit");
        assert_eq!(ShaderStage::ClosestHit.name(), "closest hit");
    }

    #[test]
    fn path_or_source() {
        let manifest = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
        assert!(ShaderSource::new(manifest, ShaderStage::Vertex).is_path());

        let glsl = "#version 450\nvoid main() {}\n";
        assert!(!ShaderSource::new(glsl, ShaderStage::Vertex).is_path());

        let long = format!("{}/{}", env!("CARGO_MANIFEST_DIR"), "x".repeat(300));
        assert!(!ShaderSource::new(long, ShaderStage::Vertex).is_path());
    }

    #[test]
    fn spirv_file() {
        let words = [0x0723_0203u32, 0x0001_0000, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let path = std::env::temp_dir().join(format!("abcg-shader-{}.spv", std::process::id()));
        fs::write(&path, bytes).unwrap();

        let source = ShaderSource::new(path.to_str().unwrap(), ShaderStage::Fragment);
        let code = source.spirv().unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(code, words);
    }

    #[cfg(not(feature = "shaderc"))]
    #[test]
    fn glsl_needs_compiler() {
        let err = ShaderSource::new("void main() {}", ShaderStage::Compute)
            .spirv()
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Failed to compile compute shader"));
        assert!(message.contains("SPIR-V input is required"));
    }
}
