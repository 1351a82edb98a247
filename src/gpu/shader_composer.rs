use std::borrow::Cow;

use naga_oil::compose::{
    ComposableModuleDescriptor, Composer, NagaModuleDescriptor, ShaderLanguage, ShaderType,
};

use super::device::{DeviceError, ShaderProgram};

/// Wraps `naga_oil::compose::Composer` to provide shader composition with `#import` support.
///
/// Pre-loads all shared WGSL modules at construction time. Consuming shaders use
/// `#import multimesh::module_name` to pull in shared code. The composer produces
/// `naga::Module` IR directly, skipping WGSL re-parse at runtime.
pub struct ShaderComposer {
    composer: Composer,
}

/// Shared module definition: (source, file_path)
struct ModuleDef {
    source: &'static str,
    file_path: &'static str,
}

/// Built-in expansion compute shader.
pub const EXPAND_INSTANCES: ShaderProgram<'static> = ShaderProgram {
    label: "Expand Instances",
    source: include_str!("../../assets/shaders/compute/expand_instances.wgsl"),
    file_path: "compute/expand_instances.wgsl",
    entry_point: "expand_instances",
};

impl ShaderComposer {
    /// Composer with every shared module registered.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Pipeline`] if a shared module fails to parse.
    pub fn new() -> Result<Self, DeviceError> {
        let mut composer = Composer::default();

        // Register shared modules in dependency order.
        let modules: &[ModuleDef] = &[ModuleDef {
            source: include_str!("../../assets/shaders/modules/instance.wgsl"),
            file_path: "modules/instance.wgsl",
        }];

        for m in modules {
            let _ = composer
                .add_composable_module(ComposableModuleDescriptor {
                    source: m.source,
                    file_path: m.file_path,
                    language: ShaderLanguage::Wgsl,
                    ..Default::default()
                })
                .map_err(|e| {
                    DeviceError::Pipeline(format!(
                        "failed to register shader module '{}': {e}",
                        m.file_path
                    ))
                })?;
        }

        Ok(Self { composer })
    }

    /// Compose `program` into a `wgpu::ShaderModule` ready for pipeline
    /// creation.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Pipeline`] if composition fails.
    pub fn compose(
        &mut self,
        device: &wgpu::Device,
        program: &ShaderProgram<'_>,
    ) -> Result<wgpu::ShaderModule, DeviceError> {
        let naga_module = self
            .compose_naga(program.source, program.file_path)
            .map_err(|e| {
                DeviceError::Pipeline(format!(
                    "failed to compose shader '{}': {e}",
                    program.file_path
                ))
            })?;

        Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(program.label),
            source: wgpu::ShaderSource::Naga(Cow::Owned(naga_module)),
        }))
    }

    /// Compose a shader source into a `naga::Module` without creating a wgpu shader module.
    /// Useful for testing shader composition without a GPU device.
    ///
    /// # Errors
    ///
    /// Returns the composer error when parsing or import resolution fails.
    pub fn compose_naga(
        &mut self,
        source: &str,
        file_path: &str,
    ) -> Result<naga::Module, Box<naga_oil::compose::ComposerError>> {
        self.composer
            .make_naga_module(NagaModuleDescriptor {
                source,
                file_path,
                shader_type: ShaderType::Wgsl,
                ..Default::default()
            })
            .map_err(Box::new)
    }
}
