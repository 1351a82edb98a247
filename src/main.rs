//! `multimesh-demo`: a population of bouncing cubes expanded by a streaming mesh.

use std::path::PathBuf;

use clap::Parser;
use glam::{Mat4, Quat, Vec3};
use multimesh::{
    gpu::{
        device::GpuDevice, headless::HeadlessDevice, render_context::RenderContext,
        shader_composer::EXPAND_INSTANCES, wgpu_device::WgpuDevice,
    },
    InstanceData, InstanceId, MeshVertex, MultiMesh, MultiMeshError, Options, TemplateMesh,
};
use rand::Rng;

/// Half-extent of the box the bodies bounce around in.
const BOUNDS: f32 = 64.0;
const MAX_SPEED: f32 = 4.0;
const FRAME_DT: f32 = 1.0 / 60.0;

/// Drive a streaming mesh of bouncing cubes without a window.
#[derive(Parser, Debug)]
#[command(name = "multimesh-demo", version)]
struct Args {
    /// Number of cube instances.
    #[arg(short, long, default_value_t = 2048)]
    instances: usize,
    /// Frames to simulate.
    #[arg(short, long, default_value_t = 600)]
    frames: u64,
    /// Options TOML file.
    #[arg(short, long)]
    options: Option<PathBuf>,
    /// Skip adapter selection and expand on the CPU.
    #[arg(long)]
    cpu: bool,
}

struct Body {
    id: InstanceId,
    position: Vec3,
    velocity: Vec3,
    rotation: Quat,
    spin: Vec3,
}

impl Body {
    fn step(&mut self, dt: f32) {
        self.position += self.velocity * dt;
        for axis in 0..3 {
            if self.position[axis].abs() > BOUNDS {
                self.position[axis] = self.position[axis].clamp(-BOUNDS, BOUNDS);
                self.velocity[axis] = -self.velocity[axis];
            }
        }
        self.rotation = (Quat::from_scaled_axis(self.spin * dt) * self.rotation).normalize();
    }

    fn transform(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }
}

/// Unit cube, 4 vertices per face so each face keeps a flat normal.
fn cube() -> TemplateMesh {
    let faces = [
        (Vec3::X, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z),
        (Vec3::Y, Vec3::Z),
        (Vec3::NEG_Y, Vec3::X),
        (Vec3::Z, Vec3::X),
        (Vec3::NEG_Z, Vec3::Y),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u) in faces {
        let v = normal.cross(u);
        let base = vertices.len() as u32;
        for (su, sv, uv) in [
            (-1.0, -1.0, [0.0, 1.0]),
            (1.0, -1.0, [1.0, 1.0]),
            (1.0, 1.0, [1.0, 0.0]),
            (-1.0, 1.0, [0.0, 0.0]),
        ] {
            let corner = (normal + u * su + v * sv) * 0.5;
            vertices.push(MeshVertex::new(corner.to_array(), normal.to_array(), uv));
        }
        indices.extend([0, 1, 2, 0, 2, 3].map(|i| base + i));
    }
    TemplateMesh::new(vertices, indices)
}

fn random_vec(rng: &mut impl Rng, extent: f32) -> Vec3 {
    Vec3::new(
        rng.random_range(-extent..=extent),
        rng.random_range(-extent..=extent),
        rng.random_range(-extent..=extent),
    )
}

fn spawn<D: GpuDevice>(mesh: &mut MultiMesh<D>, count: usize) -> Vec<Body> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| {
            let mut body = Body {
                id: InstanceId(0),
                position: random_vec(&mut rng, BOUNDS),
                velocity: random_vec(&mut rng, MAX_SPEED),
                rotation: Quat::IDENTITY,
                spin: random_vec(&mut rng, 1.0),
            };
            let color = [rng.random(), rng.random(), rng.random(), 1.0];
            body.id = mesh.add_instance(InstanceData::new(body.transform()).with_color(color));
            body
        })
        .collect()
}

fn run<D: GpuDevice>(device: &D, args: &Args, options: &Options) -> Result<(), MultiMeshError> {
    let mut mesh = MultiMesh::new(device, &cube(), &EXPAND_INSTANCES, options)?;
    let mut bodies = spawn(&mut mesh, args.instances);

    for frame in 0..args.frames {
        for body in &mut bodies {
            body.step(FRAME_DT);
            let _ = mesh.update_transform(body.id, body.transform());
        }
        let stats = mesh.update(device)?;
        if frame % 60 == 0 || stats.reallocations > 0 {
            log::info!("{stats}");
        }
    }

    for (label, used, allocated) in mesh.buffer_info() {
        log::info!("{label}: {used} / {allocated} bytes");
    }
    mesh.teardown();
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let options = match &args.options {
        Some(path) => match Options::load(path) {
            Ok(options) => options,
            Err(e) => {
                log::error!("{}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Options::default(),
    };

    let result = if args.cpu {
        run(&HeadlessDevice::new(), &args, &options)
    } else {
        match pollster::block_on(RenderContext::new_headless())
            .map_err(MultiMeshError::from)
            .and_then(|context| WgpuDevice::new(context).map_err(MultiMeshError::from))
        {
            Ok(device) => run(&device, &args, &options),
            Err(e) => {
                log::warn!("no GPU available ({e}), expanding on the CPU");
                run(&HeadlessDevice::new(), &args, &options)
            }
        }
    };

    if let Err(e) = result {
        log::error!("{e}");
        std::process::exit(1);
    }
}
