//! End-to-end frame cycle tests against the recording headless device.

use glam::{Mat4, Vec3};
use multimesh::{
    gpu::{
        device::{BufferKind, DeviceLimits},
        headless::{DeviceEvent, HeadlessDevice},
        shader_composer::EXPAND_INSTANCES,
    },
    renderer::FramePhase,
    InstanceData, InstanceId, MeshVertex, MultiMesh, MultiMeshError, Options, TemplateMesh,
};

const VERTS: usize = 3;

fn triangle() -> TemplateMesh {
    TemplateMesh::new(
        vec![
            MeshVertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
            MeshVertex::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
            MeshVertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
        ],
        vec![0, 1, 2],
    )
}

fn attach(device: &HeadlessDevice) -> MultiMesh<HeadlessDevice> {
    MultiMesh::new(device, &triangle(), &EXPAND_INSTANCES, &Options::default()).unwrap()
}

fn at(x: f32) -> InstanceData {
    InstanceData::new(Mat4::from_translation(Vec3::new(x, 0.0, 0.0)))
}

fn count_events(device: &HeadlessDevice, pred: impl Fn(&DeviceEvent) -> bool) -> usize {
    device.events().iter().filter(|e| pred(e)).count()
}

fn dispatches(device: &HeadlessDevice) -> usize {
    count_events(device, |e| matches!(e, DeviceEvent::Dispatched { .. }))
}

fn created_id(device: &HeadlessDevice, kind: BufferKind) -> u64 {
    device
        .events()
        .iter()
        .rev()
        .find_map(|e| match e {
            DeviceEvent::BufferCreated { id, label, .. } if label == kind.label() => Some(*id),
            _ => None,
        })
        .unwrap()
}

fn output(device: &HeadlessDevice, mesh: &MultiMesh<HeadlessDevice>) -> Vec<MeshVertex> {
    device.read::<MeshVertex>(mesh.published().unwrap().buffer)
}

#[test]
fn empty_set_publishes_zero_vertices() {
    let device = HeadlessDevice::new();
    let mut mesh = attach(&device);

    let stats = mesh.update(&device).unwrap();
    assert_eq!(stats.instance_count, 0);
    assert_eq!(stats.vertex_count, 0);
    assert_eq!(mesh.published().unwrap().vertex_count, 0);
    assert_eq!(dispatches(&device), 0);
}

#[test]
fn initial_capacity_holds_sixteen_without_reallocation() {
    let device = HeadlessDevice::new();
    let mut mesh = attach(&device);
    let created_at_attach =
        count_events(&device, |e| matches!(e, DeviceEvent::BufferCreated { .. }));

    for i in 0..16 {
        let _ = mesh.add_instance(at(i as f32));
    }
    let stats = mesh.update(&device).unwrap();
    assert_eq!(stats.reallocations, 0);
    assert_eq!(stats.vertex_count, 16 * VERTS as u32);
    assert_eq!(
        count_events(&device, |e| matches!(e, DeviceEvent::BufferCreated { .. })),
        created_at_attach
    );
    for kind in [BufferKind::Transform, BufferKind::Color, BufferKind::Output] {
        assert_eq!(mesh.generation(kind), Some(0));
    }
}

#[test]
fn seventeenth_instance_reallocates_each_kind_once() {
    let device = HeadlessDevice::new();
    let mut mesh = attach(&device);
    for i in 0..16 {
        let _ = mesh.add_instance(at(i as f32));
    }
    let _ = mesh.update(&device).unwrap();
    let old: Vec<u64> = [BufferKind::Transform, BufferKind::Color, BufferKind::Output]
        .into_iter()
        .map(|kind| created_id(&device, kind))
        .collect();

    let _ = mesh.add_instance(at(16.0));
    let stats = mesh.update(&device).unwrap();
    assert_eq!(stats.reallocations, 3);
    assert_eq!(stats.total_reallocations, 3);

    for id in old {
        assert_eq!(
            count_events(&device, |e| *e == DeviceEvent::BufferReleased { id }),
            1
        );
    }
    assert!(mesh.capacity(BufferKind::Transform).unwrap() >= 17);
    assert!(mesh.capacity(BufferKind::Color).unwrap() >= 17);
    assert!(mesh.capacity(BufferKind::Output).unwrap() >= 17 * VERTS);
    assert_eq!(device.live_buffers(), 6);

    let published = mesh.published().unwrap();
    assert_eq!(published.vertex_count, 17 * VERTS as u32);
    assert_eq!(published.generation, 1);
}

#[test]
fn reinsert_is_last_write_wins() {
    let device = HeadlessDevice::new();
    let mut mesh = attach(&device);
    let id = InstanceId(42);

    let _ = mesh.insert_instance(id, at(1.0));
    let _ = mesh.update(&device).unwrap();
    assert!(mesh.remove_instance(id));
    let _ = mesh.insert_instance(id, at(5.0));
    let _ = mesh.insert_instance(id, at(9.0));
    let stats = mesh.update(&device).unwrap();

    assert_eq!(stats.instance_count, 1);
    assert_eq!(output(&device, &mesh)[0].position, [9.0, 0.0, 0.0]);
}

#[test]
fn steady_count_keeps_buffer_generation() {
    let device = HeadlessDevice::new();
    let mut mesh = attach(&device);
    let ids: Vec<_> = (0..100).map(|i| mesh.add_instance(at(i as f32))).collect();
    let _ = mesh.update(&device).unwrap();
    let generation = mesh.published().unwrap().generation;
    let first = output(&device, &mesh)[7 * VERTS];
    assert_eq!(first.position, [7.0, 0.0, 0.0]);
    device.clear_events();

    for frame in 0..1000 {
        for (i, id) in ids.iter().enumerate() {
            let _ = mesh.update_transform(*id, Mat4::from_translation(Vec3::new(i as f32, frame as f32, 0.0)));
        }
        let stats = mesh.update(&device).unwrap();
        assert_eq!(stats.reallocations, 0);
    }

    assert_eq!(mesh.published().unwrap().generation, generation);
    let last = output(&device, &mesh)[7 * VERTS];
    assert_eq!(last.position, [7.0, 999.0, 0.0]);
    assert_eq!(last.normal, first.normal);
    assert_eq!(
        count_events(&device, |e| matches!(e, DeviceEvent::BufferCreated { .. })),
        0
    );
    assert_eq!(
        count_events(&device, |e| matches!(e, DeviceEvent::BindingsCreated { .. })),
        0
    );
    assert_eq!(dispatches(&device), 1000);
}

#[test]
fn capacity_never_shrinks() {
    let device = HeadlessDevice::new();
    let mut mesh = attach(&device);
    let mut last = [0usize; 3];
    let mut ids = Vec::new();

    for target in [3usize, 40, 10, 0, 70, 5, 70, 200, 1] {
        while ids.len() < target {
            ids.push(mesh.add_instance(at(ids.len() as f32)));
        }
        while ids.len() > target {
            let _ = mesh.remove_instance(ids.pop().unwrap());
        }
        let _ = mesh.update(&device).unwrap();

        for (slot, kind) in [BufferKind::Transform, BufferKind::Color, BufferKind::Output]
            .into_iter()
            .enumerate()
        {
            let capacity = mesh.capacity(kind).unwrap();
            assert!(capacity >= last[slot], "{kind} shrank");
            last[slot] = capacity;
        }
        assert!(last[0] >= target);
        assert!(last[2] >= target * VERTS);
    }
    assert_eq!(device.out_of_range_accesses(), 0);
    assert_eq!(device.stale_binding_uses(), 0);
}

#[test]
fn expanded_blocks_stay_aligned_with_their_instance() {
    let device = HeadlessDevice::new();
    let mut mesh = attach(&device);
    for i in 0..50 {
        let color = [i as f32 / 50.0, 0.0, 1.0, 1.0];
        let _ = mesh.add_instance(at(i as f32).with_color(color));
    }
    let _ = mesh.update(&device).unwrap();

    let vertices = output(&device, &mesh);
    let mut seen = vec![false; 50];
    for block in vertices.chunks_exact(VERTS).take(50) {
        let x = block[0].position[0];
        let i = x as usize;
        assert_eq!(x, i as f32);
        assert!(!seen[i], "instance {i} expanded twice");
        seen[i] = true;
        for vertex in block {
            assert_eq!(vertex.color, [i as f32 / 50.0, 0.0, 1.0, 1.0]);
        }
    }
    assert!(seen.iter().all(|s| *s));
}

#[test]
fn default_color_fills_uncolored_instances() {
    let device = HeadlessDevice::new();
    let mut options = Options::default();
    options.instancing.default_color = [0.25, 0.5, 0.75, 1.0];
    let mut mesh = MultiMesh::new(&device, &triangle(), &EXPAND_INSTANCES, &options).unwrap();
    let _ = mesh.add_instance(at(0.0));
    let _ = mesh.update(&device).unwrap();
    assert_eq!(output(&device, &mesh)[0].color, [0.25, 0.5, 0.75, 1.0]);
}

#[test]
fn add_then_remove_round_trip() {
    let device = HeadlessDevice::new();
    let mut mesh = attach(&device);
    let id = mesh.add_instance(at(1.0));
    let _ = mesh.update(&device).unwrap();
    assert!(mesh.remove_instance(id));

    let stats = mesh.update(&device).unwrap();
    assert_eq!(stats.instance_count, 0);
    assert_eq!(mesh.published().unwrap().vertex_count, 0);
    assert!(mesh.registry().is_empty());
}

#[test]
fn retain_culls_out_of_bounds_instances() {
    let device = HeadlessDevice::new();
    let mut mesh = attach(&device);
    for i in 0..20 {
        let _ = mesh.add_instance(at(i as f32 * 10.0));
    }
    let removed = mesh.retain(|_, data| data.transform.w_axis.x <= 64.0);
    assert_eq!(removed, 13);
    let stats = mesh.update(&device).unwrap();
    assert_eq!(stats.instance_count, 7);
}

fn released(device: &HeadlessDevice) -> Vec<String> {
    let mut labels = std::collections::HashMap::new();
    let mut order = Vec::new();
    for event in device.events() {
        match event {
            DeviceEvent::BufferCreated { id, label, .. } => {
                let _ = labels.insert(id, label);
            }
            DeviceEvent::BufferReleased { id } => order.push(labels[&id].clone()),
            DeviceEvent::BindingsReleased { .. } => order.push("bindings".to_owned()),
            DeviceEvent::PipelineReleased { .. } => order.push("pipeline".to_owned()),
            _ => {}
        }
    }
    order
}

fn expected_release_order() -> Vec<String> {
    vec![
        BufferKind::Output.label().to_owned(),
        BufferKind::Color.label().to_owned(),
        BufferKind::Transform.label().to_owned(),
        "bindings".to_owned(),
        BufferKind::Params.label().to_owned(),
        BufferKind::TemplateIndices.label().to_owned(),
        BufferKind::TemplateVertices.label().to_owned(),
        "pipeline".to_owned(),
    ]
}

#[test]
fn teardown_releases_in_reverse_order_exactly_once() {
    let device = HeadlessDevice::new();
    let mut mesh = attach(&device);
    let _ = mesh.add_instance(at(0.0));
    let _ = mesh.update(&device).unwrap();

    mesh.teardown();
    mesh.teardown();
    drop(mesh);

    assert_eq!(released(&device), expected_release_order());
    assert_eq!(device.live_buffers(), 0);
}

#[test]
fn drop_without_teardown_releases_everything() {
    let device = HeadlessDevice::new();
    let mut mesh = attach(&device);
    let _ = mesh.add_instance(at(0.0));
    let _ = mesh.update(&device).unwrap();
    drop(mesh);

    assert_eq!(released(&device), expected_release_order());
    assert_eq!(device.live_buffers(), 0);
}

#[test]
fn allocation_failure_keeps_previous_mesh() {
    let device = HeadlessDevice::new();
    let mut mesh = attach(&device);
    for i in 0..16 {
        let _ = mesh.add_instance(at(i as f32));
    }
    let _ = mesh.update(&device).unwrap();
    let before = output(&device, &mesh);

    let _ = mesh.add_instance(at(16.0));
    device.fail_next_allocations(1);
    let err = mesh.update(&device).unwrap_err();
    assert!(matches!(err, MultiMeshError::Device(_)));
    assert_eq!(mesh.phase(), FramePhase::Idle);

    let published = mesh.published().unwrap();
    assert_eq!(published.vertex_count, 16 * VERTS as u32);
    assert_eq!(published.generation, 0);
    assert_eq!(output(&device, &mesh), before);

    let stats = mesh.update(&device).unwrap();
    assert_eq!(stats.instance_count, 17);
    assert_eq!(mesh.published().unwrap().vertex_count, 17 * VERTS as u32);
}

#[test]
fn growth_past_device_limit_is_capacity_exhaustion() {
    // Room for 32 instances of output (3 vertices of 48 bytes each).
    let device = HeadlessDevice::with_limits(DeviceLimits {
        max_storage_binding_size: 32 * 3 * 48,
        ..DeviceLimits::default()
    });
    let mut mesh = attach(&device);
    for i in 0..32 {
        let _ = mesh.add_instance(at(i as f32));
    }
    let _ = mesh.update(&device).unwrap();
    assert_eq!(mesh.capacity(BufferKind::Output), Some(32 * VERTS));

    let _ = mesh.add_instance(at(32.0));
    let err = mesh.update(&device).unwrap_err();
    assert!(matches!(
        err,
        MultiMeshError::CapacityExhaustion {
            kind: BufferKind::Output,
            requested: 99,
            limit: 96,
        }
    ));
    assert_eq!(mesh.capacity(BufferKind::Output), Some(32 * VERTS));
    assert_eq!(mesh.published().unwrap().vertex_count, 32 * VERTS as u32);
    assert_eq!(device.out_of_range_accesses(), 0);
}

#[test]
fn aborted_frame_still_counts_its_reallocations() {
    // Room for 32 instances of output.
    let device = HeadlessDevice::with_limits(DeviceLimits {
        max_storage_binding_size: 32 * 3 * 48,
        ..DeviceLimits::default()
    });
    let mut mesh = attach(&device);
    for i in 0..32 {
        let _ = mesh.add_instance(at(i as f32));
    }
    let stats = mesh.update(&device).unwrap();
    assert_eq!(stats.total_reallocations, 3);

    // Transforms and colors grow to 64, the output cannot.
    let extra = mesh.add_instance(at(32.0));
    assert!(mesh.update(&device).is_err());
    assert_eq!(mesh.generation(BufferKind::Transform), Some(2));
    assert_eq!(mesh.generation(BufferKind::Color), Some(2));
    assert_eq!(mesh.generation(BufferKind::Output), Some(1));
    assert_eq!(mesh.total_reallocations(), 5);

    assert!(mesh.remove_instance(extra));
    let stats = mesh.update(&device).unwrap();
    assert_eq!(stats.reallocations, 0);
    assert_eq!(stats.total_reallocations, 5);
}

#[test]
fn colors_disabled_uses_template_color() {
    let device = HeadlessDevice::new();
    let mut options = Options::default();
    options.instancing.instance_colors = false;
    let mut mesh = MultiMesh::new(&device, &triangle(), &EXPAND_INSTANCES, &options).unwrap();
    let _ = mesh.add_instance(at(0.0).with_color([1.0, 0.0, 0.0, 1.0]));
    let _ = mesh.update(&device).unwrap();

    assert_eq!(mesh.capacity(BufferKind::Color), None);
    assert_eq!(output(&device, &mesh)[0].color, [1.0; 4]);
}

#[test]
fn configure_rejects_malformed_templates() {
    let device = HeadlessDevice::new();
    let empty = MultiMesh::new(
        &device,
        &TemplateMesh::default(),
        &EXPAND_INSTANCES,
        &Options::default(),
    );
    assert!(matches!(empty, Err(MultiMeshError::MissingTemplate)));

    let dangling = TemplateMesh::new(triangle().vertices().to_vec(), vec![0, 1, 7]);
    let result = MultiMesh::new(&device, &dangling, &EXPAND_INSTANCES, &Options::default());
    assert!(matches!(result, Err(MultiMeshError::InvalidTemplate(_))));
    assert_eq!(device.live_buffers(), 0);
}
