// tests/taa.rs
// Temporal resolve on the GPU: first frame, convergence, blending, reprojection and ring rotation

use glam::{Mat4, Vec2, Vec3};
use half::f16;
use ibl_temporal::core::jitter::JITTER_SEQUENCE_LENGTH;
use ibl_temporal::core::readback::read_texture_mip_f32;
use ibl_temporal::{GpuContext, PipelineRegistry, StateTracker, TaaConfig, TaaPass};

const SIZE: u32 = 8;

fn create_context() -> Option<GpuContext> {
    let _ = env_logger::builder().is_test(true).try_init();
    GpuContext::new().ok()
}

fn write_current(ctx: &GpuContext, taa: &TaaPass, rgba: &[f32]) {
    let halves: Vec<f16> = rgba.iter().map(|&v| f16::from_f32(v)).collect();
    ctx.queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: taa.current_target().texture(),
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(&halves),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(SIZE * 8),
            rows_per_image: Some(SIZE),
        },
        wgpu::Extent3d {
            width: SIZE,
            height: SIZE,
            depth_or_array_layers: 1,
        },
    );
}

fn write_motion(ctx: &GpuContext, taa: &TaaPass, motion: [f32; 2]) {
    let halves: Vec<f16> = motion
        .repeat((SIZE * SIZE) as usize)
        .into_iter()
        .map(f16::from_f32)
        .collect();
    ctx.queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: taa.motion_vectors().texture(),
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(&halves),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(SIZE * 4),
            rows_per_image: Some(SIZE),
        },
        wgpu::Extent3d {
            width: SIZE,
            height: SIZE,
            depth_or_array_layers: 1,
        },
    );
}

fn resolve(ctx: &GpuContext, taa: &mut TaaPass, tracker: &mut StateTracker) -> Vec<f32> {
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    taa.resolve_default(&ctx.device, &mut encoder, tracker);
    ctx.submit_and_wait(encoder);
    // The resolved frame is the history of the next one
    read_texture_mip_f32(&ctx.device, &ctx.queue, taa.history(), 0).unwrap()
}

fn constant(rgb: [f32; 3]) -> Vec<f32> {
    [rgb[0], rgb[1], rgb[2], 1.0].repeat((SIZE * SIZE) as usize)
}

fn checkerboard() -> Vec<f32> {
    (0..SIZE * SIZE)
        .flat_map(|i| {
            let v = ((i % SIZE + i / SIZE) % 2) as f32;
            [v, v, v, 1.0]
        })
        .collect()
}

/// Column ramp `x / SIZE`, exact in f16.
fn column_ramp() -> Vec<f32> {
    (0..SIZE * SIZE)
        .flat_map(|i| {
            let v = (i % SIZE) as f32 / SIZE as f32;
            [v, v, v, 1.0]
        })
        .collect()
}

fn assert_close(out: &[f32], expected: &[f32], what: &str) {
    for (i, (a, b)) in out.iter().zip(expected).enumerate() {
        assert!((a - b).abs() < 2e-3, "{what}: texel {} got {a}, expected {b}", i / 4);
    }
}

fn new_pass(ctx: &GpuContext, config: TaaConfig) -> TaaPass {
    let mut registry = PipelineRegistry::new(ctx.device.clone());
    TaaPass::new(&mut registry, (SIZE, SIZE), config).unwrap()
}

#[test]
fn first_frame_outputs_current() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping TAA test: no adapter");
        return;
    };
    let mut taa = new_pass(&ctx, TaaConfig::default());
    let mut tracker = StateTracker::new();
    assert!(!taa.history_valid());

    let frame = checkerboard();
    write_current(&ctx, &taa, &frame);
    let out = resolve(&ctx, &mut taa, &mut tracker);
    assert_eq!(out, frame);
    assert!(taa.history_valid());
}

#[test]
fn static_image_converges_to_input() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping TAA test: no adapter");
        return;
    };
    let frame = constant([0.75, 0.5, 0.25]);
    for filter_history in [true, false] {
        let config = TaaConfig {
            filter_history,
            ..TaaConfig::default()
        };
        let mut taa = new_pass(&ctx, config);
        let mut tracker = StateTracker::new();
        write_current(&ctx, &taa, &frame);
        for _ in 0..4 {
            let out = resolve(&ctx, &mut taa, &mut tracker);
            assert_eq!(out, frame, "filter_history = {filter_history}");
        }
    }
}

#[test]
fn history_blends_with_current_weight() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping TAA test: no adapter");
        return;
    };
    let config = TaaConfig {
        filter_history: false,
        current_weight: 0.1,
        ..TaaConfig::default()
    };
    let mut taa = new_pass(&ctx, config);
    let mut tracker = StateTracker::new();

    write_current(&ctx, &taa, &constant([0.0; 3]));
    resolve(&ctx, &mut taa, &mut tracker);

    // Every checkerboard neighbourhood spans [0, 1], so the black history survives clamping
    let board = checkerboard();
    write_current(&ctx, &taa, &board);
    let out = resolve(&ctx, &mut taa, &mut tracker);
    for (px, cur) in out.chunks_exact(4).zip(board.chunks_exact(4)) {
        assert!((px[0] - 0.1 * cur[0]).abs() < 1e-3, "{px:?} from {cur:?}");
        assert_eq!(px[3], 1.0);
    }

    // After a reset the next resolve ignores the history again
    taa.reset_history();
    assert!(!taa.history_valid());
    let out = resolve(&ctx, &mut taa, &mut tracker);
    assert_eq!(out, board);
}

#[test]
fn resolve_rotates_targets_and_jitter() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping TAA test: no adapter");
        return;
    };
    let mut taa = new_pass(&ctx, TaaConfig::default());
    let mut tracker = StateTracker::new();
    assert_eq!(taa.jitter_index(), 0);

    let view = Mat4::look_at_rh(Vec3::new(0.0, 1.0, 5.0), Vec3::ZERO, Vec3::Y);
    let proj = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    for frame in 0..JITTER_SEQUENCE_LENGTH {
        assert_eq!(taa.jitter_index(), frame);
        let camera = taa.update_camera(&ctx.queue, view, proj);
        assert_eq!(camera.jitter_ndc, taa.jitter().ndc.to_array());
        assert_eq!(camera.jitter_pixels, taa.jitter().pixels.to_array());

        let written = taa.resolve_target().id();
        let history = taa.history().id();
        let motion = taa.motion_vectors().id();
        taa.resolve(&ctx.device, &mut encoder, &mut tracker, true);
        assert_eq!(taa.history().id(), written);
        assert_eq!(taa.resolve_target().id(), history);
        assert_eq!(taa.previous_motion_vectors().id(), motion);
    }
    ctx.submit_and_wait(encoder);
    assert_eq!(taa.jitter_index(), 0);
    assert_eq!(tracker.log().len(), JITTER_SEQUENCE_LENGTH);
    assert!(tracker.log().iter().all(|b| b.label == "taa.resolve"));
}

#[test]
fn material_uv_unjitters_only_when_enabled() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping TAA test: no adapter");
        return;
    };
    let uv = Vec2::new(0.25, 0.75);
    let plain = new_pass(&ctx, TaaConfig::default());
    assert_eq!(plain.material_uv(uv), uv);

    let config = TaaConfig {
        unjitter_uvs: true,
        ..TaaConfig::default()
    };
    let unjittered = new_pass(&ctx, config);
    let expected = uv - unjittered.jitter().uv;
    assert_eq!(unjittered.material_uv(uv), expected);
    assert_ne!(expected, uv);
}

fn unfiltered(current_weight: f32) -> TaaConfig {
    TaaConfig {
        filter_history: false,
        current_weight,
        ..TaaConfig::default()
    }
}

#[test]
fn motion_vectors_reproject_history() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping TAA test: no adapter");
        return;
    };
    let mut taa = new_pass(&ctx, unfiltered(0.1));
    let mut tracker = StateTracker::new();
    // One pixel to the right, identical in both frames
    let motion = [1.0 / SIZE as f32, 0.0];

    let ramp = column_ramp();
    write_motion(&ctx, &taa, motion);
    write_current(&ctx, &taa, &ramp);
    resolve(&ctx, &mut taa, &mut tracker);

    let board = checkerboard();
    write_motion(&ctx, &taa, motion);
    write_current(&ctx, &taa, &board);
    let out = resolve(&ctx, &mut taa, &mut tracker);

    let expected: Vec<f32> = (0..SIZE * SIZE)
        .flat_map(|i| {
            let (x, y) = (i % SIZE, i / SIZE);
            let cur = ((x + y) % 2) as f32;
            // The last column reprojects past the right edge and keeps the current frame
            let v = if x + 1 < SIZE {
                let hist = (x + 1) as f32 / SIZE as f32;
                0.9 * hist + 0.1 * cur
            } else {
                cur
            };
            [v, v, v, 1.0]
        })
        .collect();
    assert_close(&out, &expected, "shifted history");
}

#[test]
fn off_screen_reprojection_keeps_current_frame() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping TAA test: no adapter");
        return;
    };
    let mut taa = new_pass(&ctx, unfiltered(0.1));
    let mut tracker = StateTracker::new();
    let motion = [2.0, 0.0];

    write_motion(&ctx, &taa, motion);
    write_current(&ctx, &taa, &constant([0.0; 3]));
    resolve(&ctx, &mut taa, &mut tracker);

    let board = checkerboard();
    write_motion(&ctx, &taa, motion);
    write_current(&ctx, &taa, &board);
    let out = resolve(&ctx, &mut taa, &mut tracker);
    assert_close(&out, &board, "off-screen");
}

#[test]
fn disagreeing_velocity_rejects_history() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping TAA test: no adapter");
        return;
    };
    let config = TaaConfig {
        velocity_tolerance_px: 1.0,
        ..unfiltered(0.1)
    };
    let mut taa = new_pass(&ctx, config);
    let mut tracker = StateTracker::new();

    // Previous frame was static
    write_motion(&ctx, &taa, [0.0, 0.0]);
    write_current(&ctx, &taa, &constant([0.0; 3]));
    resolve(&ctx, &mut taa, &mut tracker);

    // Two pixels of motion now, twice the tolerance
    let board = checkerboard();
    write_motion(&ctx, &taa, [2.0 / SIZE as f32, 0.0]);
    write_current(&ctx, &taa, &board);
    let out = resolve(&ctx, &mut taa, &mut tracker);
    assert_close(&out, &board, "velocity rejection");
}
