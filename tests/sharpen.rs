// tests/sharpen.rs
// Post-resolve sharpen: identity at amount 0, flat regions unchanged at full strength

use half::f16;
use ibl_temporal::core::readback::{read_texture_mip, read_texture_mip_f32};
use ibl_temporal::core::sharpen::SHARPEN_FORMAT;
use ibl_temporal::{
    GpuContext, PipelineRegistry, ResourceState, SharpenConfig, SharpenPass, StateTracker,
    TextureSpec, TrackedTexture,
};

fn create_context() -> Option<GpuContext> {
    let _ = env_logger::builder().is_test(true).try_init();
    GpuContext::new().ok()
}

fn input_texture(ctx: &GpuContext, width: u32, height: u32, rgba: &[f32]) -> TrackedTexture {
    let texture = TrackedTexture::new(
        &ctx.device,
        TextureSpec::d2("sharpen_test.input", width, height, SHARPEN_FORMAT).with_usage(
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
        ),
    );
    let halves: Vec<f16> = rgba.iter().map(|&v| f16::from_f32(v)).collect();
    ctx.queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: texture.texture(),
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(&halves),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(width * 8),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    texture
}

fn run(ctx: &GpuContext, amount: f32, input: &TrackedTexture) -> (SharpenPass, StateTracker) {
    let mut registry = PipelineRegistry::new(ctx.device.clone());
    let pass = SharpenPass::new(
        &mut registry,
        (input.width(), input.height()),
        &SharpenConfig { amount },
    )
    .unwrap();
    let mut tracker = StateTracker::new();
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    pass.execute(&ctx.device, &mut encoder, &mut tracker, input);
    ctx.submit_and_wait(encoder);
    (pass, tracker)
}

#[test]
fn zero_amount_is_identity() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping sharpen test: no adapter");
        return;
    };
    let (w, h) = (11u32, 6u32);
    let rgba: Vec<f32> = (0..w * h)
        .flat_map(|i| [(i % 7) as f32 * 0.125, (i % 3) as f32 * 0.5, 1.5, 0.5])
        .collect();
    let input = input_texture(&ctx, w, h, &rgba);
    let (pass, tracker) = run(&ctx, 0.0, &input);

    let before = read_texture_mip(&ctx.device, &ctx.queue, &input, 0).unwrap();
    let after = read_texture_mip(&ctx.device, &ctx.queue, pass.target(), 0).unwrap();
    assert_eq!(before, after);

    let batch = &tracker.log()[0];
    assert_eq!(batch.label, "sharpen");
    assert!(batch.contains(input.id(), 0, ResourceState::ShaderRead));
    assert!(batch.contains(pass.target().id(), 0, ResourceState::StorageWrite));
}

#[test]
fn flat_image_is_unchanged_at_full_strength() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping sharpen test: no adapter");
        return;
    };
    let rgba = [0.5f32, 0.25, 1.0, 1.0].repeat(8 * 8);
    let input = input_texture(&ctx, 8, 8, &rgba);
    let (pass, _) = run(&ctx, 1.0, &input);
    let out = read_texture_mip_f32(&ctx.device, &ctx.queue, pass.target(), 0).unwrap();
    for (a, b) in out.iter().zip(&rgba) {
        assert!((a - b).abs() < 1e-3, "{a} vs {b}");
    }
}

#[test]
fn sharpening_increases_edge_contrast() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping sharpen test: no adapter");
        return;
    };
    // Left half 0.25, right half 0.75
    let (w, h) = (8u32, 4u32);
    let rgba: Vec<f32> = (0..w * h)
        .flat_map(|i| {
            let v = if i % w < w / 2 { 0.25 } else { 0.75 };
            [v, v, v, 1.0]
        })
        .collect();
    let input = input_texture(&ctx, w, h, &rgba);
    let (pass, _) = run(&ctx, 1.0, &input);
    let out = read_texture_mip_f32(&ctx.device, &ctx.queue, pass.target(), 0).unwrap();

    let texel = |x: u32, y: u32| out[((y * w + x) * 4) as usize];
    let (dark, bright) = (texel(w / 2 - 1, 1), texel(w / 2, 1));
    assert!(dark < 0.25, "dark edge {dark}");
    assert!(bright > 0.75, "bright edge {bright}");
    // Far from the edge the image is flat
    assert!((texel(0, 1) - 0.25).abs() < 1e-3);
    assert!((texel(w - 1, 1) - 0.75).abs() < 1e-3);
}

#[test]
fn amount_is_clamped() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping sharpen test: no adapter");
        return;
    };
    let mut registry = PipelineRegistry::new(ctx.device.clone());
    let mut pass = SharpenPass::new(&mut registry, (4, 4), &SharpenConfig { amount: 3.0 }).unwrap();
    assert_eq!(pass.amount(), 1.0);
    pass.set_amount(-1.0);
    assert_eq!(pass.amount(), 0.0);
    assert!(SharpenPass::new(&mut registry, (0, 4), &SharpenConfig::default()).is_err());
}
