// tests/hiz.rs
// Hi-Z pyramid on the GPU vs the CPU reduction, plus barrier ordering

use ibl_temporal::core::barriers::StateTracker;
use ibl_temporal::core::hiz::{build_pyramid_cpu, HIZ_FORMAT};
use ibl_temporal::core::readback::read_texture_mip_f32;
use ibl_temporal::{
    GpuContext, HiZConfig, HiZPass, HiZReduction, PipelineRegistry, ResourceState, TextureSpec,
    TrackedTexture,
};

fn create_context() -> Option<GpuContext> {
    let _ = env_logger::builder().is_test(true).try_init();
    GpuContext::new().ok()
}

fn float_depth(ctx: &GpuContext, width: u32, height: u32, data: &[f32]) -> TrackedTexture {
    let depth = TrackedTexture::new(
        &ctx.device,
        TextureSpec::d2("hiz_test.depth", width, height, HIZ_FORMAT)
            .with_usage(wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST),
    );
    ctx.queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: depth.texture(),
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(data),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    depth
}

fn build(
    ctx: &GpuContext,
    resolution: (u32, u32),
    config: HiZConfig,
    depth: &TrackedTexture,
) -> (HiZPass, StateTracker) {
    let mut registry = PipelineRegistry::new(ctx.device.clone());
    let pass = HiZPass::new(&mut registry, resolution, &config).unwrap();
    let mut tracker = StateTracker::new();
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    pass.execute(&ctx.device, &mut encoder, &mut tracker, depth);
    ctx.submit_and_wait(encoder);
    (pass, tracker)
}

#[test]
fn constant_depth_gives_constant_pyramid() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping Hi-Z test: no adapter");
        return;
    };
    let (w, h) = (13u32, 7u32);
    let depth = float_depth(&ctx, w, h, &vec![0.5; (w * h) as usize]);
    let config = HiZConfig {
        reduction: HiZReduction::Min,
        mip_count: Some(4),
    };
    let (pass, _) = build(&ctx, (w, h), config, &depth);
    assert_eq!(pass.mip_count(), 4);
    for mip in 0..4 {
        let level = read_texture_mip_f32(&ctx.device, &ctx.queue, pass.hiz(), mip).unwrap();
        assert!(level.iter().all(|&d| d == 0.5), "mip {mip}: {level:?}");
    }
}

#[test]
fn varying_depth_matches_cpu_reduction() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping Hi-Z test: no adapter");
        return;
    };
    let (w, h) = (13u32, 7u32);
    let data: Vec<f32> = (0..w * h)
        .map(|i| ((i * 37) % 101) as f32 / 101.0)
        .collect();
    let depth = float_depth(&ctx, w, h, &data);

    for reduction in [HiZReduction::Min, HiZReduction::Max] {
        let config = HiZConfig {
            reduction,
            mip_count: None,
        };
        let (pass, _) = build(&ctx, (w, h), config, &depth);
        let expected = build_pyramid_cpu(&data, (w, h), pass.mip_count(), reduction);
        for (mip, level) in expected.iter().enumerate() {
            let gpu = read_texture_mip_f32(&ctx.device, &ctx.queue, pass.hiz(), mip as u32)
                .unwrap();
            assert_eq!(&gpu, level, "{reduction:?} mip {mip}");
        }
        // The coarsest texel bounds the whole buffer
        let top = expected.last().unwrap()[0];
        let bound = match reduction {
            HiZReduction::Min => data.iter().copied().fold(f32::MAX, f32::min),
            HiZReduction::Max => data.iter().copied().fold(f32::MIN, f32::max),
        };
        assert_eq!(top, bound);
    }
}

#[test]
fn barriers_are_recorded_per_mip_in_order() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping Hi-Z test: no adapter");
        return;
    };
    let (w, h) = (16u32, 16u32);
    let depth = float_depth(&ctx, w, h, &vec![1.0; 256]);
    let (pass, tracker) = build(&ctx, (w, h), HiZConfig::default(), &depth);
    let hiz = pass.hiz().id();
    let mips = pass.mip_count();
    assert_eq!(mips, 5);

    let log = tracker.log();
    assert_eq!(log[0].label, "hiz.begin");
    assert!(log[0].contains(depth.id(), 0, ResourceState::ShaderRead));
    for mip in 0..mips {
        assert!(log[0].contains(hiz, mip, ResourceState::StorageWrite));
    }
    let per_mip: Vec<usize> = (0..mips)
        .map(|mip| {
            let label = format!("hiz.mip{mip}");
            let index = log.iter().position(|b| b.label == label).unwrap();
            assert!(log[index].contains(hiz, mip, ResourceState::ShaderRead));
            index
        })
        .collect();
    assert!(per_mip.windows(2).all(|pair| pair[0] < pair[1]));
    for mip in 0..mips {
        assert_eq!(tracker.state(hiz, mip), ResourceState::ShaderRead);
    }
}

#[test]
fn depth_buffer_source_is_copied_into_mip0() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping Hi-Z test: no adapter");
        return;
    };
    let (w, h) = (9u32, 6u32);
    let depth = TrackedTexture::new(
        &ctx.device,
        TextureSpec::d2("hiz_test.depth32", w, h, wgpu::TextureFormat::Depth32Float).with_usage(
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        ),
    );
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    {
        let view = depth.mip_view(0);
        let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("hiz_test.clear"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(0.25),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }
    ctx.submit_and_wait(encoder);

    let mut registry = PipelineRegistry::new(ctx.device.clone());
    let pass = HiZPass::new(&mut registry, (w, h), &HiZConfig::default()).unwrap();
    let mut tracker = StateTracker::new();
    tracker.assume_state(&depth, 0..1, ResourceState::RenderTarget);
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    pass.execute(&ctx.device, &mut encoder, &mut tracker, &depth);
    ctx.submit_and_wait(encoder);

    for mip in 0..pass.mip_count() {
        let level = read_texture_mip_f32(&ctx.device, &ctx.queue, pass.hiz(), mip).unwrap();
        assert!(
            level.iter().all(|&d| (d - 0.25).abs() < 1e-6),
            "mip {mip}: {level:?}"
        );
    }
}

#[test]
fn zero_resolution_is_rejected() {
    let Some(ctx) = create_context() else {
        eprintln!("Skipping Hi-Z test: no adapter");
        return;
    };
    let mut registry = PipelineRegistry::new(ctx.device.clone());
    let err = HiZPass::new(&mut registry, (0, 4), &HiZConfig::default()).err();
    assert_eq!(err.map(|e| e.category()), Some("Config"));
}
