use criterion::{criterion_group, criterion_main, Criterion};
use dyn_stack::{DynStack, GlobalMemBuffer, ReborrowMut};
use simdlib::{
    bgr_to_lab_with, bgra_to_lab_with, quantize_linear_with, quantized_add_with, Activation, ConvParam, Isa,
    MergConvParam, SynetQuantizedMergedConvolution,
};

pub fn criterion_benchmark(c: &mut Criterion) {
    let (width, height) = (1920, 1080);
    let bgra = vec![0x5a_u8; width * height * 4];
    let mut lab = vec![0u8; width * height * 3];
    let src = vec![0.25_f32; width * height];
    let bytes = vec![0x80_u8; width * height];
    let mut dst = vec![0u8; width * height];

    for isa in Isa::available() {
        c.bench_function(&format!("{}-bgr-to-lab-{}×{}", isa, width, height), |b| {
            b.iter(|| bgr_to_lab_with(isa, &bgra, width * 3, width, height, &mut lab, width * 3).unwrap())
        });
        c.bench_function(&format!("{}-bgra-to-lab-{}×{}", isa, width, height), |b| {
            b.iter(|| bgra_to_lab_with(isa, &bgra, width * 4, width, height, &mut lab, width * 3).unwrap())
        });
        c.bench_function(&format!("{}-quantize-{}", isa, src.len()), |b| {
            b.iter(|| quantize_linear_with(isa, &src, 64.0, 128, &mut dst).unwrap())
        });
        c.bench_function(&format!("{}-quantized-add-{}", isa, bytes.len()), |b| {
            b.iter(|| {
                quantized_add_with(isa, &bytes, -128, 0.02, &bytes, -100, 0.03, 40.0, 120, &mut dst).unwrap()
            })
        });
    }

    // mobilenet v2 style inverted residual blocks
    for (channels, size, inner) in [(24, 56, 144), (32, 28, 192), (96, 14, 576)] {
        let dw = ConvParam::depthwise(inner, size, size, 3, 3)
            .with_pad([1; 4])
            .with_activation(Activation::Relu);
        let convs = [
            ConvParam::new(channels, size, size, inner, 1, 1).with_activation(Activation::Relu),
            dw,
            ConvParam::new(inner, size, size, channels, 1, 1),
        ];
        let param = MergConvParam::new(1, &convs, true).unwrap();
        let weight: Vec<Vec<i8>> = convs.iter().map(|conv| vec![3; conv.weight_size()]).collect();
        let weight_scale: Vec<Vec<f32>> = convs.iter().map(|conv| vec![0.002; conv.dst_c]).collect();
        let bias: Vec<Vec<i32>> = convs.iter().map(|conv| vec![-100; conv.dst_c]).collect();
        let weight: Vec<&[i8]> = weight.iter().map(|w| &**w).collect();
        let weight_scale: Vec<&[f32]> = weight_scale.iter().map(|w| &**w).collect();
        let bias: Vec<&[i32]> = bias.iter().map(|b| &**b).collect();

        let src = vec![0x70_u8; convs[0].src_size()];
        let mut dst = vec![0u8; convs[2].dst_size()];

        for isa in Isa::available() {
            let mut conv = SynetQuantizedMergedConvolution::init_with(isa, param).unwrap();
            conv.set_params(&[0.03, 0.05, 0.05, 0.04, 0.06], &[120, 0, 0, 128, 125], &weight, &weight_scale, &bias)
                .unwrap();
            let mut mem = GlobalMemBuffer::new(conv.forward_req().unwrap());
            let mut stack = DynStack::new(&mut mem);
            c.bench_function(&format!("{}-merged-cdc-{}×{}×{}-{}", isa, channels, size, size, inner), |b| {
                b.iter(|| conv.forward(&src, stack.rb_mut(), &mut dst).unwrap())
            });
        }
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
