use criterion::{criterion_group, criterion_main, Criterion};
use dyn_stack::{DynStack, GlobalMemBuffer, ReborrowMut};
use nalgebra::DMatrix;
use simdlib::{ConvParam, Isa, Parallelism, WinogradConvolution};

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut shapes = vec![];
    let mut push = |batch, channels, size, kernel_y, kernel_x| {
        shapes.push((batch, channels, size, kernel_y, kernel_x));
    };
    push(1, 64, 56, 3, 3);
    push(1, 128, 28, 3, 3);
    push(4, 256, 14, 3, 3);
    push(16, 64, 7, 3, 3);
    push(1, 64, 56, 1, 3);
    push(1, 32, 56, 1, 5);
    push(1, 64, 28, 2, 2);

    for (batch, channels, size, kernel_y, kernel_x) in shapes {
        let p = ConvParam::new(channels, size, size, channels, kernel_y, kernel_x).with_pad([
            kernel_y / 2,
            kernel_x / 2,
            (kernel_y - 1) / 2,
            (kernel_x - 1) / 2,
        ]);
        let src = vec![0.5_f32; batch * p.src_size()];
        let weight = vec![0.01_f32; p.weight_size()];
        let mut dst = vec![0.0_f32; batch * p.dst_size()];
        let label = format!("{}×{}×{}×{}-{}x{}", batch, channels, size, size, kernel_y, kernel_x);

        for isa in Isa::available() {
            let mut conv = WinogradConvolution::new_with(isa, batch, p).unwrap();
            conv.set_params(&weight, None).unwrap();
            for (par_label, parallelism) in [("st", Parallelism::None), ("mt", Parallelism::Rayon(0))] {
                let mut mem = GlobalMemBuffer::new(conv.forward_req(parallelism).unwrap());
                let mut stack = DynStack::new(&mut mem);
                c.bench_function(
                    &format!("{}-{}-winograd-{:?}-{}", isa, par_label, conv.variant(), label),
                    |b| b.iter(|| conv.forward(&src, stack.rb_mut(), &mut dst, parallelism).unwrap()),
                );
            }
        }

        // im2col product of one image per iteration of the batch
        let cols = DMatrix::<f32>::zeros(p.dst_h * p.dst_w, kernel_y * kernel_x * channels);
        let w = DMatrix::<f32>::zeros(kernel_y * kernel_x * channels, channels);
        let mut out = DMatrix::<f32>::zeros(p.dst_h * p.dst_w, channels);
        c.bench_function(&format!("nalg-im2col-{}", label), |b| {
            b.iter(|| {
                for _ in 0..batch {
                    out = &cols * &w;
                }
            })
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
