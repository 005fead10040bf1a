//! Convolution shape descriptions shared by the convolution kernels.
//!
//! Tensors are NHWC, weights HWIO (`[kernel_y][kernel_x][src_c / group][dst_c]`).

use crate::{Error, Result};

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum Activation {
    #[default]
    Identity,
    Relu,
    RestrictRange {
        lower: f32,
        upper: f32,
    },
}

impl Activation {
    /// Range of real values the activation lets through.
    #[inline]
    pub fn range(self) -> (f32, f32) {
        match self {
            Activation::Identity => (f32::NEG_INFINITY, f32::INFINITY),
            Activation::Relu => (0.0, f32::INFINITY),
            Activation::RestrictRange { lower, upper } => (lower, upper),
        }
    }

    #[inline]
    pub fn apply(self, value: f32) -> f32 {
        let (lower, upper) = self.range();
        value.max(lower).min(upper)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ConvParam {
    pub src_c: usize,
    pub src_h: usize,
    pub src_w: usize,
    pub dst_c: usize,
    pub dst_h: usize,
    pub dst_w: usize,
    pub kernel_y: usize,
    pub kernel_x: usize,
    pub dilation_y: usize,
    pub dilation_x: usize,
    pub stride_y: usize,
    pub stride_x: usize,
    pub pad_y: usize,
    pub pad_x: usize,
    pub pad_h: usize,
    pub pad_w: usize,
    pub group: usize,
    pub activation: Activation,
}

fn out_size(src: usize, pad: usize, kernel: usize, dilation: usize, stride: usize) -> Option<usize> {
    let extent = dilation.checked_mul(kernel.checked_sub(1)?)? + 1;
    let total = src + pad;
    if total < extent || stride == 0 {
        None
    } else {
        Some((total - extent) / stride + 1)
    }
}

impl ConvParam {
    /// Convolution with unit stride and dilation, no padding, one group.
    pub fn new(
        src_c: usize,
        src_h: usize,
        src_w: usize,
        dst_c: usize,
        kernel_y: usize,
        kernel_x: usize,
    ) -> Self {
        let mut p = ConvParam {
            src_c,
            src_h,
            src_w,
            dst_c,
            kernel_y,
            kernel_x,
            dilation_y: 1,
            dilation_x: 1,
            stride_y: 1,
            stride_x: 1,
            group: 1,
            ..Default::default()
        };
        p.update_dst();
        p
    }

    /// Depthwise convolution: one group per channel.
    pub fn depthwise(channels: usize, src_h: usize, src_w: usize, kernel_y: usize, kernel_x: usize) -> Self {
        ConvParam::new(channels, src_h, src_w, channels, kernel_y, kernel_x).with_group(channels)
    }

    pub fn with_stride(mut self, stride_y: usize, stride_x: usize) -> Self {
        self.stride_y = stride_y;
        self.stride_x = stride_x;
        self.update_dst();
        self
    }

    /// Padding as `[top, left, bottom, right]`.
    pub fn with_pad(mut self, pad: [usize; 4]) -> Self {
        [self.pad_y, self.pad_x, self.pad_h, self.pad_w] = pad;
        self.update_dst();
        self
    }

    pub fn with_dilation(mut self, dilation_y: usize, dilation_x: usize) -> Self {
        self.dilation_y = dilation_y;
        self.dilation_x = dilation_x;
        self.update_dst();
        self
    }

    pub fn with_group(mut self, group: usize) -> Self {
        self.group = group;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    fn update_dst(&mut self) {
        self.dst_h = out_size(
            self.src_h,
            self.pad_y + self.pad_h,
            self.kernel_y,
            self.dilation_y,
            self.stride_y,
        )
        .unwrap_or(0);
        self.dst_w = out_size(
            self.src_w,
            self.pad_x + self.pad_w,
            self.kernel_x,
            self.dilation_x,
            self.stride_x,
        )
        .unwrap_or(0);
    }

    pub fn validate(&self) -> Result<()> {
        let sizes = [
            self.src_c,
            self.src_h,
            self.src_w,
            self.dst_c,
            self.kernel_y,
            self.kernel_x,
            self.dilation_y,
            self.dilation_x,
            self.stride_y,
            self.stride_x,
            self.group,
        ];
        if sizes.contains(&0) {
            return Err(Error::InvalidParam("convolution sizes must be non-zero"));
        }
        if self.src_c % self.group != 0 || self.dst_c % self.group != 0 {
            return Err(Error::InvalidParam("channels must be divisible by group"));
        }
        let dst_h = out_size(
            self.src_h,
            self.pad_y + self.pad_h,
            self.kernel_y,
            self.dilation_y,
            self.stride_y,
        );
        let dst_w = out_size(
            self.src_w,
            self.pad_x + self.pad_w,
            self.kernel_x,
            self.dilation_x,
            self.stride_x,
        );
        if dst_h != Some(self.dst_h) || dst_w != Some(self.dst_w) {
            return Err(Error::InvalidParam("output size does not match geometry"));
        }
        if let Activation::RestrictRange { lower, upper } = self.activation {
            if !(lower <= upper) {
                return Err(Error::InvalidParam("activation range is empty"));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn is_depthwise(&self) -> bool {
        self.group == self.src_c && self.group == self.dst_c
    }

    #[inline]
    pub fn is_kernel(&self, k: usize) -> bool {
        self.kernel_y == k && self.kernel_x == k
    }

    #[inline]
    pub fn is_stride(&self, s: usize) -> bool {
        self.stride_y == s && self.stride_x == s
    }

    #[inline]
    pub fn is_dilation(&self, d: usize) -> bool {
        self.dilation_y == d && self.dilation_x == d
    }

    #[inline]
    pub fn is_pad(&self, p: usize) -> bool {
        self.pad_y == p && self.pad_x == p && self.pad_h == p && self.pad_w == p
    }

    /// Pointwise convolution: 1x1 kernel, unit stride, no padding.
    #[inline]
    pub fn is_1x1(&self) -> bool {
        self.is_kernel(1) && self.is_stride(1) && self.is_pad(0) && self.is_dilation(1)
    }

    #[inline]
    pub fn src_size(&self) -> usize {
        self.src_h * self.src_w * self.src_c
    }

    #[inline]
    pub fn dst_size(&self) -> usize {
        self.dst_h * self.dst_w * self.dst_c
    }

    /// Number of weights, HWIO.
    #[inline]
    pub fn weight_size(&self) -> usize {
        self.kernel_y * self.kernel_x * self.src_c / self.group * self.dst_c
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergConvKind {
    /// input 1x1, depthwise, output 1x1
    Cdc,
    /// input 1x1, depthwise
    Cd,
    /// depthwise, output 1x1
    Dc,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MergConvParam {
    pub batch: usize,
    pub conv: [ConvParam; 3],
    pub count: usize,
    pub add: bool,
}

impl MergConvParam {
    pub fn new(batch: usize, convs: &[ConvParam], add: bool) -> Result<Self> {
        if batch == 0 {
            return Err(Error::InvalidParam("batch must be non-zero"));
        }
        if convs.len() != 2 && convs.len() != 3 {
            return Err(Error::InvalidParam("merged convolution needs 2 or 3 stages"));
        }
        for conv in convs {
            conv.validate()?;
        }
        for pair in convs.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.dst_c != b.src_c || a.dst_h != b.src_h || a.dst_w != b.src_w {
                return Err(Error::InvalidParam("merged convolution stages do not chain"));
            }
        }

        let pointwise = |p: &ConvParam| p.is_1x1() && p.group == 1;
        let depthwise = |p: &ConvParam| p.is_depthwise() && p.is_dilation(1);
        let layout_ok = match convs {
            [c0, d, c1] => pointwise(c0) && depthwise(d) && pointwise(c1),
            [c0, d] if pointwise(c0) => depthwise(d),
            [d, c1] => depthwise(d) && pointwise(c1),
            _ => false,
        };
        if !layout_ok {
            return Err(Error::InvalidParam(
                "merged convolution must be 1x1+depthwise(+1x1) or depthwise+1x1",
            ));
        }

        let mut conv = [ConvParam::default(); 3];
        conv[..convs.len()].copy_from_slice(convs);
        let param = MergConvParam {
            batch,
            conv,
            count: convs.len(),
            add,
        };

        if add {
            let (first, last) = (param.first(), param.last());
            if param.kind() != MergConvKind::Cdc
                || first.src_c != last.dst_c
                || first.src_h != last.dst_h
                || first.src_w != last.dst_w
            {
                return Err(Error::InvalidParam(
                    "residual add needs a 1x1+depthwise+1x1 chain with equal input and output shapes",
                ));
            }
        }
        Ok(param)
    }

    pub fn kind(&self) -> MergConvKind {
        match self.count {
            3 => MergConvKind::Cdc,
            _ if self.conv[0].is_depthwise() && !self.conv[0].is_1x1() => MergConvKind::Dc,
            _ if self.conv[1].is_depthwise() => MergConvKind::Cd,
            _ => MergConvKind::Dc,
        }
    }

    #[inline]
    pub fn convs(&self) -> &[ConvParam] {
        &self.conv[..self.count]
    }

    #[inline]
    pub fn first(&self) -> &ConvParam {
        &self.conv[0]
    }

    #[inline]
    pub fn last(&self) -> &ConvParam {
        &self.conv[self.count - 1]
    }

    /// Index of the depthwise stage.
    #[inline]
    pub fn depthwise_index(&self) -> usize {
        match self.kind() {
            MergConvKind::Dc => 0,
            _ => 1,
        }
    }

    #[inline]
    pub fn depthwise(&self) -> &ConvParam {
        &self.conv[self.depthwise_index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dst_size() {
        let p = ConvParam::new(8, 10, 12, 16, 3, 3).with_pad([1, 1, 1, 1]);
        assert_eq!((p.dst_h, p.dst_w), (10, 12));
        assert!(p.validate().is_ok());

        let p = ConvParam::new(8, 10, 12, 16, 3, 3).with_stride(2, 2);
        assert_eq!((p.dst_h, p.dst_w), (4, 5));

        let p = ConvParam::new(8, 10, 12, 16, 3, 3).with_dilation(2, 2);
        assert_eq!((p.dst_h, p.dst_w), (6, 8));

        let p = ConvParam::new(8, 2, 2, 16, 3, 3);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_validate() {
        let mut p = ConvParam::new(8, 10, 12, 16, 3, 3);
        p.dst_h += 1;
        assert!(p.validate().is_err());

        let p = ConvParam::new(6, 10, 12, 16, 3, 3).with_group(4);
        assert!(p.validate().is_err());

        let p = ConvParam::new(8, 4, 4, 8, 1, 1).with_activation(Activation::RestrictRange {
            lower: 1.0,
            upper: 0.0,
        });
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_predicates() {
        let p = ConvParam::depthwise(32, 10, 10, 3, 3).with_pad([1, 1, 1, 1]);
        assert!(p.is_depthwise());
        assert!(p.is_kernel(3));
        assert!(p.is_pad(1));
        assert!(!p.is_1x1());
        assert_eq!(p.weight_size(), 9 * 32);

        let p = ConvParam::new(32, 10, 10, 64, 1, 1);
        assert!(p.is_1x1());
        assert!(!p.is_depthwise());
        assert_eq!(p.weight_size(), 32 * 64);
    }

    #[test]
    fn test_merg_conv_param() {
        let c0 = ConvParam::new(16, 8, 8, 32, 1, 1);
        let d = ConvParam::depthwise(32, 8, 8, 3, 3).with_pad([1, 1, 1, 1]);
        let c1 = ConvParam::new(32, 8, 8, 16, 1, 1);

        let p = MergConvParam::new(1, &[c0, d, c1], true).unwrap();
        assert_eq!(p.kind(), MergConvKind::Cdc);
        assert_eq!(p.depthwise_index(), 1);

        let p = MergConvParam::new(2, &[c0, d], false).unwrap();
        assert_eq!(p.kind(), MergConvKind::Cd);
        assert_eq!(p.last().dst_c, 32);

        let d0 = ConvParam::depthwise(16, 8, 8, 3, 3).with_pad([1, 1, 1, 1]);
        let c2 = ConvParam::new(16, 8, 8, 24, 1, 1);
        let p = MergConvParam::new(1, &[d0, c2], false).unwrap();
        assert_eq!(p.kind(), MergConvKind::Dc);
        assert_eq!(p.depthwise_index(), 0);

        assert!(MergConvParam::new(0, &[c0, d, c1], false).is_err());
        assert!(MergConvParam::new(1, &[c0], false).is_err());
        assert!(MergConvParam::new(1, &[c0, d], true).is_err());
        assert!(MergConvParam::new(1, &[d, c0], false).is_err());
        assert!(MergConvParam::new(1, &[c0, c1], false).is_err());

        let c3 = ConvParam::new(32, 8, 8, 24, 1, 1);
        assert!(MergConvParam::new(1, &[c0, d, c3], false).is_ok());
        assert!(MergConvParam::new(1, &[c0, d, c3], true).is_err());
    }
}
