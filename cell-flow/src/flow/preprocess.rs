//! 预处理滤波链.

use ndarray::{Array2, ArrayView2};

use super::filter;
use crate::params::ProcessParams;

/// 按 [`ProcessParams`] 处理单帧.
///
/// 顺序固定为: 高斯-拉普拉斯 -> 高斯模糊 -> 中值滤波 -> 归一化 -> 取绝对值并饱和.
/// 值为 `None` 的步骤被跳过.
pub fn preprocess_frame(frame: ArrayView2<f32>, params: &ProcessParams) -> Array2<f32> {
    let mut img = frame.to_owned();
    if let Some(p) = params.laplace {
        img = filter::laplace_of_gaussian(img.view(), p.sigma);
    }
    if let Some(p) = params.gauss {
        img = filter::gaussian_blur(img.view(), p.ksize, p.sigma);
    }
    if let Some(p) = params.median {
        img = filter::median(img.view(), p.ksize);
    }
    if let Some(p) = params.normalize {
        img = filter::normalize_min_max(img.view(), p.alpha, p.beta);
    }
    if params.convert {
        img = filter::convert_scale_abs(img.view());
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{MedianParams, NormalizeParams};

    #[test]
    fn test_identity_chain() {
        let frame = Array2::from_shape_fn((4, 4), |(y, x)| (y * 4 + x) as f32 - 3.0);
        assert_eq!(
            preprocess_frame(frame.view(), &ProcessParams::identity()),
            frame
        );
    }

    #[test]
    fn test_default_chain_output_range() {
        let frame = Array2::from_shape_fn((16, 16), |(y, x)| ((x * 7 + y * 3) % 11) as f32 * 100.0);
        let out = preprocess_frame(frame.view(), &ProcessParams::default());
        assert_eq!(out.dim(), (16, 16));
        assert!(out.iter().all(|&v| (0.0..=255.0).contains(&v) && v.fract() == 0.0));
    }

    #[test]
    fn test_steps_run_in_order() {
        // 先中值去掉孤立点, 再归一化: 常数图像 -> alpha.
        let mut frame = Array2::from_elem((5, 5), 4.0f32);
        frame[(2, 2)] = 50.0;
        let params = ProcessParams {
            median: Some(MedianParams { ksize: 3 }),
            normalize: Some(NormalizeParams {
                alpha: 7.0,
                beta: 9.0,
            }),
            ..ProcessParams::identity()
        };
        let out = preprocess_frame(frame.view(), &params);
        assert!(out.iter().all(|&v| v == 7.0));
    }
}
