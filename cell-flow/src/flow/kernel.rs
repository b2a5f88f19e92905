//! 稠密光流核.

use ndarray::{Array2, Array3, ArrayView2, Axis};

use super::filter::{self, product};
use crate::consts::{COMPONENTS, DX, DY};
use crate::params::FlowParams;

/// 表明一个可以在两帧之间计算稠密光流的对象.
///
/// 实现必须是确定性的: 相同输入总是得到相同输出.
pub trait FlowKernel: Send + Sync {
    /// 计算从 `prev` 到 `next` 的光流, 形状 `(height, width, 2)`,
    /// 最后一维依次为 `dx`, `dy`.
    ///
    /// `prev` 与 `next` 形状必须一致, 否则 panic.
    fn compute(&self, prev: ArrayView2<f32>, next: ArrayView2<f32>, params: &FlowParams)
        -> Array3<f32>;
}

impl<K: FlowKernel + ?Sized> FlowKernel for &K {
    #[inline]
    fn compute(
        &self,
        prev: ArrayView2<f32>,
        next: ArrayView2<f32>,
        params: &FlowParams,
    ) -> Array3<f32> {
        (**self).compute(prev, next, params)
    }
}

/// 金字塔稠密 Lucas–Kanade.
///
/// 自最粗一层开始, 在每层上以 `winsize` 窗口求解局部最小二乘, 迭代
/// `iterations` 次后把结果放大到下一层作为初值. `poly_n` / `poly_sigma`
/// 控制求梯度前的高斯预平滑; [`FlowParams::GAUSSIAN_WINDOW`] 置位时求解窗口
/// 使用高斯加权.
#[derive(Copy, Clone, Debug, Default)]
pub struct DenseLucasKanade;

/// 金字塔上最短边的下限.
const MIN_LEVEL_SIDE: usize = 8;

/// 视为奇异的结构张量行列式 (相对量).
const DET_EPS: f32 = 1e-6;

/// 构建图像金字塔, 第 0 层为原图.
fn pyramid(img: ArrayView2<f32>, params: &FlowParams) -> Vec<Array2<f32>> {
    let scale = params.pyr_scale.clamp(0.1, 0.9);
    let mut ans = vec![img.to_owned()];
    for _ in 0..params.levels {
        let last = &ans[ans.len() - 1];
        let (h, w) = last.dim();
        let (nh, nw) = (
            (h as f32 * scale).round() as usize,
            (w as f32 * scale).round() as usize,
        );
        if nh.min(nw) < MIN_LEVEL_SIDE {
            break;
        }
        let sigma = (1.0 / scale - 1.0).max(0.5);
        let blurred = filter::gaussian_blur(last.view(), 2 * (2.0 * sigma).ceil() as usize + 1, sigma);
        ans.push(filter::resize_bilinear(blurred.view(), (nh, nw)));
    }
    ans
}

/// 求解窗口的一维权重.
fn window(params: &FlowParams) -> Vec<f32> {
    let n = params.winsize.max(3) | 1;
    if params.gaussian_window() {
        filter::gaussian_kernel(n, 0.0)
    } else {
        vec![1.0 / n as f32; n]
    }
}

impl DenseLucasKanade {
    /// 在单层上细化 `(u, v)`.
    fn refine(
        prev: ArrayView2<f32>,
        next: ArrayView2<f32>,
        u: &mut Array2<f32>,
        v: &mut Array2<f32>,
        params: &FlowParams,
    ) {
        let win = window(params);
        let prev = filter::gaussian_blur(prev, params.poly_n, params.poly_sigma);
        let next = filter::gaussian_blur(next, params.poly_n, params.poly_sigma);
        let (ix, iy) = filter::gradients(prev.view());
        let sxx = filter::convolve_separable(product(&ix, &ix).view(), &win);
        let sxy = filter::convolve_separable(product(&ix, &iy).view(), &win);
        let syy = filter::convolve_separable(product(&iy, &iy).view(), &win);

        for _ in 0..params.iterations.max(1) {
            let warped = Array2::from_shape_fn(prev.dim(), |(y, x)| {
                filter::sample_bilinear(next.view(), y as f32 + v[(y, x)], x as f32 + u[(y, x)])
            });
            let it = &warped - &prev;
            let sxt = filter::convolve_separable(product(&ix, &it).view(), &win);
            let syt = filter::convolve_separable(product(&iy, &it).view(), &win);

            for ((p, du), dv) in u.indexed_iter_mut().zip(v.iter_mut()) {
                let (a, b, c) = (sxx[p], sxy[p], syy[p]);
                let det = a * c - b * b;
                if det <= DET_EPS * (a + c).powi(2) || det <= f32::MIN_POSITIVE {
                    continue;
                }
                let (bx, by) = (sxt[p], syt[p]);
                *du -= (c * bx - b * by) / det;
                *dv -= (a * by - b * bx) / det;
            }
        }
    }
}

impl FlowKernel for DenseLucasKanade {
    fn compute(
        &self,
        prev: ArrayView2<f32>,
        next: ArrayView2<f32>,
        params: &FlowParams,
    ) -> Array3<f32> {
        assert_eq!(prev.dim(), next.dim(), "frame shapes differ");
        let prev_pyr = pyramid(prev, params);
        let next_pyr = pyramid(next, params);

        let mut flow: Option<(Array2<f32>, Array2<f32>)> = None;
        for (p, n) in prev_pyr.iter().zip(&next_pyr).rev() {
            let dim = p.dim();
            let (mut u, mut v) = match flow.take() {
                None => (Array2::zeros(dim), Array2::zeros(dim)),
                Some((u, v)) => {
                    let (sy, sx) = (
                        dim.0 as f32 / u.nrows() as f32,
                        dim.1 as f32 / u.ncols() as f32,
                    );
                    (
                        filter::resize_bilinear(u.view(), dim) * sx,
                        filter::resize_bilinear(v.view(), dim) * sy,
                    )
                }
            };
            Self::refine(p.view(), n.view(), &mut u, &mut v, params);
            flow = Some((u, v));
        }

        let (h, w) = prev.dim();
        let mut ans = Array3::zeros((h, w, COMPONENTS));
        if let Some((u, v)) = flow {
            ans.index_axis_mut(Axis(2), DX).assign(&u);
            ans.index_axis_mut(Axis(2), DY).assign(&v);
        }
        ans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn pattern(h: usize, w: usize, shift_x: f32) -> Array2<f32> {
        Array2::from_shape_fn((h, w), |(y, x)| {
            let (y, x) = (y as f32, x as f32 - shift_x);
            100.0 + 40.0 * (TAU * x / 16.0).sin() + 40.0 * (TAU * y / 20.0).cos()
        })
    }

    #[test]
    fn test_identical_frames_have_zero_flow() {
        let img = pattern(32, 32, 0.0);
        let flow = DenseLucasKanade.compute(img.view(), img.view(), &FlowParams::default());
        assert_eq!(flow.dim(), (32, 32, 2));
        assert!(flow.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_recovers_translation() {
        let (prev, next) = (pattern(48, 48, 0.0), pattern(48, 48, 1.0));
        let params = FlowParams {
            levels: 1,
            winsize: 9,
            iterations: 5,
            ..FlowParams::default()
        };
        let flow = DenseLucasKanade.compute(prev.view(), next.view(), &params);
        let inner = flow.slice(ndarray::s![12..36, 12..36, ..]);
        let dx = inner.index_axis(Axis(2), DX).mean().unwrap();
        let dy = inner.index_axis(Axis(2), DY).mean().unwrap();
        assert!((dx - 1.0).abs() < 0.15, "dx = {dx}");
        assert!(dy.abs() < 0.15, "dy = {dy}");
    }

    #[test]
    fn test_pyramid_stops_at_small_levels() {
        let img = Array2::<f32>::zeros((20, 40));
        let params = FlowParams {
            levels: 5,
            ..FlowParams::default()
        };
        let pyr = pyramid(img.view(), &params);
        assert_eq!(pyr.len(), 2);
        assert_eq!(pyr[1].dim(), (10, 20));
    }
}
