//! 二维单帧滤波与插值.
//!
//! 所有函数接收只读视图, 返回新的数组. 边界统一按 "reflect-101"
//! (`dcb|abcd|cba`) 延拓, 与常见图像库的默认行为一致.

use ndarray::{Array2, ArrayView2, Zip};

/// 把越界下标 `i` 按 reflect-101 折回 `[0, n)`.
#[inline]
fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let i = i.rem_euclid(period);
    if i >= n as isize {
        (period - i) as usize
    } else {
        i as usize
    }
}

/// 由核边长推出默认标准差.
#[inline]
pub fn auto_sigma(ksize: usize) -> f32 {
    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// 归一化的一维高斯核. `ksize` 会被调整为不小于 1 的奇数;
/// `sigma <= 0` 时由 [`auto_sigma`] 推出.
pub fn gaussian_kernel(ksize: usize, sigma: f32) -> Vec<f32> {
    let ksize = ksize.max(1) | 1;
    let sigma = if sigma > 0.0 { sigma } else { auto_sigma(ksize) };
    let r = (ksize / 2) as f32;
    let mut k: Vec<f32> = (0..ksize)
        .map(|i| {
            let d = i as f32 - r;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = k.iter().sum();
    k.iter_mut().for_each(|v| *v /= sum);
    k
}

/// 用同一个一维核先沿水平方向, 再沿竖直方向卷积.
pub fn convolve_separable(img: ArrayView2<f32>, kernel: &[f32]) -> Array2<f32> {
    let (h, w) = img.dim();
    let r = (kernel.len() / 2) as isize;
    let horizontal = Array2::from_shape_fn((h, w), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(i, k)| k * img[(y, reflect101(x as isize + i as isize - r, w))])
            .sum::<f32>()
    });
    Array2::from_shape_fn((h, w), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(i, k)| k * horizontal[(reflect101(y as isize + i as isize - r, h), x)])
            .sum::<f32>()
    })
}

/// 高斯模糊.
#[inline]
pub fn gaussian_blur(img: ArrayView2<f32>, ksize: usize, sigma: f32) -> Array2<f32> {
    convolve_separable(img, &gaussian_kernel(ksize, sigma))
}

/// 高斯-拉普拉斯. 高斯核截断于 `4 * sigma`.
pub fn laplace_of_gaussian(img: ArrayView2<f32>, sigma: f32) -> Array2<f32> {
    let ksize = 2 * (4.0 * sigma).ceil().max(1.0) as usize + 1;
    let blurred = gaussian_blur(img, ksize, sigma);
    let (h, w) = blurred.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let at = |dy: isize, dx: isize| {
            blurred[(
                reflect101(y as isize + dy, h),
                reflect101(x as isize + dx, w),
            )]
        };
        at(-1, 0) + at(1, 0) + at(0, -1) + at(0, 1) - 4.0 * at(0, 0)
    })
}

/// 中值滤波. `ksize` 会被调整为奇数.
pub fn median(img: ArrayView2<f32>, ksize: usize) -> Array2<f32> {
    let ksize = ksize.max(1) | 1;
    let r = (ksize / 2) as isize;
    let (h, w) = img.dim();
    let mut window = Vec::with_capacity(ksize * ksize);
    let mut ans = Array2::zeros((h, w));
    for ((y, x), out) in ans.indexed_iter_mut() {
        window.clear();
        for dy in -r..=r {
            for dx in -r..=r {
                window.push(img[(
                    reflect101(y as isize + dy, h),
                    reflect101(x as isize + dx, w),
                )]);
            }
        }
        let mid = window.len() / 2;
        let (_, m, _) = window.select_nth_unstable_by(mid, f32::total_cmp);
        *out = *m;
    }
    ans
}

/// 最小值与最大值. 空数组或全为 NaN 时返回 `None`.
pub fn min_max(img: ArrayView2<f32>) -> Option<(f32, f32)> {
    img.iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// min-max 归一化到 `[alpha, beta]`. 常数图像映射为 `alpha`.
pub fn normalize_min_max(img: ArrayView2<f32>, alpha: f32, beta: f32) -> Array2<f32> {
    match min_max(img) {
        Some((lo, hi)) if hi > lo => {
            let scale = (beta - alpha) / (hi - lo);
            img.mapv(|v| (v - lo) * scale + alpha)
        }
        _ => Array2::from_elem(img.dim(), alpha),
    }
}

/// 取绝对值, 四舍五入并饱和到 `[0, 255]`.
#[inline]
pub fn convert_scale_abs(img: ArrayView2<f32>) -> Array2<f32> {
    img.mapv(|v| v.abs().round().min(255.0))
}

/// 中心差分梯度 `(d/dx, d/dy)`. 边界处退化为单侧差分.
pub fn gradients(img: ArrayView2<f32>) -> (Array2<f32>, Array2<f32>) {
    let (h, w) = img.dim();
    let gx = Array2::from_shape_fn((h, w), |(y, x)| {
        let (l, r) = (x.saturating_sub(1), (x + 1).min(w - 1));
        if r == l {
            0.0
        } else {
            (img[(y, r)] - img[(y, l)]) / (r - l) as f32
        }
    });
    let gy = Array2::from_shape_fn((h, w), |(y, x)| {
        let (u, d) = (y.saturating_sub(1), (y + 1).min(h - 1));
        if u == d {
            0.0
        } else {
            (img[(d, x)] - img[(u, x)]) / (d - u) as f32
        }
    });
    (gx, gy)
}

/// 在亚像素坐标 `(y, x)` 处双线性采样. 坐标被钳制到图像范围内.
pub fn sample_bilinear(img: ArrayView2<f32>, y: f32, x: f32) -> f32 {
    let (h, w) = img.dim();
    let y = y.clamp(0.0, (h - 1) as f32);
    let x = x.clamp(0.0, (w - 1) as f32);
    let (y0, x0) = (y.floor() as usize, x.floor() as usize);
    let (y1, x1) = ((y0 + 1).min(h - 1), (x0 + 1).min(w - 1));
    let (fy, fx) = (y - y0 as f32, x - x0 as f32);
    let top = img[(y0, x0)] * (1.0 - fx) + img[(y0, x1)] * fx;
    let bottom = img[(y1, x0)] * (1.0 - fx) + img[(y1, x1)] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// 以像素中心对齐的双线性缩放.
pub fn resize_bilinear(img: ArrayView2<f32>, (h, w): (usize, usize)) -> Array2<f32> {
    let (sh, sw) = img.dim();
    let (ry, rx) = (sh as f32 / h as f32, sw as f32 / w as f32);
    Array2::from_shape_fn((h, w), |(y, x)| {
        sample_bilinear(
            img,
            (y as f32 + 0.5) * ry - 0.5,
            (x as f32 + 0.5) * rx - 0.5,
        )
    })
}

/// 逐元素乘积.
#[inline]
pub(crate) fn product(a: &Array2<f32>, b: &Array2<f32>) -> Array2<f32> {
    Zip::from(a).and(b).map_collect(|&a, &b| a * b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_reflect101() {
        let idx: Vec<_> = (-3..7).map(|i| reflect101(i, 4)).collect();
        assert_eq!(idx, [3, 2, 1, 0, 1, 2, 3, 2, 1, 0]);
        assert_eq!(reflect101(-5, 1), 0);
    }

    #[test]
    fn test_gaussian_kernel_is_normalised() {
        let k = gaussian_kernel(4, 0.0);
        assert_eq!(k.len(), 5);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(k[2] > k[1] && k[1] > k[0]);
        assert!((k[0] - k[4]).abs() < 1e-7);
    }

    #[test]
    fn test_blur_keeps_constant_image() {
        let img = Array2::from_elem((6, 7), 3.0f32);
        let out = gaussian_blur(img.view(), 5, 1.5);
        assert!(out.iter().all(|v| (v - 3.0).abs() < 1e-5));
        assert!(laplace_of_gaussian(img.view(), 1.0)
            .iter()
            .all(|v| v.abs() < 1e-4));
    }

    #[test]
    fn test_median_removes_salt() {
        let mut img = Array2::from_elem((5, 5), 1.0f32);
        img[(2, 2)] = 100.0;
        let out = median(img.view(), 3);
        assert_eq!(out[(2, 2)], 1.0);
    }

    #[test]
    fn test_normalize_and_convert() {
        let img = array![[-2.0f32, 0.0], [2.0, 6.0]];
        let n = normalize_min_max(img.view(), 0.0, 255.0);
        assert_eq!(n[(0, 0)], 0.0);
        assert_eq!(n[(1, 1)], 255.0);
        let c = convert_scale_abs(array![[-3.4f32, 300.0]].view());
        assert_eq!(c, array![[3.0, 255.0]]);
        let flat = normalize_min_max(Array2::from_elem((2, 2), 5.0).view(), 10.0, 20.0);
        assert!(flat.iter().all(|&v| v == 10.0));
    }

    #[test]
    fn test_bilinear() {
        let img = array![[0.0f32, 1.0], [2.0, 3.0]];
        assert_eq!(sample_bilinear(img.view(), 0.5, 0.5), 1.5);
        assert_eq!(sample_bilinear(img.view(), -4.0, 9.0), 1.0);
        assert_eq!(sample_bilinear(img.view(), 1.0, 0.0), 2.0);
    }

    #[test]
    fn test_gradients_of_ramp() {
        let img = Array2::from_shape_fn((4, 5), |(y, x)| 2.0 * x as f32 + 3.0 * y as f32);
        let (gx, gy) = gradients(img.view());
        assert!(gx.iter().all(|&v| (v - 2.0).abs() < 1e-6));
        assert!(gy.iter().all(|&v| (v - 3.0).abs() < 1e-6));
    }
}
