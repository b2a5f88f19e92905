//! 像素级绘制: 灰度底图, 箭头, 伪彩色.

use image::{Rgb, RgbImage};
use ndarray::ArrayView2;

use crate::flow::filter::min_max;

/// 把单通道平面 min-max 归一化为灰度 RGB 图像. 常数平面为黑色.
pub fn grey(plane: ArrayView2<f32>) -> RgbImage {
    let (h, w) = plane.dim();
    let (lo, hi) = min_max(plane).unwrap_or((0.0, 0.0));
    let scale = if hi > lo { 255.0 / (hi - lo) } else { 0.0 };
    let mut buf = RgbImage::new(w as u32, h as u32);
    for ((y, x), &v) in plane.indexed_iter() {
        let g = if v.is_finite() {
            ((v - lo) * scale).round().clamp(0.0, 255.0) as u8
        } else {
            0
        };
        buf.put_pixel(x as u32, y as u32, Rgb([g, g, g]));
    }
    buf
}

/// jet 伪彩色. `v` 被钳制到 `[0, 1]`.
pub fn jet(v: f32) -> [u8; 3] {
    let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    let ch = |offset: f32| {
        let c = 1.5 - (4.0 * v - offset).abs();
        (c.clamp(0.0, 1.0) * 255.0).round() as u8
    };
    [ch(3.0), ch(2.0), ch(1.0)]
}

/// 两种颜色按 `alpha` 混合, `alpha = 1` 时完全取 `top`.
#[inline]
pub fn blend(bottom: [u8; 3], top: [u8; 3], alpha: f32) -> [u8; 3] {
    let mix = |b: u8, t: u8| (b as f32 * (1.0 - alpha) + t as f32 * alpha).round() as u8;
    [
        mix(bottom[0], top[0]),
        mix(bottom[1], top[1]),
        mix(bottom[2], top[2]),
    ]
}

/// 画一个像素. 越界时忽略.
#[inline]
fn plot(img: &mut RgbImage, x: i64, y: i64, color: [u8; 3]) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, Rgb(color));
    }
}

/// 把线段裁剪到图像范围 `[0, w - 1] x [0, h - 1]` 内 (Liang–Barsky),
/// 返回取整后的端点. 线段完全在外或端点不是有限值时返回 `None`.
fn clip(img: &RgbImage, from: (f32, f32), to: (f32, f32)) -> Option<((i64, i64), (i64, i64))> {
    if img.width() == 0 || img.height() == 0 {
        return None;
    }
    if ![from.0, from.1, to.0, to.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (x0, y0) = (f64::from(from.0), f64::from(from.1));
    let (dx, dy) = (f64::from(to.0) - x0, f64::from(to.1) - y0);
    let (xmax, ymax) = (f64::from(img.width() - 1), f64::from(img.height() - 1));

    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [(-dx, x0), (dx, xmax - x0), (-dy, y0), (dy, ymax - y0)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }
    let at = |t: f64| ((x0 + t * dx).round() as i64, (y0 + t * dy).round() as i64);
    Some((at(t0), at(t1)))
}

/// 直线, 端点坐标为 `(x, y)`. 先裁剪到图像范围, 再用 Bresenham 逐点绘制,
/// 步数不超过图像的宽高之和.
pub fn line(img: &mut RgbImage, from: (f32, f32), to: (f32, f32), color: [u8; 3]) {
    let Some(((x0, y0), (x1, y1))) = clip(img, from, to) else {
        return;
    };
    let (dx, dy) = ((x1 - x0).abs(), -(y1 - y0).abs());
    let (sx, sy) = (if x0 < x1 { 1 } else { -1 }, if y0 < y1 { 1 } else { -1 });
    let (mut x, mut y, mut err) = (x0, y0, dx + dy);
    loop {
        plot(img, x, y, color);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// 从 `from` 指向 `to` 的箭头, 箭头两翼长度为箭身的 30%.
pub fn arrow(img: &mut RgbImage, from: (f32, f32), to: (f32, f32), color: [u8; 3]) {
    line(img, from, to, color);

    let (vx, vy) = (to.0 - from.0, to.1 - from.1);
    let len = vx.hypot(vy);
    if len < 1.0 {
        return;
    }
    let wing = 0.3 * len;
    let angle = vy.atan2(vx);
    for side in [-1.0f32, 1.0] {
        let a = angle + std::f32::consts::PI + side * std::f32::consts::FRAC_PI_6;
        let tip = (to.0 + wing * a.cos(), to.1 + wing * a.sin());
        line(img, to, tip, color);
    }
}
