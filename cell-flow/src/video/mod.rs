//! 光流场 / 轨迹场的可视化.
//!
//! [`VideoRenderer`] 把矢量场逐帧渲染为 RGB 图像, 各视图从左到右拼接成一幅;
//! [`VideoEncoder`] 再把图像序列编码为视频字节流.

use image::{GenericImage, RgbImage};
use ndarray::{ArrayView2, ArrayView5, Axis};

use crate::consts::{rgb, DX, DY};
use crate::data::{FieldKind, Stack};
use crate::flow::map_indexed;
use crate::{Error, Result};

mod draw;
mod encode;

pub use encode::{FfmpegEncoder, VideoEncoder, FFMPEG_ENV_BIN};

/// 渲染风格.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RenderStyle {
    /// 网格采样的箭头.
    Arrows {
        /// 采样网格间距 (像素).
        step: usize,

        /// 箭头长度放大倍数. `None` 时按场的种类选取.
        gain: Option<f32>,

        /// 箭头颜色.
        color: [u8; 3],
    },

    /// 模长热力图 (逐帧 min-max 归一化, jet 伪彩色).
    Heatmap,
}

/// 渲染选项.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RenderOptions {
    /// 渲染风格.
    pub style: RenderStyle,

    /// 帧率.
    pub fps: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            style: RenderStyle::Arrows {
                step: 8,
                gain: None,
                color: rgb::ARROW_BLUE,
            },
            fps: 10,
        }
    }
}

impl RenderOptions {
    /// 热力图风格, 其余选项取默认值.
    #[inline]
    pub fn heatmap() -> Self {
        Self {
            style: RenderStyle::Heatmap,
            ..Self::default()
        }
    }
}

/// 叠加底图时热力图的不透明度.
const HEATMAP_ALPHA: f32 = 0.6;

/// 不同种类的场的默认箭头放大倍数. 光流是逐帧位移, 通常只有一两个像素.
#[inline]
fn default_gain(kind: FieldKind) -> f32 {
    match kind {
        FieldKind::Flow => 4.0,
        FieldKind::Trajectory => 1.0,
    }
}

/// 矢量场渲染器.
#[derive(Copy, Clone, Debug, Default)]
pub struct VideoRenderer;

impl VideoRenderer {
    /// 渲染 `(frame, view, height, width, 2)` 矢量场.
    ///
    /// 给出 `overlay` 时, 每帧以对应堆栈帧的通道平均值 (归一化为灰度) 作为底图;
    /// 其帧数与单帧形状必须与场一致, 否则返回 [`Error::ShapeMismatch`].
    pub fn render(
        &self,
        field: ArrayView5<f32>,
        kind: FieldKind,
        overlay: Option<&Stack>,
        options: &RenderOptions,
    ) -> Result<Vec<RgbImage>> {
        let (frames, views, h, w, _) = field.dim();
        if let Some(stack) = overlay {
            if stack.len_frames() != frames || stack.frame_shape() != (h, w) {
                return Err(Error::ShapeMismatch(format!(
                    "overlay `{}` is {:?}, field is {:?}",
                    stack.name(),
                    (stack.len_frames(), stack.frame_shape()),
                    (frames, (h, w))
                )));
            }
        }
        log::info!("rendering {frames} frames of {views} {kind:?} views");

        let images = map_indexed(frames, |t| {
            let base = overlay.map(|s| draw::grey(s.mean_projection(t).view()));
            let mut canvas = RgbImage::new((w * views) as u32, h as u32);
            for v in 0..views {
                let vectors = field.index_axis(Axis(0), t).index_axis_move(Axis(0), v);
                let tile = match options.style {
                    RenderStyle::Arrows { step, gain, color } => arrows(
                        vectors.index_axis(Axis(2), DX),
                        vectors.index_axis(Axis(2), DY),
                        base.clone(),
                        step,
                        gain.unwrap_or_else(|| default_gain(kind)),
                        color,
                    ),
                    RenderStyle::Heatmap => heatmap(
                        vectors.index_axis(Axis(2), DX),
                        vectors.index_axis(Axis(2), DY),
                        base.as_ref(),
                    ),
                };
                canvas
                    .copy_from(&tile, (v * w) as u32, 0)
                    .map_err(|e| Error::ShapeMismatch(e.to_string()))?;
            }
            Ok(canvas)
        });
        images.into_iter().collect()
    }

    /// 渲染原始堆栈: 每帧的各通道分别归一化为灰度, 从左到右拼接.
    pub fn render_stack(&self, stack: &Stack) -> Result<Vec<RgbImage>> {
        let (frames, channels, h, w) = stack.shape();
        if frames == 0 {
            return Err(Error::ShapeMismatch(format!(
                "stack `{}` has no frames",
                stack.name()
            )));
        }
        log::info!("rendering {frames} frames of `{}` ({channels} channels)", stack.name());

        let images = map_indexed(frames, |t| {
            let mut canvas = RgbImage::new((w * channels) as u32, h as u32);
            for c in 0..channels {
                let tile = draw::grey(stack.channel(c).index_axis_move(Axis(0), t));
                canvas
                    .copy_from(&tile, (c * w) as u32, 0)
                    .map_err(|e| Error::ShapeMismatch(e.to_string()))?;
            }
            Ok(canvas)
        });
        images.into_iter().collect()
    }
}

/// 单视图箭头图.
fn arrows(
    dx: ArrayView2<f32>,
    dy: ArrayView2<f32>,
    base: Option<RgbImage>,
    step: usize,
    gain: f32,
    color: [u8; 3],
) -> RgbImage {
    let (h, w) = dx.dim();
    let mut tile = base.unwrap_or_else(|| RgbImage::new(w as u32, h as u32));
    let step = step.max(1);
    for y in (step / 2..h).step_by(step) {
        for x in (step / 2..w).step_by(step) {
            let (vx, vy) = (dx[(y, x)] * gain, dy[(y, x)] * gain);
            if !(vx.is_finite() && vy.is_finite()) || vx.hypot(vy) < 0.5 {
                continue;
            }
            let from = (x as f32, y as f32);
            draw::arrow(&mut tile, from, (from.0 + vx, from.1 + vy), color);
        }
    }
    tile
}

/// 单视图模长热力图.
fn heatmap(dx: ArrayView2<f32>, dy: ArrayView2<f32>, base: Option<&RgbImage>) -> RgbImage {
    let (h, w) = dx.dim();
    let magnitude = ndarray::Zip::from(&dx)
        .and(&dy)
        .map_collect(|&x, &y| x.hypot(y));
    let (lo, hi) = crate::flow::filter::min_max(magnitude.view()).unwrap_or((0.0, 0.0));
    let scale = if hi > lo { 1.0 / (hi - lo) } else { 0.0 };

    let mut tile = RgbImage::new(w as u32, h as u32);
    for ((y, x), &m) in magnitude.indexed_iter() {
        let color = draw::jet((m - lo) * scale);
        let color = match base {
            Some(b) => draw::blend(b.get_pixel(x as u32, y as u32).0, color, HEATMAP_ALPHA),
            None => color,
        };
        tile.put_pixel(x as u32, y as u32, image::Rgb(color));
    }
    tile
}
