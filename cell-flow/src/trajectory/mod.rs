//! 由光流场积分得到轨迹场.

use ndarray::{Array4, ArrayView4, Axis};

use crate::consts::{COMPONENTS, DX, DY};
use crate::data::{FlowField, TrajectoryField};
use crate::flow::{filter::sample_bilinear, map_indexed};
use crate::params::{Integration, TrajectoryParams};
use crate::{Pos2dF, Result};

/// 轨迹引擎.
///
/// 输出与输入光流形状相同. 第 0 帧为零; 第 `t` 帧为第 0 帧中每个像素
/// 到第 `t` 帧的累计位移. 各视图互相独立, 可并行; 同一视图内按帧顺序推进.
#[derive(Copy, Clone, Debug, Default)]
pub struct TrajectoryEngine;

impl TrajectoryEngine {
    /// 积分整个光流场.
    pub fn integrate(&self, flow: &FlowField, params: &TrajectoryParams) -> Result<TrajectoryField> {
        let views = map_indexed(flow.len_views(), |v| {
            log::debug!("integrating view {v} ({:?})", params.integration);
            match params.integration {
                Integration::Lagrangian => lagrangian(flow.view_at(v)),
                Integration::Eulerian => eulerian(flow.view_at(v)),
            }
        });
        let refs: Vec<_> = views.iter().map(|v| v.view()).collect();
        let data = ndarray::stack(Axis(1), &refs)
            .map_err(|e| crate::Error::ShapeMismatch(format!("cannot stack views: {e}")))?;
        TrajectoryField::from_raw(data)
    }
}

/// 粒子追踪: `p_{t+1} = p_t + flow_t(p_t)`, 光流以双线性采样, 采样位置钳制在图像内.
fn lagrangian(flow: ArrayView4<f32>) -> Array4<f32> {
    let (frames, h, w, _) = flow.dim();
    let mut ans = Array4::zeros((frames, h, w, COMPONENTS));
    let mut particles: Vec<Pos2dF> = (0..h)
        .flat_map(|y| (0..w).map(move |x| (y as f32, x as f32)))
        .collect();

    for t in 1..frames {
        let dx = flow.slice(ndarray::s![t - 1, .., .., DX]);
        let dy = flow.slice(ndarray::s![t - 1, .., .., DY]);
        let mut out = ans.index_axis_mut(Axis(0), t);
        for (i, p) in particles.iter_mut().enumerate() {
            let (sx, sy) = (sample_bilinear(dx, p.0, p.1), sample_bilinear(dy, p.0, p.1));
            p.0 += sy;
            p.1 += sx;
            let (y0, x0) = (i / w, i % w);
            out[(y0, x0, DX)] = p.1 - x0 as f32;
            out[(y0, x0, DY)] = p.0 - y0 as f32;
        }
    }
    ans
}

/// 网格累加: 每个像素上的光流逐帧求和.
fn eulerian(flow: ArrayView4<f32>) -> Array4<f32> {
    let mut ans = Array4::zeros(flow.raw_dim());
    for t in 1..flow.len_of(Axis(0)) {
        let prev = ans.index_axis(Axis(0), t - 1).to_owned() + &flow.index_axis(Axis(0), t - 1);
        ans.index_axis_mut(Axis(0), t).assign(&prev);
    }
    ans
}
