//! 按细胞类型自动调参.
//!
//! 没有真值光流, 因此用两个代理指标衡量一组参数的好坏:
//!
//! - 光度重建误差: 用光流把后一帧采样回前一帧后的平均绝对误差;
//! - 平滑项: 光流场梯度模长的平均值.
//!
//! 得分为 `重建误差 + weight * 平滑项`, 越小越好.

use itertools::iproduct;
use ndarray::{Array3, ArrayView2, ArrayView3, Axis};

use crate::consts::{DX, DY};
use crate::flow::filter::{gradients, sample_bilinear};
use crate::flow::{map_indexed, FlowEngine, FlowKernel};
use crate::params::{FlowParams, ParameterRecord};
use crate::{Error, Result};

/// 表明一个可以为某类堆栈挑选参数的对象.
pub trait Tuner {
    /// 以 `base` 为起点, 在单通道原始帧 `frames` 上挑选参数.
    ///
    /// 无法得到有限得分时返回 [`Error::Tuning`].
    fn tune(
        &self,
        frames: ArrayView3<f32>,
        base: &ParameterRecord,
        kernel: &dyn FlowKernel,
    ) -> Result<ParameterRecord>;
}

/// 在 `winsize × levels × iterations` 网格上穷举.
#[derive(Clone, Debug, PartialEq)]
pub struct GridSearch {
    /// 候选窗口边长.
    pub winsizes: Vec<usize>,

    /// 候选金字塔层数.
    pub levels: Vec<usize>,

    /// 候选迭代次数.
    pub iterations: Vec<usize>,

    /// 最多使用的帧对数. 帧对在整个序列上均匀抽取.
    pub max_pairs: usize,

    /// 平滑项权重.
    pub smoothness_weight: f32,
}

impl Default for GridSearch {
    fn default() -> Self {
        Self {
            winsizes: vec![9, 15, 21],
            levels: vec![1, 3],
            iterations: vec![3, 5],
            max_pairs: 4,
            smoothness_weight: 0.1,
        }
    }
}

/// 均匀抽取至多 `max` 个帧对的起始下标.
fn sample_pairs(frames: usize, max: usize) -> Vec<usize> {
    let pairs = frames.saturating_sub(1);
    let max = max.max(1);
    if pairs <= max {
        return (0..pairs).collect();
    }
    let mut ans: Vec<usize> = (0..max).map(|i| i * pairs / max).collect();
    ans.dedup();
    ans
}

/// 光度重建误差: `mean |prev(p) - next(p + flow(p))|`.
pub fn reconstruction_error(prev: ArrayView2<f32>, next: ArrayView2<f32>, flow: &Array3<f32>) -> f32 {
    let total: f32 = prev
        .indexed_iter()
        .map(|((y, x), &p)| {
            let q = sample_bilinear(
                next,
                y as f32 + flow[(y, x, DY)],
                x as f32 + flow[(y, x, DX)],
            );
            (p - q).abs()
        })
        .sum();
    total / prev.len().max(1) as f32
}

/// 平滑项: 两个分量梯度绝对值之和的平均.
pub fn smoothness(flow: &Array3<f32>) -> f32 {
    let mut total = 0.0;
    for c in [DX, DY] {
        let (gx, gy) = gradients(flow.index_axis(Axis(2), c));
        total += gx.iter().chain(gy.iter()).map(|v| v.abs()).sum::<f32>();
    }
    let (h, w, _) = flow.dim();
    total / (h * w).max(1) as f32
}

impl GridSearch {
    fn candidates(&self, base: &FlowParams) -> Vec<FlowParams> {
        iproduct!(&self.winsizes, &self.levels, &self.iterations)
            .map(|(&winsize, &levels, &iterations)| FlowParams {
                winsize,
                levels,
                iterations,
                ..*base
            })
            .collect()
    }

    /// 一组参数在给定帧对上的平均得分.
    pub fn score<K: FlowKernel>(
        &self,
        engine: &FlowEngine<K>,
        frames: ArrayView3<f32>,
        pairs: &[usize],
        params: &FlowParams,
    ) -> f32 {
        let total: f32 = pairs
            .iter()
            .map(|&t| {
                let (prev, next) = (frames.index_axis(Axis(0), t), frames.index_axis(Axis(0), t + 1));
                let flow = engine.kernel().compute(prev, next, params);
                reconstruction_error(prev, next, &flow) + self.smoothness_weight * smoothness(&flow)
            })
            .sum();
        total / pairs.len().max(1) as f32
    }
}

impl Tuner for GridSearch {
    fn tune(
        &self,
        frames: ArrayView3<f32>,
        base: &ParameterRecord,
        kernel: &dyn FlowKernel,
    ) -> Result<ParameterRecord> {
        let n = frames.len_of(Axis(0));
        if n < 2 {
            return Err(Error::Tuning(format!("need at least 2 frames, found {n}")));
        }
        let engine = FlowEngine::with_kernel(kernel);
        let processed = engine.preprocess(frames, &base.process);
        let pairs = sample_pairs(n, self.max_pairs);
        let candidates = self.candidates(&base.flow);
        log::info!(
            "tuning over {} candidates on {} frame pairs",
            candidates.len(),
            pairs.len()
        );

        let scores = map_indexed(candidates.len(), |i| {
            let s = self.score(&engine, processed.view(), &pairs, &candidates[i]);
            log::debug!("candidate {:?}: score {s}", candidates[i]);
            s
        });
        // 并列时取先出现者, 保证结果确定.
        let best = scores
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_finite())
            .fold(None::<(usize, f32)>, |acc, (i, &s)| match acc {
                Some((_, b)) if b <= s => acc,
                _ => Some((i, s)),
            })
            .ok_or_else(|| Error::Tuning("no candidate produced a finite score".to_string()))?;

        let flow = candidates[best.0];
        log::info!(
            "best parameters: winsize {}, levels {}, iterations {} (score {:.4})",
            flow.winsize,
            flow.levels,
            flow.iterations,
            best.1
        );
        Ok(ParameterRecord {
            flow,
            ..base.clone()
        })
    }
}
