//! 光流计算.
//!
//! [`FlowEngine`] 对堆栈的每个视图 (通道) 先逐帧预处理, 再对每对相邻帧调用
//! [`FlowKernel`]. 最后一帧没有后继, 其光流补零, 因此输出帧数与输入一致.

use ndarray::{Array3, Array4, ArrayView3, Axis};

use crate::data::{FlowField, Stack};
use crate::params::{FlowParams, ParameterRecord, ProcessParams};
use crate::{Error, Result};

pub mod filter;
mod kernel;
mod preprocess;

pub use kernel::{DenseLucasKanade, FlowKernel};
pub use preprocess::preprocess_frame;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};

        /// 借助 `rayon`, 并行地对 `0..n` 中每个下标求值, 结果保持顺序.
        pub(crate) fn map_indexed<T, F>(n: usize, op: F) -> Vec<T>
        where
            T: Send,
            F: Fn(usize) -> T + Sync + Send,
        {
            (0..n).into_par_iter().map(op).collect()
        }
    } else {
        /// 对 `0..n` 中每个下标求值, 结果保持顺序.
        pub(crate) fn map_indexed<T, F>(n: usize, op: F) -> Vec<T>
        where
            T: Send,
            F: Fn(usize) -> T + Sync + Send,
        {
            (0..n).map(op).collect()
        }
    }
}

/// 参与光流计算的视图.
///
/// 每个被选中的通道构成一个视图; `with_sum` 为真时在最前面额外放一个
/// "和" 视图, 其光流为其余各视图光流之和.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ViewSelection {
    channels: Vec<usize>,
    with_sum: bool,
}

impl ViewSelection {
    /// 构建视图选择. `channels` 为空时返回 `None`.
    pub fn new(channels: Vec<usize>, with_sum: bool) -> Option<Self> {
        (!channels.is_empty()).then_some(Self { channels, with_sum })
    }

    /// 一个 `channels` 通道堆栈的默认视图.
    ///
    /// 不少于 3 个通道时为 `[和, 通道 1, 通道 2]` (通道 0 不参与);
    /// 否则每个通道一个视图.
    pub fn for_channels(channels: usize) -> Self {
        if channels >= 3 {
            Self {
                channels: vec![1, 2],
                with_sum: true,
            }
        } else {
            Self {
                channels: (0..channels.max(1)).collect(),
                with_sum: false,
            }
        }
    }

    /// 被选中的通道.
    #[inline]
    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    /// 是否带 "和" 视图?
    #[inline]
    pub fn with_sum(&self) -> bool {
        self.with_sum
    }

    /// 视图个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.channels.len() + usize::from(self.with_sum)
    }

    /// 总是 `false`. 构造时保证至少有一个通道.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// 检查所有通道都在 `stack` 的范围内, 否则返回 [`Error::ShapeMismatch`].
    pub fn check(&self, stack: &Stack) -> Result<()> {
        let channels = stack.len_channels();
        match self.channels.iter().find(|&&c| c >= channels) {
            Some(c) => Err(Error::ShapeMismatch(format!(
                "view channel {c} out of range for `{}` with {channels} channels",
                stack.name()
            ))),
            None => Ok(()),
        }
    }
}

/// 光流引擎. 内核可替换, 默认为 [`DenseLucasKanade`].
#[derive(Clone, Debug, Default)]
pub struct FlowEngine<K = DenseLucasKanade> {
    kernel: K,
}

impl FlowEngine {
    /// 使用默认内核.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K: FlowKernel> FlowEngine<K> {
    /// 使用指定内核.
    #[inline]
    pub fn with_kernel(kernel: K) -> Self {
        Self { kernel }
    }

    /// 内核.
    #[inline]
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// 逐帧预处理, 形状 `(frame, height, width)` 不变.
    pub fn preprocess(&self, frames: ArrayView3<f32>, params: &ProcessParams) -> Array3<f32> {
        let processed = map_indexed(frames.len_of(Axis(0)), |t| {
            preprocess_frame(frames.index_axis(Axis(0), t), params)
        });
        stack_frames(frames.raw_dim(), processed)
    }

    /// 相邻帧对的光流, 共 `frames - 1` 个, 每个形状 `(height, width, 2)`.
    pub fn pair_flows(&self, frames: ArrayView3<f32>, params: &FlowParams) -> Vec<Array3<f32>> {
        let pairs = frames.len_of(Axis(0)).saturating_sub(1);
        map_indexed(pairs, |t| {
            log::debug!("flow pair {t} -> {}", t + 1);
            self.kernel.compute(
                frames.index_axis(Axis(0), t),
                frames.index_axis(Axis(0), t + 1),
                params,
            )
        })
    }

    /// 已预处理的单通道帧序列的光流, 形状 `(frame, height, width, 2)`, 最后一帧为零.
    pub fn channel_flow(&self, processed: ArrayView3<f32>, params: &FlowParams) -> Array4<f32> {
        let (t, h, w) = processed.dim();
        let mut ans = Array4::zeros((t, h, w, crate::consts::COMPONENTS));
        for (i, pair) in self.pair_flows(processed, params).into_iter().enumerate() {
            ans.index_axis_mut(Axis(0), i).assign(&pair);
        }
        ans
    }

    /// 计算整个堆栈的光流场.
    ///
    /// 选中的通道越界或堆栈没有帧时返回 [`Error::ShapeMismatch`].
    pub fn compute(
        &self,
        stack: &Stack,
        params: &ParameterRecord,
        views: &ViewSelection,
    ) -> Result<FlowField> {
        views.check(stack)?;
        if stack.len_frames() == 0 {
            return Err(Error::ShapeMismatch(format!(
                "stack `{}` has no frames",
                stack.name()
            )));
        }

        let mut flows = Vec::with_capacity(views.len());
        for &c in views.channels() {
            log::info!("computing flow for `{}` channel {c}", stack.name());
            let processed = self.preprocess(stack.channel(c), &params.process);
            flows.push(self.channel_flow(processed.view(), &params.flow));
        }
        if views.with_sum() {
            let mut sum = Array4::zeros(flows[0].raw_dim());
            flows.iter().for_each(|f| sum += f);
            flows.insert(0, sum);
        }
        FlowField::from_views(flows)
    }
}

/// 把逐帧结果拼回 `(frame, height, width)`.
fn stack_frames(dim: ndarray::Ix3, frames: Vec<ndarray::Array2<f32>>) -> Array3<f32> {
    let mut ans = Array3::zeros(dim);
    for (mut dst, src) in ans.axis_iter_mut(Axis(0)).zip(frames) {
        dst.assign(&src);
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayView2;

    /// 光流恒为 `(frame index of prev + 1, 0)` 的假内核. 便于检查帧序与补零.
    struct Stub;

    impl FlowKernel for Stub {
        fn compute(&self, prev: ArrayView2<f32>, _: ArrayView2<f32>, _: &FlowParams) -> Array3<f32> {
            let (h, w) = prev.dim();
            let mut ans = Array3::zeros((h, w, 2));
            ans.index_axis_mut(Axis(2), 0).fill(prev[(0, 0)] + 1.0);
            ans
        }
    }

    fn stack(frames: usize, channels: usize) -> Stack {
        let data = Array4::from_shape_fn((frames, channels, 4, 5), |(t, c, _, _)| {
            (t + 10 * c) as f32
        });
        Stack::new("20240101_HELA".into(), "HELA".into(), data)
    }

    fn identity_record() -> ParameterRecord {
        ParameterRecord {
            process: ProcessParams::identity(),
            ..ParameterRecord::default()
        }
    }

    #[test]
    fn test_default_views() {
        let v = ViewSelection::for_channels(3);
        assert_eq!((v.channels(), v.with_sum(), v.len()), (&[1, 2][..], true, 3));
        let v = ViewSelection::for_channels(2);
        assert_eq!((v.channels(), v.with_sum(), v.len()), (&[0, 1][..], false, 2));
        assert!(ViewSelection::new(vec![], true).is_none());
    }

    #[test]
    fn test_shape_and_zero_padding() {
        let engine = FlowEngine::with_kernel(Stub);
        let s = stack(4, 3);
        let flow = engine
            .compute(&s, &identity_record(), &ViewSelection::for_channels(3))
            .unwrap();
        assert_eq!(flow.shape(), (4, 3, 4, 5, 2));

        // 视图 1 = 通道 1, 帧 t 的值为 t + 10.
        for t in 0..3 {
            assert_eq!(flow.view_at(1)[(t, 0, 0, 0)], (t + 10) as f32 + 1.0);
            assert_eq!(flow.view_at(2)[(t, 0, 0, 0)], (t + 20) as f32 + 1.0);
            assert_eq!(
                flow.view_at(0)[(t, 0, 0, 0)],
                flow.view_at(1)[(t, 0, 0, 0)] + flow.view_at(2)[(t, 0, 0, 0)]
            );
        }
        assert!(flow.data().index_axis(Axis(0), 3).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_single_frame_is_all_zero() {
        let engine = FlowEngine::with_kernel(Stub);
        let flow = engine
            .compute(&stack(1, 1), &identity_record(), &ViewSelection::for_channels(1))
            .unwrap();
        assert_eq!(flow.shape(), (1, 1, 4, 5, 2));
        assert!(flow.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_out_of_range_view() {
        let engine = FlowEngine::with_kernel(Stub);
        let views = ViewSelection::new(vec![5], false).unwrap();
        assert!(matches!(
            engine.compute(&stack(2, 3), &identity_record(), &views),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_deterministic() {
        let engine = FlowEngine::new();
        let data = Array4::from_shape_fn((3, 1, 16, 16), |(t, _, y, x)| {
            (((x + t) % 8) * 20 + y) as f32
        });
        let s = Stack::new("20240101_HELA".into(), "HELA".into(), data);
        let views = ViewSelection::for_channels(1);
        let a = engine.compute(&s, &ParameterRecord::default(), &views).unwrap();
        let b = engine.compute(&s, &ParameterRecord::default(), &views).unwrap();
        assert_eq!(a, b);
    }
}
