use ndarray::{Array2, Array4, Array5, ArrayView3, ArrayView4, Axis, Ix4};

use crate::consts::COMPONENTS;
use crate::{Error, Result};

mod decode;

pub use decode::{StackDecoder, TiffStackDecoder};

#[cfg(test)]
pub(crate) use decode::tests::write_tiff;

/// 一个已导入的显微镜堆栈: 4D 数组, 轴依次为 `(frame, channel, height, width)`.
///
/// 导入后不可变.
#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    stack_type: String,
    data: Array4<f32>,
}

impl Stack {
    /// 用已解码的数组构建堆栈.
    #[inline]
    pub fn new(name: String, stack_type: String, data: Array4<f32>) -> Self {
        Self {
            name,
            stack_type,
            data,
        }
    }

    /// 堆栈名, 形如 `DATE_CELLTYPE`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 细胞类型, 即 `DATE_CELLTYPE` 中的 `CELLTYPE`.
    #[inline]
    pub fn stack_type(&self) -> &str {
        &self.stack_type
    }

    /// 底层数组.
    #[inline]
    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    /// `(frames, channels, height, width)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    /// 帧数.
    #[inline]
    pub fn len_frames(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// 通道数.
    #[inline]
    pub fn len_channels(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    /// 单帧形状 `(height, width)`.
    #[inline]
    pub fn frame_shape(&self) -> crate::Idx2d {
        let (_, _, h, w) = self.shape();
        (h, w)
    }

    /// 取出第 `c` 个通道的全部帧, 形状 `(frame, height, width)`.
    ///
    /// `c` 越界时 panic.
    #[inline]
    pub fn channel(&self, c: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(1), c)
    }

    /// 第 `t` 帧所有通道的平均值投影.
    ///
    /// `t` 越界时 panic.
    pub fn mean_projection(&self, t: usize) -> Array2<f32> {
        let frame = self.data.index_axis(Axis(0), t);
        let (_, h, w) = frame.dim();
        frame
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array2::zeros((h, w)))
    }

    /// 消费自我, 获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array4<f32> {
        self.data
    }
}

macro_rules! impl_vector_field {
    ($($field: ident => $what: literal),+) => {
        $(
            #[doc = concat!($what, ": 5D 数组, 轴依次为 `(frame, view, height, width, component)`, ")]
            #[doc = "其中 `component` 依次为 `dx`, `dy`."]
            #[derive(Debug, Clone, PartialEq)]
            pub struct $field {
                data: Array5<f32>,
            }

            impl $field {
                /// 从原始数组构建. 最后一维不是 2 时返回 `Err`.
                pub fn from_raw(data: Array5<f32>) -> Result<Self> {
                    let last = data.len_of(Axis(4));
                    if last != COMPONENTS {
                        return Err(Error::ShapeMismatch(format!(
                            "expected {COMPONENTS} vector components, found {last}"
                        )));
                    }
                    Ok(Self { data })
                }

                /// 全零场.
                #[inline]
                pub fn zeros(frames: usize, views: usize, (h, w): (usize, usize)) -> Self {
                    Self {
                        data: Array5::zeros((frames, views, h, w, COMPONENTS)),
                    }
                }

                /// 底层数组.
                #[inline]
                pub fn data(&self) -> &Array5<f32> {
                    &self.data
                }

                /// `(frames, views, height, width, components)`.
                #[inline]
                pub fn shape(&self) -> (usize, usize, usize, usize, usize) {
                    self.data.dim()
                }

                /// 帧数.
                #[inline]
                pub fn len_frames(&self) -> usize {
                    self.data.len_of(Axis(0))
                }

                /// 视图个数.
                #[inline]
                pub fn len_views(&self) -> usize {
                    self.data.len_of(Axis(1))
                }

                /// 单帧形状 `(height, width)`.
                #[inline]
                pub fn frame_shape(&self) -> crate::Idx2d {
                    let (_, _, h, w, _) = self.shape();
                    (h, w)
                }

                /// 第 `v` 个视图, 形状 `(frame, height, width, component)`.
                ///
                /// `v` 越界时 panic.
                #[inline]
                pub fn view_at(&self, v: usize) -> ArrayView4<'_, f32> {
                    self.data.index_axis(Axis(1), v)
                }

                /// 消费自我, 获得底层数据.
                #[inline]
                pub fn into_raw(self) -> Array5<f32> {
                    self.data
                }
            }
        )+
    };
}

impl_vector_field!(FlowField => "光流场", TrajectoryField => "轨迹场");

impl FlowField {
    /// 由每个视图各自的 `(frame, height, width, component)` 数组拼成光流场.
    ///
    /// 所有视图形状必须一致.
    pub fn from_views(views: Vec<ndarray::Array<f32, Ix4>>) -> Result<Self> {
        let refs: Vec<_> = views.iter().map(|v| v.view()).collect();
        let data = ndarray::stack(Axis(1), &refs)
            .map_err(|e| Error::ShapeMismatch(format!("cannot stack views: {e}")))?;
        Self::from_raw(data)
    }
}

/// 矢量场种类.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FieldKind {
    /// 光流.
    Flow,

    /// 轨迹.
    Trajectory,
}
