#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 从显微镜 TIFF 堆栈计算光流场与细胞轨迹场, 并把所有结果保存在一个
//! 持久化、带版本号的工程目录中.
//!
//! # 工程目录
//!
//! ```text
//! <root>/
//!   types.json                         # stack_type -> ParameterRecord
//!   in/<DATE_CELLTYPE>.tiff            # 待处理的输入堆栈
//!   <DATE_CELLTYPE>/
//!     meta.json                        # {path, stack_type, name}
//!     flow/<DATE_CELLTYPE>_f<i>.npy
//!     trajectory/<DATE_CELLTYPE>_t<i>[<suffix>].npy
//!     video/<DATE_CELLTYPE>_vf<i>.mp4
//!     video/<DATE_CELLTYPE>_vt<i>[<suffix>].mp4
//! ```
//!
//! 所有文件系统读写都经由 [`ProjectStore`] 完成. 其余组件只接收借用的输入,
//! 并返回新的、拥有所有权的输出.
//!
//! # 组件
//!
//! ### 命名 ✅
//!
//! 光流 / 轨迹 / 视频文件名的推导与解析. 实现位于 `cell-flow/src/store/naming.rs`.
//!
//! ### 参数缓存 ✅
//!
//! `types.json`, 按细胞类型保存调参结果. 实现位于 `cell-flow/src/store/types.rs`.
//!
//! ### 光流 ✅
//!
//! 预处理滤波链 + 可插拔的稠密光流核 (默认为金字塔 Lucas–Kanade).
//! 实现位于 `cell-flow/src/flow`.
//!
//! ### 轨迹 ✅
//!
//! 拉格朗日 (粒子) 或欧拉 (网格) 积分. 实现位于 `cell-flow/src/trajectory`.
//!
//! ### 视频 ✅
//!
//! 箭头 / 热力图渲染, 可叠加原始帧, 经 `ffmpeg` 编码为 mp4.
//! 实现位于 `cell-flow/src/video`.
//!
//! ### 调参 ✅
//!
//! 网格搜索, 以重建误差 + 平滑项为目标. 实现位于 `cell-flow/src/tuning`.
//!
//! ### 流水线 ✅
//!
//! `optflow`, `traj`, `video` 三个操作. 每次调用要么全部落盘, 要么什么都不留下.
//! 实现位于 `cell-flow/src/pipeline`.

/// 二维索引 `(h, w)`.
pub type Idx2d = (usize, usize);

/// 亚像素精度的二维坐标 `(y, x)`.
type Pos2dF = (f32, f32);

pub mod consts;

mod error;

pub use error::{Error, Result};

/// 堆栈、光流场、轨迹场等基础数据结构.
pub mod data;

pub use data::{FieldKind, FlowField, Stack, StackDecoder, TiffStackDecoder, TrajectoryField};

pub mod params;

pub use params::ParameterRecord;

pub mod store;

pub use store::{ProjectStore, StackHandle};

pub use pipeline::Pipeline;

pub mod flow;

pub mod trajectory;

pub mod video;

pub mod tuning;

pub mod pipeline;

pub mod prelude;
