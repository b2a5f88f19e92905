//! 按细胞类型保存的参数记录.
//!
//! 参数记录是带版本号的强类型结构, 而不是开放的字典. 这样调参写入的结构和
//! 光流计算读取的结构总是同一份定义. `version` 与 [`SCHEMA_VERSION`]
//! 不一致的记录会在读取时被拒绝.

use serde::{Deserialize, Serialize};

/// 当前参数记录格式版本.
pub const SCHEMA_VERSION: u32 = 1;

/// 完整参数记录.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    /// 格式版本.
    pub version: u32,

    /// 预处理滤波链参数.
    #[serde(default)]
    pub process: ProcessParams,

    /// 光流核参数.
    #[serde(default)]
    pub flow: FlowParams,

    /// 轨迹积分参数.
    #[serde(default)]
    pub trajectory: TrajectoryParams,
}

impl Default for ParameterRecord {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            process: ProcessParams::default(),
            flow: FlowParams::default(),
            trajectory: TrajectoryParams::default(),
        }
    }
}

impl ParameterRecord {
    /// 格式版本是否与当前程序一致?
    #[inline]
    pub fn is_current(&self) -> bool {
        self.version == SCHEMA_VERSION
    }
}

/// 预处理滤波链. 每一步为 `None` 时跳过.
///
/// 执行顺序固定为: 高斯-拉普拉斯 -> 高斯模糊 -> 中值滤波 -> 归一化 -> 取绝对值并饱和.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessParams {
    /// 高斯-拉普拉斯 (边缘增强).
    pub laplace: Option<LaplaceParams>,

    /// 高斯模糊 (降噪).
    pub gauss: Option<GaussParams>,

    /// 中值滤波.
    pub median: Option<MedianParams>,

    /// min-max 归一化.
    pub normalize: Option<NormalizeParams>,

    /// 最后取绝对值并饱和到 `[0, 255]`.
    #[serde(default = "default_true")]
    pub convert: bool,
}

#[inline]
fn default_true() -> bool {
    true
}

impl Default for ProcessParams {
    fn default() -> Self {
        Self {
            laplace: Some(LaplaceParams { sigma: 1.0 }),
            gauss: Some(GaussParams {
                ksize: 5,
                sigma: 1.5,
            }),
            median: Some(MedianParams { ksize: 5 }),
            normalize: Some(NormalizeParams {
                alpha: 0.0,
                beta: 255.0,
            }),
            convert: true,
        }
    }
}

impl ProcessParams {
    /// 不做任何处理的滤波链.
    pub fn identity() -> Self {
        Self {
            laplace: None,
            gauss: None,
            median: None,
            normalize: None,
            convert: false,
        }
    }
}

/// 高斯-拉普拉斯参数.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaplaceParams {
    /// 高斯标准差.
    pub sigma: f32,
}

/// 高斯模糊参数.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussParams {
    /// 核边长 (奇数).
    pub ksize: usize,

    /// 标准差.
    pub sigma: f32,
}

/// 中值滤波参数.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MedianParams {
    /// 窗口边长 (奇数).
    pub ksize: usize,
}

/// min-max 归一化参数: 把每帧线性映射到 `[alpha, beta]`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizeParams {
    /// 下限.
    pub alpha: f32,

    /// 上限.
    pub beta: f32,
}

/// 稠密光流参数. 字段沿用 Farnebäck 接口的命名, 以兼容既有的 `types.json`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowParams {
    /// 金字塔相邻层的缩放比例, `(0, 1)`.
    pub pyr_scale: f32,

    /// 金字塔层数 (不含原图).
    pub levels: usize,

    /// 求解窗口边长.
    pub winsize: usize,

    /// 每层迭代次数.
    pub iterations: usize,

    /// 梯度预平滑的高斯核边长.
    pub poly_n: usize,

    /// 梯度预平滑的高斯标准差.
    pub poly_sigma: f32,

    /// 位标志. 见 [`FlowParams::GAUSSIAN_WINDOW`].
    #[serde(alias = "flag")]
    pub flags: u32,
}

impl FlowParams {
    /// 求解窗口使用高斯加权而不是均匀加权.
    pub const GAUSSIAN_WINDOW: u32 = 256;

    /// 是否使用高斯加权窗口?
    #[inline]
    pub fn gaussian_window(&self) -> bool {
        self.flags & Self::GAUSSIAN_WINDOW != 0
    }
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            pyr_scale: 0.5,
            levels: 3,
            winsize: 15,
            iterations: 3,
            poly_n: 5,
            poly_sigma: 1.2,
            flags: 0,
        }
    }
}

/// 轨迹积分方式.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Integration {
    /// 粒子追踪: 第 0 帧每个像素放一个粒子, 沿光流双线性采样推进.
    #[default]
    Lagrangian,

    /// 网格累加: 每个像素上的光流逐帧求和.
    Eulerian,
}

/// 轨迹参数.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryParams {
    /// 积分方式.
    #[serde(default)]
    pub integration: Integration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_historical_values() {
        let r = ParameterRecord::default();
        assert!(r.is_current());
        assert_eq!(r.flow.winsize, 15);
        assert_eq!(r.flow.levels, 3);
        assert_eq!(r.process.gauss.unwrap().ksize, 5);
        assert_eq!(r.process.median.unwrap().ksize, 5);
        assert_eq!(r.trajectory.integration, Integration::Lagrangian);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(ParameterRecord::default()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["flow"]["pyr_scale"], 0.5);
        assert_eq!(json["trajectory"]["integration"], "lagrangian");
    }

    #[test]
    fn test_partial_record_fills_defaults() {
        let r: ParameterRecord =
            serde_json::from_str(r#"{"version": 1, "flow": {"pyr_scale": 0.5, "levels": 2,
            "winsize": 9, "iterations": 1, "poly_n": 5, "poly_sigma": 1.1, "flag": 256}}"#)
                .unwrap();
        assert_eq!(r.flow.winsize, 9);
        assert!(r.flow.gaussian_window());
        assert_eq!(r.process, ProcessParams::default());
    }
}
