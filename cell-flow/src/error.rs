//! 运行时错误.

use std::path::PathBuf;
use thiserror::Error;

/// 本 crate 的统一结果类型.
pub type Result<T> = std::result::Result<T, Error>;

/// 所有组件共用的错误分类.
///
/// 组件内部从不吞掉错误; 错误原样向上传递, 只有命令行前端负责把它们翻译成
/// 用户可读的信息与退出码.
#[derive(Error, Debug)]
pub enum Error {
    /// 输入文件名不符合 `DATE_CELLTYPE` 约定.
    #[error("malformed stack name `{0}`: expected `DATE_CELLTYPE`")]
    MalformedStackName(String),

    /// 引用了不存在的光流版本号.
    #[error("stack `{stack}` has no flow with index {index}")]
    UnknownFlowIndex {
        /// 堆栈名.
        stack: String,
        /// 请求的光流版本号.
        index: u32,
    },

    /// 引用的产物不存在.
    #[error("artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    /// 命名器给出了已存在的名字. 正常情况下不可达.
    #[error("naming collision at {}", .0.display())]
    NamingCollision(PathBuf),

    /// 某类产物的编号已用尽.
    #[error("no free artifact name: {0}")]
    Naming(String),

    /// 底层存储写入失败.
    #[error("failed to write {}: {source}", .path.display())]
    Persistence {
        /// 试图写入的路径.
        path: PathBuf,
        /// 底层 I/O 错误.
        #[source]
        source: std::io::Error,
    },

    /// TIFF, npy 或 json 反序列化失败.
    #[error("failed to decode {}: {reason}", .path.display())]
    Decode {
        /// 出错文件.
        path: PathBuf,
        /// 原因.
        reason: String,
    },

    /// 视频编码失败.
    #[error("video encoding failed: {0}")]
    Encode(String),

    /// 调参未能得到可用结果.
    #[error("parameter tuning failed: {0}")]
    Tuning(String),

    /// 数组形状与预期不符.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// 无法解析的堆栈 / 产物选择器.
    #[error("invalid selector `{0}`")]
    InvalidSelector(String),

    /// 工程目录尚未初始化.
    #[error("project root {} is not initialised (run `cf init`)", .0.display())]
    NotInitialized(PathBuf),

    /// 工程中不存在该堆栈.
    #[error("unknown stack `{0}`")]
    UnknownStack(String),
}

impl Error {
    /// 包装一个写入错误.
    #[inline]
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// 包装一个解码错误.
    #[inline]
    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
