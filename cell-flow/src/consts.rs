//! 通用常量.

/// 工程目录布局中的固定名字.
pub mod layout {
    /// 参数缓存文件.
    pub const TYPES_FILE: &str = "types.json";

    /// 待处理输入堆栈目录.
    pub const INBOX_DIR: &str = "in";

    /// 每个堆栈的元数据文件.
    pub const META_FILE: &str = "meta.json";

    /// 每个堆栈导入时保存的原始数组.
    pub const STACK_FILE: &str = "stack.npy";

    /// 光流子目录.
    pub const FLOW_DIR: &str = "flow";

    /// 轨迹子目录.
    pub const TRAJECTORY_DIR: &str = "trajectory";

    /// 视频子目录.
    pub const VIDEO_DIR: &str = "video";

    /// 数组文件扩展名.
    pub const ARRAY_EXT: &str = "npy";

    /// 视频文件扩展名.
    pub const VIDEO_EXT: &str = "mp4";

    /// 工程根目录的默认目录名.
    pub const ROOT_DIR_NAME: &str = "CellFlow";
}

/// 默认每帧通道数 (每帧在 TIFF 中占用的页数).
pub const DEFAULT_CHANNELS: usize = 3;

/// 光流 / 轨迹分量个数, 依次为 `dx`, `dy`.
pub const COMPONENTS: usize = 2;

/// 分量 `dx` 的下标.
pub const DX: usize = 0;

/// 分量 `dy` 的下标.
pub const DY: usize = 1;

/// 三通道颜色.
pub mod rgb {
    /// 黑色.
    pub const BLACK: [u8; 3] = [0, 0, 0];

    /// 白色.
    pub const WHITE: [u8; 3] = [255, 255, 255];

    /// 默认箭头颜色 (蓝).
    pub const ARROW_BLUE: [u8; 3] = [40, 110, 255];
}
