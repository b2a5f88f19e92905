//! 工程根目录的定位.

use std::env;
use std::path::PathBuf;

/// 覆盖工程根目录的环境变量.
pub const ROOT_ENV: &str = "CELLFLOW_ROOT";

/// 获取工程根目录.
///
/// 1. 若给出 `explicit`, 则返回它;
/// 2. 若环境变量 `$CELLFLOW_ROOT` 非空, 则返回其值;
/// 3. 否则, 返回 `{桌面目录或用户主目录}/CellFlow`.
///
/// 三者都不可用时返回 `None`.
pub fn root_dir_from_env_or_home(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit
        .or_else(|| {
            env::var_os(ROOT_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
        .or_else(cell_flow::store::default_root)
}
