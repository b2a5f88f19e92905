//! 命令行参数.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 显微镜 TIFF 堆栈的光流与细胞轨迹工具.
#[derive(Debug, Parser)]
#[command(name = "cf", version, about)]
pub struct Cli {
    /// 工程根目录. 默认取 `$CELLFLOW_ROOT`, 否则为 `{桌面或主目录}/CellFlow`.
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// 输出调试日志.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 工作线程数. 默认为可用核心数.
    #[arg(short, long, global = true, value_name = "N")]
    pub jobs: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

/// 子命令.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// 创建工程目录 (输入目录与空的参数表).
    Init {
        /// 删除已有的工程目录后重建.
        #[arg(long)]
        force: bool,
    },

    /// 导入 TIFF 堆栈并计算光流. 不给出文件时处理输入目录中的全部堆栈.
    Optflow {
        /// 要处理的 TIFF 文件.
        files: Vec<PathBuf>,

        /// 以 `DATE_CELLTYPE` 形式指定堆栈名, 只能与单个文件一起使用.
        #[arg(short, long)]
        name: Option<String>,

        /// 使用默认参数.
        #[arg(short, long, conflicts_with = "tune")]
        default: bool,

        /// 先为该细胞类型调参, 并覆盖参数表中的记录.
        #[arg(short, long)]
        tune: bool,

        /// 每帧通道数.
        #[arg(long, default_value_t = cell_flow::consts::DEFAULT_CHANNELS, value_name = "N")]
        channels: usize,
    },

    /// 计算轨迹. 默认先计算新的光流; `--spec` 时从已有光流派生.
    Traj {
        /// 堆栈名或列表序号. 省略时交互选择.
        #[arg(long)]
        stack: Option<String>,

        /// 从已有光流派生. 省略版本号时交互输入.
        #[arg(
            short,
            long,
            value_name = "INDEX",
            num_args = 0..=1,
            default_missing_value = ""
        )]
        spec: Option<String>,

        /// 使用默认参数.
        #[arg(short, long, conflicts_with = "tune")]
        default: bool,

        /// 先为该细胞类型调参.
        #[arg(short, long, conflicts_with = "spec")]
        tune: bool,
    },

    /// 把光流或轨迹渲染为视频. `--original` 时渲染导入的原始堆栈.
    Video {
        /// 堆栈名或列表序号. 省略时交互选择.
        stack: Option<String>,

        /// 产物标签, 如 `f0`, `t1a`. 省略时交互选择.
        artifact: Option<String>,

        /// 渲染原始堆栈本身, 每个通道一块灰度图.
        #[arg(long, conflicts_with_all = ["artifact", "overlay", "heatmap"])]
        original: bool,

        /// 以原始堆栈为底图.
        #[arg(short, long)]
        overlay: bool,

        /// 绘制模长热力图而不是箭头.
        #[arg(long)]
        heatmap: bool,

        /// 箭头采样间距 (像素).
        #[arg(long, default_value_t = 8)]
        step: usize,

        /// 箭头长度放大倍数.
        #[arg(long)]
        gain: Option<f32>,

        /// 帧率.
        #[arg(long, default_value_t = 10)]
        fps: u32,
    },

    /// 列出工程中的堆栈与产物.
    List {
        /// 只列出该堆栈.
        stack: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_spec_without_value() {
        let cli = Cli::try_parse_from(["cf", "traj", "--spec"]).unwrap();
        let Command::Traj { spec, .. } = cli.command else {
            panic!("expected traj");
        };
        assert_eq!(spec.as_deref(), Some(""));

        let cli = Cli::try_parse_from(["cf", "--root", "/x", "traj", "-s", "3"]).unwrap();
        let Command::Traj { spec, .. } = cli.command else {
            panic!("expected traj");
        };
        assert_eq!(spec.as_deref(), Some("3"));
        assert_eq!(cli.root, Some(PathBuf::from("/x")));
    }

    #[test]
    fn test_conflicting_flags() {
        assert!(Cli::try_parse_from(["cf", "optflow", "--default", "--tune"]).is_err());
        assert!(Cli::try_parse_from(["cf", "traj", "--spec", "1", "--tune"]).is_err());
    }

    #[test]
    fn test_video_positionals() {
        let cli = Cli::try_parse_from(["cf", "video", "0", "t1a", "-o", "--fps", "5"]).unwrap();
        let Command::Video {
            stack,
            artifact,
            overlay,
            fps,
            ..
        } = cli.command
        else {
            panic!("expected video");
        };
        assert_eq!(stack.as_deref(), Some("0"));
        assert_eq!(artifact.as_deref(), Some("t1a"));
        assert!(overlay);
        assert_eq!(fps, 5);
    }

    #[test]
    fn test_video_original() {
        let cli = Cli::try_parse_from(["cf", "video", "0", "--original"]).unwrap();
        let Command::Video {
            original, artifact, ..
        } = cli.command
        else {
            panic!("expected video");
        };
        assert!(original);
        assert_eq!(artifact, None);
        assert!(Cli::try_parse_from(["cf", "video", "0", "t1a", "--original"]).is_err());
        assert!(Cli::try_parse_from(["cf", "video", "--original", "-o"]).is_err());
    }
}
