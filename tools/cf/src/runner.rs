//! 程序运行函数.

use cell_flow::prelude::*;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use thiserror::Error;

use crate::cli::{Cli, Command};
use crate::prompt::Prompter;
use crate::report;

/// 命令行层面的错误.
#[derive(Error, Debug)]
pub enum CliError {
    /// 核心库错误.
    #[error(transparent)]
    Core(#[from] cell_flow::Error),

    /// 终端读写失败.
    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),

    /// 参数组合不合法.
    #[error("{0}")]
    Usage(String),
}

/// 实际运行, 交互输入取自标准输入.
pub fn run(cli: Cli) -> Result<(), CliError> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout();
    run_with(cli, &mut input, &mut out)
}

fn param_source(default: bool, tune: bool) -> ParamSource {
    match (default, tune) {
        (_, true) => ParamSource::Tune,
        (true, _) => ParamSource::Default,
        _ => ParamSource::Stored,
    }
}

fn resolve_root(explicit: Option<PathBuf>) -> Result<PathBuf, CliError> {
    utils::loader::root_dir_from_env_or_home(explicit).ok_or_else(|| {
        CliError::Usage(format!(
            "cannot locate a project root, pass --root or set ${}",
            utils::loader::ROOT_ENV
        ))
    })
}

/// 以给定的输入输出运行一条命令.
pub fn run_with(cli: Cli, input: &mut dyn BufRead, out: &mut dyn Write) -> Result<(), CliError> {
    let root = resolve_root(cli.root)?;
    let mut prompter = Prompter::new(input, out);

    match cli.command {
        Command::Init { force } => {
            let store = ProjectStore::init(&root, force)?;
            writeln!(prompter.out(), "Project ready at {}", store.root().display())?;
            writeln!(
                prompter.out(),
                "Put `DATE_CELLTYPE.tiff` stacks into {}",
                store.inbox().display()
            )?;
        }

        Command::Optflow {
            files,
            name,
            default,
            tune,
            channels,
        } => {
            let decoder = TiffStackDecoder::new(channels)
                .ok_or_else(|| CliError::Usage("--channels must be positive".to_string()))?;
            let pipeline = Pipeline::new(ProjectStore::open(&root)?.with_decoder(decoder));
            let source = param_source(default, tune);

            let written = if files.is_empty() {
                if name.is_some() {
                    return Err(CliError::Usage(
                        "--name requires exactly one input file".to_string(),
                    ));
                }
                pipeline.optflow_inbox(source)?
            } else {
                if name.is_some() && files.len() != 1 {
                    return Err(CliError::Usage(
                        "--name requires exactly one input file".to_string(),
                    ));
                }
                files
                    .iter()
                    .map(|f| pipeline.optflow(f, name.as_deref(), source))
                    .collect::<cell_flow::Result<Vec<_>>>()?
            };
            for a in &written {
                writeln!(prompter.out(), "Optical flow saved to {}", a.path.display())?;
            }
        }

        Command::Traj {
            stack,
            spec,
            default,
            tune,
        } => {
            let pipeline = Pipeline::new(ProjectStore::open(&root)?);
            let selector = match stack {
                Some(s) => s,
                None => prompter.choose_stack(pipeline.store())?,
            };
            let handle = pipeline.resolve_stack(&selector)?;

            match spec {
                Some(index) => {
                    let index = if index.is_empty() {
                        prompter.choose_flow_index(pipeline.store(), &handle)?
                    } else {
                        index
                    };
                    let index: u32 = index
                        .trim()
                        .parse()
                        .map_err(|_| cell_flow::Error::InvalidSelector(index.clone()))?;
                    let a = pipeline.traj_from(&handle, index)?;
                    writeln!(prompter.out(), "Trajectory saved to {}", a.path.display())?;
                }
                None => {
                    let output = pipeline.traj(&handle, param_source(default, tune))?;
                    writeln!(
                        prompter.out(),
                        "Optical flow saved to {}",
                        output.flow.path.display()
                    )?;
                    writeln!(
                        prompter.out(),
                        "Trajectory saved to {}",
                        output.trajectory.path.display()
                    )?;
                }
            }
        }

        Command::Video {
            stack,
            artifact,
            original,
            overlay,
            heatmap,
            step,
            gain,
            fps,
        } => {
            let pipeline = Pipeline::new(ProjectStore::open(&root)?);
            let selector = match stack {
                Some(s) => s,
                None => prompter.choose_stack(pipeline.store())?,
            };
            let handle = pipeline.resolve_stack(&selector)?;
            if original {
                let video = pipeline.video_stack(&handle, fps)?;
                writeln!(
                    prompter.out(),
                    "Video of the original stack saved to {}",
                    video.artifact.path.display()
                )?;
                return Ok(());
            }
            let tag = match artifact {
                Some(t) => t,
                None => prompter.choose_artifact(pipeline.store(), &handle)?,
            };
            let id = parse_artifact(&tag)?;

            let style = if heatmap {
                RenderStyle::Heatmap
            } else {
                RenderStyle::Arrows {
                    step,
                    gain,
                    color: cell_flow::consts::rgb::ARROW_BLUE,
                }
            };
            let options = VideoOptions {
                render: RenderOptions { style, fps },
                overlay,
            };
            let video = pipeline.video(&handle, id, &options)?;
            writeln!(
                prompter.out(),
                "Video of {} saved to {}",
                video.source,
                video.artifact.path.display()
            )?;
        }

        Command::List { stack } => {
            let store = ProjectStore::open(&root)?;
            let pipeline = Pipeline::new(store);
            let handle = stack.map(|s| pipeline.resolve_stack(&s)).transpose()?;
            report::list_into(pipeline.store(), handle.as_ref(), prompter.out())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn run_args(args: &[&str], input: &str) -> Result<String, CliError> {
        let cli = Cli::try_parse_from(args).unwrap();
        let mut input = input.as_bytes();
        let mut out = Vec::new();
        run_with(cli, &mut input, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_param_source() {
        assert_eq!(param_source(false, false), ParamSource::Stored);
        assert_eq!(param_source(true, false), ParamSource::Default);
        assert_eq!(param_source(false, true), ParamSource::Tune);
    }

    #[test]
    fn test_init_then_list() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("CellFlow");
        let root = root.to_str().unwrap();

        let out = run_args(&["cf", "--root", root, "init"], "").unwrap();
        assert!(out.contains("Project ready"));
        let out = run_args(&["cf", "--root", root, "list"], "").unwrap();
        assert!(out.contains("Pending in inbox: 0"));
    }

    #[test]
    fn test_uninitialised_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let err = run_args(&["cf", "--root", root, "list"], "").unwrap_err();
        assert!(matches!(
            err,
            CliError::Core(cell_flow::Error::NotInitialized(_))
        ));
    }

    #[test]
    fn test_traj_prompt_without_stacks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        run_args(&["cf", "--root", root, "init"], "").unwrap();
        let err = run_args(&["cf", "--root", root, "traj"], "").unwrap_err();
        assert!(matches!(err, CliError::Usage(_)));
    }

    #[test]
    fn test_original_video_of_unknown_stack() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        run_args(&["cf", "--root", root, "init"], "").unwrap();
        let err = run_args(&["cf", "--root", root, "video", "nope", "--original"], "").unwrap_err();
        assert!(matches!(
            err,
            CliError::Core(cell_flow::Error::UnknownStack(_))
        ));
    }

    #[test]
    fn test_name_needs_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        run_args(&["cf", "--root", root, "init"], "").unwrap();
        let err = run_args(
            &["cf", "--root", root, "optflow", "--name", "20240101_HELA"],
            "",
        )
        .unwrap_err();
        assert!(matches!(err, CliError::Usage(_)));
    }
}
