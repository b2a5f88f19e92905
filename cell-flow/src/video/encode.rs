//! 视频编码.

use image::RgbImage;
use std::ffi::OsString;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::{Error, Result};

/// 覆盖 `ffmpeg` 可执行文件位置的环境变量.
pub const FFMPEG_ENV_BIN: &str = "CELLFLOW_FFMPEG";

const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";

/// 表明一个可以把等尺寸 RGB 帧序列编码为视频字节流的对象.
pub trait VideoEncoder: Send + Sync {
    /// 以 `fps` 帧率编码 `frames`.
    fn encode(&self, frames: &[RgbImage], fps: u32) -> Result<Vec<u8>>;
}

/// 通过管道调用外部 `ffmpeg` 生成 H.264 mp4.
///
/// 帧以 `rgb24` 原始像素写入标准输入, 编码结果从标准输出读回, 不经过临时文件.
/// 奇数宽高会被补齐为偶数.
#[derive(Clone, Debug)]
pub struct FfmpegEncoder {
    program: PathBuf,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        let program = std::env::var(FFMPEG_ENV_BIN)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_FFMPEG_BIN.to_string());
        Self {
            program: program.into(),
        }
    }
}

impl FfmpegEncoder {
    /// 使用指定的 `ffmpeg` 可执行文件.
    #[inline]
    pub fn with_program<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// 可执行文件.
    #[inline]
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// 命令行参数.
    pub fn args(width: u32, height: u32, fps: u32) -> Vec<OsString> {
        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
            format!("{width}x{height}").as_str(),
            "-r",
            fps.max(1).to_string().as_str(),
            "-i",
            "-",
            "-vf",
            "pad=ceil(iw/2)*2:ceil(ih/2)*2",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "frag_keyframe+empty_moov",
            "-f",
            "mp4",
            "pipe:1",
        ]
        .into_iter()
        .map(OsString::from)
        .collect()
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn encode(&self, frames: &[RgbImage], fps: u32) -> Result<Vec<u8>> {
        let first = frames
            .first()
            .ok_or_else(|| Error::Encode("no frames to encode".to_string()))?;
        let (width, height) = first.dimensions();
        if let Some(bad) = frames.iter().find(|f| f.dimensions() != (width, height)) {
            return Err(Error::Encode(format!(
                "frame is {:?}, expected {:?}",
                bad.dimensions(),
                (width, height)
            )));
        }

        let mut child = Command::new(&self.program)
            .args(Self::args(width, height, fps))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    Error::Encode(format!(
                        "`{}` not found (set {FFMPEG_ENV_BIN} to override)",
                        self.program.display()
                    ))
                } else {
                    Error::Encode(format!("cannot start `{}`: {e}", self.program.display()))
                }
            })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Encode("encoder stdin unavailable".to_string()))?;

        // 写入与读取必须并发, 否则双方都可能阻塞在已满的管道上.
        let (written, output) = std::thread::scope(|s| {
            let writer = s.spawn(move || -> io::Result<()> {
                for f in frames {
                    stdin.write_all(f.as_raw())?;
                }
                Ok(())
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });

        let output = output.map_err(|e| Error::Encode(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Encode(format!(
                "`{}` exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::Encode(format!("cannot feed frames: {e}"))),
            Err(_) => return Err(Error::Encode("frame writer panicked".to_string())),
        }
        log::debug!("encoded {} frames into {} bytes", frames.len(), output.stdout.len());
        Ok(output.stdout)
    }
}
