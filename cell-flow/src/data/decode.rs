//! 多页 TIFF 堆栈解码.

use ndarray::Array4;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::ColorType;

use crate::consts::DEFAULT_CHANNELS;
use crate::{Error, Result};

/// 表明一个可以把磁盘文件解码为 `(frame, channel, height, width)` 数组的对象.
pub trait StackDecoder: Send + Sync {
    /// 解码 `path` 处的堆栈.
    fn decode(&self, path: &Path) -> Result<Array4<f32>>;
}

/// 基于 `tiff` crate 的多页灰度 TIFF 解码器.
///
/// TIFF 页按帧优先排列: 第 `i` 帧第 `c` 通道位于第 `i * channels + c` 页.
/// 8/16/32 位整型和浮点灰度页都会被转换为 `f32`.
#[derive(Copy, Clone, Debug)]
pub struct TiffStackDecoder {
    channels: usize,
}

impl Default for TiffStackDecoder {
    #[inline]
    fn default() -> Self {
        Self {
            channels: DEFAULT_CHANNELS,
        }
    }
}

impl TiffStackDecoder {
    /// 以每帧 `channels` 个通道构建解码器. `channels` 为 0 时返回 `None`.
    #[inline]
    pub fn new(channels: usize) -> Option<Self> {
        (channels > 0).then_some(Self { channels })
    }

    /// 每帧通道数.
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// 把一页解码结果转换为 `f32`.
fn page_to_f32(page: DecodingResult) -> Option<Vec<f32>> {
    Some(match page {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|p| p as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|p| p as f32).collect(),
        _ => return None,
    })
}

impl StackDecoder for TiffStackDecoder {
    fn decode(&self, path: &Path) -> Result<Array4<f32>> {
        let file = File::open(path).map_err(|e| Error::decode(path, e))?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .map_err(|e| Error::decode(path, e))?
            .with_limits(Limits::unlimited());

        let mut shape: Option<(u32, u32)> = None;
        let mut pages = 0usize;
        let mut buf = Vec::new();
        loop {
            let dims = decoder.dimensions().map_err(|e| Error::decode(path, e))?;
            match shape {
                None => shape = Some(dims),
                Some(first) if first != dims => {
                    return Err(Error::decode(
                        path,
                        format!("page {pages} is {dims:?}, expected {first:?}"),
                    ));
                }
                _ => {}
            }
            match decoder.colortype().map_err(|e| Error::decode(path, e))? {
                ColorType::Gray(_) => {}
                other => {
                    return Err(Error::decode(
                        path,
                        format!("page {pages} has colour type {other:?}, expected greyscale"),
                    ))
                }
            }
            let page = decoder.read_image().map_err(|e| Error::decode(path, e))?;
            let page = page_to_f32(page).ok_or_else(|| {
                Error::decode(path, format!("page {pages} has an unsupported sample format"))
            })?;
            buf.extend(page);
            pages += 1;

            if !decoder.more_images() {
                break;
            }
            decoder.next_image().map_err(|e| Error::decode(path, e))?;
        }

        if pages % self.channels != 0 {
            return Err(Error::decode(
                path,
                format!(
                    "{pages} pages cannot be split into frames of {} channels",
                    self.channels
                ),
            ));
        }
        // 至少有一页, 因此 `shape` 必然存在.
        let (w, h) = shape.unwrap_or_default();
        let frames = pages / self.channels;
        Array4::from_shape_vec((frames, self.channels, h as usize, w as usize), buf)
            .map_err(|e| Error::decode(path, e))
    }
}
