//! 产物命名.
//!
//! 命名器是纯函数: 给定堆栈基础名和某类产物当前已存在的标识集合, 给出下一个
//! 不冲突的标识. 已存在集合由调用方 (即 [`crate::ProjectStore`]) 通过解析目录
//! 内容得到.
//!
//! | 种类        | 文件名                         | 版本规则                          |
//! |-------------|--------------------------------|-----------------------------------|
//! | 光流        | `{base}_f{i}.npy`              | `i = max + 1`, 无则为 0           |
//! | 轨迹        | `{base}_t{i}{suffix}.npy`      | 同一 `i` 下后缀依次为 ``, a, b, … |
//! | 光流视频    | `{base}_vf{i}.mp4`             | 同光流                            |
//! | 轨迹视频    | `{base}_vt{i}{suffix}[_{n}].mp4` | 同一轨迹的第 n 次渲染, 首次无 `_n` |
//! | 堆栈视频    | `{base}_vo{i}.mp4`             | 同光流                            |

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::consts::layout::*;
use crate::{Error, Result};

/// 派生后缀: 双射 26 进制字母序列 (没有 "零" 字母).
///
/// 序数 0 表示空后缀; 1 -> `a`, 26 -> `z`, 27 -> `aa`, 702 -> `zz`, 703 -> `aaa`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Suffix(u32);

impl Suffix {
    /// 空后缀.
    pub const EMPTY: Suffix = Suffix(0);

    /// 由序数构建.
    #[inline]
    pub const fn from_ordinal(n: u32) -> Self {
        Self(n)
    }

    /// 序数.
    #[inline]
    pub const fn ordinal(&self) -> u32 {
        self.0
    }

    /// 是否为空后缀?
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// 序列中的下一个后缀. 序数溢出时返回 `None`.
    #[inline]
    pub const fn next(&self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut n = self.0;
        let mut buf = Vec::with_capacity(4);
        while n > 0 {
            n -= 1;
            buf.push(b'a' + (n % 26) as u8);
            n /= 26;
        }
        buf.reverse();
        // 只含 ASCII 小写字母.
        f.write_str(std::str::from_utf8(&buf).map_err(|_| fmt::Error)?)
    }
}

impl FromStr for Suffix {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.bytes()
            .try_fold(0u32, |acc, b| {
                if !b.is_ascii_lowercase() {
                    return None;
                }
                acc.checked_mul(26)?.checked_add(u32::from(b - b'a') + 1)
            })
            .map(Suffix)
            .ok_or(())
    }
}

/// 轨迹 (或轨迹视频) 标识: 源光流版本号 + 派生后缀.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TrajectoryId {
    /// 源光流版本号.
    pub flow: u32,

    /// 派生后缀.
    pub suffix: Suffix,
}

impl TrajectoryId {
    /// 构建标识.
    #[inline]
    pub const fn new(flow: u32, suffix: Suffix) -> Self {
        Self { flow, suffix }
    }
}

impl fmt::Display for TrajectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.flow, self.suffix)
    }
}

impl FromStr for TrajectoryId {
    type Err = ();

    /// 解析 `1`, `1a`, `12zz` 之类的标识. 不接受前导零.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, letters) = s.split_at(split);
        let flow = parse_index(digits).ok_or(())?;
        Ok(Self::new(flow, letters.parse()?))
    }
}

/// 解析非负整数版本号. 拒绝空串和前导零, 以免 `f01` 与 `f1` 指向同一版本.
fn parse_index(digits: &str) -> Option<u32> {
    if digits.is_empty()
        || !digits.bytes().all(|b| b.is_ascii_digit())
        || (digits.len() > 1 && digits.starts_with('0'))
    {
        return None;
    }
    digits.parse().ok()
}

/// 产物种类.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ArtifactKind {
    /// 光流数组.
    Flow,

    /// 轨迹数组.
    Trajectory,

    /// 光流视频.
    VideoFlow,

    /// 轨迹视频.
    VideoTrajectory,

    /// 原始堆栈视频.
    VideoStack,
}

impl ArtifactKind {
    /// 文件名中的种类标记.
    #[inline]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Flow => "f",
            Self::Trajectory => "t",
            Self::VideoFlow => "vf",
            Self::VideoTrajectory => "vt",
            Self::VideoStack => "vo",
        }
    }

    /// 所在子目录.
    #[inline]
    pub const fn dir(&self) -> &'static str {
        match self {
            Self::Flow => FLOW_DIR,
            Self::Trajectory => TRAJECTORY_DIR,
            Self::VideoFlow | Self::VideoTrajectory | Self::VideoStack => VIDEO_DIR,
        }
    }

    /// 文件扩展名.
    #[inline]
    pub const fn ext(&self) -> &'static str {
        match self {
            Self::Flow | Self::Trajectory => ARRAY_EXT,
            Self::VideoFlow | Self::VideoTrajectory | Self::VideoStack => VIDEO_EXT,
        }
    }
}

/// 单个产物的标识.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ArtifactId {
    /// `f{i}`.
    Flow(u32),

    /// `t{i}{suffix}`.
    Trajectory(TrajectoryId),

    /// `vf{i}`.
    VideoFlow(u32),

    /// `vt{i}{suffix}`, 同一轨迹的第 `n > 0` 次渲染为 `vt{i}{suffix}_{n}`.
    VideoTrajectory(TrajectoryId, u32),

    /// `vo{i}`.
    VideoStack(u32),
}

impl ArtifactId {
    /// 种类.
    #[inline]
    pub const fn kind(&self) -> ArtifactKind {
        match self {
            Self::Flow(_) => ArtifactKind::Flow,
            Self::Trajectory(_) => ArtifactKind::Trajectory,
            Self::VideoFlow(_) => ArtifactKind::VideoFlow,
            Self::VideoTrajectory(..) => ArtifactKind::VideoTrajectory,
            Self::VideoStack(_) => ArtifactKind::VideoStack,
        }
    }

    /// 标签, 如 `f0`, `t1a`, `vt3`, `vt1a_2`.
    pub fn tag(&self) -> String {
        let kind = self.kind().tag();
        match self {
            Self::Flow(i) | Self::VideoFlow(i) | Self::VideoStack(i) => format!("{kind}{i}"),
            Self::Trajectory(t) | Self::VideoTrajectory(t, 0) => format!("{kind}{t}"),
            Self::VideoTrajectory(t, n) => format!("{kind}{t}_{n}"),
        }
    }

    /// 不含扩展名的文件名: `{base}_{tag}`.
    #[inline]
    pub fn stem(&self, base: &str) -> String {
        format!("{base}_{}", self.tag())
    }

    /// 完整文件名: `{base}_{tag}.{ext}`.
    #[inline]
    pub fn file_name(&self, base: &str) -> String {
        format!("{}.{}", self.stem(base), self.kind().ext())
    }

    /// 解析标签 (`f0`, `t1a`, `vf2`, `vt0b`, `vt0b_1`, `vo3`). 无法解析时返回 `None`.
    pub fn parse_tag(tag: &str) -> Option<Self> {
        // 先匹配双字母标记.
        if let Some(rest) = tag.strip_prefix("vf") {
            parse_index(rest).map(Self::VideoFlow)
        } else if let Some(rest) = tag.strip_prefix("vo") {
            parse_index(rest).map(Self::VideoStack)
        } else if let Some(rest) = tag.strip_prefix("vt") {
            let (t, n) = match rest.split_once('_') {
                // `_0` 与无后缀重复, 不接受.
                Some((t, n)) => (t, parse_index(n).filter(|&n| n > 0)?),
                None => (rest, 0),
            };
            t.parse().ok().map(|t| Self::VideoTrajectory(t, n))
        } else if let Some(rest) = tag.strip_prefix('f') {
            parse_index(rest).map(Self::Flow)
        } else if let Some(rest) = tag.strip_prefix('t') {
            rest.parse().ok().map(Self::Trajectory)
        } else {
            None
        }
    }

    /// 从目录中的文件名解析标识. 不属于 `base` 或不符合命名规则的文件
    /// (包括写入中的临时文件) 返回 `None`.
    pub fn parse_file_name(base: &str, file_name: &str) -> Option<Self> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        let tag = stem.strip_prefix(base)?.strip_prefix('_')?;
        let id = Self::parse_tag(tag)?;
        (id.kind().ext() == ext).then_some(id)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// 产物命名器. 绑定一个堆栈基础名.
#[derive(Copy, Clone, Debug)]
pub struct ArtifactNamer<'a> {
    base: &'a str,
}

/// `max + 1`, 集合为空时为 0. 溢出时返回 `None`.
#[inline]
fn next_index<'a, I: IntoIterator<Item = &'a u32>>(existing: I) -> Option<u32> {
    existing.into_iter().max().map_or(Some(0), |m| m.checked_add(1))
}

/// 源光流 `flow` 下已用过的最大后缀.
fn max_suffix(existing: &BTreeSet<TrajectoryId>, flow: u32) -> Option<Suffix> {
    existing
        .range(TrajectoryId::new(flow, Suffix::EMPTY)..)
        .take_while(|t| t.flow == flow)
        .map(|t| t.suffix)
        .max()
}

impl<'a> ArtifactNamer<'a> {
    /// 为堆栈 `base` 构建命名器.
    #[inline]
    pub fn new(base: &'a str) -> Self {
        Self { base }
    }

    /// 堆栈基础名.
    #[inline]
    pub fn base(&self) -> &str {
        self.base
    }

    fn exhausted(&self, kind: ArtifactKind) -> Error {
        Error::Naming(format!(
            "`{}` has used up the `{}` index space",
            self.base,
            kind.tag()
        ))
    }

    /// 下一个光流标识.
    pub fn next_flow(&self, flows: &BTreeSet<u32>) -> Result<ArtifactId> {
        next_index(flows)
            .map(ArtifactId::Flow)
            .ok_or_else(|| self.exhausted(ArtifactKind::Flow))
    }

    /// 下一个光流视频标识.
    pub fn next_video_flow(&self, videos: &BTreeSet<u32>) -> Result<ArtifactId> {
        next_index(videos)
            .map(ArtifactId::VideoFlow)
            .ok_or_else(|| self.exhausted(ArtifactKind::VideoFlow))
    }

    /// 下一个堆栈视频标识.
    pub fn next_video_stack(&self, videos: &BTreeSet<u32>) -> Result<ArtifactId> {
        next_index(videos)
            .map(ArtifactId::VideoStack)
            .ok_or_else(|| self.exhausted(ArtifactKind::VideoStack))
    }

    /// 下一个由光流 `flow` 得到的轨迹标识.
    ///
    /// - `derived == false`: 轨迹与光流在同一次调用中新建. 该光流下还没有轨迹时后缀为空.
    /// - `derived == true`: 从已有光流派生, 总是带后缀, 依次为 `a`, `b`, … .
    ///
    /// `flow` 不在 `flows` 中时返回 [`Error::UnknownFlowIndex`].
    pub fn next_trajectory(
        &self,
        flows: &BTreeSet<u32>,
        trajectories: &BTreeSet<TrajectoryId>,
        flow: u32,
        derived: bool,
    ) -> Result<ArtifactId> {
        if !flows.contains(&flow) {
            return Err(Error::UnknownFlowIndex {
                stack: self.base.to_string(),
                index: flow,
            });
        }
        let suffix = match (max_suffix(trajectories, flow), derived) {
            (None, false) => Some(Suffix::EMPTY),
            (None, true) => Suffix::EMPTY.next(),
            (Some(s), _) => s.next(),
        }
        .ok_or_else(|| self.exhausted(ArtifactKind::Trajectory))?;
        Ok(ArtifactId::Trajectory(TrajectoryId::new(flow, suffix)))
    }

    /// 轨迹 `source` 的下一个视频标识.
    ///
    /// 视频名总是包含完整的轨迹标识: 第一次渲染为 `vt{source}`, 之后依次为
    /// `vt{source}_1`, `vt{source}_2`, … . `videos` 为已有的 `(轨迹, 序号)`.
    pub fn next_video_trajectory(
        &self,
        videos: &BTreeSet<(TrajectoryId, u32)>,
        source: TrajectoryId,
    ) -> Result<ArtifactId> {
        let used = videos
            .range((source, 0)..=(source, u32::MAX))
            .map(|(_, n)| n);
        next_index(used)
            .map(|n| ArtifactId::VideoTrajectory(source, n))
            .ok_or_else(|| self.exhausted(ArtifactKind::VideoTrajectory))
    }
}
