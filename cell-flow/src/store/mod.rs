//! 工程目录存储.
//!
//! [`ProjectStore`] 是磁盘目录树的唯一所有者, 其余组件都通过它读写产物.
//! 所有写入都遵循 "写临时文件, 再重命名" 的规则: 读者永远不会在符合命名规则的
//! 文件名下看到写了一半的数组. 产物只追加, 从不覆盖.

use ndarray::{Array4, Array5};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::consts::layout::*;
use crate::data::{FlowField, Stack, StackDecoder, TiffStackDecoder, TrajectoryField};
use crate::{Error, Result};

mod meta;
pub mod naming;
mod types;

pub use meta::{parse_stack_type, ProjectMeta};
pub use naming::{ArtifactId, ArtifactKind, ArtifactNamer, Suffix, TrajectoryId};
pub use types::TypeParameterStore;

/// 获取默认工程根目录 `{桌面目录}/CellFlow`. 没有桌面目录时使用用户主目录.
pub fn default_root() -> Option<PathBuf> {
    let mut ans = dirs::desktop_dir().or_else(dirs::home_dir)?;
    ans.push(ROOT_DIR_NAME);
    Some(ans)
}

/// 导入时临时目录的前缀. 以 `.` 开头的目录不会被当作堆栈.
const STAGING_PREFIX: &str = ".ingest-";

/// 把 `write` 产生的内容原子地写到 `dest`.
///
/// 内容先写入 `dir` 下的临时文件 (以 `.tmp` 开头, 不会被命名规则解析),
/// 落盘后再重命名. `overwrite == false` 时若 `dest` 已存在则返回
/// [`Error::NamingCollision`], 且不触碰已有文件.
pub(crate) fn write_atomic<F>(dir: &Path, dest: &Path, overwrite: bool, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let tmp = NamedTempFile::new_in(dir).map_err(|e| Error::persistence(dest, e))?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        write(&mut w).map_err(|e| Error::persistence(dest, e))?;
        w.flush().map_err(|e| Error::persistence(dest, e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::persistence(dest, e))?;

    let persisted = if overwrite {
        tmp.persist(dest)
    } else {
        tmp.persist_noclobber(dest)
    };
    // 失败时临时文件随 `PersistError` 一起被删除.
    persisted.map(|_| ()).map_err(|e| {
        if !overwrite && dest.exists() {
            Error::NamingCollision(dest.to_owned())
        } else {
            Error::persistence(dest, e.error)
        }
    })
}

/// 工程中一个堆栈的标识 (元数据 + 目录). 不包含解码后的数组.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackHandle {
    meta: ProjectMeta,
    dir: PathBuf,
}

impl StackHandle {
    /// 堆栈名.
    #[inline]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// 细胞类型.
    #[inline]
    pub fn stack_type(&self) -> &str {
        &self.meta.stack_type
    }

    /// 元数据.
    #[inline]
    pub fn meta(&self) -> &ProjectMeta {
        &self.meta
    }

    /// 堆栈目录 `<root>/<name>`.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 某类产物所在目录.
    #[inline]
    pub fn artifact_dir(&self, kind: ArtifactKind) -> PathBuf {
        self.dir.join(kind.dir())
    }

    /// 某个产物的完整路径.
    #[inline]
    pub fn artifact_path(&self, id: ArtifactId) -> PathBuf {
        self.artifact_dir(id.kind()).join(id.file_name(self.name()))
    }

    /// 该堆栈的命名器.
    #[inline]
    pub fn namer(&self) -> ArtifactNamer<'_> {
        ArtifactNamer::new(self.name())
    }
}

/// 一个已落盘的产物.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Artifact {
    /// 标识.
    pub id: ArtifactId,

    /// 最终路径.
    pub path: PathBuf,
}

/// 一个已落盘的视频, 附带其数据来源.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VideoArtifact {
    /// 视频文件.
    pub artifact: Artifact,

    /// 渲染所用的光流或轨迹.
    pub source: VideoSource,
}

/// 工程目录存储.
///
/// 进程启动时以根目录打开, 之后所有修改都经由它的方法完成.
pub struct ProjectStore {
    root: PathBuf,
    types: TypeParameterStore,
    decoder: Box<dyn StackDecoder>,
}

impl std::fmt::Debug for ProjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ProjectStore {
    /// 初始化工程目录: 创建 `root`, `root/in` 和空的 `types.json`.
    ///
    /// 已初始化的工程保持不变. `force == true` 时先删除整个 `root`.
    pub fn init<P: AsRef<Path>>(root: P, force: bool) -> Result<Self> {
        let root = root.as_ref().to_owned();
        if force && root.exists() {
            log::warn!("removing existing project at {}", root.display());
            fs::remove_dir_all(&root).map_err(|e| Error::persistence(&root, e))?;
        }
        let inbox = root.join(INBOX_DIR);
        fs::create_dir_all(&inbox).map_err(|e| Error::persistence(&inbox, e))?;

        let types = TypeParameterStore::new(root.join(TYPES_FILE));
        if !types.path().exists() {
            types.write_empty()?;
        }
        log::info!("project initialised at {}", root.display());
        Self::open(root)
    }

    /// 打开已初始化的工程. `types.json` 不存在时返回 [`Error::NotInitialized`].
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_owned();
        let types = TypeParameterStore::new(root.join(TYPES_FILE));
        if !types.path().is_file() {
            return Err(Error::NotInitialized(root));
        }
        Ok(Self {
            root,
            types,
            decoder: Box::<TiffStackDecoder>::default(),
        })
    }

    /// 替换堆栈解码器.
    #[inline]
    pub fn with_decoder<D: StackDecoder + 'static>(mut self, decoder: D) -> Self {
        self.decoder = Box::new(decoder);
        self
    }

    /// 工程根目录.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 输入目录 `<root>/in`.
    #[inline]
    pub fn inbox(&self) -> PathBuf {
        self.root.join(INBOX_DIR)
    }

    /// 细胞类型参数表.
    #[inline]
    pub fn types(&self) -> &TypeParameterStore {
        &self.types
    }

    /// 输入目录下所有 `.tif` / `.tiff` 文件, 按文件名排序.
    pub fn inbox_stacks(&self) -> Result<Vec<PathBuf>> {
        let inbox = self.inbox();
        let mut ans: Vec<PathBuf> = fs::read_dir(&inbox)
            .map_err(|e| Error::decode(&inbox, e))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_tiff(p))
            .collect();
        ans.sort();
        Ok(ans)
    }

    /// 导入一个 TIFF 堆栈.
    ///
    /// 名字取 `name` (若给出) 或文件名主干, 必须符合 `DATE_CELLTYPE`, 否则在任何
    /// 写入之前返回 [`Error::MalformedStackName`].
    ///
    /// 首次导入时, 解码后的数组保存为 `<name>/stack.npy`, 此后堆栈归工程所有,
    /// 不再依赖输入 TIFF. 新堆栈的目录树先在根目录下的临时目录中建好, 再整体
    /// 重命名, 失败时不会留下半个堆栈. 已导入的堆栈不会重新解码, 直接返回保存的数组.
    pub fn ingest<P: AsRef<Path>>(
        &self,
        tiff_path: P,
        name: Option<&str>,
    ) -> Result<(StackHandle, Stack)> {
        self.ingest_tracked(tiff_path.as_ref(), name)
            .map(|(handle, stack, _)| (handle, stack))
    }

    /// 同 [`ProjectStore::ingest`], 另外返回堆栈目录是否由本次调用新建.
    pub(crate) fn ingest_tracked(
        &self,
        tiff_path: &Path,
        name: Option<&str>,
    ) -> Result<(StackHandle, Stack, bool)> {
        let name = match name {
            Some(n) => n.to_string(),
            None => tiff_path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| Error::MalformedStackName(tiff_path.display().to_string()))?
                .to_string(),
        };
        let stack_type = parse_stack_type(&name)?.to_string();
        let dir = self.root.join(&name);

        let meta_path = dir.join(META_FILE);
        if meta_path.is_file() && dir.join(STACK_FILE).is_file() {
            let handle = StackHandle {
                meta: read_meta(&meta_path)?,
                dir,
            };
            log::info!("`{name}` is already ingested, using the stored array");
            let stack = self.load_stack(&handle)?;
            return Ok((handle, stack, false));
        }

        let data = self.decoder.decode(tiff_path)?;
        let (frames, channels, h, w) = data.dim();
        log::info!("decoded `{name}`: {frames} frames, {channels} channels, {h}x{w}");
        let meta = ProjectMeta {
            path: fs::canonicalize(tiff_path).unwrap_or_else(|_| tiff_path.to_owned()),
            stack_type: stack_type.clone(),
            name: name.clone(),
        };

        let created = !dir.exists();
        let meta = if created {
            let staging = tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempdir_in(&self.root)
                .map_err(|e| Error::persistence(&self.root, e))?;
            let meta = populate(staging.path(), meta, &data)?;
            fs::rename(staging.path(), &dir).map_err(|e| Error::persistence(&dir, e))?;
            meta
        } else {
            // 目录已存在但不完整: 原地补齐, 已有文件保持不变.
            populate(&dir, meta, &data)?
        };

        Ok((
            StackHandle { meta, dir },
            Stack::new(name, stack_type, data),
            created,
        ))
    }

    /// 工程中所有堆栈, 按名字排序.
    pub fn stacks(&self) -> Result<Vec<StackHandle>> {
        let mut ans = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| Error::decode(&self.root, e))? {
            let entry = entry.map_err(|e| Error::decode(&self.root, e))?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let dir = entry.path();
            let meta_path = dir.join(META_FILE);
            if dir.is_dir() && meta_path.is_file() {
                ans.push(StackHandle {
                    meta: read_meta(&meta_path)?,
                    dir,
                });
            }
        }
        ans.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(ans)
    }

    /// 按名字获取堆栈.
    pub fn stack(&self, name: &str) -> Result<StackHandle> {
        let dir = self.root.join(name);
        let meta_path = dir.join(META_FILE);
        if !meta_path.is_file() {
            return Err(Error::UnknownStack(name.to_string()));
        }
        Ok(StackHandle {
            meta: read_meta(&meta_path)?,
            dir,
        })
    }

    /// 读取导入时保存的堆栈数组. 不存在时返回 [`Error::ArtifactNotFound`].
    pub fn load_stack(&self, handle: &StackHandle) -> Result<Stack> {
        let data: Array4<f32> = read_npy(&handle.dir.join(STACK_FILE))?;
        Ok(Stack::new(
            handle.name().to_string(),
            handle.stack_type().to_string(),
            data,
        ))
    }

    /// 列出某类产物的全部标识.
    fn list(&self, handle: &StackHandle, kind: ArtifactKind) -> Result<Vec<ArtifactId>> {
        let dir = handle.artifact_dir(kind);
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::decode(&dir, e)),
        };
        let mut ans = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::decode(&dir, e))?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if let Some(id) = ArtifactId::parse_file_name(handle.name(), &file_name) {
                if id.kind() == kind {
                    ans.push(id);
                }
            }
        }
        ans.sort();
        Ok(ans)
    }

    /// 已有的光流版本号.
    pub fn flow_indices(&self, handle: &StackHandle) -> Result<BTreeSet<u32>> {
        Ok(self
            .list(handle, ArtifactKind::Flow)?
            .into_iter()
            .filter_map(|id| match id {
                ArtifactId::Flow(i) => Some(i),
                _ => None,
            })
            .collect())
    }

    /// 已有的轨迹标识.
    pub fn trajectory_ids(&self, handle: &StackHandle) -> Result<BTreeSet<TrajectoryId>> {
        Ok(self
            .list(handle, ArtifactKind::Trajectory)?
            .into_iter()
            .filter_map(|id| match id {
                ArtifactId::Trajectory(t) => Some(t),
                _ => None,
            })
            .collect())
    }

    /// 已有的视频标识 (光流视频与轨迹视频).
    pub fn video_ids(&self, handle: &StackHandle) -> Result<BTreeSet<ArtifactId>> {
        let mut ans: BTreeSet<_> = self
            .list(handle, ArtifactKind::VideoFlow)?
            .into_iter()
            .collect();
        ans.extend(self.list(handle, ArtifactKind::VideoTrajectory)?);
        ans.extend(self.list(handle, ArtifactKind::VideoStack)?);
        Ok(ans)
    }

    fn write_array(&self, handle: &StackHandle, id: ArtifactId, arr: &Array5<f32>) -> Result<Artifact> {
        let path = handle.artifact_path(id);
        let dir = handle.artifact_dir(id.kind());
        fs::create_dir_all(&dir).map_err(|e| Error::persistence(&dir, e))?;
        write_npy(&dir, &path, arr)?;
        log::info!("wrote {}", path.display());
        Ok(Artifact { id, path })
    }

    /// 以新的光流版本号保存光流场.
    pub fn persist_flow(&self, handle: &StackHandle, flow: &FlowField) -> Result<Artifact> {
        let id = handle.namer().next_flow(&self.flow_indices(handle)?)?;
        self.write_array(handle, id, flow.data())
    }

    /// 保存由光流 `source` 积分得到的轨迹场.
    ///
    /// `from_existing` 表示轨迹派生自已存在的光流 (总是带后缀);
    /// 否则表示光流在本次调用中刚刚生成. `source` 不存在时返回
    /// [`Error::UnknownFlowIndex`], 且不写任何文件.
    pub fn persist_trajectory(
        &self,
        handle: &StackHandle,
        source: u32,
        trajectory: &TrajectoryField,
        from_existing: bool,
    ) -> Result<Artifact> {
        let id = handle.namer().next_trajectory(
            &self.flow_indices(handle)?,
            &self.trajectory_ids(handle)?,
            source,
            from_existing,
        )?;
        self.write_array(handle, id, trajectory.data())
    }

    /// 保存一段已编码的视频.
    pub fn persist_video(
        &self,
        handle: &StackHandle,
        source: VideoSource,
        encoded: &[u8],
    ) -> Result<VideoArtifact> {
        let existing = self.video_ids(handle)?;
        let namer = handle.namer();
        let id = match source {
            VideoSource::Flow(_) => {
                let used = existing
                    .iter()
                    .filter_map(|id| match id {
                        ArtifactId::VideoFlow(i) => Some(*i),
                        _ => None,
                    })
                    .collect();
                namer.next_video_flow(&used)?
            }
            VideoSource::Trajectory(t) => {
                let used = existing
                    .iter()
                    .filter_map(|id| match id {
                        ArtifactId::VideoTrajectory(t, n) => Some((*t, *n)),
                        _ => None,
                    })
                    .collect();
                namer.next_video_trajectory(&used, t)?
            }
            VideoSource::Stack => {
                let used = existing
                    .iter()
                    .filter_map(|id| match id {
                        ArtifactId::VideoStack(i) => Some(*i),
                        _ => None,
                    })
                    .collect();
                namer.next_video_stack(&used)?
            }
        };
        let path = handle.artifact_path(id);
        let dir = handle.artifact_dir(id.kind());
        fs::create_dir_all(&dir).map_err(|e| Error::persistence(&dir, e))?;
        write_atomic(&dir, &path, false, |w| w.write_all(encoded))?;
        log::info!("wrote {} (source {source})", path.display());
        Ok(VideoArtifact {
            artifact: Artifact { id, path },
            source,
        })
    }

    /// 读取光流场. 不存在时返回 [`Error::ArtifactNotFound`].
    pub fn load_flow(&self, handle: &StackHandle, index: u32) -> Result<FlowField> {
        let path = handle.artifact_path(ArtifactId::Flow(index));
        FlowField::from_raw(read_npy(&path)?)
    }

    /// 读取轨迹场. 不存在时返回 [`Error::ArtifactNotFound`].
    pub fn load_trajectory(&self, handle: &StackHandle, id: TrajectoryId) -> Result<TrajectoryField> {
        let path = handle.artifact_path(ArtifactId::Trajectory(id));
        TrajectoryField::from_raw(read_npy(&path)?)
    }

    /// 删除本次调用中刚刚落盘的产物. 仅供流水线回滚使用.
    pub(crate) fn discard(&self, artifact: &Artifact) -> Result<()> {
        log::warn!("rolling back {}", artifact.path.display());
        fs::remove_file(&artifact.path).map_err(|e| Error::persistence(&artifact.path, e))
    }

    /// 删除本次调用中刚刚导入的整个堆栈目录. 仅供流水线回滚使用.
    pub(crate) fn discard_stack(&self, handle: &StackHandle) -> Result<()> {
        log::warn!("rolling back stack {}", handle.dir.display());
        fs::remove_dir_all(&handle.dir).map_err(|e| Error::persistence(&handle.dir, e))
    }
}

/// 视频的数据来源.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum VideoSource {
    /// 光流 `f{i}`.
    Flow(u32),

    /// 轨迹 `t{i}{suffix}`.
    Trajectory(TrajectoryId),

    /// 导入的原始堆栈本身.
    Stack,
}

impl std::fmt::Display for VideoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flow(i) => write!(f, "f{i}"),
            Self::Trajectory(t) => write!(f, "t{t}"),
            Self::Stack => f.write_str("stack"),
        }
    }
}

/// 在 `dir` 下建好堆栈目录树, 写入尚不存在的 `meta.json` 与 `stack.npy`.
/// 返回实际生效的元数据.
fn populate(dir: &Path, meta: ProjectMeta, data: &Array4<f32>) -> Result<ProjectMeta> {
    for sub in [FLOW_DIR, TRAJECTORY_DIR, VIDEO_DIR] {
        let d = dir.join(sub);
        fs::create_dir_all(&d).map_err(|e| Error::persistence(&d, e))?;
    }

    let meta_path = dir.join(META_FILE);
    let meta = if meta_path.is_file() {
        read_meta(&meta_path)?
    } else {
        write_atomic(dir, &meta_path, false, |w| {
            serde_json::to_writer_pretty(&mut *w, &meta).map_err(io::Error::other)?;
            w.write_all(b"\n")
        })?;
        meta
    };

    let stack_path = dir.join(STACK_FILE);
    if !stack_path.is_file() {
        write_npy(dir, &stack_path, data)?;
    }
    Ok(meta)
}

/// 以 `.npy` 格式原子地写出数组, 不覆盖已有文件.
fn write_npy<A: WriteNpyExt>(dir: &Path, path: &Path, arr: &A) -> Result<()> {
    write_atomic(dir, path, false, |w| {
        arr.write_npy(w).map_err(|e| io::Error::other(e.to_string()))
    })
}

/// 读取 `.npy` 数组. 文件不存在时返回 [`Error::ArtifactNotFound`].
fn read_npy<A: ReadNpyExt>(path: &Path) -> Result<A> {
    if !path.is_file() {
        return Err(Error::ArtifactNotFound(path.to_owned()));
    }
    let file = File::open(path).map_err(|e| Error::decode(path, e))?;
    A::read_npy(BufReader::new(file)).map_err(|e| Error::decode(path, e))
}

fn read_meta(path: &Path) -> Result<ProjectMeta> {
    let text = fs::read_to_string(path).map_err(|e| Error::decode(path, e))?;
    serde_json::from_str(&text).map_err(|e| Error::decode(path, e))
}

#[inline]
fn is_tiff(p: &Path) -> bool {
    p.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
}
