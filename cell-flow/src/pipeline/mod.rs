//! 流水线: `optflow`, `traj`, `video` 三个高层操作.
//!
//! 每次调用要么把所有产物都落盘, 要么什么都不留下: 中途失败时, 本次调用中
//! 已经写入的产物 (包括刚导入的堆栈) 会被删除, 错误原样返回.

use std::path::Path;

use crate::data::{FieldKind, Stack};
use crate::flow::{DenseLucasKanade, FlowEngine, FlowKernel, ViewSelection};
use crate::params::ParameterRecord;
use crate::store::{
    Artifact, ArtifactId, ProjectStore, StackHandle, TrajectoryId, VideoArtifact, VideoSource,
};
use crate::trajectory::TrajectoryEngine;
use crate::tuning::{GridSearch, Tuner};
use crate::video::{FfmpegEncoder, RenderOptions, VideoEncoder, VideoRenderer};
use crate::{Error, Result};

/// 参数来源.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ParamSource {
    /// 使用 `types.json` 中该细胞类型的记录; 没有记录时使用默认值.
    #[default]
    Stored,

    /// 总是使用默认值.
    Default,

    /// 先调参, 成功后写回 `types.json`, 再使用新参数.
    Tune,
}

/// `video` 操作的选项.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct VideoOptions {
    /// 渲染选项.
    pub render: RenderOptions,

    /// 是否以原始堆栈为底图.
    pub overlay: bool,
}

/// 一次 `traj` 调用的产物.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrajOutput {
    /// 新计算的光流.
    pub flow: Artifact,

    /// 由其积分得到的轨迹.
    pub trajectory: Artifact,
}

/// 本次调用写入的一项.
#[derive(Debug)]
enum Entry {
    Artifact(Artifact),
    Stack(StackHandle),
}

/// 本次调用已写入的内容. 失败时按相反顺序删除.
#[derive(Debug, Default)]
struct Journal {
    written: Vec<Entry>,
}

impl Journal {
    #[inline]
    fn record(&mut self, artifact: &Artifact) {
        self.written.push(Entry::Artifact(artifact.clone()));
    }

    #[inline]
    fn record_stack(&mut self, handle: &StackHandle) {
        self.written.push(Entry::Stack(handle.clone()));
    }
}

/// 流水线.
pub struct Pipeline<K = DenseLucasKanade> {
    store: ProjectStore,
    engine: FlowEngine<K>,
    trajectory: TrajectoryEngine,
    renderer: VideoRenderer,
    encoder: Box<dyn VideoEncoder>,
    tuner: Box<dyn Tuner>,
    views: Option<ViewSelection>,
}

impl Pipeline {
    /// 以默认组件构建: 金字塔 Lucas–Kanade, `ffmpeg` 编码器, 网格搜索调参.
    pub fn new(store: ProjectStore) -> Self {
        Self {
            store,
            engine: FlowEngine::new(),
            trajectory: TrajectoryEngine,
            renderer: VideoRenderer,
            encoder: Box::<FfmpegEncoder>::default(),
            tuner: Box::<GridSearch>::default(),
            views: None,
        }
    }
}

impl<K: FlowKernel> Pipeline<K> {
    /// 替换光流引擎.
    pub fn with_engine<K2: FlowKernel>(self, engine: FlowEngine<K2>) -> Pipeline<K2> {
        Pipeline {
            store: self.store,
            engine,
            trajectory: self.trajectory,
            renderer: self.renderer,
            encoder: self.encoder,
            tuner: self.tuner,
            views: self.views,
        }
    }

    /// 替换视频编码器.
    #[inline]
    pub fn with_encoder<E: VideoEncoder + 'static>(mut self, encoder: E) -> Self {
        self.encoder = Box::new(encoder);
        self
    }

    /// 替换调参器.
    #[inline]
    pub fn with_tuner<T: Tuner + 'static>(mut self, tuner: T) -> Self {
        self.tuner = Box::new(tuner);
        self
    }

    /// 固定参与计算的视图. 默认按每个堆栈的通道数选取.
    #[inline]
    pub fn with_views(mut self, views: ViewSelection) -> Self {
        self.views = Some(views);
        self
    }

    /// 底层存储.
    #[inline]
    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    /// 运行 `op`. 失败时删除其间记录的所有产物和新建的堆栈.
    fn atomically<T>(&self, op: impl FnOnce(&mut Journal) -> Result<T>) -> Result<T> {
        let mut journal = Journal::default();
        let ans = op(&mut journal);
        if ans.is_err() {
            for entry in journal.written.iter().rev() {
                let undone = match entry {
                    Entry::Artifact(artifact) => self.store.discard(artifact),
                    Entry::Stack(handle) => self.store.discard_stack(handle),
                };
                if let Err(e) = undone {
                    log::error!("rollback failed: {e}");
                }
            }
        }
        ans
    }

    /// 导入堆栈; 新建的堆栈目录记入 `journal`.
    fn ingest(
        &self,
        tiff_path: &Path,
        name: Option<&str>,
        journal: &mut Journal,
    ) -> Result<(StackHandle, Stack)> {
        let (handle, stack, created) = self.store.ingest_tracked(tiff_path, name)?;
        if created {
            journal.record_stack(&handle);
        }
        Ok((handle, stack))
    }

    fn views_for(&self, stack: &Stack) -> ViewSelection {
        self.views
            .clone()
            .unwrap_or_else(|| ViewSelection::for_channels(stack.len_channels()))
    }

    /// 细胞类型的已存参数, 没有时为默认值.
    fn stored_params(&self, stack_type: &str) -> Result<ParameterRecord> {
        Ok(match self.store.types().lookup(stack_type)? {
            Some(r) => {
                log::info!("using stored parameters for `{stack_type}`");
                r
            }
            None => {
                log::info!("no stored parameters for `{stack_type}`, using defaults");
                ParameterRecord::default()
            }
        })
    }

    /// 按 `source` 取得参数.
    fn params_for(&self, stack: &Stack, source: ParamSource) -> Result<ParameterRecord> {
        match source {
            ParamSource::Stored => self.stored_params(stack.stack_type()),
            ParamSource::Default => {
                log::info!("using default parameters for `{}`", stack.name());
                Ok(ParameterRecord::default())
            }
            ParamSource::Tune => {
                let base = self.stored_params(stack.stack_type())?;
                let views = self.views_for(stack);
                views.check(stack)?;
                let channel = views.channels()[0];
                log::info!("tuning `{}` on channel {channel}", stack.stack_type());
                let record = self
                    .tuner
                    .tune(stack.channel(channel), &base, self.engine.kernel())?;
                self.store.types().upsert(stack.stack_type(), &record)?;
                Ok(record)
            }
        }
    }

    fn compute_flow(
        &self,
        handle: &StackHandle,
        stack: &Stack,
        params: &ParameterRecord,
        journal: &mut Journal,
    ) -> Result<(Artifact, crate::FlowField)> {
        let flow = self
            .engine
            .compute(stack, params, &self.views_for(stack))?;
        let artifact = self.store.persist_flow(handle, &flow)?;
        journal.record(&artifact);
        Ok((artifact, flow))
    }

    /// 导入一个 TIFF 并计算光流.
    ///
    /// 光流失败时, 本次新导入的堆栈也一并删除.
    pub fn optflow<P: AsRef<Path>>(
        &self,
        tiff_path: P,
        name: Option<&str>,
        source: ParamSource,
    ) -> Result<Artifact> {
        self.atomically(|journal| {
            let (handle, stack) = self.ingest(tiff_path.as_ref(), name, journal)?;
            let params = self.params_for(&stack, source)?;
            let (artifact, _) = self.compute_flow(&handle, &stack, &params, journal)?;
            Ok(artifact)
        })
    }

    /// 对输入目录中的每个 TIFF 调用 [`Pipeline::optflow`], 按文件名顺序.
    ///
    /// 整个调用是一个整体: 任何一个文件失败, 本次已写入的光流和新导入的堆栈全部删除.
    pub fn optflow_inbox(&self, source: ParamSource) -> Result<Vec<Artifact>> {
        let inputs = self.store.inbox_stacks()?;
        if inputs.is_empty() {
            log::warn!("no TIFF stacks in {}", self.store.inbox().display());
        }
        self.atomically(|journal| {
            let mut ans = Vec::with_capacity(inputs.len());
            for path in &inputs {
                log::info!("processing {}", path.display());
                let (handle, stack) = self.ingest(path, None, journal)?;
                let params = self.params_for(&stack, source)?;
                let (artifact, _) = self.compute_flow(&handle, &stack, &params, journal)?;
                ans.push(artifact);
            }
            Ok(ans)
        })
    }

    /// 为已导入的堆栈计算新的光流, 并由其积分得到轨迹.
    pub fn traj(&self, stack: &StackHandle, source: ParamSource) -> Result<TrajOutput> {
        self.atomically(|journal| {
            let data = self.store.load_stack(stack)?;
            let params = self.params_for(&data, source)?;
            let (flow_artifact, flow) = self.compute_flow(stack, &data, &params, journal)?;
            let ArtifactId::Flow(index) = flow_artifact.id else {
                return Err(Error::InvalidSelector(flow_artifact.id.tag()));
            };
            let trajectory = self.trajectory.integrate(&flow, &params.trajectory)?;
            let artifact = self
                .store
                .persist_trajectory(stack, index, &trajectory, false)?;
            journal.record(&artifact);
            Ok(TrajOutput {
                flow: flow_artifact,
                trajectory: artifact,
            })
        })
    }

    /// 由已有的光流 `index` 派生一个新的轨迹.
    ///
    /// 光流不存在时返回 [`Error::UnknownFlowIndex`], 且不写任何文件.
    pub fn traj_from(&self, stack: &StackHandle, index: u32) -> Result<Artifact> {
        self.atomically(|journal| {
            if !self.store.flow_indices(stack)?.contains(&index) {
                return Err(Error::UnknownFlowIndex {
                    stack: stack.name().to_string(),
                    index,
                });
            }
            let flow = self.store.load_flow(stack, index)?;
            let params = self.stored_params(stack.stack_type())?;
            let trajectory = self.trajectory.integrate(&flow, &params.trajectory)?;
            let artifact = self
                .store
                .persist_trajectory(stack, index, &trajectory, true)?;
            journal.record(&artifact);
            Ok(artifact)
        })
    }

    /// 渲染一个已保存的光流或轨迹, 编码并保存为视频.
    pub fn video(
        &self,
        stack: &StackHandle,
        artifact: ArtifactId,
        options: &VideoOptions,
    ) -> Result<VideoArtifact> {
        let (source, kind, field) = match artifact {
            ArtifactId::Flow(i) => (
                VideoSource::Flow(i),
                FieldKind::Flow,
                self.store.load_flow(stack, i)?.into_raw(),
            ),
            ArtifactId::Trajectory(t) => (
                VideoSource::Trajectory(t),
                FieldKind::Trajectory,
                self.store.load_trajectory(stack, t)?.into_raw(),
            ),
            other => return Err(Error::InvalidSelector(other.tag())),
        };
        let overlay = if options.overlay {
            Some(self.store.load_stack(stack)?)
        } else {
            None
        };
        let frames = self
            .renderer
            .render(field.view(), kind, overlay.as_ref(), &options.render)?;
        let encoded = self.encoder.encode(&frames, options.render.fps)?;
        self.store.persist_video(stack, source, &encoded)
    }

    /// 把导入的原始堆栈渲染为视频 `vo{i}`: 每个通道一块灰度图, 从左到右排列.
    pub fn video_stack(&self, stack: &StackHandle, fps: u32) -> Result<VideoArtifact> {
        let data = self.store.load_stack(stack)?;
        let frames = self.renderer.render_stack(&data)?;
        let encoded = self.encoder.encode(&frames, fps)?;
        self.store.persist_video(stack, VideoSource::Stack, &encoded)
    }

    /// 按名字或列表序号 (从 0 开始, 按名字排序) 选择堆栈.
    pub fn resolve_stack(&self, selector: &str) -> Result<StackHandle> {
        let stacks = self.store.stacks()?;
        if let Some(h) = stacks.iter().find(|h| h.name() == selector) {
            return Ok(h.clone());
        }
        match selector.parse::<usize>() {
            Ok(i) => stacks
                .get(i)
                .cloned()
                .ok_or_else(|| Error::InvalidSelector(selector.to_string())),
            Err(_) => Err(Error::UnknownStack(selector.to_string())),
        }
    }
}

/// 解析产物选择器 `f{i}` 或 `t{i}{suffix}`.
pub fn parse_artifact(selector: &str) -> Result<ArtifactId> {
    match ArtifactId::parse_tag(selector.trim()) {
        Some(id @ (ArtifactId::Flow(_) | ArtifactId::Trajectory(_))) => Ok(id),
        _ => Err(Error::InvalidSelector(selector.to_string())),
    }
}

/// 解析轨迹标识 `{i}{suffix}`, 如 `1a`.
pub fn parse_trajectory(selector: &str) -> Result<TrajectoryId> {
    selector
        .trim()
        .parse()
        .map_err(|_| Error::InvalidSelector(selector.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{write_tiff, TiffStackDecoder};
    use crate::params::FlowParams;
    use crate::store::Suffix;
    use image::RgbImage;
    use ndarray::{Array3, ArrayView2, ArrayView3};
    use std::fs;
    use std::sync::{Arc, Mutex};

    /// 把帧数与尺寸写成字节串的假编码器.
    #[derive(Clone, Default)]
    struct FakeEncoder {
        seen: Arc<Mutex<Vec<RgbImage>>>,
    }

    impl VideoEncoder for FakeEncoder {
        fn encode(&self, frames: &[RgbImage], fps: u32) -> Result<Vec<u8>> {
            self.seen.lock().unwrap().extend(frames.iter().cloned());
            let (w, h) = frames[0].dimensions();
            Ok(format!("{} frames {w}x{h} @{fps}", frames.len()).into_bytes())
        }
    }

    struct FailingEncoder;

    impl VideoEncoder for FailingEncoder {
        fn encode(&self, _: &[RgbImage], _: u32) -> Result<Vec<u8>> {
            Err(Error::Encode("boom".into()))
        }
    }

    /// 光流恒为 `(1, 0)` 的快速内核.
    struct Shift;

    impl FlowKernel for Shift {
        fn compute(&self, prev: ArrayView2<f32>, _: ArrayView2<f32>, _: &FlowParams) -> Array3<f32> {
            let (h, w) = prev.dim();
            Array3::from_shape_fn((h, w, 2), |(_, _, c)| if c == 0 { 1.0 } else { 0.0 })
        }
    }

    /// 返回固定记录的调参器.
    struct FixedTuner(Option<ParameterRecord>);

    impl Tuner for FixedTuner {
        fn tune(
            &self,
            _: ArrayView3<f32>,
            _: &ParameterRecord,
            _: &dyn FlowKernel,
        ) -> Result<ParameterRecord> {
            self.0
                .clone()
                .ok_or_else(|| Error::Tuning("no candidate".into()))
        }
    }

    const NAME: &str = "20240101_HELA";

    fn setup() -> (tempfile::TempDir, Pipeline<Shift>, FakeEncoder) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::init(dir.path().join("CellFlow"), false).unwrap();
        write_tiff(
            &store.inbox().join(format!("{NAME}.tiff")),
            (4, 3, 16, 16),
            |t, c, y, x| ((x + y + t) * 10 + c) as u16,
        );
        let encoder = FakeEncoder::default();
        let pipeline = Pipeline::new(store)
            .with_engine(FlowEngine::with_kernel(Shift))
            .with_encoder(encoder.clone());
        (dir, pipeline, encoder)
    }

    fn files(p: &Pipeline<Shift>) -> usize {
        let dir = p.store().root().join(NAME);
        ["flow", "trajectory", "video"]
            .iter()
            .map(|s| fs::read_dir(dir.join(s)).map_or(0, |d| d.count()))
            .sum()
    }

    #[test]
    fn test_end_to_end_scenario() {
        let (_d, p, encoder) = setup();

        let flows = p.optflow_inbox(ParamSource::Default).unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].id, ArtifactId::Flow(0));
        assert!(flows[0].path.ends_with(format!("{NAME}/flow/{NAME}_f0.npy")));

        let stack = p.resolve_stack(NAME).unwrap();
        assert_eq!(p.resolve_stack("0").unwrap(), stack);

        let out = p.traj(&stack, ParamSource::Stored).unwrap();
        assert_eq!(out.flow.id.tag(), "f1");
        assert_eq!(out.trajectory.id.tag(), "t1");

        let t1a = p.traj_from(&stack, 1).unwrap();
        assert_eq!(t1a.id.tag(), "t1a");
        let t1b = p.traj_from(&stack, 1).unwrap();
        assert_eq!(t1b.id.tag(), "t1b");
        assert!(t1b.path.ends_with(format!("trajectory/{NAME}_t1b.npy")));

        let before = files(&p);
        let err = p.traj_from(&stack, 99).unwrap_err();
        assert!(matches!(err, Error::UnknownFlowIndex { index: 99, .. }));
        assert_eq!(files(&p), before);

        let opts = VideoOptions {
            overlay: true,
            ..VideoOptions::default()
        };
        let video = p
            .video(&stack, parse_artifact("t1a").unwrap(), &opts)
            .unwrap();
        let source = TrajectoryId::new(1, Suffix::from_ordinal(1));
        assert_eq!(video.source, VideoSource::Trajectory(source));
        assert_eq!(video.artifact.id.tag(), "vt1a");
        // 三个视图并排, 每帧 48x16.
        assert_eq!(fs::read(&video.artifact.path).unwrap(), b"4 frames 48x16 @10");
        // 底图可见: 没有箭头的视图区域不是全黑.
        {
            let seen = encoder.seen.lock().unwrap();
            assert_ne!(seen[0].get_pixel(47, 15).0, crate::consts::rgb::BLACK);
        }

        let flow_video = p.video(&stack, ArtifactId::Flow(0), &VideoOptions::default()).unwrap();
        assert_eq!(flow_video.artifact.id.tag(), "vf0");

        // 视频名带完整的轨迹标识, 同一轨迹的后续视频加序号.
        let tags: Vec<_> = ["t1", "t1a", "t1"]
            .iter()
            .map(|sel| {
                let id = parse_artifact(sel).unwrap();
                p.video(&stack, id, &VideoOptions::default()).unwrap().artifact.id.tag()
            })
            .collect();
        assert_eq!(tags, ["vt1", "vt1a_1", "vt1_1"]);

        let original = p.video_stack(&stack, 5).unwrap();
        assert_eq!(original.source, VideoSource::Stack);
        assert_eq!(original.artifact.id.tag(), "vo0");
        assert!(original.artifact.path.ends_with(format!("video/{NAME}_vo0.mp4")));
        assert_eq!(fs::read(&original.artifact.path).unwrap(), b"4 frames 48x16 @5");
    }

    #[test]
    fn test_stack_outlives_inbox_tiff() {
        let (_d, p, _) = setup();
        p.optflow_inbox(ParamSource::Default).unwrap();
        fs::remove_file(p.store().inbox().join(format!("{NAME}.tiff"))).unwrap();

        let stack = p.resolve_stack(NAME).unwrap();
        let out = p.traj(&stack, ParamSource::Default).unwrap();
        let opts = VideoOptions {
            overlay: true,
            ..VideoOptions::default()
        };
        let video = p.video(&stack, out.trajectory.id, &opts).unwrap();
        assert_eq!(fs::read(&video.artifact.path).unwrap(), b"4 frames 48x16 @10");
        assert_eq!(p.video_stack(&stack, 10).unwrap().artifact.id.tag(), "vo0");
    }

    #[test]
    fn test_channel_count_carries_into_traj_and_video() {
        let (_d, p, encoder) = setup();
        let store = ProjectStore::open(p.store().root())
            .unwrap()
            .with_decoder(TiffStackDecoder::new(2).unwrap());
        let two = Pipeline::new(store)
            .with_engine(FlowEngine::with_kernel(Shift))
            .with_encoder(encoder);
        // 4 帧 3 通道共 12 页, 按 2 通道读作 6 帧.
        two.optflow_inbox(ParamSource::Default).unwrap();

        // 默认 3 通道的流水线读到的是导入时保存的数组.
        let stack = p.resolve_stack(NAME).unwrap();
        let out = p.traj(&stack, ParamSource::Default).unwrap();
        assert_eq!(p.store().load_flow(&stack, 1).unwrap().shape(), (6, 2, 16, 16, 2));
        let ArtifactId::Trajectory(t) = out.trajectory.id else {
            unreachable!()
        };
        assert_eq!(p.store().load_trajectory(&stack, t).unwrap().shape(), (6, 2, 16, 16, 2));

        let opts = VideoOptions {
            overlay: true,
            ..VideoOptions::default()
        };
        let video = p.video(&stack, out.trajectory.id, &opts).unwrap();
        assert_eq!(fs::read(&video.artifact.path).unwrap(), b"6 frames 32x16 @10");
        let original = p.video_stack(&stack, 10).unwrap();
        assert_eq!(fs::read(&original.artifact.path).unwrap(), b"6 frames 32x16 @10");
    }

    #[test]
    fn test_failed_optflow_discards_new_stack() {
        let (_d, p, _) = setup();
        let p = p.with_views(ViewSelection::new(vec![5], false).unwrap());
        let tiff = p.store().inbox().join(format!("{NAME}.tiff"));
        assert!(matches!(
            p.optflow(&tiff, None, ParamSource::Default),
            Err(Error::ShapeMismatch(_))
        ));
        assert!(p.store().stacks().unwrap().is_empty());
        assert!(!p.store().root().join(NAME).exists());
        assert!(matches!(
            p.optflow_inbox(ParamSource::Default),
            Err(Error::ShapeMismatch(_))
        ));
        assert!(p.store().stacks().unwrap().is_empty());
    }

    #[test]
    fn test_failed_optflow_keeps_existing_stack() {
        let (_d, p, _) = setup();
        p.optflow_inbox(ParamSource::Default).unwrap();
        let p = p.with_views(ViewSelection::new(vec![5], false).unwrap());
        assert!(p.optflow_inbox(ParamSource::Default).is_err());
        let stack = p.resolve_stack(NAME).unwrap();
        assert_eq!(p.store().flow_indices(&stack).unwrap().len(), 1);
    }

    #[test]
    fn test_tune_rejects_out_of_range_views() {
        let (_d, p, _) = setup();
        let p = p
            .with_tuner(FixedTuner(Some(ParameterRecord::default())))
            .with_views(ViewSelection::new(vec![1, 3], false).unwrap());
        assert!(matches!(
            p.optflow_inbox(ParamSource::Tune),
            Err(Error::ShapeMismatch(_))
        ));
        assert_eq!(p.store().types().lookup("HELA").unwrap(), None);
        assert!(p.store().stacks().unwrap().is_empty());
    }

    #[test]
    fn test_trajectory_matches_constant_flow() {
        let (_d, p, _) = setup();
        let stack = p.store().ingest(p.store().inbox().join(format!("{NAME}.tiff")), None).unwrap().0;
        let out = p.traj(&stack, ParamSource::Default).unwrap();
        let ArtifactId::Trajectory(id) = out.trajectory.id else {
            unreachable!()
        };
        let traj = p.store().load_trajectory(&stack, id).unwrap();
        assert_eq!(traj.shape(), (4, 3, 16, 16, 2));
        // 视图 1: 每帧右移 1 像素, 粒子在远离右边界处.
        assert!((traj.view_at(1)[(3, 5, 2, 0)] - 3.0).abs() < 1e-5);
        // 和视图为两者之和.
        assert!((traj.view_at(0)[(1, 5, 2, 0)] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_fixed_views() {
        let (_d, p, _) = setup();
        let p = p.with_views(ViewSelection::new(vec![2], false).unwrap());
        let flow = p.optflow_inbox(ParamSource::Default).unwrap();
        let stack = p.resolve_stack(NAME).unwrap();
        let ArtifactId::Flow(i) = flow[0].id else {
            unreachable!()
        };
        assert_eq!(p.store().load_flow(&stack, i).unwrap().shape(), (4, 1, 16, 16, 2));
    }

    #[test]
    fn test_failed_video_leaves_nothing() {
        let (_d, p, _) = setup();
        let p = p.with_encoder(FailingEncoder);
        p.optflow_inbox(ParamSource::Default).unwrap();
        let stack = p.resolve_stack(NAME).unwrap();
        let before = files(&p);
        assert!(matches!(
            p.video(&stack, ArtifactId::Flow(0), &VideoOptions::default()),
            Err(Error::Encode(_))
        ));
        assert_eq!(files(&p), before);
        assert!(matches!(
            p.video(&stack, ArtifactId::Flow(3), &VideoOptions::default()),
            Err(Error::ArtifactNotFound(_))
        ));
    }

    #[test]
    fn test_failed_traj_rolls_back_flow() {
        let (_d, p, _) = setup();
        p.optflow_inbox(ParamSource::Default).unwrap();
        let stack = p.resolve_stack(NAME).unwrap();
        // 让轨迹目标位置被一个目录占用, 使写入失败.
        fs::remove_dir_all(stack.dir().join("trajectory")).unwrap();
        fs::write(stack.dir().join("trajectory"), b"not a directory").unwrap();
        assert!(p.traj(&stack, ParamSource::Default).is_err());
        assert_eq!(p.store().flow_indices(&stack).unwrap().len(), 1);
    }

    #[test]
    fn test_tune_upserts_only_on_success() {
        let (_d, p, _) = setup();
        let p = p.with_tuner(FixedTuner(None));
        assert!(matches!(
            p.optflow_inbox(ParamSource::Tune),
            Err(Error::Tuning(_))
        ));
        assert_eq!(p.store().types().lookup("HELA").unwrap(), None);

        let mut tuned = ParameterRecord::default();
        tuned.flow.winsize = 31;
        let p = p.with_tuner(FixedTuner(Some(tuned.clone())));
        assert_eq!(p.optflow_inbox(ParamSource::Tune).unwrap().len(), 1);
        assert_eq!(p.store().types().lookup("HELA").unwrap(), Some(tuned));
    }

    #[test]
    fn test_malformed_inbox_name() {
        let (_d, p, _) = setup();
        fs::copy(
            p.store().inbox().join(format!("{NAME}.tiff")),
            p.store().inbox().join("zz_bad name.tif"),
        )
        .unwrap();
        // 先处理合法文件, 随后因非法文件失败, 整体回滚.
        assert!(matches!(
            p.optflow_inbox(ParamSource::Default),
            Err(Error::MalformedStackName(_))
        ));
        // 合法文件的堆栈也是本次新建的, 一并删除.
        assert!(p.store().stacks().unwrap().is_empty());
        assert!(matches!(p.resolve_stack(NAME), Err(Error::UnknownStack(_))));
    }

    #[test]
    fn test_selectors() {
        assert_eq!(parse_artifact("f2").unwrap(), ArtifactId::Flow(2));
        assert_eq!(
            parse_artifact("t1a").unwrap(),
            ArtifactId::Trajectory(TrajectoryId::new(1, Suffix::from_ordinal(1)))
        );
        for bad in ["vf0", "x1", "f01", ""] {
            assert!(matches!(parse_artifact(bad), Err(Error::InvalidSelector(_))));
        }
        assert_eq!(parse_trajectory("12").unwrap(), TrajectoryId::new(12, Suffix::EMPTY));

        let (_d, p, _) = setup();
        p.optflow_inbox(ParamSource::Default).unwrap();
        assert!(matches!(p.resolve_stack("7"), Err(Error::InvalidSelector(_))));
        assert!(matches!(p.resolve_stack("nope"), Err(Error::UnknownStack(_))));
    }
}
