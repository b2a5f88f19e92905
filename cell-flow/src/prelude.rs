//! 🧫欢迎光临🔬
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx2d;
pub use crate::Error;

pub use crate::data::{FieldKind, FlowField, Stack, StackDecoder, TiffStackDecoder, TrajectoryField};

pub use crate::params::{FlowParams, Integration, ParameterRecord, ProcessParams, TrajectoryParams};

pub use crate::store::{
    Artifact, ArtifactId, ArtifactKind, ProjectStore, StackHandle, Suffix, TrajectoryId,
    VideoArtifact, VideoSource,
};

pub use crate::flow::{DenseLucasKanade, FlowEngine, FlowKernel, ViewSelection};
pub use crate::trajectory::TrajectoryEngine;
pub use crate::tuning::{GridSearch, Tuner};
pub use crate::video::{FfmpegEncoder, RenderOptions, RenderStyle, VideoEncoder, VideoRenderer};

pub use crate::pipeline::{parse_artifact, parse_trajectory, ParamSource, Pipeline, VideoOptions};
