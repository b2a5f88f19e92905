//! `types.json`: 细胞类型 -> 调参结果.

use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::write_atomic;
use crate::params::{ParameterRecord, SCHEMA_VERSION};
use crate::{Error, Result};

/// 持久化的细胞类型参数表.
///
/// 每次 [`TypeParameterStore::upsert`] 都立即落盘 (临时文件 + 重命名),
/// 以免长时间调参的结果因崩溃丢失.
///
/// # 注意
///
/// `upsert` 是读-改-写操作. 同一工程中并发调参 (尤其是同一细胞类型)
/// 必须由调用方串行化, 本结构不做仲裁.
#[derive(Clone, Debug)]
pub struct TypeParameterStore {
    path: PathBuf,
}

impl TypeParameterStore {
    /// 绑定到 `path` 处的 `types.json`.
    #[inline]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_owned(),
        }
    }

    /// 文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读出整张表. 文件不存在时视为空表.
    fn read_map(&self) -> Result<Map<String, Value>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(Error::decode(&self.path, e)),
        };
        serde_json::from_str(&text).map_err(|e| Error::decode(&self.path, e))
    }

    fn record_from(&self, stack_type: &str, v: Value) -> Result<ParameterRecord> {
        let record: ParameterRecord =
            serde_json::from_value(v).map_err(|e| Error::decode(&self.path, e))?;
        if !record.is_current() {
            return Err(Error::decode(
                &self.path,
                format!(
                    "record `{stack_type}` has schema version {}, expected {SCHEMA_VERSION}",
                    record.version
                ),
            ));
        }
        Ok(record)
    }

    /// 查询 `stack_type` 的参数. 从未保存过时返回 `Ok(None)`.
    pub fn lookup(&self, stack_type: &str) -> Result<Option<ParameterRecord>> {
        let mut map = self.read_map()?;
        map.remove(stack_type)
            .map(|v| self.record_from(stack_type, v))
            .transpose()
    }

    /// 插入或覆盖 `stack_type` 的参数, 并立即落盘.
    pub fn upsert(&self, stack_type: &str, record: &ParameterRecord) -> Result<()> {
        let mut map = self.read_map()?;
        let value = serde_json::to_value(record).map_err(|e| Error::decode(&self.path, e))?;
        map.insert(stack_type.to_string(), value);
        self.write_map(&map)?;
        log::info!("saved parameters for cell type `{stack_type}`");
        Ok(())
    }

    /// 全部记录, 按细胞类型排序.
    pub fn all(&self) -> Result<Vec<(String, ParameterRecord)>> {
        let mut ans: Vec<_> = self
            .read_map()?
            .into_iter()
            .map(|(k, v)| self.record_from(&k, v).map(|r| (k, r)))
            .collect::<Result<_>>()?;
        ans.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ans)
    }

    /// 写入一张空表 (工程初始化时使用).
    pub(crate) fn write_empty(&self) -> Result<()> {
        self.write_map(&Map::new())
    }

    fn write_map(&self, map: &Map<String, Value>) -> Result<()> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        write_atomic(dir, &self.path, true, |w| {
            serde_json::to_writer_pretty(&mut *w, map).map_err(std::io::Error::other)?;
            w.write_all(b"\n")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Integration;

    fn store() -> (tempfile::TempDir, TypeParameterStore) {
        let dir = tempfile::tempdir().unwrap();
        let s = TypeParameterStore::new(dir.path().join("types.json"));
        s.write_empty().unwrap();
        (dir, s)
    }

    #[test]
    fn test_lookup_unseen() {
        let (_d, s) = store();
        assert_eq!(s.lookup("HELA").unwrap(), None);
    }

    #[test]
    fn test_upsert_then_lookup() {
        let (_d, s) = store();
        let mut r = ParameterRecord::default();
        r.flow.winsize = 21;
        s.upsert("HELA", &r).unwrap();

        let mut other = ParameterRecord::default();
        other.trajectory.integration = Integration::Eulerian;
        s.upsert("U2OS", &other).unwrap();

        assert_eq!(s.lookup("HELA").unwrap(), Some(r.clone()));
        assert_eq!(s.lookup("U2OS").unwrap(), Some(other));

        r.flow.winsize = 9;
        s.upsert("HELA", &r).unwrap();
        assert_eq!(s.lookup("HELA").unwrap().unwrap().flow.winsize, 9);
        assert_eq!(s.all().unwrap().len(), 2);

        // 仍是人类可读的 json.
        let text = fs::read_to_string(s.path()).unwrap();
        assert!(text.contains("\"HELA\""));
    }

    #[test]
    fn test_stale_schema_is_rejected() {
        let (_d, s) = store();
        fs::write(s.path(), r#"{"HELA": {"version": 0}}"#).unwrap();
        assert!(matches!(s.lookup("HELA"), Err(Error::Decode { .. })));
        // 其它类型不受影响.
        assert_eq!(s.lookup("U2OS").unwrap(), None);
    }
}
