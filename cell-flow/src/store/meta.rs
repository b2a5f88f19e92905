//! 堆栈名解析与 `meta.json`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// 每个堆栈的元数据记录. 导入时写入一次, 之后不再修改.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProjectMeta {
    /// 原始 TIFF 路径.
    pub path: PathBuf,

    /// 细胞类型.
    #[serde(alias = "stacktype")]
    pub stack_type: String,

    /// 堆栈名.
    pub name: String,
}

/// 从 `DATE_CELLTYPE` 形式的名字中解析出细胞类型.
///
/// 以第一个 `_` 分隔: `DATE` 必须非空且只含数字和 `-`; `CELLTYPE`
/// 必须非空, 不含路径分隔符和空白. 细胞类型本身允许包含 `_`.
pub fn parse_stack_type(name: &str) -> Result<&str> {
    let malformed = || Error::MalformedStackName(name.to_string());
    let (date, cell_type) = name.split_once('_').ok_or_else(malformed)?;
    let date_ok = !date.is_empty() && date.bytes().all(|b| b.is_ascii_digit() || b == b'-');
    let type_ok = !cell_type.is_empty()
        && !cell_type
            .chars()
            .any(|c| c.is_whitespace() || std::path::is_separator(c) || c == '.');
    if date_ok && type_ok {
        Ok(cell_type)
    } else {
        Err(malformed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stack_type() {
        assert_eq!(parse_stack_type("20240101_HELA").unwrap(), "HELA");
        assert_eq!(parse_stack_type("2024-01-01_U2OS").unwrap(), "U2OS");
        assert_eq!(parse_stack_type("20240101_MCF_7").unwrap(), "MCF_7");
    }

    #[test]
    fn test_malformed_stack_names() {
        for name in [
            "HELA",
            "_HELA",
            "20240101_",
            "jan_HELA",
            "20240101_HE LA",
            "20240101_a/b",
            "",
        ] {
            assert!(
                matches!(parse_stack_type(name), Err(Error::MalformedStackName(_))),
                "{name}"
            );
        }
    }

    #[test]
    fn test_meta_accepts_legacy_key() {
        let m: ProjectMeta =
            serde_json::from_str(r#"{"path": "/a.tif", "stacktype": "HELA", "name": "1_HELA"}"#)
                .unwrap();
        assert_eq!(m.stack_type, "HELA");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["stack_type"], "HELA");
    }
}
