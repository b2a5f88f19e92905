//! 交互式选择.

use cell_flow::prelude::*;
use std::io::{BufRead, Write};

use crate::runner::CliError;

/// 从 `input` 读取回答, 向 `out` 写提示.
pub struct Prompter<'a> {
    input: &'a mut dyn BufRead,
    out: &'a mut dyn Write,
}

impl<'a> Prompter<'a> {
    pub fn new(input: &'a mut dyn BufRead, out: &'a mut dyn Write) -> Self {
        Self { input, out }
    }

    /// 输出流.
    #[inline]
    pub fn out(&mut self) -> &mut dyn Write {
        &mut *self.out
    }

    /// 提问并读取一行 (去掉首尾空白). 输入结束时返回错误.
    pub fn ask(&mut self, question: &str) -> Result<String, CliError> {
        write!(self.out, "{question}: ")?;
        self.out.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(CliError::Usage(format!("no answer for `{question}`")));
        }
        Ok(line.trim().to_string())
    }

    /// 列出所有堆栈并让用户按序号或名字选择.
    pub fn choose_stack(&mut self, store: &ProjectStore) -> Result<String, CliError> {
        let stacks = store.stacks()?;
        if stacks.is_empty() {
            return Err(CliError::Usage(
                "no stacks in the project yet, run `cf optflow` first".to_string(),
            ));
        }
        writeln!(self.out, "Please select a stack:")?;
        for (i, h) in stacks.iter().enumerate() {
            writeln!(self.out, "[{i}]: {}", h.name())?;
        }
        self.ask("stack number or name")
    }

    /// 让用户输入产物标签. 输入 `l` 或 `list` 时先列出可选标签.
    pub fn choose_artifact(
        &mut self,
        store: &ProjectStore,
        stack: &StackHandle,
    ) -> Result<String, CliError> {
        let question = format!("artifact tag for `{}` (`l` to list)", stack.name());
        loop {
            let answer = self.ask(&question)?;
            if !matches!(answer.to_lowercase().as_str(), "l" | "list") {
                return Ok(answer);
            }
            for i in store.flow_indices(stack)? {
                writeln!(self.out, "{}", ArtifactId::Flow(i))?;
            }
            for t in store.trajectory_ids(stack)? {
                writeln!(self.out, "{}", ArtifactId::Trajectory(t))?;
            }
        }
    }

    /// 让用户输入已有光流的版本号.
    pub fn choose_flow_index(
        &mut self,
        store: &ProjectStore,
        stack: &StackHandle,
    ) -> Result<String, CliError> {
        let flows: Vec<String> = store
            .flow_indices(stack)?
            .into_iter()
            .map(|i| i.to_string())
            .collect();
        writeln!(self.out, "Available flows: {}", flows.join(", "))?;
        self.ask("flow index")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_trims_and_detects_eof() {
        let mut input: &[u8] = b"  t1a \n";
        let mut out = Vec::new();
        let mut p = Prompter::new(&mut input, &mut out);
        assert_eq!(p.ask("tag").unwrap(), "t1a");
        assert!(matches!(p.ask("tag"), Err(CliError::Usage(_))));
        assert!(String::from_utf8(out).unwrap().starts_with("tag: "));
    }
}
