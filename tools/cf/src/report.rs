//! `cf list` 的输出.

use cell_flow::prelude::*;
use std::io::Write;

use crate::runner::CliError;

const S4: &str = "    ";

/// 将一个堆栈的元数据与全部产物写进 `w` 中.
pub fn describe_into<W: Write + ?Sized>(
    store: &ProjectStore,
    stack: &StackHandle,
    w: &mut W,
) -> Result<(), CliError> {
    #[inline]
    fn join<I: IntoIterator<Item = ArtifactId>>(it: I) -> String {
        let tags: Vec<String> = it.into_iter().map(|id| id.tag()).collect();
        if tags.is_empty() {
            "/".to_string()
        } else {
            tags.join(" ")
        }
    }

    writeln!(w, "Stack `{}`:", stack.name())?;
    writeln!(w, "{S4}Cell type: {}", stack.stack_type())?;
    writeln!(w, "{S4}Source: {}", stack.meta().path.display())?;
    writeln!(
        w,
        "{S4}Flows: {}",
        join(store.flow_indices(stack)?.into_iter().map(ArtifactId::Flow))
    )?;
    writeln!(
        w,
        "{S4}Trajectories: {}",
        join(
            store
                .trajectory_ids(stack)?
                .into_iter()
                .map(ArtifactId::Trajectory)
        )
    )?;
    writeln!(w, "{S4}Videos: {}", join(store.video_ids(stack)?))?;
    Ok(())
}

/// 列出工程. 给出 `stack` 时只描述该堆栈.
pub fn list_into<W: Write + ?Sized>(
    store: &ProjectStore,
    stack: Option<&StackHandle>,
    w: &mut W,
) -> Result<(), CliError> {
    if let Some(stack) = stack {
        return describe_into(store, stack, w);
    }

    writeln!(w, "Project {}", store.root().display())?;
    let types = store.types().all()?;
    if !types.is_empty() {
        let names: Vec<_> = types.iter().map(|(t, _)| t.as_str()).collect();
        writeln!(w, "{S4}Tuned cell types: {}", names.join(", "))?;
    }
    let pending = store.inbox_stacks()?;
    writeln!(w, "{S4}Pending in inbox: {}", pending.len())?;
    for (i, stack) in store.stacks()?.iter().enumerate() {
        utils::sep_to(&mut *w)?;
        write!(w, "[{i}] ")?;
        describe_into(store, stack, w)?;
    }
    Ok(())
}
