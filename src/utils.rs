use anyhow::{Context, Result, bail};
use std::{fmt::Debug, ops::RangeBounds};

pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

/// Name of the action with the given index.
pub fn action_name(idx: usize) -> String {
    format!("a{idx}")
}

/// Name of the pathway with the given index.
pub fn pathway_name(idx: usize) -> String {
    format!("P{idx}")
}

/// Parse an action name of the form `a{idx}` and check that `idx < n_actions`.
pub fn parse_action_name(name: &str, n_actions: usize) -> Result<usize> {
    let Some(digits) = name.strip_prefix('a') else {
        bail!("action name must start with 'a', but is {name:?}");
    };
    let idx: usize = digits
        .parse()
        .with_context(|| format!("failed to parse action index from {name:?}"))?;
    check_num(idx, 0..n_actions).with_context(|| format!("action {name:?} does not exist"))?;
    Ok(idx)
}
