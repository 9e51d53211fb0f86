//! Error handling helpers and primitives.

use anyhow::Error;

/// Flattens an error and its `anyhow` context chain into a single colon-joined
/// string, outermost context first. Used by the top-level CLI handler to produce
/// the single stderr line the runtime reports on a fatal setup failure.
pub fn chain(err: &Error) -> String {
    err.chain()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn chain_joins_outermost_first() {
        let root = anyhow!("no such file");
        let wrapped = root.context("extract image");

        assert_eq!(chain(&wrapped), "extract image: no such file");
    }

    #[test]
    fn chain_single_error() {
        let err = anyhow!("boom");
        assert_eq!(chain(&err), "boom");
    }
}
