use crate::tree::{self, Tree, Value};
use crate::types::LeafKind;
use std::fmt::Write;

/// Renders one row per leaf (path, kind, shape, element count) followed by
/// the number of trainable and non-trainable elements.
///
/// Absent leaves are shown with a `-` shape and do not count.
pub fn tabulate<T: Tree + ?Sized>(tree: &T) -> String {
    let rows: Vec<(String, String, String, usize)> = tree::flatten(tree)
        .into_iter()
        .map(|(path, leaf)| {
            let (shape, size) = match leaf.value() {
                Some(Value::Array(t)) => (format!("{:?}", t.shape()), t.numel()),
                Some(Value::Key(k)) => (format!("{:?}", k), 1),
                None => ("-".to_string(), 0),
            };
            (path.to_string(), leaf.kind().to_string(), shape, size)
        })
        .collect();

    let path_width = rows.iter().map(|r| r.0.len()).max().unwrap_or(0).max(4);
    let shape_width = rows.iter().map(|r| r.2.len()).max().unwrap_or(0).max(5);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<pw$}  {:<11}  {:<sw$}  {:>8}",
        "path",
        "kind",
        "shape",
        "size",
        pw = path_width,
        sw = shape_width
    );
    for (path, kind, shape, size) in &rows {
        let _ = writeln!(
            out,
            "{:<pw$}  {:<11}  {:<sw$}  {:>8}",
            path,
            kind,
            shape,
            size,
            pw = path_width,
            sw = shape_width
        );
    }

    let parameter = LeafKind::Parameter.to_string();
    let (trainable, other): (Vec<_>, Vec<_>) = rows.iter().partition(|r| r.1 == parameter);
    let _ = writeln!(
        out,
        "Total parameters: {}",
        trainable.iter().map(|r| r.3).sum::<usize>()
    );
    let _ = write!(
        out,
        "Total state: {}",
        other.iter().map(|r| r.3).sum::<usize>()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TreexError;
    use crate::nn::{Linear, Module};
    use crate::tensor::Tensor;

    #[test]
    fn test_tabulate_lists_leaves_and_totals() -> Result<(), TreexError> {
        let layer = Linear::new(3).init(0, &Tensor::zeros(&[1, 2]))?;
        let table = tabulate(&layer);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[1].starts_with("kernel"));
        assert!(lines[1].contains("[2, 3]"));
        assert!(lines[2].starts_with("bias"));
        assert_eq!(lines[3], "Total parameters: 9");
        assert_eq!(lines[4], "Total state: 0");
        Ok(())
    }

    #[test]
    fn test_tabulate_uninitialized_shows_absent() {
        let table = tabulate(&Linear::new(3));
        assert!(table.contains("Total parameters: 0"));
        assert!(table.lines().nth(1).map_or(false, |l| l.contains(" - ")));
    }
}
